use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use retinue_core::{ComponentIndex, WorldMetadata};

use crate::entity::Entity;
use crate::error::MatcherError;

struct MatcherInner {
    all_of: Box<[ComponentIndex]>,
    any_of: Box<[ComponentIndex]>,
    none_of: Box<[ComponentIndex]>,
    indices: Box<[ComponentIndex]>,
    metadata: Option<Rc<WorldMetadata>>,
}

/// An immutable predicate over component presence.
///
/// An entity matches when it has every `all_of` index, at least one `any_of`
/// index (if any are given) and no `none_of` index.
///
/// Equality and hashing are by instance: clones are equal, but two matchers
/// built separately from the same indices are distinct, and a world keeps one
/// group per matcher instance.
#[derive(Clone)]
pub struct Matcher(Rc<MatcherInner>);

impl Matcher {
    pub fn builder() -> MatcherBuilder {
        MatcherBuilder::default()
    }

    /// Match entities having every index in `indices`.
    pub fn all_of(indices: impl IntoIterator<Item = ComponentIndex>) -> Self {
        Self::builder().all_of(indices).build()
    }

    /// Match entities having at least one index in `indices`.
    pub fn any_of(indices: impl IntoIterator<Item = ComponentIndex>) -> Self {
        Self::builder().any_of(indices).build()
    }

    /// Match entities having none of `indices`.
    pub fn none_of(indices: impl IntoIterator<Item = ComponentIndex>) -> Self {
        Self::builder().none_of(indices).build()
    }

    pub fn all_of_indices(&self) -> &[ComponentIndex] {
        &self.0.all_of
    }

    pub fn any_of_indices(&self) -> &[ComponentIndex] {
        &self.0.any_of
    }

    pub fn none_of_indices(&self) -> &[ComponentIndex] {
        &self.0.none_of
    }

    /// Every index whose change can affect the result, ascending.
    pub fn indices(&self) -> &[ComponentIndex] {
        &self.0.indices
    }

    /// Pure presence test; safe to call any number of times.
    pub fn matches(&self, entity: &Entity) -> bool {
        let inner = &self.0;
        entity.has_components(&inner.all_of)
            && (inner.any_of.is_empty() || entity.has_any_component(&inner.any_of))
            && !entity.has_any_component(&inner.none_of)
    }

    /// Whether an entity without components satisfies this matcher.
    pub fn matches_empty(&self) -> bool {
        self.0.all_of.is_empty() && self.0.any_of.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn write_clause(
        &self,
        f: &mut fmt::Formatter<'_>,
        label: &str,
        indices: &[ComponentIndex],
    ) -> fmt::Result {
        f.write_str(label)?;
        f.write_str("(")?;
        for (i, &index) in indices.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match &self.0.metadata {
                Some(meta) => f.write_str(&meta.component_name(index))?,
                None => write!(f, "{index}")?,
            }
        }
        f.write_str(")")
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Matcher {}

impl Hash for Matcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses = [
            ("AllOf", &self.0.all_of),
            ("AnyOf", &self.0.any_of),
            ("NoneOf", &self.0.none_of),
        ];
        let mut first = true;
        for (label, indices) in clauses {
            if indices.is_empty() {
                continue;
            }
            if !first {
                f.write_str(".")?;
            }
            first = false;
            self.write_clause(f, label, indices)?;
        }
        if first {
            f.write_str("Any")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({self})")
    }
}

/// Accumulates clauses for a [`Matcher`]. Repeated calls to the same clause
/// extend it.
#[derive(Debug, Clone, Default)]
pub struct MatcherBuilder {
    all_of: Vec<ComponentIndex>,
    any_of: Vec<ComponentIndex>,
    none_of: Vec<ComponentIndex>,
    metadata: Option<Rc<WorldMetadata>>,
}

impl MatcherBuilder {
    pub fn all_of(mut self, indices: impl IntoIterator<Item = ComponentIndex>) -> Self {
        self.all_of.extend(indices);
        self
    }

    pub fn any_of(mut self, indices: impl IntoIterator<Item = ComponentIndex>) -> Self {
        self.any_of.extend(indices);
        self
    }

    pub fn none_of(mut self, indices: impl IntoIterator<Item = ComponentIndex>) -> Self {
        self.none_of.extend(indices);
        self
    }

    /// Require every single-index matcher in `matchers`.
    pub fn all_of_matchers(mut self, matchers: &[Matcher]) -> Result<Self, MatcherError> {
        self.all_of.extend(single_indices(matchers)?);
        Ok(self)
    }

    /// Require at least one single-index matcher in `matchers`.
    pub fn any_of_matchers(mut self, matchers: &[Matcher]) -> Result<Self, MatcherError> {
        self.any_of.extend(single_indices(matchers)?);
        Ok(self)
    }

    /// Exclude every single-index matcher in `matchers`.
    pub fn none_of_matchers(mut self, matchers: &[Matcher]) -> Result<Self, MatcherError> {
        self.none_of.extend(single_indices(matchers)?);
        Ok(self)
    }

    /// Use `metadata` to print component names instead of indices.
    pub fn with_metadata(mut self, metadata: Rc<WorldMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> Matcher {
        let all_of = normalize(self.all_of);
        let any_of = normalize(self.any_of);
        let none_of = normalize(self.none_of);
        let indices = normalize(
            all_of
                .iter()
                .chain(any_of.iter())
                .chain(none_of.iter())
                .copied()
                .collect(),
        );
        Matcher(Rc::new(MatcherInner {
            all_of,
            any_of,
            none_of,
            indices,
            metadata: self.metadata,
        }))
    }
}

fn normalize(mut indices: Vec<ComponentIndex>) -> Box<[ComponentIndex]> {
    indices.sort_unstable();
    indices.dedup();
    indices.into_boxed_slice()
}

fn single_indices(matchers: &[Matcher]) -> Result<Vec<ComponentIndex>, MatcherError> {
    matchers
        .iter()
        .map(|matcher| match matcher.indices() {
            [index] => Ok(*index),
            other => Err(MatcherError::NotSingleIndex {
                matcher: matcher.to_string(),
                count: other.len(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentPools, ComponentRef};
    use retinue_core::OwnerId;

    fn entity_with(total: usize, indices: &[ComponentIndex]) -> Entity {
        let entity = Entity::new(
            Rc::new(ComponentPools::new(total)),
            Rc::new(WorldMetadata::unnamed(total)),
        );
        entity.activate(0, OwnerId::from_raw(0));
        for &index in indices {
            entity.add_component(index, ComponentRef::new(())).unwrap();
        }
        entity
    }

    #[test]
    fn indices_are_sorted_union() {
        let m = Matcher::builder().all_of([3, 1, 1]).any_of([2]).none_of([0, 3]).build();
        assert_eq!(m.all_of_indices(), &[1, 3]);
        assert_eq!(m.indices(), &[0, 1, 2, 3]);
    }

    #[test]
    fn all_of_requires_every_index() {
        let m = Matcher::all_of([0, 1]);
        assert!(!m.matches(&entity_with(3, &[0])));
        assert!(m.matches(&entity_with(3, &[0, 1])));
        assert!(m.matches(&entity_with(3, &[0, 1, 2])));
    }

    #[test]
    fn any_of_requires_one_index() {
        let m = Matcher::any_of([0, 1]);
        assert!(!m.matches(&entity_with(3, &[2])));
        assert!(m.matches(&entity_with(3, &[1])));
    }

    #[test]
    fn none_of_excludes() {
        let m = Matcher::builder().all_of([0]).none_of([2]).build();
        assert!(m.matches(&entity_with(3, &[0, 1])));
        assert!(!m.matches(&entity_with(3, &[0, 2])));
        assert!(!m.matches_empty());
        assert!(Matcher::none_of([2]).matches_empty());
    }

    #[test]
    fn identity_not_structure() {
        let a = Matcher::all_of([0]);
        let b = Matcher::all_of([0]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn compose_from_single_index_matchers() {
        let position = Matcher::all_of([0]);
        let velocity = Matcher::all_of([1]);
        let m = Matcher::builder()
            .all_of_matchers(&[position.clone(), velocity])
            .unwrap()
            .build();
        assert_eq!(m.all_of_indices(), &[0, 1]);

        let compound = Matcher::all_of([0, 1]);
        let err = Matcher::builder().any_of_matchers(&[position, compound]).unwrap_err();
        assert!(matches!(err, MatcherError::NotSingleIndex { count: 2, .. }));
    }

    #[test]
    fn display_uses_component_names() {
        let meta = Rc::new(WorldMetadata::new(
            "Game",
            vec!["Position".into(), "Move".into(), "View".into()],
        ));
        let m = Matcher::builder()
            .all_of([0, 1])
            .none_of([2])
            .with_metadata(meta)
            .build();
        assert_eq!(m.to_string(), "AllOf(Position, Move).NoneOf(View)");
        assert_eq!(Matcher::any_of([4]).to_string(), "AnyOf(4)");
    }
}
