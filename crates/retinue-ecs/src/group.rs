use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use retinue_core::{ComponentIndex, OwnerId};
use tracing::trace;

use crate::component::ComponentRef;
use crate::entity::Entity;
use crate::error::{EntityError, GroupError};
use crate::event::{Event, SubscriptionId};
use crate::matcher::Matcher;

/// `(group, entity, trigger)`. The trigger is the component added or removed
/// at an index, or `None` when the entity itself was created or destroyed.
pub type GroupChangedFn = dyn Fn(&Group, &Entity, Option<(ComponentIndex, &ComponentRef)>);
pub type GroupUpdatedFn = dyn Fn(&Group, &Entity, ComponentIndex, &ComponentRef, &ComponentRef);

/// Membership transition produced by re-evaluating one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChange {
    Added,
    Removed,
}

/// Subscription tables of one group.
#[derive(Debug, Default)]
pub struct GroupEvents {
    /// When an entity enters the group
    pub entity_added: Event<GroupChangedFn>,
    /// When an entity leaves the group
    pub entity_removed: Event<GroupChangedFn>,
    /// `(group, entity, index, previous, replacement)` when a member's
    /// component is replaced
    pub entity_updated: Event<GroupUpdatedFn>,
}

struct GroupInner {
    matcher: Matcher,
    owner: OwnerId,
    entities: RefCell<HashSet<Entity>>,
    entities_cache: RefCell<Option<Rc<[Entity]>>>,
    events: GroupEvents,
}

/// The live set of entities currently satisfying one matcher.
///
/// Groups are created by [`World::get_group`](crate::World::get_group) and
/// kept current by the world as components change. Each member is retained
/// by the group for as long as it is a member.
#[derive(Clone)]
pub struct Group(Rc<GroupInner>);

impl Group {
    pub(crate) fn new(matcher: Matcher, owner: OwnerId) -> Self {
        Self(Rc::new(GroupInner {
            matcher,
            owner,
            entities: RefCell::new(HashSet::new()),
            entities_cache: RefCell::new(None),
            events: GroupEvents::default(),
        }))
    }

    pub fn matcher(&self) -> &Matcher {
        &self.0.matcher
    }

    /// Owner id under which this group retains its members
    pub fn owner(&self) -> OwnerId {
        self.0.owner
    }

    pub fn count(&self) -> usize {
        self.0.entities.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entities.borrow().is_empty()
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.0.entities.borrow().contains(entity)
    }

    /// Snapshot of the members, in no particular order. Cached until the
    /// membership changes.
    pub fn get_entities(&self) -> Rc<[Entity]> {
        if let Some(cache) = &*self.0.entities_cache.borrow() {
            return Rc::clone(cache);
        }
        let entities: Rc<[Entity]> = self.0.entities.borrow().iter().cloned().collect();
        *self.0.entities_cache.borrow_mut() = Some(Rc::clone(&entities));
        entities
    }

    /// The only member, `None` when empty. Fails if there is more than one.
    pub fn single_entity(&self) -> Result<Option<Entity>, GroupError> {
        let entities = self.0.entities.borrow();
        match entities.len() {
            0 => Ok(None),
            1 => Ok(entities.iter().next().cloned()),
            count => Err(GroupError::MultipleEntities {
                matcher: self.0.matcher.to_string(),
                count,
            }),
        }
    }

    // ---- Events ----

    pub fn events(&self) -> &GroupEvents {
        &self.0.events
    }

    pub fn on_entity_added(
        &self,
        handler: impl Fn(&Group, &Entity, Option<(ComponentIndex, &ComponentRef)>) + 'static,
    ) -> SubscriptionId {
        self.0.events.entity_added.subscribe(Rc::new(handler))
    }

    pub fn on_entity_removed(
        &self,
        handler: impl Fn(&Group, &Entity, Option<(ComponentIndex, &ComponentRef)>) + 'static,
    ) -> SubscriptionId {
        self.0.events.entity_removed.subscribe(Rc::new(handler))
    }

    pub fn on_entity_updated(
        &self,
        handler: impl Fn(&Group, &Entity, ComponentIndex, &ComponentRef, &ComponentRef) + 'static,
    ) -> SubscriptionId {
        self.0.events.entity_updated.subscribe(Rc::new(handler))
    }

    pub fn remove_all_event_handlers(&self) {
        self.0.events.entity_added.clear();
        self.0.events.entity_removed.clear();
        self.0.events.entity_updated.clear();
    }

    // ---- World-side maintenance ----

    /// Re-evaluate `entity` without notifying subscribers. Used while the
    /// group is first populated.
    pub(crate) fn handle_entity_silently(&self, entity: &Entity) -> Result<(), EntityError> {
        self.handle_entity(entity).map(|_| ())
    }

    /// Re-evaluate `entity` and report the transition, if any. Subscribers
    /// are not notified here; see [`Group::notify`].
    pub(crate) fn handle_entity(&self, entity: &Entity) -> Result<Option<GroupChange>, EntityError> {
        let matches = entity.is_enabled() && self.0.matcher.matches(entity);
        let member = self.contains(entity);
        match (matches, member) {
            (true, false) => {
                self.add_entity(entity)?;
                Ok(Some(GroupChange::Added))
            }
            (false, true) => {
                self.remove_entity(entity)?;
                Ok(Some(GroupChange::Removed))
            }
            _ => Ok(None),
        }
    }

    /// Fire the subscriber event for a transition reported by `handle_entity`.
    pub(crate) fn notify(
        &self,
        change: GroupChange,
        entity: &Entity,
        trigger: Option<(ComponentIndex, &ComponentRef)>,
    ) {
        let event = match change {
            GroupChange::Added => &self.0.events.entity_added,
            GroupChange::Removed => &self.0.events.entity_removed,
        };
        event.emit_with(|handler| handler(self, entity, trigger));
    }

    /// Forward a component replacement on a member to `entity_updated`.
    pub(crate) fn update_entity(
        &self,
        entity: &Entity,
        index: ComponentIndex,
        previous: &ComponentRef,
        replacement: &ComponentRef,
    ) {
        if self.contains(entity) {
            self.0
                .events
                .entity_updated
                .emit_with(|handler| handler(self, entity, index, previous, replacement));
        }
    }

    /// Drop every member, releasing the group's retain on each. Every member
    /// is released even if one release fails; the first failure is returned.
    pub(crate) fn release_all(&self) -> Result<(), EntityError> {
        let members: Vec<Entity> = self.0.entities.borrow_mut().drain().collect();
        *self.0.entities_cache.borrow_mut() = None;
        let mut first_error = None;
        for entity in members {
            if let Err(err) = entity.release(self.0.owner) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn add_entity(&self, entity: &Entity) -> Result<(), EntityError> {
        entity.retain(self.0.owner)?;
        self.0.entities.borrow_mut().insert(entity.clone());
        *self.0.entities_cache.borrow_mut() = None;
        trace!("{} entered group {}", entity, self.0.matcher);
        Ok(())
    }

    fn remove_entity(&self, entity: &Entity) -> Result<(), EntityError> {
        entity.release(self.0.owner)?;
        self.0.entities.borrow_mut().remove(entity);
        *self.0.entities_cache.borrow_mut() = None;
        trace!("{} left group {}", entity, self.0.matcher);
        Ok(())
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Group {}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group({})", self.0.matcher)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("matcher", &self.0.matcher)
            .field("count", &self.count())
            .finish()
    }
}
