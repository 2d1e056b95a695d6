use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use retinue_core::{ComponentIndex, CreationIndex, OwnerId, WorldMetadata};
use tracing::trace;

use crate::component::{Component, ComponentPools, ComponentRef};
use crate::error::EntityError;
use crate::event::{Event, SubscriptionId};

pub type ComponentChangedFn = dyn Fn(&Entity, ComponentIndex, &ComponentRef);
pub type ComponentReplacedFn = dyn Fn(&Entity, ComponentIndex, &ComponentRef, &ComponentRef);
pub type EntityReleasedFn = dyn Fn(&Entity);

/// Owner id under which a world retains its live entities. Only the world
/// itself may retain or release under it.
pub(crate) const WORLD_OWNER: OwnerId = OwnerId::from_raw(0);

/// Subscription tables of one entity.
///
/// Component events are cleared when the entity is destroyed, the released
/// event when its last retain is released.
#[derive(Debug, Default)]
pub struct EntityEvents {
    /// `(entity, index, component)`
    pub component_added: Event<ComponentChangedFn>,
    /// `(entity, index, removed component)`
    pub component_removed: Event<ComponentChangedFn>,
    /// `(entity, index, previous, replacement)`
    pub component_replaced: Event<ComponentReplacedFn>,
    /// Fired once the retain count drops to zero
    pub entity_released: Event<EntityReleasedFn>,
}

struct EntityInner {
    generation: Cell<u32>,
    creation_index: Cell<CreationIndex>,
    enabled: Cell<bool>,
    components: RefCell<Box<[Option<ComponentRef>]>>,
    owners: RefCell<HashSet<OwnerId>>,
    components_cache: RefCell<Option<Rc<[ComponentRef]>>>,
    indices_cache: RefCell<Option<Rc<[ComponentIndex]>>>,
    pools: Rc<ComponentPools>,
    metadata: Rc<WorldMetadata>,
    events: EntityEvents,
}

/// A pooled, reference-counted entity handle.
///
/// Clones share the entity. Each reuse of a pooled entity starts a new
/// generation; handles from an earlier generation compare unequal to the new
/// one, report `is_enabled() == false` and refuse every mutation.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
    generation: u32,
}

impl Entity {
    pub(crate) fn new(pools: Rc<ComponentPools>, metadata: Rc<WorldMetadata>) -> Self {
        let total = pools.total_components();
        Self {
            inner: Rc::new(EntityInner {
                generation: Cell::new(0),
                creation_index: Cell::new(0),
                enabled: Cell::new(false),
                components: RefCell::new(vec![None; total].into_boxed_slice()),
                owners: RefCell::new(HashSet::new()),
                components_cache: RefCell::new(None),
                indices_cache: RefCell::new(None),
                pools,
                metadata,
                events: EntityEvents::default(),
            }),
            generation: 0,
        }
    }

    /// Handle for the next incarnation of a pooled entity.
    pub(crate) fn reincarnate(&self) -> Entity {
        let generation = self.inner.generation.get().wrapping_add(1);
        self.inner.generation.set(generation);
        Entity {
            inner: Rc::clone(&self.inner),
            generation,
        }
    }

    /// Enable the entity under a new creation index, retained by `owner`.
    pub(crate) fn activate(&self, creation_index: CreationIndex, owner: OwnerId) {
        for slot in self.inner.components.borrow_mut().iter_mut() {
            *slot = None;
        }
        self.invalidate_caches();
        self.inner.creation_index.set(creation_index);
        self.inner.enabled.set(true);
        self.inner.owners.borrow_mut().insert(owner);
    }

    /// Disable the entity, remove every component (notifying subscribers)
    /// and drop the component subscriptions.
    ///
    /// Disabling comes first so no group can take the entity back in while
    /// its components are being removed.
    pub(crate) fn destroy(&self) {
        self.inner.enabled.set(false);
        self.clear_slots();
        let events = &self.inner.events;
        events.component_added.clear();
        events.component_removed.clear();
        events.component_replaced.clear();
    }

    // ---- Identity ----

    pub fn creation_index(&self) -> CreationIndex {
        self.inner.creation_index.get()
    }

    /// `false` once destroyed, and for handles to an earlier incarnation.
    pub fn is_enabled(&self) -> bool {
        self.is_current() && self.inner.enabled.get()
    }

    pub fn total_components(&self) -> usize {
        self.inner.pools.total_components()
    }

    fn is_current(&self) -> bool {
        self.inner.generation.get() == self.generation
    }

    // ---- Components ----

    /// Attach `component` at `index`.
    ///
    /// Fails if the slot is occupied or the entity is not enabled.
    pub fn add_component(
        &self,
        index: ComponentIndex,
        component: ComponentRef,
    ) -> Result<&Self, EntityError> {
        self.check_index(index)?;
        self.check_enabled("add component")?;
        if self.has_component(index) {
            return Err(EntityError::ComponentAlreadyPresent {
                entity: self.to_string(),
                component: self.inner.metadata.component_name(index),
            });
        }

        self.inner.components.borrow_mut()[index] = Some(component.clone());
        self.invalidate_caches();
        trace!("{} added {}", self, self.inner.metadata.component_name(index));
        self.inner
            .events
            .component_added
            .emit_with(|handler| handler(self, index, &component));
        Ok(self)
    }

    /// Attach a pooled (or new) `T` at `index`, initialized by `init`.
    pub fn add_with<T: Component + Default>(
        &self,
        index: ComponentIndex,
        init: impl FnOnce(&mut T),
    ) -> Result<&Self, EntityError> {
        self.check_index(index)?;
        let component = self.create_component::<T>(index);
        if let Some(mut value) = component.borrow_mut::<T>() {
            init(&mut value);
        }
        match self.add_component(index, component.clone()) {
            Ok(_) => Ok(self),
            Err(err) => {
                self.inner.pools.push(index, component);
                Err(err)
            }
        }
    }

    /// Detach the component at `index` and return it to the component pool.
    pub fn remove_component(&self, index: ComponentIndex) -> Result<&Self, EntityError> {
        self.check_index(index)?;
        self.check_enabled("remove component")?;
        if !self.has_component(index) {
            return Err(self.missing(index, "remove"));
        }
        self.replace_slot(index, None);
        Ok(self)
    }

    /// Swap the component at `index`, or add it if the slot is empty.
    ///
    /// The previous instance goes back to the component pool. Replacing a
    /// component with the very same instance is a no-op and fires nothing.
    pub fn replace_component(
        &self,
        index: ComponentIndex,
        component: ComponentRef,
    ) -> Result<&Self, EntityError> {
        self.check_index(index)?;
        self.check_enabled("replace component")?;
        if self.has_component(index) {
            self.replace_slot(index, Some(component));
            Ok(self)
        } else {
            self.add_component(index, component)
        }
    }

    /// Replace the component at `index` with a pooled (or new) `T`
    /// initialized by `init`.
    pub fn replace_with<T: Component + Default>(
        &self,
        index: ComponentIndex,
        init: impl FnOnce(&mut T),
    ) -> Result<&Self, EntityError> {
        self.check_index(index)?;
        let component = self.create_component::<T>(index);
        if let Some(mut value) = component.borrow_mut::<T>() {
            init(&mut value);
        }
        match self.replace_component(index, component.clone()) {
            Ok(_) => Ok(self),
            Err(err) => {
                self.inner.pools.push(index, component);
                Err(err)
            }
        }
    }

    pub fn get_component(&self, index: ComponentIndex) -> Result<ComponentRef, EntityError> {
        self.check_index(index)?;
        self.check_current()?;
        let component = self.inner.components.borrow()[index].clone();
        component.ok_or_else(|| self.missing(index, "get"))
    }

    /// Run `read` against the component at `index` as a `T`.
    pub fn with_component<T: Component, R>(
        &self,
        index: ComponentIndex,
        read: impl FnOnce(&T) -> R,
    ) -> Result<R, EntityError> {
        let component = self.get_component(index)?;
        let value = component
            .borrow::<T>()
            .ok_or_else(|| self.type_mismatch::<T>(index, &component))?;
        Ok(read(&value))
    }

    /// Mutate the component at `index` in place without firing events.
    pub fn with_component_mut<T: Component, R>(
        &self,
        index: ComponentIndex,
        write: impl FnOnce(&mut T) -> R,
    ) -> Result<R, EntityError> {
        let component = self.get_component(index)?;
        let mut value = component
            .borrow_mut::<T>()
            .ok_or_else(|| self.type_mismatch::<T>(index, &component))?;
        Ok(write(&mut value))
    }

    pub fn has_component(&self, index: ComponentIndex) -> bool {
        self.is_current() && matches!(self.inner.components.borrow().get(index), Some(Some(_)))
    }

    /// Whether every index in `indices` is present
    pub fn has_components(&self, indices: &[ComponentIndex]) -> bool {
        indices.iter().all(|&index| self.has_component(index))
    }

    /// Whether at least one index in `indices` is present
    pub fn has_any_component(&self, indices: &[ComponentIndex]) -> bool {
        indices.iter().any(|&index| self.has_component(index))
    }

    /// All attached components, in index order. Cached until the next change.
    pub fn get_components(&self) -> Rc<[ComponentRef]> {
        if !self.is_current() {
            return Vec::new().into();
        }
        if let Some(cache) = &*self.inner.components_cache.borrow() {
            return Rc::clone(cache);
        }
        let components: Rc<[ComponentRef]> =
            self.inner.components.borrow().iter().flatten().cloned().collect();
        *self.inner.components_cache.borrow_mut() = Some(Rc::clone(&components));
        components
    }

    /// Indices of all attached components, ascending. Cached until the next
    /// add or remove.
    pub fn get_component_indices(&self) -> Rc<[ComponentIndex]> {
        if !self.is_current() {
            return Vec::new().into();
        }
        if let Some(cache) = &*self.inner.indices_cache.borrow() {
            return Rc::clone(cache);
        }
        let indices: Rc<[ComponentIndex]> = self
            .inner
            .components
            .borrow()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
            .collect();
        *self.inner.indices_cache.borrow_mut() = Some(Rc::clone(&indices));
        indices
    }

    /// Detach every component, firing a removal for each.
    pub fn remove_all_components(&self) -> Result<(), EntityError> {
        self.check_enabled("remove all components")?;
        self.clear_slots();
        Ok(())
    }

    /// Pop a pooled `T` for `index`, or construct one. The instance is not
    /// attached.
    pub fn create_component<T: Component + Default>(&self, index: ComponentIndex) -> ComponentRef {
        self.inner.pools.acquire::<T>(index)
    }

    // ---- Retain accounting ----

    /// Number of owners currently retaining this entity
    pub fn retain_count(&self) -> usize {
        if self.is_current() {
            self.inner.owners.borrow().len()
        } else {
            0
        }
    }

    pub fn is_retained_by(&self, owner: OwnerId) -> bool {
        self.is_current() && self.inner.owners.borrow().contains(&owner)
    }

    /// Keep this entity out of the reuse pool until `owner` releases it.
    pub fn retain(&self, owner: OwnerId) -> Result<&Self, EntityError> {
        self.check_current()?;
        self.check_owner(owner)?;
        if !self.inner.owners.borrow_mut().insert(owner) {
            return Err(EntityError::AlreadyRetained {
                entity: self.to_string(),
                owner,
            });
        }
        trace!("{} retained by {}", self, owner);
        Ok(self)
    }

    /// Drop `owner`'s retain. When the count reaches zero the released
    /// event fires and the world may pool the entity.
    ///
    /// Releasing the last retain of an enabled entity is refused, and so is
    /// releasing the world's own retain.
    pub fn release(&self, owner: OwnerId) -> Result<(), EntityError> {
        self.check_owner(owner)?;
        self.release_owned(owner)
    }

    /// `release` without the reserved-owner check, for the world's own retain.
    pub(crate) fn release_owned(&self, owner: OwnerId) -> Result<(), EntityError> {
        self.check_current()?;
        let remaining = {
            let mut owners = self.inner.owners.borrow_mut();
            if !owners.contains(&owner) {
                return Err(EntityError::NotRetained {
                    entity: self.to_string(),
                    owner,
                });
            }
            if owners.len() == 1 && self.inner.enabled.get() {
                return Err(EntityError::NotDestroyed {
                    entity: self.to_string(),
                });
            }
            owners.remove(&owner);
            owners.len()
        };
        trace!("{} released by {} ({} left)", self, owner, remaining);

        if remaining == 0 {
            self.inner.events.entity_released.emit_with(|handler| handler(self));
        }
        Ok(())
    }

    // ---- Events ----

    pub fn events(&self) -> &EntityEvents {
        &self.inner.events
    }

    pub fn on_component_added(
        &self,
        handler: impl Fn(&Entity, ComponentIndex, &ComponentRef) + 'static,
    ) -> SubscriptionId {
        self.inner.events.component_added.subscribe(Rc::new(handler))
    }

    pub fn on_component_removed(
        &self,
        handler: impl Fn(&Entity, ComponentIndex, &ComponentRef) + 'static,
    ) -> SubscriptionId {
        self.inner.events.component_removed.subscribe(Rc::new(handler))
    }

    pub fn on_component_replaced(
        &self,
        handler: impl Fn(&Entity, ComponentIndex, &ComponentRef, &ComponentRef) + 'static,
    ) -> SubscriptionId {
        self.inner.events.component_replaced.subscribe(Rc::new(handler))
    }

    pub fn on_released(&self, handler: impl Fn(&Entity) + 'static) -> SubscriptionId {
        self.inner.events.entity_released.subscribe(Rc::new(handler))
    }

    // ---- Internals ----

    fn replace_slot(&self, index: ComponentIndex, replacement: Option<ComponentRef>) {
        let Some(previous) = self.inner.components.borrow()[index].clone() else {
            return;
        };
        if replacement.as_ref().is_some_and(|new| new.ptr_eq(&previous)) {
            return;
        }

        self.inner.components.borrow_mut()[index] = replacement.clone();
        *self.inner.components_cache.borrow_mut() = None;
        match &replacement {
            Some(new) => {
                trace!("{} replaced {}", self, self.inner.metadata.component_name(index));
                self.inner
                    .events
                    .component_replaced
                    .emit_with(|handler| handler(self, index, &previous, new));
            }
            None => {
                *self.inner.indices_cache.borrow_mut() = None;
                trace!("{} removed {}", self, self.inner.metadata.component_name(index));
                self.inner
                    .events
                    .component_removed
                    .emit_with(|handler| handler(self, index, &previous));
            }
        }
        self.inner.pools.push(index, previous);
    }

    fn clear_slots(&self) {
        for index in 0..self.total_components() {
            if self.has_component(index) {
                self.replace_slot(index, None);
            }
        }
    }

    fn invalidate_caches(&self) {
        *self.inner.components_cache.borrow_mut() = None;
        *self.inner.indices_cache.borrow_mut() = None;
    }

    fn check_index(&self, index: ComponentIndex) -> Result<(), EntityError> {
        let total = self.total_components();
        if index < total {
            Ok(())
        } else {
            Err(EntityError::IndexOutOfRange { index, total })
        }
    }

    fn check_current(&self) -> Result<(), EntityError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(EntityError::Stale {
                entity: self.to_string(),
            })
        }
    }

    fn check_owner(&self, owner: OwnerId) -> Result<(), EntityError> {
        if owner == WORLD_OWNER {
            return Err(EntityError::ReservedOwner {
                entity: self.to_string(),
                owner,
            });
        }
        Ok(())
    }

    fn check_enabled(&self, operation: &'static str) -> Result<(), EntityError> {
        self.check_current()?;
        if self.inner.enabled.get() {
            Ok(())
        } else {
            Err(EntityError::NotEnabled {
                entity: self.to_string(),
                operation,
            })
        }
    }

    fn missing(&self, index: ComponentIndex, operation: &'static str) -> EntityError {
        EntityError::ComponentMissing {
            entity: self.to_string(),
            component: self.inner.metadata.component_name(index),
            operation,
        }
    }

    fn type_mismatch<T: Component>(&self, index: ComponentIndex, found: &ComponentRef) -> EntityError {
        EntityError::ComponentTypeMismatch {
            entity: self.to_string(),
            component: self.inner.metadata.component_name(index),
            expected: std::any::type_name::<T>(),
            actual: found.type_name(),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner) && self.generation == other.generation
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.inner).hash(state);
        self.generation.hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity_{}(", self.inner.creation_index.get())?;
        if !self.is_current() {
            return f.write_str("stale)");
        }
        let components = self.inner.components.borrow();
        let mut first = true;
        for (index, slot) in components.iter().enumerate() {
            if slot.is_none() {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            f.write_str(&self.inner.metadata.component_name(index))?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("creation_index", &self.creation_index())
            .field("generation", &self.generation)
            .field("enabled", &self.is_enabled())
            .field("retain_count", &self.retain_count())
            .field("components", &self.get_component_indices())
            .finish()
    }
}
