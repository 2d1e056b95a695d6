use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use retinue_core::{ComponentIndex, CreationIndex, OwnerId, WorldConfig, WorldMetadata};
use tracing::{debug, error, trace};

use crate::component::{ComponentPools, ComponentRef};
use crate::entity::{
    ComponentChangedFn, ComponentReplacedFn, Entity, EntityReleasedFn, WORLD_OWNER,
};
use crate::error::{EntityError, WorldError};
use crate::event::{Event, SubscriptionId};
use crate::group::{Group, GroupChange};
use crate::matcher::Matcher;

pub type WorldEntityFn = dyn Fn(&World, &Entity);
pub type WorldGroupFn = dyn Fn(&World, &Group);

/// Subscription tables of one world.
#[derive(Debug, Default)]
pub struct WorldEvents {
    pub entity_created: Event<WorldEntityFn>,
    /// Fired before any component is removed, so handlers can read the
    /// entity's final state
    pub entity_will_be_destroyed: Event<WorldEntityFn>,
    pub entity_destroyed: Event<WorldEntityFn>,
    pub group_created: Event<WorldGroupFn>,
    pub group_cleared: Event<WorldGroupFn>,
}

/// Entity-event handlers shared by every entity of a world. Built once so
/// subscribing a new entity never allocates a closure.
struct EntityHandlers {
    added_or_removed: Rc<ComponentChangedFn>,
    replaced: Rc<ComponentReplacedFn>,
    released: Rc<EntityReleasedFn>,
}

impl EntityHandlers {
    fn new(world: &Weak<WorldInner>) -> Self {
        let w = world.clone();
        let added_or_removed: Rc<ComponentChangedFn> = Rc::new(
            move |entity: &Entity, index: ComponentIndex, component: &ComponentRef| {
                if let Some(inner) = w.upgrade() {
                    World(inner).update_groups_component_added_or_removed(entity, index, component);
                }
            },
        );

        let w = world.clone();
        let replaced: Rc<ComponentReplacedFn> = Rc::new(
            move |entity: &Entity,
                  index: ComponentIndex,
                  previous: &ComponentRef,
                  replacement: &ComponentRef| {
                if let Some(inner) = w.upgrade() {
                    World(inner).update_groups_component_replaced(entity, index, previous, replacement);
                }
            },
        );

        let w = world.clone();
        let released: Rc<EntityReleasedFn> = Rc::new(move |entity: &Entity| {
            if let Some(inner) = w.upgrade() {
                World(inner).on_entity_released(entity);
            }
        });

        Self {
            added_or_removed,
            replaced,
            released,
        }
    }
}

struct WorldInner {
    metadata: Rc<WorldMetadata>,
    owner: OwnerId,
    next_owner: Cell<u64>,
    creation_index: Cell<CreationIndex>,
    component_pools: Rc<ComponentPools>,
    entities: RefCell<HashSet<Entity>>,
    entities_cache: RefCell<Option<Rc<[Entity]>>>,
    reusable: RefCell<Vec<Entity>>,
    retained: RefCell<HashSet<Entity>>,
    groups: RefCell<HashMap<Matcher, Group>>,
    groups_for_index: RefCell<Box<[Rc<Vec<Group>>]>>,
    groups_matching_empty: RefCell<Rc<Vec<Group>>>,
    index_matchers: RefCell<Box<[Option<Matcher>]>>,
    change_buffers: RefCell<Vec<Vec<Option<GroupChange>>>>,
    handlers: EntityHandlers,
    events: WorldEvents,
}

/// Owns the entities, groups and component pools of one simulation.
///
/// `World` is a cheap handle: clones refer to the same world. Every
/// operation runs to completion on the calling thread, including all
/// group updates and event fan-out it causes.
#[derive(Clone)]
pub struct World(Rc<WorldInner>);

impl World {
    /// Owner id under which the world retains its live entities. Reserved:
    /// `Entity::retain` and `Entity::release` refuse it.
    pub const OWNER: OwnerId = WORLD_OWNER;

    /// Create an unnamed world with `total_components` component types.
    pub fn new(total_components: usize) -> Self {
        Self::build(0, WorldMetadata::unnamed(total_components))
    }

    /// Create a world with explicit metadata and starting creation index.
    ///
    /// Fails if `metadata` does not name exactly `total_components` types.
    pub fn with_metadata(
        total_components: usize,
        start_creation_index: CreationIndex,
        metadata: WorldMetadata,
    ) -> Result<Self, WorldError> {
        if metadata.total_components() != total_components {
            return Err(WorldError::MetadataMismatch {
                world: metadata.world_name.clone(),
                expected: total_components,
                got: metadata.total_components(),
            });
        }
        Ok(Self::build(start_creation_index, metadata))
    }

    pub fn from_config(config: &WorldConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Self::with_metadata(
            config.total_components(),
            config.start_creation_index,
            config.metadata(),
        )
    }

    fn build(start_creation_index: CreationIndex, metadata: WorldMetadata) -> Self {
        let total = metadata.total_components();
        debug!(
            "Creating world '{}' with {} component types",
            metadata.world_name, total
        );
        let inner = Rc::new_cyclic(|weak| WorldInner {
            metadata: Rc::new(metadata),
            owner: Self::OWNER,
            next_owner: Cell::new(Self::OWNER.raw() + 1),
            creation_index: Cell::new(start_creation_index),
            component_pools: Rc::new(ComponentPools::new(total)),
            entities: RefCell::new(HashSet::new()),
            entities_cache: RefCell::new(None),
            reusable: RefCell::new(Vec::new()),
            retained: RefCell::new(HashSet::new()),
            groups: RefCell::new(HashMap::new()),
            groups_for_index: RefCell::new((0..total).map(|_| Rc::new(Vec::new())).collect()),
            groups_matching_empty: RefCell::new(Rc::new(Vec::new())),
            index_matchers: RefCell::new(vec![None; total].into_boxed_slice()),
            change_buffers: RefCell::new(Vec::new()),
            handlers: EntityHandlers::new(weak),
            events: WorldEvents::default(),
        });
        Self(inner)
    }

    // ---- Introspection ----

    pub fn total_components(&self) -> usize {
        self.0.component_pools.total_components()
    }

    pub fn metadata(&self) -> Rc<WorldMetadata> {
        Rc::clone(&self.0.metadata)
    }

    pub fn name(&self) -> &str {
        &self.0.metadata.world_name
    }

    /// Number of live entities
    pub fn count(&self) -> usize {
        self.0.entities.borrow().len()
    }

    /// Number of destroyed, fully released entities waiting for reuse
    pub fn reusable_entities_count(&self) -> usize {
        self.0.reusable.borrow().len()
    }

    /// Number of destroyed entities still retained by someone
    pub fn retained_entities_count(&self) -> usize {
        self.0.retained.borrow().len()
    }

    /// The creation index the next entity will receive
    pub fn next_creation_index(&self) -> CreationIndex {
        self.0.creation_index.get()
    }

    /// Hand out a fresh owner id for an external retainer.
    pub fn create_owner(&self) -> OwnerId {
        let raw = self.0.next_owner.get();
        self.0.next_owner.set(raw + 1);
        OwnerId::from_raw(raw)
    }

    // ---- Entity management ----

    /// Create an entity, reusing a pooled one when available.
    pub fn create_entity(&self) -> Entity {
        let inner = &self.0;
        let pooled = inner.reusable.borrow_mut().pop();
        let entity = match pooled {
            Some(pooled) => pooled.reincarnate(),
            None => Entity::new(
                Rc::clone(&inner.component_pools),
                Rc::clone(&inner.metadata),
            ),
        };

        let creation_index = inner.creation_index.get();
        inner.creation_index.set(creation_index.wrapping_add(1));
        entity.activate(creation_index, inner.owner);

        let events = entity.events();
        events
            .component_added
            .subscribe(Rc::clone(&inner.handlers.added_or_removed));
        events
            .component_removed
            .subscribe(Rc::clone(&inner.handlers.added_or_removed));
        events
            .component_replaced
            .subscribe(Rc::clone(&inner.handlers.replaced));
        events
            .entity_released
            .subscribe(Rc::clone(&inner.handlers.released));

        inner.entities.borrow_mut().insert(entity.clone());
        *inner.entities_cache.borrow_mut() = None;
        trace!("'{}' created {}", self, entity);

        self.update_groups_matching_empty(&entity);
        inner
            .events
            .entity_created
            .emit_with(|handler| handler(self, &entity));
        entity
    }

    /// Destroy a live entity of this world.
    ///
    /// The entity loses all components and is pooled for reuse once every
    /// retain on it has been released.
    pub fn destroy_entity(&self, entity: &Entity) -> Result<(), WorldError> {
        let inner = &self.0;
        if !self.has_entity(entity) {
            return Err(WorldError::EntityNotInWorld {
                world: self.to_string(),
                entity: entity.to_string(),
            });
        }
        if !entity.is_retained_by(inner.owner) {
            return Err(EntityError::NotRetained {
                entity: entity.to_string(),
                owner: inner.owner,
            }
            .into());
        }
        inner.entities.borrow_mut().remove(entity);
        *inner.entities_cache.borrow_mut() = None;

        inner
            .events
            .entity_will_be_destroyed
            .emit_with(|handler| handler(self, entity));
        entity.destroy();
        self.update_groups_matching_empty(entity);
        inner
            .events
            .entity_destroyed
            .emit_with(|handler| handler(self, entity));

        // The last release pools the entity through `on_entity_released`.
        entity.release_owned(inner.owner)?;
        if entity.retain_count() != 0 {
            inner.retained.borrow_mut().insert(entity.clone());
        }
        trace!("'{}' destroyed {}", self, entity);
        Ok(())
    }

    /// Destroy every live entity.
    ///
    /// Fails afterwards if any destroyed entity is still retained, which
    /// means some owner never released it.
    pub fn destroy_all_entities(&self) -> Result<(), WorldError> {
        let entities = self.get_entities();
        for entity in entities.iter() {
            if self.has_entity(entity) {
                self.destroy_entity(entity)?;
            }
        }
        debug!("'{}' destroyed {} entities", self, entities.len());

        let count = self.retained_entities_count();
        if count != 0 {
            return Err(WorldError::RetainedEntitiesRemain {
                world: self.to_string(),
                count,
            });
        }
        Ok(())
    }

    pub fn has_entity(&self, entity: &Entity) -> bool {
        self.0.entities.borrow().contains(entity)
    }

    /// Snapshot of the live entities, in no particular order. Cached until
    /// the next create or destroy.
    pub fn get_entities(&self) -> Rc<[Entity]> {
        if let Some(cache) = &*self.0.entities_cache.borrow() {
            return Rc::clone(cache);
        }
        let entities: Rc<[Entity]> = self.0.entities.borrow().iter().cloned().collect();
        *self.0.entities_cache.borrow_mut() = Some(Rc::clone(&entities));
        entities
    }

    // ---- Groups ----

    /// The group for `matcher`, built on first request.
    ///
    /// Groups are keyed by matcher instance: the same instance always yields
    /// the same group, a separately built but identical matcher does not.
    pub fn get_group(&self, matcher: &Matcher) -> Result<Group, WorldError> {
        let cached = self.0.groups.borrow().get(matcher).cloned();
        if let Some(group) = cached {
            return Ok(group);
        }
        for &index in matcher.indices() {
            self.check_index(index)?;
        }

        let group = Group::new(matcher.clone(), self.create_owner());
        for entity in self.get_entities().iter() {
            group.handle_entity_silently(entity)?;
        }

        self.0.groups.borrow_mut().insert(matcher.clone(), group.clone());
        {
            let mut groups_for_index = self.0.groups_for_index.borrow_mut();
            for &index in matcher.indices() {
                Rc::make_mut(&mut groups_for_index[index]).push(group.clone());
            }
        }
        if matcher.matches_empty() {
            Rc::make_mut(&mut *self.0.groups_matching_empty.borrow_mut()).push(group.clone());
        }

        debug!(
            "'{}' created group {} with {} entities",
            self,
            matcher,
            group.count()
        );
        self.0
            .events
            .group_created
            .emit_with(|handler| handler(self, &group));
        Ok(group)
    }

    /// The world's own `AllOf(index)` matcher. Every call returns the same
    /// instance, so callers share one group per index.
    pub fn index_matcher(&self, index: ComponentIndex) -> Result<Matcher, WorldError> {
        self.check_index(index)?;
        let mut matchers = self.0.index_matchers.borrow_mut();
        let matcher = matchers[index].get_or_insert_with(|| {
            Matcher::builder()
                .all_of([index])
                .with_metadata(Rc::clone(&self.0.metadata))
                .build()
        });
        Ok(matcher.clone())
    }

    /// Number of groups built so far
    pub fn group_count(&self) -> usize {
        self.0.groups.borrow().len()
    }

    /// Drop every group: release their retains, remove their subscribers
    /// and forget them. Entities are left untouched.
    pub fn clear_groups(&self) -> Result<(), WorldError> {
        let groups: Vec<Group> = self
            .0
            .groups
            .borrow_mut()
            .drain()
            .map(|(_, group)| group)
            .collect();
        for slot in self.0.groups_for_index.borrow_mut().iter_mut() {
            Rc::make_mut(slot).clear();
        }
        Rc::make_mut(&mut *self.0.groups_matching_empty.borrow_mut()).clear();

        let mut first_error: Option<EntityError> = None;
        for group in &groups {
            group.remove_all_event_handlers();
            if let Err(err) = group.release_all() {
                first_error.get_or_insert(err);
            }
            self.0
                .events
                .group_cleared
                .emit_with(|handler| handler(self, group));
        }
        debug!("'{}' cleared {} groups", self, groups.len());
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }

    // ---- Maintenance ----

    /// Restart creation indices at zero.
    pub fn reset_creation_index(&self) {
        self.0.creation_index.set(0);
    }

    /// Drop the recycled instances pooled for `index`. Live components are
    /// untouched.
    pub fn clear_component_pool(&self, index: ComponentIndex) -> Result<(), WorldError> {
        self.check_index(index)?;
        self.0.component_pools.clear(index);
        Ok(())
    }

    pub fn clear_component_pools(&self) {
        self.0.component_pools.clear_all();
        debug!("'{}' cleared all component pools", self);
    }

    /// Number of recycled instances pooled for `index`
    pub fn component_pool_len(&self, index: ComponentIndex) -> usize {
        self.0.component_pools.len(index)
    }

    /// Clear all groups, destroy all entities and reset the creation index.
    pub fn reset(&self) -> Result<(), WorldError> {
        self.clear_groups()?;
        self.destroy_all_entities()?;
        self.reset_creation_index();
        debug!("'{}' reset", self);
        Ok(())
    }

    // ---- Events ----

    pub fn events(&self) -> &WorldEvents {
        &self.0.events
    }

    pub fn on_entity_created(&self, handler: impl Fn(&World, &Entity) + 'static) -> SubscriptionId {
        self.0.events.entity_created.subscribe(Rc::new(handler))
    }

    pub fn on_entity_will_be_destroyed(
        &self,
        handler: impl Fn(&World, &Entity) + 'static,
    ) -> SubscriptionId {
        self.0
            .events
            .entity_will_be_destroyed
            .subscribe(Rc::new(handler))
    }

    pub fn on_entity_destroyed(&self, handler: impl Fn(&World, &Entity) + 'static) -> SubscriptionId {
        self.0.events.entity_destroyed.subscribe(Rc::new(handler))
    }

    pub fn on_group_created(&self, handler: impl Fn(&World, &Group) + 'static) -> SubscriptionId {
        self.0.events.group_created.subscribe(Rc::new(handler))
    }

    pub fn on_group_cleared(&self, handler: impl Fn(&World, &Group) + 'static) -> SubscriptionId {
        self.0.events.group_cleared.subscribe(Rc::new(handler))
    }

    // ---- Change propagation ----

    fn update_groups_component_added_or_removed(
        &self,
        entity: &Entity,
        index: ComponentIndex,
        component: &ComponentRef,
    ) {
        let groups = match self.0.groups_for_index.borrow().get(index) {
            Some(groups) if !groups.is_empty() => Rc::clone(groups),
            _ => return,
        };
        self.update_groups(&groups, entity, Some((index, component)));
    }

    fn update_groups_component_replaced(
        &self,
        entity: &Entity,
        index: ComponentIndex,
        previous: &ComponentRef,
        replacement: &ComponentRef,
    ) {
        let groups = match self.0.groups_for_index.borrow().get(index) {
            Some(groups) if !groups.is_empty() => Rc::clone(groups),
            _ => return,
        };
        for group in groups.iter() {
            group.update_entity(entity, index, previous, replacement);
        }
    }

    /// Re-evaluate groups whose matcher accepts an entity without
    /// components. No component event moves an entity into such a group on
    /// creation, or out of it on destruction, so the world does it here.
    fn update_groups_matching_empty(&self, entity: &Entity) {
        let groups = Rc::clone(&*self.0.groups_matching_empty.borrow());
        if !groups.is_empty() {
            self.update_groups(&groups, entity, None);
        }
    }

    /// Settle every group's membership for `entity` before any subscriber
    /// runs, then notify the groups that changed.
    fn update_groups(
        &self,
        groups: &[Group],
        entity: &Entity,
        trigger: Option<(ComponentIndex, &ComponentRef)>,
    ) {
        let mut changes = self.0.change_buffers.borrow_mut().pop().unwrap_or_default();
        for group in groups {
            let change = group.handle_entity(entity).unwrap_or_else(|err| {
                report_bookkeeping_error(&err);
                None
            });
            changes.push(change);
        }
        for (group, change) in groups.iter().zip(changes.iter()) {
            if let Some(change) = *change {
                group.notify(change, entity, trigger);
            }
        }

        changes.clear();
        self.0.change_buffers.borrow_mut().push(changes);
    }

    fn on_entity_released(&self, entity: &Entity) {
        if entity.is_enabled() {
            report_bookkeeping_error(&EntityError::NotDestroyed {
                entity: entity.to_string(),
            });
            return;
        }
        entity.events().entity_released.clear();
        self.0.retained.borrow_mut().remove(entity);
        self.0.reusable.borrow_mut().push(entity.clone());
        trace!("'{}' pooled released {}", self, entity);
    }

    fn check_index(&self, index: ComponentIndex) -> Result<(), WorldError> {
        let total = self.total_components();
        if index < total {
            Ok(())
        } else {
            Err(WorldError::IndexOutOfRange {
                world: self.to_string(),
                index,
                total,
            })
        }
    }
}

/// Group retain bookkeeping only fails if the runtime's own invariants are
/// broken. Fatal in debug builds, logged otherwise.
fn report_bookkeeping_error(err: &EntityError) {
    error!("Group bookkeeping failed: {} ({})", err, err.hint());
    if cfg!(debug_assertions) {
        panic!("group bookkeeping failed: {err}");
    }
}

impl PartialEq for World {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for World {}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.metadata.world_name)
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("name", &self.0.metadata.world_name)
            .field("total_components", &self.total_components())
            .field("entities", &self.count())
            .field("reusable", &self.reusable_entities_count())
            .field("retained", &self.retained_entities_count())
            .field("groups", &self.group_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Velocity {
        dx: i32,
        dy: i32,
    }

    const POSITION: ComponentIndex = 0;
    const VELOCITY: ComponentIndex = 1;
    const VIEW: ComponentIndex = 2;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        (Rc::clone(&count), count)
    }

    #[test]
    fn create_and_destroy() {
        let world = World::new(3);
        let e = world.create_entity();
        assert!(world.has_entity(&e));
        assert!(e.is_enabled());
        assert_eq!(e.retain_count(), 1);
        assert!(e.is_retained_by(World::OWNER));
        assert_eq!(world.count(), 1);

        world.destroy_entity(&e).unwrap();
        assert!(!world.has_entity(&e));
        assert!(!e.is_enabled());
        assert_eq!(world.count(), 0);
        assert_eq!(world.reusable_entities_count(), 1);
        assert_eq!(e.retain_count(), 0);
    }

    #[test]
    fn creation_index_increments_and_resets() {
        let world = World::with_metadata(1, 10, WorldMetadata::unnamed(1)).unwrap();
        assert_eq!(world.create_entity().creation_index(), 10);
        assert_eq!(world.create_entity().creation_index(), 11);
        world.reset_creation_index();
        assert_eq!(world.create_entity().creation_index(), 0);
        assert_eq!(world.next_creation_index(), 1);
    }

    #[test]
    fn destroyed_entities_are_reused() {
        let world = World::new(1);
        let first = world.create_entity();
        world.destroy_entity(&first).unwrap();

        let second = world.create_entity();
        assert_eq!(world.reusable_entities_count(), 0);
        assert_ne!(first, second);
        assert!(!first.is_enabled());
        assert!(second.is_enabled());
        assert_eq!(second.creation_index(), 1);
    }

    #[test]
    fn destroy_foreign_or_dead_entity_fails() {
        let world = World::new(1);
        let other = World::new(1);
        let foreign = other.create_entity();
        assert!(matches!(
            world.destroy_entity(&foreign),
            Err(WorldError::EntityNotInWorld { .. })
        ));

        let e = world.create_entity();
        world.destroy_entity(&e).unwrap();
        assert!(matches!(
            world.destroy_entity(&e),
            Err(WorldError::EntityNotInWorld { .. })
        ));
    }

    #[test]
    fn retained_entity_waits_for_release() {
        let world = World::new(1);
        let owner = world.create_owner();
        let e = world.create_entity();
        e.retain(owner).unwrap();

        world.destroy_entity(&e).unwrap();
        assert_eq!(world.retained_entities_count(), 1);
        assert_eq!(world.reusable_entities_count(), 0);

        e.release(owner).unwrap();
        assert_eq!(world.retained_entities_count(), 0);
        assert_eq!(world.reusable_entities_count(), 1);
    }

    #[test]
    fn lifecycle_events_fire_in_order() {
        let world = World::new(2);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        world.on_entity_created(move |_, _| l.borrow_mut().push("created"));
        let l = Rc::clone(&log);
        world.on_entity_will_be_destroyed(move |_, e| {
            assert!(e.has_component(POSITION));
            l.borrow_mut().push("will_destroy");
        });
        let l = Rc::clone(&log);
        world.on_entity_destroyed(move |_, e| {
            assert!(!e.has_component(POSITION));
            l.borrow_mut().push("destroyed");
        });

        let e = world.create_entity();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        world.destroy_entity(&e).unwrap();
        assert_eq!(*log.borrow(), vec!["created", "will_destroy", "destroyed"]);
    }

    #[test]
    fn entities_snapshot_is_cached() {
        let world = World::new(1);
        let e = world.create_entity();
        let snapshot = world.get_entities();
        assert!(Rc::ptr_eq(&snapshot, &world.get_entities()));
        assert_eq!(&*snapshot, &[e.clone()]);

        world.create_entity();
        assert_eq!(world.get_entities().len(), 2);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn group_is_memoized_by_matcher_instance() {
        let world = World::new(3);
        let matcher = Matcher::all_of([POSITION]);
        let a = world.get_group(&matcher).unwrap();
        let b = world.get_group(&matcher).unwrap();
        assert_eq!(a, b);

        let twin = Matcher::all_of([POSITION]);
        let c = world.get_group(&twin).unwrap();
        assert_ne!(a, c);
        assert_eq!(world.group_count(), 2);
    }

    #[test]
    fn group_is_populated_on_creation() {
        let world = World::new(3);
        let e = world.create_entity();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        world.create_entity();

        let (created, count) = counter();
        world.on_group_created(move |_, _| created.set(created.get() + 1));
        let group = world.get_group(&Matcher::all_of([POSITION])).unwrap();
        assert_eq!(group.count(), 1);
        assert!(group.contains(&e));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn group_tracks_component_changes() {
        let world = World::new(3);
        let group = world
            .get_group(&Matcher::all_of([POSITION, VELOCITY]))
            .unwrap();
        let (added, added_count) = counter();
        let (removed, removed_count) = counter();
        group.on_entity_added(move |_, _, _| added.set(added.get() + 1));
        group.on_entity_removed(move |_, _, _| removed.set(removed.get() + 1));

        let e = world.create_entity();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        assert!(group.is_empty());
        e.add_component(VELOCITY, ComponentRef::new(Velocity::default()))
            .unwrap();
        assert!(group.contains(&e));
        assert_eq!(added_count.get(), 1);

        // unrelated index never reaches the group
        e.add_component(VIEW, ComponentRef::new(())).unwrap();
        assert_eq!(added_count.get(), 1);

        e.remove_component(POSITION).unwrap();
        assert!(group.is_empty());
        assert_eq!(removed_count.get(), 1);
        assert_eq!(e.retain_count(), 1);
    }

    #[test]
    fn replace_forwards_updates_without_churn() {
        let world = World::new(3);
        let group = world.get_group(&Matcher::all_of([POSITION])).unwrap();
        let (added, added_count) = counter();
        let (updated, updated_count) = counter();
        group.on_entity_added(move |_, _, _| added.set(added.get() + 1));
        group.on_entity_updated(move |_, _, _, previous, replacement| {
            assert!(!previous.ptr_eq(replacement));
            updated.set(updated.get() + 1);
        });

        let e = world.create_entity();
        e.replace_with(POSITION, |p: &mut Position| p.x = 1).unwrap();
        e.replace_with(POSITION, |p: &mut Position| p.x = 2).unwrap();
        assert_eq!(added_count.get(), 1);
        assert_eq!(updated_count.get(), 1);
        assert_eq!(group.count(), 1);
    }

    #[test]
    fn group_member_is_retained_until_destroyed() {
        let world = World::new(2);
        let group = world.get_group(&Matcher::all_of([POSITION])).unwrap();
        let e = world.create_entity();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        assert_eq!(e.retain_count(), 2);

        world.destroy_entity(&e).unwrap();
        assert!(group.is_empty());
        assert_eq!(world.reusable_entities_count(), 1);
        assert_eq!(world.retained_entities_count(), 0);
    }

    #[test]
    fn all_groups_settle_before_subscribers_run() {
        let world = World::new(2);
        let first = world.get_group(&Matcher::all_of([POSITION])).unwrap();
        let second = world.get_group(&Matcher::any_of([POSITION])).unwrap();
        let observed = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed);
        let other = second.clone();
        first.on_entity_added(move |_, e, _| seen.set(other.contains(e)));

        let e = world.create_entity();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        assert!(observed.get());
    }

    #[test]
    fn handlers_may_mutate_components() {
        let world = World::new(3);
        let moving = world.get_group(&Matcher::all_of([VELOCITY])).unwrap();
        let positioned = world.get_group(&Matcher::all_of([POSITION])).unwrap();
        moving.on_entity_added(|_, e, _| {
            e.add_with(POSITION, |p: &mut Position| p.x = 5).unwrap();
        });

        let e = world.create_entity();
        e.add_component(VELOCITY, ComponentRef::new(Velocity::default()))
            .unwrap();
        assert!(positioned.contains(&e));
        assert_eq!(e.with_component(POSITION, |p: &Position| p.x).unwrap(), 5);
    }

    #[test]
    fn none_of_group_follows_entity_lifecycle() {
        let world = World::new(3);
        let e = world.create_entity();
        let group = world.get_group(&Matcher::none_of([VIEW])).unwrap();
        assert!(group.contains(&e));

        let fresh = world.create_entity();
        assert!(group.contains(&fresh));
        fresh.add_component(VIEW, ComponentRef::new(())).unwrap();
        assert!(!group.contains(&fresh));

        world.destroy_entity(&e).unwrap();
        assert!(!group.contains(&e));
        world.destroy_all_entities().unwrap();
        assert!(group.is_empty());
    }

    #[test]
    fn none_of_group_events_balance() {
        let world = World::new(3);
        let group = world.get_group(&Matcher::none_of([VIEW])).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        group.on_entity_added(move |_, _, trigger| {
            l.borrow_mut().push(format!("added {:?}", trigger.map(|(index, _)| index)))
        });
        let l = Rc::clone(&log);
        group.on_entity_removed(move |_, _, trigger| {
            l.borrow_mut().push(format!("removed {:?}", trigger.map(|(index, _)| index)))
        });

        // destroying an excluded entity must not bring it back in
        let e = world.create_entity();
        e.add_component(VIEW, ComponentRef::new(())).unwrap();
        world.destroy_entity(&e).unwrap();

        let kept = world.create_entity();
        kept.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        world.destroy_entity(&kept).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["added None", "removed Some(2)", "added None", "removed None"]
        );
        assert!(group.is_empty());
        assert_eq!(world.reusable_entities_count(), 1);
        assert_eq!(world.retained_entities_count(), 0);
    }

    #[test]
    fn world_retain_cannot_be_released_from_outside() {
        let world = World::new(1);
        let owner = world.create_owner();
        let e = world.create_entity();
        e.retain(owner).unwrap();
        assert!(matches!(
            e.release(World::OWNER),
            Err(EntityError::ReservedOwner { .. })
        ));
        assert!(e.is_retained_by(World::OWNER));

        world.destroy_entity(&e).unwrap();
        assert_eq!(world.reusable_entities_count(), 0);
        assert_eq!(world.retained_entities_count(), 1);
        assert!(!e.is_retained_by(World::OWNER));

        // still retained, so never handed out again
        let other = world.create_entity();
        assert_ne!(other, e);
        assert_eq!(other.retain_count(), 1);

        e.release(owner).unwrap();
        assert_eq!(world.retained_entities_count(), 0);
        assert_eq!(world.reusable_entities_count(), 1);
    }

    #[test]
    fn group_with_unknown_index_is_rejected() {
        let world = World::new(2);
        assert!(matches!(
            world.get_group(&Matcher::all_of([5])),
            Err(WorldError::IndexOutOfRange { index: 5, total: 2, .. })
        ));
        assert_eq!(world.group_count(), 0);
    }

    #[test]
    fn clear_groups_releases_members() {
        let world = World::new(2);
        let group = world.get_group(&Matcher::all_of([POSITION])).unwrap();
        let (cleared, cleared_count) = counter();
        world.on_group_cleared(move |_, _| cleared.set(cleared.get() + 1));
        group.on_entity_added(|_, _, _| {});
        let e = world.create_entity();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();

        world.clear_groups().unwrap();
        assert_eq!(e.retain_count(), 1);
        assert!(group.is_empty());
        assert!(group.events().entity_added.is_empty());
        assert_eq!(cleared_count.get(), 1);
        assert_eq!(world.group_count(), 0);

        // cleared groups no longer receive updates
        e.remove_component(POSITION).unwrap();
        e.add_component(POSITION, ComponentRef::new(Position::default()))
            .unwrap();
        assert!(group.is_empty());
    }

    #[test]
    fn destroy_all_detects_leaks() {
        let world = World::new(1);
        let owner = world.create_owner();
        let leaked = world.create_entity();
        world.create_entity();
        leaked.retain(owner).unwrap();

        let err = world.destroy_all_entities().unwrap_err();
        assert!(matches!(err, WorldError::RetainedEntitiesRemain { count: 1, .. }));
        assert_eq!(world.count(), 0);
        assert_eq!(world.retained_entities_count(), 1);
        assert!(!err.hint().is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let world = World::new(2);
        world.get_group(&Matcher::all_of([POSITION])).unwrap();
        for _ in 0..3 {
            world
                .create_entity()
                .add_component(POSITION, ComponentRef::new(Position::default()))
                .unwrap();
        }

        world.reset().unwrap();
        assert_eq!(world.count(), 0);
        assert_eq!(world.group_count(), 0);
        assert_eq!(world.reusable_entities_count(), 3);
        assert_eq!(world.create_entity().creation_index(), 0);
    }

    #[test]
    fn component_pools_can_be_cleared() {
        let world = World::new(2);
        let e = world.create_entity();
        e.add_with(POSITION, |p: &mut Position| p.y = 3).unwrap();
        e.remove_component(POSITION).unwrap();
        assert_eq!(world.component_pool_len(POSITION), 1);

        world.clear_component_pool(POSITION).unwrap();
        assert_eq!(world.component_pool_len(POSITION), 0);
        assert!(world.clear_component_pool(9).is_err());

        e.add_with(VELOCITY, |v: &mut Velocity| v.dx = 1).unwrap();
        e.remove_component(VELOCITY).unwrap();
        world.clear_component_pools();
        assert_eq!(world.component_pool_len(VELOCITY), 0);
    }

    #[test]
    fn metadata_must_match_component_count() {
        let meta = WorldMetadata::new("Game", vec!["Position".into()]);
        let err = World::with_metadata(2, 0, meta).unwrap_err();
        assert!(matches!(
            err,
            WorldError::MetadataMismatch { expected: 2, got: 1, .. }
        ));
    }

    #[test]
    fn world_from_config() {
        let config = WorldConfig {
            name: "Board".into(),
            component_names: vec!["Position".into(), "Score".into()],
            start_creation_index: 4,
        };
        let world = World::from_config(&config).unwrap();
        assert_eq!(world.name(), "Board");
        assert_eq!(world.total_components(), 2);
        assert_eq!(world.to_string(), "Board");

        let e = world.create_entity();
        assert_eq!(e.creation_index(), 4);
        e.add_component(1, ComponentRef::new(0u32)).unwrap();
        assert_eq!(e.to_string(), "Entity_4(Score)");

        assert!(World::from_config(&WorldConfig::default()).is_err());
    }

    #[test]
    fn index_matcher_is_shared() {
        let world = World::new(2);
        let a = world.index_matcher(POSITION).unwrap();
        let b = world.index_matcher(POSITION).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.all_of_indices(), &[POSITION]);
        assert!(world.index_matcher(2).is_err());
    }

    #[test]
    fn dropped_world_leaves_entities_inert() {
        let world = World::new(1);
        let e = world.create_entity();
        drop(world);
        e.add_component(0, ComponentRef::new(1u8)).unwrap();
        assert!(e.has_component(0));
    }
}
