//! Unique components: component types held by at most one entity per world,
//! such as a score or the current level.
//!
//! Each accessor goes through the world's shared `AllOf(index)` group, so
//! lookups after the first are a group read rather than a scan.

use retinue_core::ComponentIndex;

use crate::component::{Component, ComponentRef};
use crate::entity::Entity;
use crate::error::WorldError;
use crate::world::World;

impl World {
    /// The single entity holding component `index`, if any.
    ///
    /// Fails if more than one entity holds it.
    pub fn unique_entity(&self, index: ComponentIndex) -> Result<Option<Entity>, WorldError> {
        let group = self.get_group(&self.index_matcher(index)?)?;
        Ok(group.single_entity()?)
    }

    pub fn has_unique(&self, index: ComponentIndex) -> Result<bool, WorldError> {
        Ok(self.unique_entity(index)?.is_some())
    }

    pub fn unique_component(&self, index: ComponentIndex) -> Result<ComponentRef, WorldError> {
        let entity = self.require_unique(index)?;
        Ok(entity.get_component(index)?)
    }

    /// Run `read` against the unique component at `index` as a `T`.
    pub fn with_unique<T: Component, R>(
        &self,
        index: ComponentIndex,
        read: impl FnOnce(&T) -> R,
    ) -> Result<R, WorldError> {
        let entity = self.require_unique(index)?;
        Ok(entity.with_component(index, read)?)
    }

    /// Create an entity holding `component` at `index`.
    pub fn set_unique(
        &self,
        index: ComponentIndex,
        component: ComponentRef,
    ) -> Result<Entity, WorldError> {
        self.ensure_no_unique(index)?;
        let entity = self.create_entity();
        entity.add_component(index, component)?;
        Ok(entity)
    }

    /// Create an entity holding a pooled (or new) `T` at `index`.
    pub fn set_unique_with<T: Component + Default>(
        &self,
        index: ComponentIndex,
        init: impl FnOnce(&mut T),
    ) -> Result<Entity, WorldError> {
        self.ensure_no_unique(index)?;
        let entity = self.create_entity();
        entity.add_with(index, init)?;
        Ok(entity)
    }

    /// Replace the unique component at `index`, or set it if absent.
    pub fn replace_unique(
        &self,
        index: ComponentIndex,
        component: ComponentRef,
    ) -> Result<Entity, WorldError> {
        match self.unique_entity(index)? {
            Some(entity) => {
                entity.replace_component(index, component)?;
                Ok(entity)
            }
            None => self.set_unique(index, component),
        }
    }

    pub fn replace_unique_with<T: Component + Default>(
        &self,
        index: ComponentIndex,
        init: impl FnOnce(&mut T),
    ) -> Result<Entity, WorldError> {
        match self.unique_entity(index)? {
            Some(entity) => {
                entity.replace_with(index, init)?;
                Ok(entity)
            }
            None => self.set_unique_with(index, init),
        }
    }

    /// Destroy the entity holding the unique component at `index`.
    pub fn remove_unique(&self, index: ComponentIndex) -> Result<(), WorldError> {
        let entity = self.require_unique(index)?;
        self.destroy_entity(&entity)
    }

    fn require_unique(&self, index: ComponentIndex) -> Result<Entity, WorldError> {
        self.unique_entity(index)?
            .ok_or_else(|| WorldError::UniqueMissing {
                world: self.to_string(),
                component: self.metadata().component_name(index),
            })
    }

    fn ensure_no_unique(&self, index: ComponentIndex) -> Result<(), WorldError> {
        if self.has_unique(index)? {
            return Err(WorldError::UniqueAlreadyExists {
                world: self.to_string(),
                component: self.metadata().component_name(index),
            });
        }
        Ok(())
    }
}
