//! Retinue ECS - pooled entity runtime
//!
//! A single-threaded entity/component runtime. Entities are recycled
//! through a world-owned pool and kept alive by owner-keyed retains.
//! Components live in fixed index slots and are recycled through per-index
//! pools. Groups keep the set of entities matching a [`Matcher`] up to date
//! as components come and go.

mod component;
mod entity;
mod error;
mod event;
mod group;
mod matcher;
mod unique;
mod world;

pub use component::{Component, ComponentPools, ComponentRef};
pub use entity::{ComponentChangedFn, ComponentReplacedFn, Entity, EntityEvents, EntityReleasedFn};
pub use error::{EntityError, GroupError, MatcherError, WorldError};
pub use event::{Event, SubscriptionId};
pub use group::{Group, GroupChange, GroupChangedFn, GroupEvents, GroupUpdatedFn};
pub use matcher::{Matcher, MatcherBuilder};
pub use world::{World, WorldEntityFn, WorldEvents, WorldGroupFn};

pub use retinue_core::{
    ComponentIndex, ConfigError, CreationIndex, OwnerId, WorldConfig, WorldMetadata,
};
