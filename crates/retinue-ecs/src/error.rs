//! Error types for entity, matcher, group and world operations.
//!
//! Every failure here is a contract violation by the caller rather than a
//! runtime condition: nothing is retried and no operation is left half done.
//! Each error renders a short message through `Display` and offers a
//! remediation hint through `hint()`.

use retinue_core::{ComponentIndex, ConfigError, OwnerId};

/// Errors raised by [`Entity`](crate::Entity) operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("cannot add component '{component}' to {entity}: component already exists")]
    ComponentAlreadyPresent { entity: String, component: String },

    #[error("cannot {operation} component '{component}' on {entity}: component does not exist")]
    ComponentMissing {
        entity: String,
        component: String,
        operation: &'static str,
    },

    #[error("component '{component}' on {entity} is a {actual}, not a {expected}")]
    ComponentTypeMismatch {
        entity: String,
        component: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot {operation} on {entity}: entity is not enabled")]
    NotEnabled {
        entity: String,
        operation: &'static str,
    },

    #[error("component index {index} is out of range ({total} component types)")]
    IndexOutOfRange { index: ComponentIndex, total: usize },

    #[error("{entity} is already retained by {owner}")]
    AlreadyRetained { entity: String, owner: OwnerId },

    #[error("{entity} is not retained by {owner}")]
    NotRetained { entity: String, owner: OwnerId },

    #[error("{owner} is reserved for the world and cannot retain or release {entity}")]
    ReservedOwner { entity: String, owner: OwnerId },

    #[error("cannot release {entity}: entity is not destroyed yet")]
    NotDestroyed { entity: String },

    #[error("{entity} handle belongs to an earlier incarnation of this entity")]
    Stale { entity: String },
}

impl EntityError {
    /// How to avoid this error
    pub fn hint(&self) -> &'static str {
        match self {
            Self::ComponentAlreadyPresent { .. } => {
                "Check has_component() before adding, or use replace_component()."
            }
            Self::ComponentMissing { .. } => {
                "Check has_component() before reading or removing a component."
            }
            Self::ComponentTypeMismatch { .. } => {
                "Each component index must always hold the same concrete type."
            }
            Self::NotEnabled { .. } => {
                "The entity was destroyed. Do not mutate an entity after destroying it."
            }
            Self::IndexOutOfRange { .. } => {
                "Component indices must be below the world's total component count."
            }
            Self::AlreadyRetained { .. } => "An owner may retain an entity only once.",
            Self::NotRetained { .. } => "Only release an entity you previously retained.",
            Self::ReservedOwner { .. } => {
                "Get an owner id from World::create_owner(); the world manages its own retain."
            }
            Self::NotDestroyed { .. } => {
                "Destroy entities through the world before releasing their last retain."
            }
            Self::Stale { .. } => {
                "Retain an entity before destroying it if you need the handle afterwards."
            }
        }
    }
}

/// Errors raised while composing a [`Matcher`](crate::Matcher)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatcherError {
    #[error("cannot merge {matcher}: composed matchers must have exactly one index, found {count}")]
    NotSingleIndex { matcher: String, count: usize },
}

impl MatcherError {
    pub fn hint(&self) -> &'static str {
        "Only compose matchers built from a single component index, e.g. Matcher::all_of([i])."
    }
}

/// Errors raised by [`Group`](crate::Group) queries
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("cannot get the single entity from group {matcher}: group contains {count} entities")]
    MultipleEntities { matcher: String, count: usize },
}

impl GroupError {
    pub fn hint(&self) -> &'static str {
        "Make sure there is only one entity matching this group's matcher."
    }
}

/// Errors raised by [`World`](crate::World) operations
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("'{world}' cannot destroy {entity}: world does not contain entity")]
    EntityNotInWorld { world: String, entity: String },

    #[error("'{world}' detected {count} retained entities although all entities got destroyed")]
    RetainedEntitiesRemain { world: String, count: usize },

    #[error("invalid metadata for '{world}': expected {expected} component name(s) but got {got}")]
    MetadataMismatch {
        world: String,
        expected: usize,
        got: usize,
    },

    #[error("component index {index} is out of range for '{world}' ({total} component types)")]
    IndexOutOfRange {
        world: String,
        index: ComponentIndex,
        total: usize,
    },

    #[error("could not set unique '{component}': '{world}' already has an entity with it")]
    UniqueAlreadyExists { world: String, component: String },

    #[error("'{world}' has no entity with unique '{component}'")]
    UniqueMissing { world: String, component: String },
}

impl WorldError {
    /// How to avoid this error
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Entity(err) => err.hint(),
            Self::Matcher(err) => err.hint(),
            Self::Group(err) => err.hint(),
            Self::Config(_) => "Fix the world configuration file and reload it.",
            Self::EntityNotInWorld { .. } => {
                "Did you call destroy_entity() on the wrong world, or destroy it twice?"
            }
            Self::RetainedEntitiesRemain { .. } => {
                "Release every entity you retained. Call clear_groups() before \
                 destroy_all_entities() to avoid leaks."
            }
            Self::MetadataMismatch { .. } => {
                "Provide exactly one component name per component type."
            }
            Self::IndexOutOfRange { .. } => {
                "Component indices must be below the world's total component count."
            }
            Self::UniqueAlreadyExists { .. } => {
                "Check has_unique() before setting it, or use replace_unique()."
            }
            Self::UniqueMissing { .. } => "Check has_unique() before reading or removing it.",
        }
    }
}
