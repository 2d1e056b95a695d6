//! Core types used throughout the Retinue runtime

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense index of a component type, `0..total_components`.
pub type ComponentIndex = usize;

/// Monotonic counter value handed to each created entity.
pub type CreationIndex = u32;

/// Identity of a party holding a retain on an entity.
///
/// Owner ids are handed out by a world; the world itself always owns id `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Create an owner id from its raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value of this id
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner#{}", self.0)
    }
}

/// Descriptive data about a world. Only used to produce readable
/// diagnostics, never to drive behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMetadata {
    pub world_name: String,
    pub component_names: Vec<String>,
}

impl WorldMetadata {
    /// Name used when a world is created without metadata
    pub const UNNAMED: &'static str = "Unnamed World";

    pub fn new(world_name: impl Into<String>, component_names: Vec<String>) -> Self {
        Self {
            world_name: world_name.into(),
            component_names,
        }
    }

    /// Placeholder metadata naming each component `Index <n>`.
    pub fn unnamed(total_components: usize) -> Self {
        Self {
            world_name: Self::UNNAMED.to_string(),
            component_names: (0..total_components).map(|i| format!("Index {i}")).collect(),
        }
    }

    /// Number of component names carried
    pub fn total_components(&self) -> usize {
        self.component_names.len()
    }

    /// Readable name for a component index, falling back to `Index <n>`
    /// for indices outside the name table.
    pub fn component_name(&self, index: ComponentIndex) -> String {
        match self.component_names.get(index) {
            Some(name) => name.clone(),
            None => format!("Index {index}"),
        }
    }
}
