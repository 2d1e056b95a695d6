//! Retinue Core - Core types shared by the Retinue crates
//!
//! This crate provides the foundational types used throughout the runtime:
//! - Component and creation indices
//! - Owner identities for entity retain accounting
//! - World metadata used for diagnostics
//! - Serializable world configuration

pub mod config;
pub mod types;

pub use config::{ConfigError, WorldConfig};
pub use types::{ComponentIndex, CreationIndex, OwnerId, WorldMetadata};
