//! Security configuration storage and per-node installation.
//!
//! - [`store`] - The [`ConfigStore`] interface with in-memory and sled backends
//! - [`applier`] - Sequence-gated installation into the role registry

pub mod applier;
pub mod store;

pub use applier::NodeConfigApplier;
pub use store::{ConfigEntry, ConfigStore, MemoryConfigStore, SledConfigStore};
