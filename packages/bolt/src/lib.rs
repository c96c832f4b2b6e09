//! Bolt inventory backend.
//!
//! Exposes a directory of Bolt-style version-2 inventory YAML files as a
//! [`muster_core::Storage`]: one realm per file, a group tree per realm,
//! targets merged from every declaration and every ancestor group, and a
//! bounded-staleness cache that re-reads files at most once per second.
//!
//! [`DirectoryStorage::watch`] adds filesystem notifications on top: edits
//! to the inventory files are turned into the modification stream defined by
//! `muster_core::change` and handed to a callback.

mod data;
mod group;
mod realm;
mod schema;
mod storage;
mod target;
mod watch;
mod yaml;

pub use schema::{SchemaError, SchemaSet};
pub use storage::{DirectoryStorage, MIN_REFRESH};
pub use target::{make_id, split_id, IdError};
pub use watch::WatchHandle;
pub use yaml::YamlError;
