//! Core muster: the value model and storage contracts.
//!
//! Everything an inventory backend publishes is expressed in this layer:
//! - `Value`: the tree-shaped data every snapshot is made of
//! - `deep_merge`: right-biased recursive merge of value mappings
//! - `change`: modification records and the structural diff that produces them
//! - `Storage`: the dot-key addressed contract a backend implements
//! - `query`: query parameters and results
//!
//! Backends build frozen snapshots out of `Value` trees and hand them to
//! readers; the diff turns two consecutive snapshots into the ordered event
//! stream a transport can forward.

pub mod change;
mod merge;
pub mod query;
mod storage;
mod value;

pub use change::{diff_map, diff_seq, ModKind, Modification};
pub use merge::deep_merge;
pub use query::{Param, ParamKind, QueryRef, QueryResult};
pub use storage::{Storage, StorageError};
pub use value::{Map, Value};
