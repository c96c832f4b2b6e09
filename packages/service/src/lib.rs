//! The external interface facade of the muster inventory service.
//!
//! Maps resource names (`<service>.<key>`) onto a [`muster_core::Storage`],
//! turning complex values into references the transport can fetch on demand
//! and converting the storage's modification stream into typed resource
//! events for a subscriber. The transport itself (RPC, pub-sub) is out of
//! scope; this layer is the fixed interface it would consume.

mod event;
mod output;
mod service;

pub use event::{FieldChange, ResourceEvent, Subscriber};
pub use output::{LookupResult, Model, OutputValue, QueryResponse, Reference, Resource};
pub use service::{Service, ServiceError, DEFAULT_SERVICE_NAME};
