//! The service facade: resource names in, values-or-references out.

use std::sync::Arc;

use thiserror::Error;

use muster_core::{Map, Modification, QueryRef, Storage, StorageError, Value};

use crate::event::{FieldChange, ResourceEvent, Subscriber};
use crate::output::{
    convert_value, map_to_model, seq_to_collection, LookupResult, OutputValue, QueryResponse,
    Reference, Resource,
};

/// The service name resources are prefixed with by default.
pub const DEFAULT_SERVICE_NAME: &str = "inventory";

// Complex values fetched through a reference are addressed below this key.
const VALUE_KEY: &str = "__value";

/// A user-visible failure of the facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("resource {0:?} not found")]
    NotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("storage fault: {0}")]
    Fault(StorageError),
}

/// Maps resource names to storage calls.
///
/// A resource name is `<service>.<dotted-key>`. Responses embed scalars and
/// replace complex values with [`Reference`]s; modification lists coming out
/// of the storage are converted to [`ResourceEvent`]s and handed to the
/// registered subscriber.
pub struct Service<S> {
    name: String,
    prefix: String,
    value_prefix: String,
    storage: S,
    subscriber: Option<Arc<dyn Subscriber>>,
}

impl<S: Storage> Service<S> {
    pub fn new(storage: S) -> Service<S> {
        Service::with_name(DEFAULT_SERVICE_NAME, storage)
    }

    pub fn with_name(name: impl Into<String>, storage: S) -> Service<S> {
        let name = name.into();
        Service {
            prefix: format!("{name}."),
            value_prefix: format!("{name}.{VALUE_KEY}."),
            name,
            storage,
            subscriber: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Register the subscriber that receives modification events.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscriber = Some(subscriber);
    }

    fn strip<'a>(&self, rid: &'a str) -> Result<&'a str, ServiceError> {
        rid.strip_prefix(&self.prefix)
            .ok_or_else(|| ServiceError::NotFound(rid.to_string()))
    }

    fn storage_error(rid: &str, error: StorageError) -> ServiceError {
        match error {
            StorageError::NotFound(_) => ServiceError::NotFound(rid.to_string()),
            other => ServiceError::Fault(other),
        }
    }

    /// Resolve a resource by its full name.
    ///
    /// # Errors
    ///
    /// `NotFound` for foreign prefixes and unresolvable keys; `Fault` when
    /// the storage cannot refresh.
    pub fn get_resource(&self, rid: &str) -> Result<Resource, ServiceError> {
        if let Some(key) = rid.strip_prefix(&self.value_prefix) {
            return self.get_complex(rid, key);
        }
        let key = self.strip(rid)?;
        let (mods, value) = self
            .storage
            .get(key)
            .map_err(|e| Self::storage_error(rid, e))?;
        self.publish(&mods);

        let prefix = format!("{rid}.");
        match value {
            None => Err(ServiceError::NotFound(rid.to_string())),
            Some(Value::Seq(items)) => Ok(Resource::Collection(seq_to_collection(&items, &prefix))),
            Some(Value::Map(m)) => Ok(Resource::Model(map_to_model(&m, &prefix))),
            Some(scalar) => Ok(Resource::Value(LookupResult {
                value: OutputValue::Inline(scalar),
            })),
        }
    }

    // A reference fetch: only complex values live behind the value prefix.
    fn get_complex(&self, rid: &str, key: &str) -> Result<Resource, ServiceError> {
        let (mods, value) = self
            .storage
            .get(key)
            .map_err(|e| Self::storage_error(rid, e))?;
        self.publish(&mods);

        let prefix = format!("{rid}.");
        match value {
            Some(Value::Seq(items)) => Ok(Resource::Collection(seq_to_collection(&items, &prefix))),
            Some(Value::Map(m)) => Ok(Resource::Model(map_to_model(&m, &prefix))),
            _ => Err(ServiceError::NotFound(rid.to_string())),
        }
    }

    /// Run a query against a resource.
    ///
    /// Parameters are checked against the storage's advertised set and
    /// folded into a normalized query string (advertised order, escaped
    /// values) carried by the response.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` for unknown or missing required parameters; `NotFound`
    /// when the key is not queryable or nothing matches.
    pub fn query_resource(
        &self,
        rid: &str,
        params: &[(String, String)],
    ) -> Result<QueryResponse, ServiceError> {
        let key = self.strip(rid)?;
        let advertised = self.storage.query_keys(key);
        for (name, _) in params {
            if !advertised.iter().any(|p| p.name() == name) {
                return Err(ServiceError::InvalidQuery(format!(
                    "unknown parameter {name:?}"
                )));
            }
        }

        let mut values = Map::new();
        let mut normalized = String::new();
        for param in &advertised {
            let value = params
                .iter()
                .find(|(name, _)| name == param.name())
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            if value.is_empty() {
                if param.required() {
                    return Err(ServiceError::InvalidQuery(format!(
                        "missing required parameter {:?}",
                        param.name()
                    )));
                }
                continue;
            }
            values.insert(param.name().to_string(), Value::from(value));
            if !normalized.is_empty() {
                normalized.push('&');
            }
            normalized.push_str(param.name());
            normalized.push('=');
            normalized.extend(url::form_urlencoded::byte_serialize(value.as_bytes()));
        }

        let (mods, result) = self
            .storage
            .query(key, &values)
            .map_err(|e| Self::storage_error(rid, e))?;
        self.publish(&mods);
        let result = result.ok_or_else(|| ServiceError::NotFound(rid.to_string()))?;

        let prefix = format!("{rid}.");
        let resource = if result.is_singleton() {
            let value = result.value(0).cloned().unwrap_or(Value::Null);
            let output = if value.is_complex() {
                OutputValue::Ref(Reference::new(format!("{}{key}", self.value_prefix)))
            } else {
                OutputValue::Inline(value)
            };
            Resource::Value(LookupResult { value: output })
        } else if result.is_map() {
            Resource::Model(
                result
                    .iter()
                    .filter_map(|(reference, value)| match reference {
                        QueryRef::Key(k) => {
                            Some((k.clone(), convert_value(&format!("{prefix}{k}"), value)))
                        }
                        _ => None,
                    })
                    .collect(),
            )
        } else {
            Resource::Collection(
                result
                    .iter()
                    .map(|(reference, value)| {
                        let entry_rid = match reference {
                            QueryRef::Index(i) => format!("{prefix}{i}"),
                            QueryRef::Key(k) => format!("{prefix}{k}"),
                            QueryRef::None => rid.to_string(),
                        };
                        convert_value(&entry_rid, value)
                    })
                    .collect(),
            )
        };
        Ok(QueryResponse {
            resource,
            query: normalized,
        })
    }

    /// Store a model at a resource.
    ///
    /// # Errors
    ///
    /// `NotFound` for unresolvable resources; `Fault` when the storage
    /// rejects the operation.
    pub fn set_resource(&self, rid: &str, model: &Map) -> Result<(), ServiceError> {
        let key = self.strip(rid)?;
        let mods = self
            .storage
            .set(key, model)
            .map_err(|e| Self::storage_error(rid, e))?;
        self.publish(&mods);
        Ok(())
    }

    /// Delete a resource.
    ///
    /// # Errors
    ///
    /// `NotFound` for unresolvable resources; `Fault` when the storage
    /// rejects the operation.
    pub fn delete_resource(&self, rid: &str) -> Result<(), ServiceError> {
        let key = self.strip(rid)?;
        let mods = self
            .storage
            .delete(key)
            .map_err(|e| Self::storage_error(rid, e))?;
        self.publish(&mods);
        Ok(())
    }

    /// Convert a modification list and deliver it to the subscriber.
    pub fn publish(&self, mods: &[Modification]) {
        let Some(subscriber) = &self.subscriber else {
            return;
        };
        for modification in mods {
            for event in self.modification_events(modification) {
                log::debug!("{}: {:?}", event.rid(), event);
                subscriber.event(&event);
            }
        }
    }

    /// The transport events for one modification.
    pub fn modification_events(&self, modification: &Modification) -> Vec<ResourceEvent> {
        let rid = format!("{}{}", self.prefix, modification.resource());
        match modification {
            Modification::Delete { .. } => vec![ResourceEvent::Delete { rid }],
            Modification::Reset { .. } => vec![ResourceEvent::Reset { rid }],
            Modification::Create { value, .. } => {
                let value = convert_value(&rid, value);
                vec![ResourceEvent::Create { rid, value }]
            }
            Modification::Change { fields, .. } => {
                let fields = fields
                    .iter()
                    .map(|(k, change)| {
                        let change = match change {
                            None => FieldChange::Deleted,
                            Some(v) => {
                                FieldChange::Value(convert_value(&format!("{rid}.{k}"), v))
                            }
                        };
                        (k.clone(), change)
                    })
                    .collect();
                vec![ResourceEvent::Change { rid, fields }]
            }
            Modification::Add { index, value, .. } => {
                let value = convert_value(&format!("{rid}.{index}"), value);
                vec![ResourceEvent::Add {
                    rid,
                    index: *index,
                    value,
                }]
            }
            Modification::Remove { index, .. } => vec![ResourceEvent::Remove {
                rid,
                index: *index,
            }],
            Modification::Set { index, value, .. } => {
                let value = convert_value(&format!("{rid}.{index}"), value);
                vec![
                    ResourceEvent::Remove {
                        rid: rid.clone(),
                        index: *index,
                    },
                    ResourceEvent::Add {
                        rid,
                        index: *index,
                        value,
                    },
                ]
            }
        }
    }
}
