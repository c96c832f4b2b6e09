//! Typed modification events handed to the transport subscriber.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::output::OutputValue;

/// The new state of one field inside a change event.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    /// The field was removed.
    Deleted,
    /// The field now holds this value or reference.
    Value(OutputValue),
}

impl Serialize for FieldChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldChange::Deleted => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("action", "delete")?;
                m.end()
            }
            FieldChange::Value(v) => v.serialize(serializer),
        }
    }
}

/// One event on a single resource, ready for the transport.
///
/// A `Set` modification has no direct equivalent on the wire and arrives as
/// a `Remove` followed by an `Add` at the same index.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ResourceEvent {
    Create {
        rid: String,
        value: OutputValue,
    },
    Change {
        rid: String,
        fields: IndexMap<String, FieldChange>,
    },
    Delete {
        rid: String,
    },
    Reset {
        rid: String,
    },
    Add {
        rid: String,
        index: usize,
        value: OutputValue,
    },
    Remove {
        rid: String,
        index: usize,
    },
}

impl ResourceEvent {
    /// The full name of the resource the event applies to.
    pub fn rid(&self) -> &str {
        match self {
            ResourceEvent::Create { rid, .. }
            | ResourceEvent::Change { rid, .. }
            | ResourceEvent::Delete { rid }
            | ResourceEvent::Reset { rid }
            | ResourceEvent::Add { rid, .. }
            | ResourceEvent::Remove { rid, .. } => rid,
        }
    }
}

/// Receives the modification event stream.
///
/// Called synchronously from whichever thread produced the modifications
/// (the watcher worker, or a reader that triggered an eager refresh) with no
/// storage locks held. Implementations must not block indefinitely.
pub trait Subscriber: Send + Sync {
    fn event(&self, event: &ResourceEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Reference;
    use muster_core::Value;

    #[test]
    fn deleted_fields_serialize_as_delete_actions() {
        let mut fields = IndexMap::new();
        fields.insert(
            "transport".to_string(),
            FieldChange::Value(OutputValue::Inline(Value::from("winrm"))),
        );
        fields.insert("stale".to_string(), FieldChange::Deleted);
        let event = ResourceEvent::Change {
            rid: "inventory.realm_a.mc1.config".to_string(),
            fields,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"change","rid":"inventory.realm_a.mc1.config","fields":{"transport":"winrm","stale":{"action":"delete"}}}"#
        );
    }

    #[test]
    fn create_events_carry_the_reference() {
        let event = ResourceEvent::Create {
            rid: "inventory.targets.4".to_string(),
            value: OutputValue::Ref(Reference::new("inventory.targets.4")),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"create","rid":"inventory.targets.4","value":{"rid":"inventory.targets.4"}}"#
        );
    }
}
