//! The inventory document schema (version 2).
//!
//! A document is a mapping with exactly `version: 2` plus optional `config`,
//! `facts`, `vars` (data maps with ascii-string keys), `features` (ascii
//! strings), `groups` and `targets`. Validation happens once per file read,
//! before any group tree is built, so the model code can assume shapes.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use muster_core::{Map, Value};

const NAME_PATTERN: &str = r"\A[a-z0-9_][a-z0-9_-]*\z";

lazy_static! {
    static ref NAME_RX: Regex = Regex::new(NAME_PATTERN).unwrap();
}

const INVENTORY_KEYS: &[&str] = &[
    "version", "config", "facts", "vars", "features", "groups", "targets",
];
const GROUP_KEYS: &[&str] = &[
    "name", "config", "facts", "vars", "features", "groups", "targets",
];
const TARGET_KEYS: &[&str] = &[
    "name", "uri", "alias", "config", "facts", "vars", "features",
];

/// A violation found while validating an inventory document.
///
/// `path` is the dotted location inside the document, e.g.
/// `groups.0.targets.2.alias`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{path}: expected {expected}")]
    Mismatch { path: String, expected: &'static str },

    #[error("{path}: missing required key {key:?}")]
    MissingKey { path: String, key: &'static str },

    #[error("{path}: unknown key {key:?}")]
    UnknownKey { path: String, key: String },

    #[error("{path}: {value:?} does not match the name pattern")]
    BadName { path: String, value: String },

    #[error("{path}: expected an ascii string")]
    NotAscii { path: String },

    #[error("{path}: inventory version must be 2")]
    BadVersion { path: String },

    #[error("{path}: a target needs a name or a uri")]
    AnonymousTarget { path: String },
}

/// The compiled patterns and validation rules for inventory documents.
///
/// Constructed once at startup and passed to the components that need it;
/// there is no process-global registry.
#[derive(Clone, Debug)]
pub struct SchemaSet {
    name: Regex,
}

impl SchemaSet {
    pub fn new() -> Self {
        SchemaSet {
            name: NAME_RX.clone(),
        }
    }

    /// True when `s` is a valid group/target/alias name.
    pub fn is_name(&self, s: &str) -> bool {
        self.name.is_match(s)
    }

    fn is_ascii(s: &str) -> bool {
        !s.is_empty() && s.is_ascii()
    }

    /// Validate a whole inventory document.
    ///
    /// # Errors
    ///
    /// The first violation found, labelled with its location.
    pub fn validate(&self, doc: &Map) -> Result<(), SchemaError> {
        match doc.get("version") {
            Some(Value::Int(2)) => {}
            Some(_) => {
                return Err(SchemaError::BadVersion {
                    path: "version".to_string(),
                })
            }
            None => {
                return Err(SchemaError::MissingKey {
                    path: String::new(),
                    key: "version",
                })
            }
        }
        self.validate_keys("", doc, INVENTORY_KEYS)?;
        self.validate_body("", doc)
    }

    fn validate_keys(&self, path: &str, m: &Map, allowed: &[&str]) -> Result<(), SchemaError> {
        for key in m.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(SchemaError::UnknownKey {
                    path: path.to_string(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    // The keys shared by the document root and every group.
    fn validate_body(&self, path: &str, m: &Map) -> Result<(), SchemaError> {
        for data_key in ["config", "facts", "vars"] {
            if let Some(v) = m.get(data_key) {
                self.validate_data_map(&join(path, data_key), v)?;
            }
        }
        if let Some(v) = m.get("features") {
            self.validate_string_seq(&join(path, "features"), v)?;
        }
        if let Some(v) = m.get("groups") {
            let groups = v.as_seq().ok_or_else(|| SchemaError::Mismatch {
                path: join(path, "groups"),
                expected: "a sequence of groups",
            })?;
            for (i, g) in groups.iter().enumerate() {
                self.validate_group(&join(&join(path, "groups"), &i.to_string()), g)?;
            }
        }
        if let Some(v) = m.get("targets") {
            let targets = v.as_seq().ok_or_else(|| SchemaError::Mismatch {
                path: join(path, "targets"),
                expected: "a sequence of targets",
            })?;
            for (i, t) in targets.iter().enumerate() {
                self.validate_target(&join(&join(path, "targets"), &i.to_string()), t)?;
            }
        }
        Ok(())
    }

    fn validate_group(&self, path: &str, v: &Value) -> Result<(), SchemaError> {
        let m = v.as_map().ok_or_else(|| SchemaError::Mismatch {
            path: path.to_string(),
            expected: "a group mapping",
        })?;
        self.validate_keys(path, m, GROUP_KEYS)?;
        match m.get("name").and_then(Value::as_str) {
            Some(name) if self.is_name(name) => {}
            Some(name) => {
                return Err(SchemaError::BadName {
                    path: join(path, "name"),
                    value: name.to_string(),
                })
            }
            None => {
                return Err(SchemaError::MissingKey {
                    path: path.to_string(),
                    key: "name",
                })
            }
        }
        self.validate_body(path, m)
    }

    fn validate_target(&self, path: &str, v: &Value) -> Result<(), SchemaError> {
        match v {
            Value::String(s) if Self::is_ascii(s) => Ok(()),
            Value::String(_) => Err(SchemaError::NotAscii {
                path: path.to_string(),
            }),
            Value::Map(m) => {
                self.validate_keys(path, m, TARGET_KEYS)?;
                match m.get("name") {
                    None => {}
                    Some(Value::String(name)) if self.is_name(name) => {}
                    Some(Value::String(name)) => {
                        return Err(SchemaError::BadName {
                            path: join(path, "name"),
                            value: name.clone(),
                        })
                    }
                    Some(_) => {
                        return Err(SchemaError::Mismatch {
                            path: join(path, "name"),
                            expected: "a name string",
                        })
                    }
                }
                match m.get("uri") {
                    None => {}
                    Some(Value::String(uri)) if Self::is_ascii(uri) => {}
                    Some(_) => {
                        return Err(SchemaError::NotAscii {
                            path: join(path, "uri"),
                        })
                    }
                }
                if !m.contains_key("name") && !m.contains_key("uri") {
                    return Err(SchemaError::AnonymousTarget {
                        path: path.to_string(),
                    });
                }
                if let Some(alias) = m.get("alias") {
                    self.validate_alias(&join(path, "alias"), alias)?;
                }
                for data_key in ["config", "facts", "vars"] {
                    if let Some(v) = m.get(data_key) {
                        self.validate_data_map(&join(path, data_key), v)?;
                    }
                }
                if let Some(v) = m.get("features") {
                    self.validate_string_seq(&join(path, "features"), v)?;
                }
                Ok(())
            }
            _ => Err(SchemaError::Mismatch {
                path: path.to_string(),
                expected: "a target mapping or reference string",
            }),
        }
    }

    fn validate_alias(&self, path: &str, v: &Value) -> Result<(), SchemaError> {
        let check = |path: &str, s: &str| {
            if self.is_name(s) {
                Ok(())
            } else {
                Err(SchemaError::BadName {
                    path: path.to_string(),
                    value: s.to_string(),
                })
            }
        };
        match v {
            Value::String(s) => check(path, s),
            Value::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    let s = item.as_str().ok_or_else(|| SchemaError::Mismatch {
                        path: join(path, &i.to_string()),
                        expected: "an alias name",
                    })?;
                    check(&join(path, &i.to_string()), s)?;
                }
                Ok(())
            }
            _ => Err(SchemaError::Mismatch {
                path: path.to_string(),
                expected: "an alias name or a sequence of alias names",
            }),
        }
    }

    fn validate_data_map(&self, path: &str, v: &Value) -> Result<(), SchemaError> {
        let m = v.as_map().ok_or_else(|| SchemaError::Mismatch {
            path: path.to_string(),
            expected: "a data mapping",
        })?;
        for key in m.keys() {
            if !Self::is_ascii(key) {
                return Err(SchemaError::NotAscii {
                    path: join(path, key),
                });
            }
        }
        Ok(())
    }

    fn validate_string_seq(&self, path: &str, v: &Value) -> Result<(), SchemaError> {
        let items = v.as_seq().ok_or_else(|| SchemaError::Mismatch {
            path: path.to_string(),
            expected: "a sequence of ascii strings",
        })?;
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) if Self::is_ascii(s) => {}
                _ => {
                    return Err(SchemaError::NotAscii {
                        path: join(path, &i.to_string()),
                    })
                }
            }
        }
        Ok(())
    }
}

impl Default for SchemaSet {
    fn default() -> Self {
        SchemaSet::new()
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
