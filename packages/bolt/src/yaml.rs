//! Reading inventory YAML files into the value model.

use std::fs;
use std::path::Path;

use thiserror::Error;

use muster_core::{Map, Value};

/// Failure to turn a file on disk into a value-model mapping.
#[derive(Debug, Error)]
pub enum YamlError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("{path}: {message}")]
    Unsupported { path: String, message: String },

    #[error("the file {path} does not contain a map of values")]
    NotAMap { path: String },
}

/// Read one inventory file.
///
/// # Errors
///
/// I/O and parse failures, a non-mapping document, or a document containing
/// a value the model cannot represent (floats, integers beyond `i64`,
/// non-string mapping keys, tagged values).
pub fn read_inventory(path: &Path) -> Result<Map, YamlError> {
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| YamlError::Io {
        path: display.clone(),
        source,
    })?;
    let parsed: serde_yaml_ng::Value =
        serde_yaml_ng::from_str(&text).map_err(|source| YamlError::Parse {
            path: display.clone(),
            source,
        })?;
    match convert(&display, parsed)? {
        Value::Map(m) => Ok(m),
        _ => Err(YamlError::NotAMap { path: display }),
    }
}

fn convert(path: &str, v: serde_yaml_ng::Value) -> Result<Value, YamlError> {
    let unsupported = |message: String| YamlError::Unsupported {
        path: path.to_string(),
        message,
    };
    match v {
        serde_yaml_ng::Value::Null => Ok(Value::Null),
        serde_yaml_ng::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_yaml_ng::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| unsupported(format!("number {n} is not a signed 64-bit integer"))),
        serde_yaml_ng::Value::String(s) => Ok(Value::String(s)),
        serde_yaml_ng::Value::Sequence(items) => Ok(Value::Seq(
            items
                .into_iter()
                .map(|item| convert(path, item))
                .collect::<Result<_, _>>()?,
        )),
        serde_yaml_ng::Value::Mapping(entries) => {
            let mut m = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    serde_yaml_ng::Value::String(s) => s,
                    other => {
                        return Err(unsupported(format!(
                            "mapping key {other:?} is not a string"
                        )))
                    }
                };
                m.insert(key, convert(path, v)?);
            }
            Ok(Value::Map(m))
        }
        serde_yaml_ng::Value::Tagged(tagged) => {
            Err(unsupported(format!("unsupported tagged value {}", tagged.tag)))
        }
    }
}
