//! Host Bridge
//!
//! Dispatches method calls from JavaScript onto wrapped native records and
//! converts every result into a `BridgeValue`, a tree the JS engine can
//! represent. A result that still contains an opaque host object after
//! conversion is rejected as a leak.

use std::sync::Arc;

use script_types::{Entries, ProxyError, ProxyRecord, RecordValue, ShapeRegistry, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// `this` was not a wrapped record
    #[error("{method} called on a value that is not a wrapped record")]
    NotWrapped { method: String },

    #[error("Record type {record_type} has no method {method}")]
    UnknownMethod { record_type: String, method: String },

    #[error("{method} failed: {message}")]
    Handler { method: String, message: String },

    /// A native object would have crossed into the engine unconverted
    #[error("{method} returned an unconvertible {type_name}")]
    Leak { method: String, type_name: String },
}

impl BridgeError {
    /// Errors the engine sees as a null result rather than an exception
    pub fn yields_null(&self) -> bool {
        matches!(self, BridgeError::NotWrapped { .. } | BridgeError::Leak { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Value
// ─────────────────────────────────────────────────────────────────────────────

/// Value shape the JavaScript engine can hold
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeValue {
    /// void, boolean, int, float or string
    Primitive(Value),
    Array(Vec<BridgeValue>),
    Object(Vec<(String, BridgeValue)>),
    /// Record re-exposed through its registered shape
    Wrapped(RecordValue),
    /// Host object with no engine representation
    Opaque(String),
}

impl BridgeValue {
    pub fn null() -> Self {
        BridgeValue::Primitive(Value::Void)
    }

    /// First opaque value anywhere in this tree
    pub fn find_opaque(&self) -> Option<&str> {
        match self {
            BridgeValue::Opaque(type_name) => Some(type_name),
            BridgeValue::Array(items) => items.iter().find_map(BridgeValue::find_opaque),
            BridgeValue::Object(fields) => fields.iter().find_map(|(_, v)| v.find_opaque()),
            BridgeValue::Primitive(_) | BridgeValue::Wrapped(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Method dispatch and value export for the JavaScript engine
#[derive(Debug, Default)]
pub struct HostBridge {
    shapes: Arc<ShapeRegistry>,
}

impl HostBridge {
    pub fn new(shapes: Arc<ShapeRegistry>) -> Self {
        Self { shapes }
    }

    pub fn shapes(&self) -> &Arc<ShapeRegistry> {
        &self.shapes
    }

    /// Invoke `method` on the record wrapped by `this`
    pub fn call(
        &self,
        method: &str,
        this: &BridgeValue,
        args: &[Value],
    ) -> Result<BridgeValue, BridgeError> {
        let BridgeValue::Wrapped(record) = this else {
            return Err(BridgeError::NotWrapped {
                method: method.to_string(),
            });
        };
        let shape = self
            .shapes
            .shape_for(record)
            .ok_or_else(|| BridgeError::NotWrapped {
                method: method.to_string(),
            })?;

        let result = shape
            .invoke(method, &ProxyRecord::new(record), args)
            .map_err(|e| match e {
                ProxyError::UnknownMethod { .. } | ProxyError::ShapeMismatch { .. } => {
                    BridgeError::UnknownMethod {
                        record_type: record.type_name.clone(),
                        method: method.to_string(),
                    }
                }
                ProxyError::Handler { message, .. } => BridgeError::Handler {
                    method: method.to_string(),
                    message,
                },
            })?;

        let exported = self.export(method, result);
        tracing::debug!(
            target: "script_js::bridge",
            record_type = %record.type_name,
            method,
            args = args.len(),
            result = ?exported,
            "Bridge call"
        );
        exported
    }

    /// Convert a native result into an engine value, failing on leaks
    pub fn export(&self, method: &str, value: Value) -> Result<BridgeValue, BridgeError> {
        let converted = self.to_bridge(value);
        match converted.find_opaque() {
            Some(type_name) => Err(BridgeError::Leak {
                method: method.to_string(),
                type_name: type_name.to_string(),
            }),
            None => Ok(converted),
        }
    }

    fn to_bridge(&self, value: Value) -> BridgeValue {
        match value {
            v @ (Value::Void | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)) => {
                BridgeValue::Primitive(v)
            }
            Value::Record(record) if self.shapes.get(&record.type_name).is_some() => {
                BridgeValue::Wrapped(record)
            }
            Value::Record(record) => {
                let mut fields: Vec<(String, BridgeValue)> = record
                    .fields
                    .into_iter()
                    .map(|(k, v)| (k, self.to_bridge(v)))
                    .collect();
                fields.push((
                    "__type__".to_string(),
                    BridgeValue::Primitive(Value::String(record.type_name)),
                ));
                BridgeValue::Object(fields)
            }
            Value::Aggregate(aggregate) => match aggregate.entries().clone() {
                Entries::Ordered(items) => {
                    BridgeValue::Array(items.into_iter().map(|v| self.to_bridge(v)).collect())
                }
                Entries::Keyed(map) => {
                    let mut fields: Vec<(String, BridgeValue)> = map
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), self.to_bridge(v)))
                        .collect();
                    fields.sort_by(|a, b| a.0.cmp(&b.0));
                    BridgeValue::Object(fields)
                }
            },
            Value::Plural(plural) => BridgeValue::Array(
                plural
                    .elements()
                    .iter()
                    .cloned()
                    .map(|v| self.to_bridge(v))
                    .collect(),
            ),
            Value::Handle(handle) => BridgeValue::Opaque(handle.type_id),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
