//! Proxy records: named-method views over record values
//!
//! A `RecordShape` is the capability table of one record type: every method
//! the JS side may call on a wrapped record, mapped to a typed handler.
//! Dispatch is a table lookup, never reflection.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::value::{RecordValue, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Proxy View
// ─────────────────────────────────────────────────────────────────────────────

/// Borrowed method-accessor view of a record value
#[derive(Debug, Clone, Copy)]
pub struct ProxyRecord<'a> {
    record: &'a RecordValue,
}

impl<'a> ProxyRecord<'a> {
    pub fn new(record: &'a RecordValue) -> Self {
        Self { record }
    }

    pub fn type_name(&self) -> &'a str {
        &self.record.type_name
    }

    pub fn field(&self, name: &str) -> Option<&'a Value> {
        self.record.get(name)
    }

    pub fn record(&self) -> &'a RecordValue {
        self.record
    }
}

impl Value {
    /// Structural proxy view of a record-shaped value
    pub fn as_proxy(&self) -> Option<ProxyRecord<'_>> {
        self.as_record().map(ProxyRecord::new)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Handler for one proxy method
pub type MethodHandler =
    Arc<dyn Fn(&ProxyRecord<'_>, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Error invoking a method through a shape
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    #[error("Record type {shape} has no method {method}")]
    UnknownMethod { shape: String, method: String },

    #[error("Shape {expected} cannot dispatch on a {actual} record")]
    ShapeMismatch { expected: String, actual: String },

    #[error("{method}: {message}")]
    Handler { method: String, message: String },
}

/// Capability table for one record type
#[derive(Clone)]
pub struct RecordShape {
    name: String,
    methods: BTreeMap<String, MethodHandler>,
}

impl RecordShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Shape exposing one accessor per field of `record`, named after the field
    pub fn from_record(record: &RecordValue) -> Self {
        record
            .fields
            .iter()
            .fold(Self::new(record.type_name.clone()), |shape, (field, _)| {
                shape.accessor(field.clone(), field.clone())
            })
    }

    /// Add a zero-argument method returning `field` (void when absent)
    pub fn accessor(self, method: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        self.method(method, move |record, _args| {
            Ok(record.field(&field).cloned().unwrap_or_default())
        })
    }

    pub fn accessors(self, fields: &[&str]) -> Self {
        fields
            .iter()
            .fold(self, |shape, field| shape.accessor(*field, *field))
    }

    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ProxyRecord<'_>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn invoke(
        &self,
        method: &str,
        record: &ProxyRecord<'_>,
        args: &[Value],
    ) -> Result<Value, ProxyError> {
        if record.type_name() != self.name {
            return Err(ProxyError::ShapeMismatch {
                expected: self.name.clone(),
                actual: record.type_name().to_string(),
            });
        }
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| ProxyError::UnknownMethod {
                shape: self.name.clone(),
                method: method.to_string(),
            })?;
        handler(record, args).map_err(|message| ProxyError::Handler {
            method: method.to_string(),
            message,
        })
    }
}

impl std::fmt::Debug for RecordShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordShape")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shape Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Record shapes keyed by record type name
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    shapes: DashMap<String, Arc<RecordShape>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shape, replacing any previous shape of the same name
    pub fn register(&self, shape: RecordShape) {
        self.shapes.insert(shape.name.clone(), Arc::new(shape));
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<RecordShape>> {
        self.shapes.get(type_name).map(|s| s.value().clone())
    }

    pub fn shape_for(&self, record: &RecordValue) -> Option<Arc<RecordShape>> {
        self.get(&record.type_name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shapes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
