//! Typed value union shared by native script code and the embedded JS engine
//!
//! Values carry their declared `Type` so they can be re-wrapped correctly when
//! crossing into the secondary engine. Equality is structural: declared types
//! of aggregates and plurals do not take part in comparisons.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AggregateType, PluralValueType, Type, TypeError};

// ─────────────────────────────────────────────────────────────────────────────
// Handle Types
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for opaque handles to host objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub uuid::Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a host object that has no script-level representation.
///
/// Handles are never allowed to cross into the JS engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub id: HandleId,
    /// Host type of the referenced object
    pub type_id: String,
}

impl Handle {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            id: HandleId::new(),
            type_id: type_id.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Named record with ordered fields (an item, an effect, a response...)
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

impl RecordValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregates
// ─────────────────────────────────────────────────────────────────────────────

/// Key of a keyed aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    String(String),
}

impl MapKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Int(i) => Some(MapKey::Int(*i)),
            Value::String(s) => Some(MapKey::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(b) => write!(f, "{}", b),
            MapKey::Int(i) => write!(f, "{}", i),
            MapKey::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<MapKey> for Value {
    fn from(key: MapKey) -> Self {
        match key {
            MapKey::Bool(b) => Value::Bool(b),
            MapKey::Int(i) => Value::Int(i),
            MapKey::String(s) => Value::String(s),
        }
    }
}

/// Storage of an aggregate; ordered for integer-indexed types
#[derive(Debug, Clone, PartialEq)]
pub enum Entries {
    Ordered(Vec<Value>),
    Keyed(HashMap<MapKey, Value>),
}

#[derive(Debug, Clone)]
pub struct AggregateValue {
    ty: AggregateType,
    entries: Entries,
}

impl AggregateValue {
    pub fn new(ty: AggregateType) -> Self {
        let entries = if ty.is_ordered() {
            Entries::Ordered(Vec::new())
        } else {
            Entries::Keyed(HashMap::new())
        };
        Self { ty, entries }
    }

    pub fn list(data: Type, elements: Vec<Value>) -> Self {
        Self {
            ty: AggregateType::list(data),
            entries: Entries::Ordered(elements),
        }
    }

    pub fn map<I>(index: Type, data: Type, entries: I) -> Self
    where
        I: IntoIterator<Item = (MapKey, Value)>,
    {
        Self {
            ty: AggregateType::map(index, data),
            entries: Entries::Keyed(entries.into_iter().collect()),
        }
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.ty
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Ordered(v) => v.len(),
            Entries::Keyed(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        match (&self.entries, key) {
            (Entries::Ordered(v), MapKey::Int(i)) => usize::try_from(*i).ok().and_then(|i| v.get(i)),
            (Entries::Keyed(m), key) => m.get(key),
            _ => None,
        }
    }

    /// Store `value` under `key`. Ordered aggregates accept an existing index
    /// or the next free one; fixed-size arrays reject anything past their size.
    pub fn insert(&mut self, key: MapKey, value: Value) -> Result<(), TypeError> {
        match (&mut self.entries, key) {
            (Entries::Keyed(m), key) => {
                m.insert(key, value);
                Ok(())
            }
            (Entries::Ordered(v), MapKey::Int(i)) => {
                let limit = self.ty.size().unwrap_or(usize::MAX);
                let index = usize::try_from(i)
                    .ok()
                    .filter(|idx| *idx <= v.len() && *idx < limit)
                    .ok_or_else(|| TypeError::OutOfBounds {
                        type_name: self.ty.to_string(),
                        index: i,
                    })?;
                if index == v.len() {
                    v.push(value);
                } else {
                    v[index] = value;
                }
                Ok(())
            }
            (Entries::Ordered(_), other) => Err(TypeError::Mismatch {
                expected: self.ty.index_type().to_string(),
                actual: Value::from(other).ty().to_string(),
            }),
        }
    }
}

impl PartialEq for AggregateValue {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plural Values
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed enumeration snapshot of elements of a single type
#[derive(Debug, Clone)]
pub struct PluralValue {
    ty: PluralValueType,
    elements: Vec<Value>,
}

impl PluralValue {
    pub fn new(element: Type, elements: Vec<Value>) -> Self {
        Self {
            ty: PluralValueType::new(element),
            elements,
        }
    }

    pub fn plural_type(&self) -> &PluralValueType {
        &self.ty
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.elements.contains(value)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl PartialEq for PluralValue {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// Tagged union of every runtime value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Record(RecordValue),
    Aggregate(AggregateValue),
    Plural(PluralValue),
    Handle(Handle),
}

impl Value {
    /// Declared type of this value
    pub fn ty(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Bool(_) => Type::Boolean,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::String(_) => Type::String,
            Value::Record(r) => Type::record(r.type_name.clone()),
            Value::Aggregate(a) => Type::Aggregate(a.ty.clone()),
            Value::Plural(p) => Type::Plural(p.ty.clone()),
            Value::Handle(h) => Type::handle(h.type_id.clone()),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Record(_) => "record",
            Value::Aggregate(_) => "aggregate",
            Value::Plural(_) => "plural",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from float if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordValue> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_aggregate(&self) -> Option<&AggregateValue> {
        match self {
            Value::Aggregate(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_plural(&self) -> Option<&PluralValue> {
        match self {
            Value::Plural(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Void, Value::Void) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ if self == other => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", serde_json::Value::from(other.clone())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Void,
        }
    }
}

impl From<RecordValue> for Value {
    fn from(r: RecordValue) -> Self {
        Value::Record(r)
    }
}

impl From<AggregateValue> for Value {
    fn from(a: AggregateValue) -> Self {
        Value::Aggregate(a)
    }
}

impl From<PluralValue> for Value {
    fn from(p: PluralValue) -> Self {
        Value::Plural(p)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Void,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Void
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Aggregate(AggregateValue::list(
                Type::Any,
                arr.into_iter().map(Value::from).collect(),
            )),
            serde_json::Value::Object(mut obj) => match obj.remove("__type__") {
                Some(serde_json::Value::String(type_name)) => {
                    let mut record = RecordValue::new(type_name);
                    for (k, v) in obj {
                        record.set(k, Value::from(v));
                    }
                    Value::Record(record)
                }
                _ => Value::Aggregate(AggregateValue::map(
                    Type::String,
                    Type::Any,
                    obj.into_iter().map(|(k, v)| (MapKey::String(k), Value::from(v))),
                )),
            },
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Void => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Record(r) => {
                let mut obj: serde_json::Map<String, serde_json::Value> = r
                    .fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect();
                obj.insert("__type__".to_string(), serde_json::Value::String(r.type_name));
                serde_json::Value::Object(obj)
            }
            Value::Aggregate(a) => match a.entries {
                Entries::Ordered(v) => {
                    serde_json::Value::Array(v.into_iter().map(serde_json::Value::from).collect())
                }
                Entries::Keyed(m) => serde_json::Value::Object(
                    m.into_iter()
                        .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
                        .collect(),
                ),
            },
            Value::Plural(p) => {
                serde_json::Value::Array(p.elements.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Handle(h) => {
                let mut obj = serde_json::Map::new();
                obj.insert("__handle__".to_string(), serde_json::Value::String(h.id.to_string()));
                obj.insert("__type__".to_string(), serde_json::Value::String(h.type_id));
                serde_json::Value::Object(obj)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TryFrom Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Error when converting from Value
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValueConversionError {
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Integer overflow")]
    IntegerOverflow,
}

impl TryFrom<Value> for bool {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_bool().ok_or(ValueConversionError::TypeMismatch {
            expected: "boolean",
            actual: v.kind_name(),
        })
    }
}

impl TryFrom<Value> for i64 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_i64().ok_or(ValueConversionError::TypeMismatch {
            expected: "int",
            actual: v.kind_name(),
        })
    }
}

impl TryFrom<Value> for i32 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        let i = i64::try_from(v)?;
        i32::try_from(i).map_err(|_| ValueConversionError::IntegerOverflow)
    }
}

impl TryFrom<Value> for u32 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        let i = i64::try_from(v)?;
        u32::try_from(i).map_err(|_| ValueConversionError::IntegerOverflow)
    }
}

impl TryFrom<Value> for f64 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_f64().ok_or(ValueConversionError::TypeMismatch {
            expected: "float",
            actual: v.kind_name(),
        })
    }
}

impl TryFrom<Value> for String {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::String(s) => Ok(s),
            _ => Err(ValueConversionError::TypeMismatch {
                expected: "string",
                actual: v.kind_name(),
            }),
        }
    }
}

impl TryFrom<Value> for RecordValue {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Record(r) => Ok(r),
            _ => Err(ValueConversionError::TypeMismatch {
                expected: "record",
                actual: v.kind_name(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
