// Script Types - Type descriptors for script values
//
// Type checking is nominal: two types are the same when they print the same
// name. Value equality (see value.rs) ignores declared types entirely.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Source Locations
// ─────────────────────────────────────────────────────────────────────────────

/// Position of a declaration in script source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by type or value mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// Attempt to resize a fixed type (plural values, scalars)
    #[error("Cannot modify constant type {0}")]
    ImmutableType(String),

    #[error("Index {index} out of bounds for {type_name}")]
    OutOfBounds { type_name: String, index: i64 },

    #[error("Expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Type
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type of a script value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Type {
    Void,
    Boolean,
    Int,
    Float,
    String,
    /// Named record (items, effects, skills...)
    Record { name: String },
    /// Map or array keyed by an index type
    Aggregate(AggregateType),
    /// Fixed enumeration of a single element type
    Plural(PluralValueType),
    /// Opaque host object with no script representation
    Handle { target_type: String },
    /// Dynamic type, accepts anything
    Any,
}

impl Type {
    pub fn record(name: impl Into<String>) -> Self {
        Type::Record { name: name.into() }
    }

    pub fn handle(target_type: impl Into<String>) -> Self {
        Type::Handle {
            target_type: target_type.into(),
        }
    }

    /// Nominal type check
    pub fn is_same_as(&self, other: &Type) -> bool {
        matches!(self, Type::Any) || matches!(other, Type::Any) || self == other
    }

    pub fn is_plural(&self) -> bool {
        matches!(self, Type::Plural(_))
    }

    /// Produce a reference to this type at `location`.
    ///
    /// The reference keeps the definition location of the original so every
    /// use site points back at the single declaration.
    pub fn reference(&self, location: SourceLocation) -> Type {
        match self {
            Type::Aggregate(agg) => Type::Aggregate(agg.reference(location)),
            Type::Plural(plural) => Type::Plural(plural.reference(location)),
            other => other.clone(),
        }
    }

    /// Resize a fixed-size aggregate
    pub fn set_size(&mut self, size: usize) -> Result<(), TypeError> {
        match self {
            Type::Aggregate(agg) => agg.set_size(size),
            Type::Plural(plural) => plural.set_size(size),
            other => Err(TypeError::ImmutableType(other.to_string())),
        }
    }

    pub fn definition_location(&self) -> Option<&SourceLocation> {
        match self {
            Type::Aggregate(agg) => agg.definition_location(),
            Type::Plural(plural) => plural.definition_location(),
            _ => None,
        }
    }
}

/// Structural equality; source locations do not take part
impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Void, Type::Void)
            | (Type::Boolean, Type::Boolean)
            | (Type::Int, Type::Int)
            | (Type::Float, Type::Float)
            | (Type::String, Type::String)
            | (Type::Any, Type::Any) => true,
            (Type::Record { name: a }, Type::Record { name: b }) => a == b,
            (Type::Aggregate(a), Type::Aggregate(b)) => a == b,
            (Type::Plural(a), Type::Plural(b)) => a == b,
            (Type::Handle { target_type: a }, Type::Handle { target_type: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "boolean"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Record { name } => write!(f, "{}", name),
            Type::Aggregate(agg) => write!(f, "{}", agg),
            Type::Plural(plural) => write!(f, "{}", plural),
            Type::Handle { target_type } => write!(f, "handle<{}>", target_type),
            Type::Any => write!(f, "any"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Type
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate of `data` keyed by `index`
///
/// Integer-indexed aggregates preserve insertion order; key-indexed ones are
/// unordered maps. A `size` turns the aggregate into a fixed-size array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateType {
    index: Box<Type>,
    data: Box<Type>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    definition: Option<SourceLocation>,
}

impl AggregateType {
    /// Map from `index` to `data`
    pub fn map(index: Type, data: Type) -> Self {
        Self {
            index: Box::new(index),
            data: Box::new(data),
            size: None,
            location: None,
            definition: None,
        }
    }

    /// Growable, integer-indexed list of `data`
    pub fn list(data: Type) -> Self {
        Self::map(Type::Int, data)
    }

    /// Fixed-size integer-indexed array
    pub fn array(data: Type, size: usize) -> Self {
        Self {
            size: Some(size),
            ..Self::list(data)
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn index_type(&self) -> &Type {
        &self.index
    }

    pub fn data_type(&self) -> &Type {
        &self.data
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Integer-indexed aggregates keep their element order
    pub fn is_ordered(&self) -> bool {
        matches!(*self.index, Type::Int)
    }

    pub fn set_size(&mut self, size: usize) -> Result<(), TypeError> {
        self.size = Some(size);
        Ok(())
    }

    pub fn reference(&self, location: SourceLocation) -> Self {
        Self {
            definition: self.definition_location().cloned(),
            location: Some(location),
            ..self.clone()
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn definition_location(&self) -> Option<&SourceLocation> {
        self.definition.as_ref().or(self.location.as_ref())
    }
}

impl PartialEq for AggregateType {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.data == other.data && self.size == other.size
    }
}

impl Eq for AggregateType {}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "{}[{}]", self.data, size),
            None => write!(f, "{}[{}]", self.data, self.index),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plural Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// Type of a plural value: a fixed snapshot of elements of one type.
///
/// Modeled as an aggregate from element to `boolean` (the is-plural marker),
/// so membership reads like a map lookup. The element type cannot change and
/// the type cannot be resized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluralValueType {
    element: Box<Type>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    definition: Option<SourceLocation>,
}

impl PluralValueType {
    pub fn new(element: Type) -> Self {
        Self {
            element: Box::new(element),
            location: None,
            definition: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn element_type(&self) -> &Type {
        &self.element
    }

    /// Marker index type shared by every plural type
    pub fn index_type(&self) -> Type {
        Type::Boolean
    }

    pub fn set_size(&mut self, _size: usize) -> Result<(), TypeError> {
        Err(TypeError::ImmutableType(self.to_string()))
    }

    pub fn reference(&self, location: SourceLocation) -> Self {
        Self {
            element: self.element.clone(),
            location: Some(location),
            definition: self.definition_location().cloned(),
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn definition_location(&self) -> Option<&SourceLocation> {
        self.definition.as_ref().or(self.location.as_ref())
    }
}

impl PartialEq for PluralValueType {
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element
    }
}

impl Eq for PluralValueType {}

impl fmt::Display for PluralValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[]", self.element)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation::new("buffbot.ash", line, 1)
    }

    #[test]
    fn test_plural_display() {
        let plural = PluralValueType::new(Type::record("item"));
        assert_eq!(plural.to_string(), "item[]");
        assert_eq!(plural.index_type(), Type::Boolean);
    }

    #[test]
    fn test_plural_resize_fails_and_keeps_type() {
        let mut ty = Type::Plural(PluralValueType::new(Type::Int));
        let before = ty.clone();

        let err = ty.set_size(3).unwrap_err();
        assert_eq!(err, TypeError::ImmutableType("int[]".to_string()));
        assert_eq!(ty, before);
        if let Type::Plural(plural) = &ty {
            assert_eq!(plural.element_type(), &Type::Int);
        }
    }

    #[test]
    fn test_plural_reference_is_immutable() {
        let original = PluralValueType::new(Type::String).with_location(loc(3));
        let mut reference = Type::Plural(original).reference(loc(10));

        assert!(matches!(reference.set_size(1), Err(TypeError::ImmutableType(_))));
    }

    #[test]
    fn test_reference_keeps_definition_location() {
        let original = PluralValueType::new(Type::String).with_location(loc(3));
        let reference = original.reference(loc(10));
        let second = reference.reference(loc(20));

        assert_eq!(reference.location(), Some(&loc(10)));
        assert_eq!(reference.definition_location(), Some(&loc(3)));
        assert_eq!(second.definition_location(), Some(&loc(3)));
        assert_eq!(reference.element_type(), &Type::String);
    }

    #[test]
    fn test_aggregate_reference_and_resize() {
        let original = AggregateType::array(Type::Int, 5).with_location(loc(1));
        let mut reference = Type::Aggregate(original).reference(loc(7));

        assert_eq!(reference.definition_location(), Some(&loc(1)));
        reference.set_size(8).unwrap();
        assert_eq!(reference.to_string(), "int[8]");
    }

    #[test]
    fn test_scalar_resize_fails() {
        let mut ty = Type::Int;
        assert!(matches!(ty.set_size(2), Err(TypeError::ImmutableType(_))));
    }

    #[test]
    fn test_nominal_equality() {
        let a = Type::Aggregate(AggregateType::map(Type::String, Type::Int).with_location(loc(1)));
        let b = Type::Aggregate(AggregateType::map(Type::String, Type::Int).with_location(loc(9)));
        assert_eq!(a, b);
        assert_ne!(a, Type::Aggregate(AggregateType::list(Type::Int)));
        assert!(Type::Any.is_same_as(&Type::record("item")));
        assert!(!Type::record("item").is_same_as(&Type::record("effect")));
        assert!(AggregateType::list(Type::Int).is_ordered());
        assert!(!AggregateType::map(Type::String, Type::Int).is_ordered());
    }

    #[test]
    fn test_records_named_like_builtins_stay_distinct() {
        assert_ne!(Type::record("int"), Type::Int);
        assert_ne!(Type::record("any"), Type::Any);
        assert!(!Type::record("string").is_same_as(&Type::String));
        assert_ne!(
            Type::Aggregate(AggregateType::list(Type::record("int"))),
            Type::Aggregate(AggregateType::list(Type::Int))
        );
        assert_ne!(
            Type::Plural(PluralValueType::new(Type::record("boolean"))),
            Type::Plural(PluralValueType::new(Type::Boolean))
        );
        assert_eq!(
            Type::Plural(PluralValueType::new(Type::Int).with_location(loc(2))),
            Type::Plural(PluralValueType::new(Type::Int))
        );
    }
}
