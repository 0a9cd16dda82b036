//! Managed payloads of dynamic values

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::math::*;
use crate::types::VariantType;

/// Borrowed reference to a host object: its pointer word and instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectRef {
    /// Host object pointer, 0 for null
    pub pointer: u64,
    /// Host instance id
    pub instance_id: u64,
}

impl ObjectRef {
    /// True for the null reference.
    pub fn is_null(&self) -> bool {
        self.pointer == 0
    }
}

/// A host value the bridge does not deep-copy (callables, signals).
///
/// `words` is the payload as seen on the wire; `keep` holds whatever keeps
/// that payload alive on the managed side. Equality compares kind and words.
#[derive(Clone)]
pub struct Opaque {
    /// Kind of the value
    pub kind: VariantType,
    /// Payload words
    pub words: [u64; 3],
    /// Owner of the payload
    pub keep: Option<Arc<dyn Any + Send + Sync>>,
}

impl Opaque {
    /// Opaque value with nothing keeping it alive.
    pub fn detached(kind: VariantType, words: [u64; 3]) -> Self {
        Opaque {
            kind,
            words,
            keep: None,
        }
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.words == other.words
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque")
            .field("kind", &self.kind)
            .field("words", &self.words)
            .finish()
    }
}

/// Decoded form of a dynamic value. One case per [`VariantType`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Rect2(Rect2),
    Rect2i(Rect2i),
    Vector3(Vector3),
    Vector3i(Vector3i),
    Transform2D(Transform2D),
    Vector4(Vector4),
    Vector4i(Vector4i),
    Plane(Plane),
    Quaternion(Quaternion),
    Aabb(Aabb),
    Basis(Basis),
    Transform3D(Transform3D),
    Projection(Projection),
    Color(Color),
    StringName(String),
    NodePath(String),
    Rid(u64),
    Object(ObjectRef),
    Callable(Opaque),
    Signal(Opaque),
    Dictionary(Vec<(Value, Value)>),
    Array(Vec<Value>),
    PackedByteArray(Vec<u8>),
    PackedInt32Array(Vec<i32>),
    PackedInt64Array(Vec<i64>),
    PackedFloat32Array(Vec<f32>),
    PackedFloat64Array(Vec<f64>),
    PackedStringArray(Vec<String>),
    PackedVector2Array(Vec<Vector2>),
    PackedVector3Array(Vec<Vector3>),
    PackedColorArray(Vec<Color>),
    PackedVector4Array(Vec<Vector4>),
}

impl Value {
    /// Kind tag of this value.
    pub fn kind(&self) -> VariantType {
        match self {
            Value::Nil => VariantType::Nil,
            Value::Bool(_) => VariantType::Bool,
            Value::Int(_) => VariantType::Int,
            Value::Float(_) => VariantType::Float,
            Value::String(_) => VariantType::String,
            Value::Vector2(_) => VariantType::Vector2,
            Value::Vector2i(_) => VariantType::Vector2i,
            Value::Rect2(_) => VariantType::Rect2,
            Value::Rect2i(_) => VariantType::Rect2i,
            Value::Vector3(_) => VariantType::Vector3,
            Value::Vector3i(_) => VariantType::Vector3i,
            Value::Transform2D(_) => VariantType::Transform2D,
            Value::Vector4(_) => VariantType::Vector4,
            Value::Vector4i(_) => VariantType::Vector4i,
            Value::Plane(_) => VariantType::Plane,
            Value::Quaternion(_) => VariantType::Quaternion,
            Value::Aabb(_) => VariantType::Aabb,
            Value::Basis(_) => VariantType::Basis,
            Value::Transform3D(_) => VariantType::Transform3D,
            Value::Projection(_) => VariantType::Projection,
            Value::Color(_) => VariantType::Color,
            Value::StringName(_) => VariantType::StringName,
            Value::NodePath(_) => VariantType::NodePath,
            Value::Rid(_) => VariantType::Rid,
            Value::Object(_) => VariantType::Object,
            Value::Callable(_) => VariantType::Callable,
            Value::Signal(_) => VariantType::Signal,
            Value::Dictionary(_) => VariantType::Dictionary,
            Value::Array(_) => VariantType::Array,
            Value::PackedByteArray(_) => VariantType::PackedByteArray,
            Value::PackedInt32Array(_) => VariantType::PackedInt32Array,
            Value::PackedInt64Array(_) => VariantType::PackedInt64Array,
            Value::PackedFloat32Array(_) => VariantType::PackedFloat32Array,
            Value::PackedFloat64Array(_) => VariantType::PackedFloat64Array,
            Value::PackedStringArray(_) => VariantType::PackedStringArray,
            Value::PackedVector2Array(_) => VariantType::PackedVector2Array,
            Value::PackedVector3Array(_) => VariantType::PackedVector3Array,
            Value::PackedColorArray(_) => VariantType::PackedColorArray,
            Value::PackedVector4Array(_) => VariantType::PackedVector4Array,
        }
    }

    /// True for `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Bool payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text of a `String`, `StringName` or `NodePath`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::StringName(s) | Value::NodePath(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}
