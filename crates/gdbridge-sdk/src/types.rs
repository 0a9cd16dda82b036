//! Host enumerations: value kinds, operators and initialization levels

use std::fmt;

/// Kind tag of a dynamic value.
///
/// The numeric ids match the host's wire encoding and are carried next to the
/// 3-word payload, never inside it.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantType {
    /// No value
    Nil = 0,
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// Host string (UTF-32 internally, UTF-8 on the wire)
    String,
    /// 2D float vector
    Vector2,
    /// 2D integer vector
    Vector2i,
    /// 2D float rectangle
    Rect2,
    /// 2D integer rectangle
    Rect2i,
    /// 3D float vector
    Vector3,
    /// 3D integer vector
    Vector3i,
    /// 2D affine transform
    Transform2D,
    /// 4D float vector
    Vector4,
    /// 4D integer vector
    Vector4i,
    /// Plane in Hessian normal form
    Plane,
    /// Rotation quaternion
    Quaternion,
    /// Axis-aligned bounding box
    Aabb,
    /// 3x3 matrix
    Basis,
    /// 3D affine transform
    Transform3D,
    /// 4x4 projection matrix
    Projection,
    /// RGBA color
    Color,
    /// Interned string
    StringName,
    /// Scene path
    NodePath,
    /// Resource id
    Rid,
    /// Object reference
    Object,
    /// Callable
    Callable,
    /// Signal reference
    Signal,
    /// Key/value map
    Dictionary,
    /// Array of dynamic values
    Array,
    /// Packed `u8` array
    PackedByteArray,
    /// Packed `i32` array
    PackedInt32Array,
    /// Packed `i64` array
    PackedInt64Array,
    /// Packed `f32` array
    PackedFloat32Array,
    /// Packed `f64` array
    PackedFloat64Array,
    /// Packed string array
    PackedStringArray,
    /// Packed `Vector2` array
    PackedVector2Array,
    /// Packed `Vector3` array
    PackedVector3Array,
    /// Packed `Color` array
    PackedColorArray,
    /// Packed `Vector4` array
    PackedVector4Array,
}

impl VariantType {
    /// Number of kinds.
    pub const COUNT: usize = 39;

    /// Every kind in id order.
    pub const ALL: [VariantType; Self::COUNT] = [
        VariantType::Nil,
        VariantType::Bool,
        VariantType::Int,
        VariantType::Float,
        VariantType::String,
        VariantType::Vector2,
        VariantType::Vector2i,
        VariantType::Rect2,
        VariantType::Rect2i,
        VariantType::Vector3,
        VariantType::Vector3i,
        VariantType::Transform2D,
        VariantType::Vector4,
        VariantType::Vector4i,
        VariantType::Plane,
        VariantType::Quaternion,
        VariantType::Aabb,
        VariantType::Basis,
        VariantType::Transform3D,
        VariantType::Projection,
        VariantType::Color,
        VariantType::StringName,
        VariantType::NodePath,
        VariantType::Rid,
        VariantType::Object,
        VariantType::Callable,
        VariantType::Signal,
        VariantType::Dictionary,
        VariantType::Array,
        VariantType::PackedByteArray,
        VariantType::PackedInt32Array,
        VariantType::PackedInt64Array,
        VariantType::PackedFloat32Array,
        VariantType::PackedFloat64Array,
        VariantType::PackedStringArray,
        VariantType::PackedVector2Array,
        VariantType::PackedVector3Array,
        VariantType::PackedColorArray,
        VariantType::PackedVector4Array,
    ];

    /// Wire id of this kind.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Kind for a wire id, `None` when out of range.
    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }

    /// How many of the 3 payload words this kind occupies.
    pub fn payload_words(self) -> usize {
        use VariantType::*;
        match self {
            Nil => 0,
            Bool | Int | Float | String | Vector2 | Vector2i | StringName | NodePath | Rid
            | Dictionary | Array => 1,
            // boxed by the host, the payload is a single pointer
            Basis | Transform3D | Projection => 1,
            Rect2 | Rect2i | Vector3 | Vector3i | Vector4 | Vector4i | Plane | Quaternion
            | Color | Object | Callable | Signal => 2,
            Transform2D | Aabb => 3,
            PackedByteArray | PackedInt32Array | PackedInt64Array | PackedFloat32Array
            | PackedFloat64Array | PackedStringArray | PackedVector2Array
            | PackedVector3Array | PackedColorArray | PackedVector4Array => 2,
        }
    }

    /// True if values of this kind own host memory that must be released
    /// through the kind's destructor.
    pub fn has_native_payload(self) -> bool {
        use VariantType::*;
        matches!(
            self,
            String
                | StringName
                | NodePath
                | Basis
                | Transform3D
                | Projection
                | Callable
                | Signal
                | Dictionary
                | Array
        ) || self.is_packed_array()
    }

    /// True for kinds the host shares by reference count.
    pub fn is_ref_counted(self) -> bool {
        use VariantType::*;
        matches!(self, Callable | Signal | Dictionary | Array) || self.is_packed_array()
    }

    /// True for the `Packed*Array` kinds.
    pub fn is_packed_array(self) -> bool {
        self >= VariantType::PackedByteArray
    }

    /// True for kinds the host keeps behind a pointer because they are wider
    /// than the 3-word payload.
    pub fn is_boxed(self) -> bool {
        matches!(
            self,
            VariantType::Basis | VariantType::Transform3D | VariantType::Projection
        )
    }

    /// Element kind stored by a packed array.
    pub fn packed_element(self) -> Option<VariantType> {
        use VariantType::*;
        Some(match self {
            PackedByteArray | PackedInt32Array | PackedInt64Array => Int,
            PackedFloat32Array | PackedFloat64Array => Float,
            PackedStringArray => String,
            PackedVector2Array => Vector2,
            PackedVector3Array => Vector3,
            PackedColorArray => Color,
            PackedVector4Array => Vector4,
            _ => return None,
        })
    }

    /// Host-facing type name.
    pub fn name(self) -> &'static str {
        use VariantType::*;
        match self {
            Nil => "Nil",
            Bool => "bool",
            Int => "int",
            Float => "float",
            String => "String",
            Vector2 => "Vector2",
            Vector2i => "Vector2i",
            Rect2 => "Rect2",
            Rect2i => "Rect2i",
            Vector3 => "Vector3",
            Vector3i => "Vector3i",
            Transform2D => "Transform2D",
            Vector4 => "Vector4",
            Vector4i => "Vector4i",
            Plane => "Plane",
            Quaternion => "Quaternion",
            Aabb => "AABB",
            Basis => "Basis",
            Transform3D => "Transform3D",
            Projection => "Projection",
            Color => "Color",
            StringName => "StringName",
            NodePath => "NodePath",
            Rid => "RID",
            Object => "Object",
            Callable => "Callable",
            Signal => "Signal",
            Dictionary => "Dictionary",
            Array => "Array",
            PackedByteArray => "PackedByteArray",
            PackedInt32Array => "PackedInt32Array",
            PackedInt64Array => "PackedInt64Array",
            PackedFloat32Array => "PackedFloat32Array",
            PackedFloat64Array => "PackedFloat64Array",
            PackedStringArray => "PackedStringArray",
            PackedVector2Array => "PackedVector2Array",
            PackedVector3Array => "PackedVector3Array",
            PackedColorArray => "PackedColorArray",
            PackedVector4Array => "PackedVector4Array",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operators understood by the host's evaluator.
#[repr(u32)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal = 0,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Positive,
    Module,
    Power,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    BitNegate,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalNegate,
    In,
}

impl Operator {
    /// Wire id.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// True for operators that ignore their right operand.
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Operator::Negate | Operator::Positive | Operator::BitNegate | Operator::LogicalNegate
        )
    }
}

/// Initialization levels, reached in ascending order and left in descending
/// order.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum InitializationLevel {
    /// Core types only
    Core = 0,
    /// Host servers are available
    Servers = 1,
    /// Scene classes are available
    Scene = 2,
    /// Editor classes are available
    Editor = 3,
}

impl InitializationLevel {
    /// Every level in ascending order.
    pub const ALL: [InitializationLevel; 4] = [
        InitializationLevel::Core,
        InitializationLevel::Servers,
        InitializationLevel::Scene,
        InitializationLevel::Editor,
    ];

    /// Level for a wire id.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Wire id.
    pub fn id(self) -> u32 {
        self as u32
    }
}
