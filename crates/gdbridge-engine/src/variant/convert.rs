//! Value <-> Variant conversion

use std::sync::Arc;

use gdbridge_sdk::{
    Basis, BridgeError, BridgeResult, ObjectRef, Opaque, Pod, Projection, Transform3D, Value,
    VariantType,
};

use super::{pack, unpack, Variant, VariantCodec};
use crate::symbols;
use crate::transport::{Address, NativeOp};

impl VariantCodec {
    /// Encode a managed value as a host value.
    pub fn encode(&self, value: &Value) -> BridgeResult<Variant> {
        let kind = value.kind();
        let variant = match value {
            Value::Nil => self.nil(),
            Value::Bool(b) => self.inline(kind, [*b as u64, 0, 0]),
            Value::Int(i) => self.inline(kind, [*i as u64, 0, 0]),
            Value::Float(f) => self.inline(kind, [f.to_bits(), 0, 0]),
            Value::Rid(rid) => self.inline(kind, [*rid, 0, 0]),
            Value::Vector2(v) => self.inline(kind, pack(v)),
            Value::Vector2i(v) => self.inline(kind, pack(v)),
            Value::Rect2(v) => self.inline(kind, pack(v)),
            Value::Rect2i(v) => self.inline(kind, pack(v)),
            Value::Vector3(v) => self.inline(kind, pack(v)),
            Value::Vector3i(v) => self.inline(kind, pack(v)),
            Value::Transform2D(v) => self.inline(kind, pack(v)),
            Value::Vector4(v) => self.inline(kind, pack(v)),
            Value::Vector4i(v) => self.inline(kind, pack(v)),
            Value::Plane(v) => self.inline(kind, pack(v)),
            Value::Quaternion(v) => self.inline(kind, pack(v)),
            Value::Aabb(v) => self.inline(kind, pack(v)),
            Value::Color(v) => self.inline(kind, pack(v)),
            Value::Basis(v) => self.boxed(kind, v)?,
            Value::Transform3D(v) => self.boxed(kind, v)?,
            Value::Projection(v) => self.boxed(kind, v)?,
            Value::String(s) => Variant::from_pointer(self.string(s)),
            Value::StringName(s) => Variant::from_pointer(self.string_name(s)),
            Value::NodePath(s) => {
                let path = Variant::from_pointer(self.string(s));
                self.construct(VariantType::NodePath, &[&path])?
            }
            Value::Object(object) => Variant::from_pointer(
                self.pointers
                    .borrow(kind, [object.pointer, object.instance_id, 0]),
            ),
            Value::Callable(opaque) | Value::Signal(opaque) => self.encode_opaque(opaque)?,
            Value::Array(items) => {
                let array = self.construct(kind, &[])?;
                for item in items {
                    let item = self.encode(item)?;
                    self.call(&array, "append", &[&item])?;
                }
                array
            }
            Value::Dictionary(entries) => {
                let dict = self.construct(kind, &[])?;
                for (key, value) in entries {
                    let key = self.encode(key)?;
                    let value = self.encode(value)?;
                    self.call(&dict, "set", &[&key, &value])?;
                }
                dict
            }
            packed => {
                let items = packed_elements(packed).ok_or(BridgeError::TypeMismatch {
                    expected: VariantType::Array,
                    got: kind,
                })?;
                let array = self.construct(kind, &[])?;
                for item in &items {
                    let item = self.encode(item)?;
                    self.call(&array, "append", &[&item])?;
                }
                array
            }
        };
        Ok(variant)
    }

    /// Decode a host value into a managed value.
    pub fn decode(&self, variant: &Variant) -> BridgeResult<Value> {
        let kind = variant.kind();
        let words = variant.payload();
        let value = match kind {
            VariantType::Nil => Value::Nil,
            VariantType::Bool => Value::Bool(words[0] & 0xff != 0),
            VariantType::Int => Value::Int(words[0] as i64),
            VariantType::Float => Value::Float(f64::from_bits(words[0])),
            VariantType::Rid => Value::Rid(words[0]),
            VariantType::Vector2 => Value::Vector2(unpack(&words)),
            VariantType::Vector2i => Value::Vector2i(unpack(&words)),
            VariantType::Rect2 => Value::Rect2(unpack(&words)),
            VariantType::Rect2i => Value::Rect2i(unpack(&words)),
            VariantType::Vector3 => Value::Vector3(unpack(&words)),
            VariantType::Vector3i => Value::Vector3i(unpack(&words)),
            VariantType::Transform2D => Value::Transform2D(unpack(&words)),
            VariantType::Vector4 => Value::Vector4(unpack(&words)),
            VariantType::Vector4i => Value::Vector4i(unpack(&words)),
            VariantType::Plane => Value::Plane(unpack(&words)),
            VariantType::Quaternion => Value::Quaternion(unpack(&words)),
            VariantType::Aabb => Value::Aabb(unpack(&words)),
            VariantType::Color => Value::Color(unpack(&words)),
            VariantType::Basis => Value::Basis(self.unboxed::<Basis>(kind, words[0])?),
            VariantType::Transform3D => {
                Value::Transform3D(self.unboxed::<Transform3D>(kind, words[0])?)
            }
            VariantType::Projection => {
                Value::Projection(self.unboxed::<Projection>(kind, words[0])?)
            }
            VariantType::String => Value::String(self.read_string(words[0])),
            VariantType::StringName => Value::StringName(self.text_of(variant)?),
            VariantType::NodePath => Value::NodePath(self.text_of(variant)?),
            VariantType::Object => Value::Object(ObjectRef {
                pointer: words[0],
                instance_id: words[1],
            }),
            VariantType::Callable => Value::Callable(self.decode_opaque(variant)?),
            VariantType::Signal => Value::Signal(self.decode_opaque(variant)?),
            VariantType::Array => {
                let len = self.size_of(variant)?;
                let mut items = Vec::with_capacity(len as usize);
                for i in 0..len {
                    items.push(self.decode(&self.get_indexed(variant, i)?)?);
                }
                Value::Array(items)
            }
            VariantType::Dictionary => {
                let keys = self.call(variant, "keys", &[])?;
                let len = self.size_of(&keys)?;
                let mut entries = Vec::with_capacity(len as usize);
                for i in 0..len {
                    let key = self.get_indexed(&keys, i)?;
                    let value = self.get_keyed(variant, &key)?;
                    entries.push((self.decode(&key)?, self.decode(&value)?));
                }
                Value::Dictionary(entries)
            }
            packed => {
                let len = self.size_of(variant)?;
                let mut items = Vec::with_capacity(len as usize);
                for i in 0..len {
                    items.push(self.decode(&self.get_indexed(variant, i)?)?);
                }
                packed_from(packed, items)?
            }
        };
        Ok(value)
    }

    fn size_of(&self, container: &Variant) -> BridgeResult<i64> {
        let size = self.call(container, "size", &[])?;
        match self.decode(&size)? {
            Value::Int(n) => Ok(n.max(0)),
            other => Err(BridgeError::TypeMismatch {
                expected: VariantType::Int,
                got: other.kind(),
            }),
        }
    }

    /// Text of the host StringName whose payload word is `word`.
    pub fn read_string_name(&self, word: u64) -> BridgeResult<String> {
        let name = Variant::from_pointer(
            self.pointers
                .borrow(VariantType::StringName, [word, 0, 0]),
        );
        self.text_of(&name)
    }

    /// Text of a StringName or NodePath, through a String conversion.
    fn text_of(&self, variant: &Variant) -> BridgeResult<String> {
        let text = self.construct(VariantType::String, &[variant])?;
        Ok(self.read_string(text.payload()[0]))
    }

    fn encode_opaque(&self, opaque: &Opaque) -> BridgeResult<Variant> {
        if let Some(kept) = opaque.keep.as_ref().and_then(|keep| keep.downcast_ref::<Variant>()) {
            return self.copy(kept);
        }
        let source = Variant::from_pointer(self.pointers.borrow(opaque.kind, opaque.words));
        self.copy(&source)
    }

    fn decode_opaque(&self, variant: &Variant) -> BridgeResult<Opaque> {
        let copy = self.copy(variant)?;
        Ok(Opaque {
            kind: variant.kind(),
            words: copy.payload(),
            keep: Some(Arc::new(copy)),
        })
    }

    fn from_type(&self, kind: VariantType) -> Address {
        self.resolver.memoize(NativeOp::FromType(kind), || {
            let frame = self.resolver.frame();
            frame.arg(kind.id() as i64);
            let ret = frame.ret::<Address>();
            // SAFETY: (kind: i64) -> address
            unsafe { self.resolver.call(symbols::GET_FROM_TYPE_CONSTRUCTOR, &frame) };
            ret.get()
        })
    }

    fn to_type(&self, kind: VariantType) -> Address {
        self.resolver.memoize(NativeOp::ToType(kind), || {
            let frame = self.resolver.frame();
            frame.arg(kind.id() as i64);
            let ret = frame.ret::<Address>();
            // SAFETY: (kind: i64) -> address
            unsafe { self.resolver.call(symbols::GET_TO_TYPE_CONSTRUCTOR, &frame) };
            ret.get()
        })
    }

    /// Box a wide math value on the host.
    fn boxed<T: Pod>(&self, kind: VariantType, value: &T) -> BridgeResult<Variant> {
        let address = self.from_type(kind);
        if address.is_null() {
            return Err(BridgeError::TypeMismatch {
                expected: kind,
                got: VariantType::Nil,
            });
        }
        let word = {
            let frame = self.resolver.frame();
            frame.arg(*value);
            let ret = frame.ret::<u64>();
            // SAFETY: from-type shape (value bytes) -> payload
            unsafe { self.resolver.invoke(address, &frame) };
            ret.get()
        };
        Ok(self.inline(kind, [word, 0, 0]))
    }

    /// Read a wide math value back from its host box.
    fn unboxed<T: Pod>(&self, kind: VariantType, word: u64) -> BridgeResult<T> {
        let address = self.to_type(kind);
        if address.is_null() {
            return Err(BridgeError::TypeMismatch {
                expected: kind,
                got: VariantType::Nil,
            });
        }
        let frame = self.resolver.frame();
        frame.arg(word);
        let ret = frame.ret::<T>();
        // SAFETY: to-type shape (payload) -> value bytes
        unsafe { self.resolver.invoke(address, &frame) };
        Ok(ret.get())
    }
}

/// Elements of a packed array as dynamic values of the element kind.
fn packed_elements(value: &Value) -> Option<Vec<Value>> {
    Some(match value {
        Value::PackedByteArray(v) => v.iter().map(|&b| Value::Int(b as i64)).collect(),
        Value::PackedInt32Array(v) => v.iter().map(|&i| Value::Int(i as i64)).collect(),
        Value::PackedInt64Array(v) => v.iter().map(|&i| Value::Int(i)).collect(),
        Value::PackedFloat32Array(v) => v.iter().map(|&f| Value::Float(f as f64)).collect(),
        Value::PackedFloat64Array(v) => v.iter().map(|&f| Value::Float(f)).collect(),
        Value::PackedStringArray(v) => v.iter().map(|s| Value::String(s.clone())).collect(),
        Value::PackedVector2Array(v) => v.iter().map(|&x| Value::Vector2(x)).collect(),
        Value::PackedVector3Array(v) => v.iter().map(|&x| Value::Vector3(x)).collect(),
        Value::PackedColorArray(v) => v.iter().map(|&x| Value::Color(x)).collect(),
        Value::PackedVector4Array(v) => v.iter().map(|&x| Value::Vector4(x)).collect(),
        _ => return None,
    })
}

macro_rules! elements {
    ($items:expr, $case:ident, $expected:expr, |$x:ident| $conv:expr) => {
        $items
            .into_iter()
            .map(|item| match item {
                Value::$case($x) => Ok($conv),
                other => Err(BridgeError::TypeMismatch {
                    expected: $expected,
                    got: other.kind(),
                }),
            })
            .collect::<BridgeResult<Vec<_>>>()?
    };
}

/// Packed array value of `kind` from decoded elements.
fn packed_from(kind: VariantType, items: Vec<Value>) -> BridgeResult<Value> {
    use VariantType as K;
    Ok(match kind {
        K::PackedByteArray => Value::PackedByteArray(elements!(items, Int, K::Int, |i| i as u8)),
        K::PackedInt32Array => {
            Value::PackedInt32Array(elements!(items, Int, K::Int, |i| i as i32))
        }
        K::PackedInt64Array => Value::PackedInt64Array(elements!(items, Int, K::Int, |i| i)),
        K::PackedFloat32Array => {
            Value::PackedFloat32Array(elements!(items, Float, K::Float, |f| f as f32))
        }
        K::PackedFloat64Array => {
            Value::PackedFloat64Array(elements!(items, Float, K::Float, |f| f))
        }
        K::PackedStringArray => {
            Value::PackedStringArray(elements!(items, String, K::String, |s| s))
        }
        K::PackedVector2Array => {
            Value::PackedVector2Array(elements!(items, Vector2, K::Vector2, |v| v))
        }
        K::PackedVector3Array => {
            Value::PackedVector3Array(elements!(items, Vector3, K::Vector3, |v| v))
        }
        K::PackedColorArray => Value::PackedColorArray(elements!(items, Color, K::Color, |c| c)),
        K::PackedVector4Array => {
            Value::PackedVector4Array(elements!(items, Vector4, K::Vector4, |v| v))
        }
        other => {
            return Err(BridgeError::TypeMismatch {
                expected: K::Array,
                got: other,
            })
        }
    })
}
