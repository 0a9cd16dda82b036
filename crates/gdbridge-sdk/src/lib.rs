//! gdbridge SDK - shared data types for the extension bridge
//!
//! This crate holds everything that both sides of the bridge talk about but
//! that carries no runtime state:
//!
//! - [`VariantType`], [`Operator`] and [`InitializationLevel`] enumerations
//! - math value types laid out exactly as the host stores them
//! - [`Value`], the managed payload of a dynamic value
//! - [`CallError`] and the host's [`ErrorCode`] passthrough
//! - property / method / signal metadata records
//! - [`Pod`], the marker for types that may be copied into call-frame slots
//!
//! The runtime itself lives in `gdbridge-engine`.

#![warn(missing_docs)]

pub mod abi;
pub mod error;
pub mod math;
pub mod metadata;
pub mod types;
pub mod value;

pub use abi::{words_for, CallError, CallErrorKind, Pod};
pub use error::{BridgeError, BridgeResult, ErrorCode, HostError};
pub use math::{
    Aabb, Basis, Color, Plane, Projection, Quaternion, Rect2, Rect2i, Transform2D, Transform3D,
    Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i,
};
pub use metadata::{
    ArgumentMetadata, MethodFlags, MethodInfo, PropertyHint, PropertyInfo, PropertyUsage,
    SignalInfo,
};
pub use types::{InitializationLevel, Operator, VariantType};
pub use value::{ObjectRef, Opaque, Value};
