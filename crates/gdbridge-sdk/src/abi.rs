//! Word-level ABI shared with the host
//!
//! Call frames move values as whole 64-bit words. Anything that may be copied
//! into or out of a frame slot implements [`Pod`].

use std::mem::{align_of, size_of};

use crate::math::*;

/// Plain old data that can be copied bytewise into a word-aligned slot.
///
/// # Safety
///
/// Implementors must be `Copy`, have no padding-sensitive invariants, accept
/// every bit pattern, and have an alignment of at most 8. `bool` is not `Pod`:
/// host flags are read as `u8`.
pub unsafe trait Pod: Copy + 'static {}

macro_rules! impl_pod {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl Pod for $t {})*
    };
}

impl_pod!(
    u8, i8, u16, i16, u32, i32, u64, i64, usize, isize, f32, f64,
    Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i, Rect2, Rect2i,
    Transform2D, Plane, Quaternion, Aabb, Basis, Transform3D, Projection, Color,
    CallError,
);

unsafe impl<T: 'static> Pod for *const T {}
unsafe impl<T: 'static> Pod for *mut T {}
unsafe impl<T: Pod, const N: usize> Pod for [T; N] {}

/// Number of 64-bit words needed to hold a `T`.
pub const fn words_for<T>() -> usize {
    assert!(align_of::<T>() <= 8);
    size_of::<T>().div_ceil(8)
}

/// Failure categories reported by host invocation entry points.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// No error
    Ok = 0,
    /// Method does not exist
    InvalidMethod = 1,
    /// Argument has the wrong type
    InvalidArgument = 2,
    /// Too many arguments
    TooManyArguments = 3,
    /// Too few arguments
    TooFewArguments = 4,
    /// Instance is null
    InstanceIsNil = 5,
    /// Non-const method called on a const instance
    MethodNotConst = 6,
    /// Managed code reported a failure
    Managed = 7,
}

impl CallErrorKind {
    /// Kind for a wire value; unknown values map to `Managed`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => CallErrorKind::Ok,
            1 => CallErrorKind::InvalidMethod,
            2 => CallErrorKind::InvalidArgument,
            3 => CallErrorKind::TooManyArguments,
            4 => CallErrorKind::TooFewArguments,
            5 => CallErrorKind::InstanceIsNil,
            6 => CallErrorKind::MethodNotConst,
            _ => CallErrorKind::Managed,
        }
    }
}

/// Structured call failure `{kind, argument, expected}`, bit-compatible with
/// the host's call error record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallError {
    /// Raw [`CallErrorKind`]
    pub kind: i32,
    /// Offending argument index, or the expected count for arity errors
    pub argument: i32,
    /// Expected type id or argument count
    pub expected: i32,
}

impl CallError {
    /// Success value.
    pub const OK: CallError = CallError {
        kind: 0,
        argument: 0,
        expected: 0,
    };

    /// Error of the given kind with no argument detail.
    pub fn new(kind: CallErrorKind) -> Self {
        CallError {
            kind: kind as i32,
            argument: 0,
            expected: 0,
        }
    }

    /// Argument `argument` has the wrong type, `expected` is a type id.
    pub fn invalid_argument(argument: usize, expected: crate::VariantType) -> Self {
        CallError {
            kind: CallErrorKind::InvalidArgument as i32,
            argument: argument as i32,
            expected: expected.id() as i32,
        }
    }

    /// Too many arguments; `expected` is the maximum count.
    pub fn too_many(expected: usize) -> Self {
        CallError {
            kind: CallErrorKind::TooManyArguments as i32,
            argument: 0,
            expected: expected as i32,
        }
    }

    /// Too few arguments; `expected` is the minimum count.
    pub fn too_few(expected: usize) -> Self {
        CallError {
            kind: CallErrorKind::TooFewArguments as i32,
            argument: 0,
            expected: expected as i32,
        }
    }

    /// Decoded kind.
    pub fn kind(&self) -> CallErrorKind {
        CallErrorKind::from_raw(self.kind)
    }

    /// True when the record reports success.
    pub fn is_ok(&self) -> bool {
        self.kind == 0
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            CallErrorKind::Ok => write!(f, "ok"),
            CallErrorKind::InvalidMethod => write!(f, "invalid method"),
            CallErrorKind::InvalidArgument => write!(
                f,
                "invalid argument {} (expected type id {})",
                self.argument, self.expected
            ),
            CallErrorKind::TooManyArguments => {
                write!(f, "too many arguments (expected {})", self.expected)
            }
            CallErrorKind::TooFewArguments => {
                write!(f, "too few arguments (expected {})", self.expected)
            }
            CallErrorKind::InstanceIsNil => write!(f, "instance is nil"),
            CallErrorKind::MethodNotConst => write!(f, "method is not const"),
            CallErrorKind::Managed => write!(f, "managed call failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_layout() {
        assert_eq!(size_of::<CallError>(), 12);
        assert_eq!(words_for::<CallError>(), 2);
    }

    #[test]
    fn test_word_counts() {
        assert_eq!(words_for::<Vector3>(), 2);
        assert_eq!(words_for::<Transform2D>(), 3);
        assert_eq!(words_for::<Basis>(), 5);
        assert_eq!(words_for::<Projection>(), 8);
        assert_eq!(words_for::<[u64; 3]>(), 3);
    }

    #[test]
    fn test_unknown_kind_is_managed() {
        let err = CallError {
            kind: 42,
            argument: 0,
            expected: 0,
        };
        assert_eq!(err.kind(), CallErrorKind::Managed);
        assert!(!err.is_ok());
        assert!(CallError::OK.is_ok());
    }
}
