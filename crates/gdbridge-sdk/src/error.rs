//! Error types for the bridge

use std::fmt;

use crate::abi::CallError;
use crate::types::VariantType;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Recoverable bridge failures.
///
/// Programming errors (stale handles, destroyed pointers, frame overflow,
/// missing mandatory entry points) are not represented here; they panic.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// The host reported a structured call failure
    #[error("call failed: {0}")]
    Call(CallError),

    /// Class is not (or no longer) registered
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// Class is registered but the method is not
    #[error("method not found: {class}.{method}")]
    MethodNotFound {
        /// Class name
        class: String,
        /// Method name
        method: String,
    },

    /// Class is registered but the property or signal is not
    #[error("member not found: {class}.{member}")]
    MemberNotFound {
        /// Class name
        class: String,
        /// Property or signal name
        member: String,
    },

    /// Method declaration the host could not call consistently
    #[error("invalid method {class}.{method}: {reason}")]
    InvalidMethod {
        /// Class name
        class: String,
        /// Method name
        method: String,
        /// What is wrong with the declaration
        reason: String,
    },

    /// Class name already taken
    #[error("class already registered: {0}")]
    AlreadyRegistered(String),

    /// Value has a different kind than required
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected kind
        expected: VariantType,
        /// Actual kind
        got: VariantType,
    },

    /// Index outside a container
    #[error("index {index} out of bounds for {kind}")]
    IndexOutOfBounds {
        /// Container kind
        kind: VariantType,
        /// Requested index
        index: i64,
    },

    /// Keyed or named access found nothing valid
    #[error("invalid access on {0}")]
    InvalidAccess(VariantType),

    /// Host evaluator rejected the operand kinds
    #[error("operator {op} not defined for {left} and {right}")]
    InvalidOperator {
        /// Operator name
        op: String,
        /// Left operand kind
        left: VariantType,
        /// Right operand kind
        right: VariantType,
    },

    /// Transport failure surfaced as a recoverable error
    #[error("transport: {0}")]
    Transport(String),

    /// Configuration could not be loaded
    #[error("config: {0}")]
    Config(String),

    /// Host operation returned a non-OK error code
    #[error("host error: {0}")]
    Host(ErrorCode),
}

impl From<CallError> for BridgeError {
    fn from(err: CallError) -> Self {
        BridgeError::Call(err)
    }
}

/// Host error code, passed through verbatim.
///
/// The bridge never reinterprets these; [`ErrorCode::known`] exists for
/// display and logging.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    /// Success.
    pub const OK: ErrorCode = ErrorCode(0);

    /// True for success.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// `Ok(())` for success, otherwise `Err(BridgeError::Host(self))`.
    pub fn into_result(self) -> BridgeResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BridgeError::Host(self))
        }
    }

    /// Named code, if the value is one the host documents.
    pub fn known(self) -> Option<HostError> {
        HostError::from_code(self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(known) => write!(f, "{:?} ({})", known, self.0),
            None => write!(f, "unknown error ({})", self.0),
        }
    }
}

/// Error codes documented by the host.
#[repr(i64)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostError {
    Ok = 0,
    Failed,
    Unavailable,
    Unconfigured,
    Unauthorized,
    ParameterRangeError,
    OutOfMemory,
    FileNotFound,
    FileBadDrive,
    FileBadPath,
    FileNoPermission,
    FileAlreadyInUse,
    FileCantOpen,
    FileCantWrite,
    FileCantRead,
    FileUnrecognized,
    FileCorrupt,
    FileMissingDependencies,
    FileEof,
    CantOpen,
    CantCreate,
    QueryFailed,
    AlreadyInUse,
    Locked,
    Timeout,
    CantConnect,
    CantResolve,
    ConnectionError,
    CantAcquireResource,
    CantFork,
    InvalidData,
    InvalidParameter,
    AlreadyExists,
    DoesNotExist,
    DatabaseCantRead,
    DatabaseCantWrite,
    CompilationFailed,
    MethodNotFound,
    LinkFailed,
    ScriptFailed,
    CyclicLink,
    InvalidDeclaration,
    DuplicateSymbol,
    ParseError,
    Busy,
    Skip,
    Help,
    Bug,
    PrinterOnFire = 48,
}

impl HostError {
    const ALL: [HostError; 49] = [
        HostError::Ok,
        HostError::Failed,
        HostError::Unavailable,
        HostError::Unconfigured,
        HostError::Unauthorized,
        HostError::ParameterRangeError,
        HostError::OutOfMemory,
        HostError::FileNotFound,
        HostError::FileBadDrive,
        HostError::FileBadPath,
        HostError::FileNoPermission,
        HostError::FileAlreadyInUse,
        HostError::FileCantOpen,
        HostError::FileCantWrite,
        HostError::FileCantRead,
        HostError::FileUnrecognized,
        HostError::FileCorrupt,
        HostError::FileMissingDependencies,
        HostError::FileEof,
        HostError::CantOpen,
        HostError::CantCreate,
        HostError::QueryFailed,
        HostError::AlreadyInUse,
        HostError::Locked,
        HostError::Timeout,
        HostError::CantConnect,
        HostError::CantResolve,
        HostError::ConnectionError,
        HostError::CantAcquireResource,
        HostError::CantFork,
        HostError::InvalidData,
        HostError::InvalidParameter,
        HostError::AlreadyExists,
        HostError::DoesNotExist,
        HostError::DatabaseCantRead,
        HostError::DatabaseCantWrite,
        HostError::CompilationFailed,
        HostError::MethodNotFound,
        HostError::LinkFailed,
        HostError::ScriptFailed,
        HostError::CyclicLink,
        HostError::InvalidDeclaration,
        HostError::DuplicateSymbol,
        HostError::ParseError,
        HostError::Busy,
        HostError::Skip,
        HostError::Help,
        HostError::Bug,
        HostError::PrinterOnFire,
    ];

    /// Named code for a raw value.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    /// Raw value.
    pub fn code(self) -> ErrorCode {
        ErrorCode(self as i64)
    }
}
