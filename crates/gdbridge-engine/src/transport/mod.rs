//! Transport layer: resolving and invoking host entry points
//!
//! Every higher layer reaches the host through a [`Resolver`], which wraps
//! exactly one [`Transport`] backend:
//!
//! - [`ProcTable`]: direct calls through function pointers obtained from the
//!   host's `get_proc_address`, a loaded library, or a static table
//! - [`ChannelTransport`]: request/response messages over a byte channel, for
//!   sandboxed module runtimes
//! - [`ImportTable`]: named host imports implemented as Rust closures
//!
//! All backends share one calling shape: an array of pointers to argument
//! slots plus one return address (see [`crate::callframe`]).

mod channel;
mod direct;
mod imports;
mod loader;

pub use channel::{ByteChannel, ChannelHost, ChannelTransport, LoopbackChannel};
pub use direct::{GetProcAddressFn, ProcTable, PtrCallFn};
pub use imports::{HostFn, ImportTable};
pub use loader::Library;

use std::sync::Arc;

use dashmap::DashMap;
use gdbridge_sdk::{BridgeError, Operator, Pod, VariantType};
use thiserror::Error;

use crate::callframe::{Args, Frame, RetSlot};
use crate::config::FrameOptions;

/// Resolved address of a host entry point.
///
/// Zero is never a valid address; backends that index tables start at 1.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub u64);

unsafe impl Pod for Address {}

impl Address {
    /// True for the null address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Errors that can occur while resolving or reaching host entry points
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend has no entry point with this name
    #[error("Symbol not found: {symbol} ({backend})")]
    SymbolNotFound {
        /// Requested name
        symbol: String,
        /// Backend that was asked
        backend: &'static str,
    },

    /// Library file not found or could not be loaded
    #[error("Library not found: {path}")]
    LibraryNotFound {
        /// Path that was attempted
        path: String,
    },

    /// Name cannot be passed to the backend
    #[error("Invalid symbol name: {0}")]
    InvalidName(String),

    /// Byte channel failed to deliver a message
    #[error("Channel error: {0}")]
    Channel(String),

    /// Malformed message on a byte channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Platform-specific error
    #[error("Platform error: {0}")]
    PlatformError(String),
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

/// A way of reaching host entry points.
pub trait Transport: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Resolve an entry point by name.
    fn resolve(&self, name: &str) -> Result<Address, TransportError>;

    /// Invoke a resolved entry point.
    ///
    /// # Safety
    ///
    /// `address` must come from this transport, and the argument slots and
    /// return slot must have the layout the entry point expects.
    unsafe fn invoke(&self, address: Address, args: &Args<'_>, ret: Option<RetSlot>);
}

/// Key for per-kind entry points obtained lazily from host factories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeOp {
    /// Destructor for a kind
    Destructor(VariantType),
    /// Constructor `index` of a kind
    Constructor(VariantType, u32),
    /// Kind payload from a plain value
    FromType(VariantType),
    /// Plain value from a kind payload
    ToType(VariantType),
    /// Builtin method by name and hash
    BuiltinMethod(VariantType, String, i64),
    /// Operator evaluator for an operand pair
    Evaluator(Operator, VariantType, VariantType),
    /// Utility function by name and hash
    Utility(String, i64),
    /// Method bind by class, method and hash
    MethodBind(String, String, i64),
}

/// Caching front end over one transport.
///
/// The symbol cache and the per-op memo are filled on first use and only
/// read afterwards.
pub struct Resolver {
    transport: Arc<dyn Transport>,
    symbols: DashMap<String, Address>,
    memo: DashMap<NativeOp, Address>,
    frame: FrameOptions,
}

impl Resolver {
    /// Resolver over `transport` with default frame capacity.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_frame_options(transport, FrameOptions::default())
    }

    /// Resolver whose frames use the given capacity.
    pub fn with_frame_options(transport: Arc<dyn Transport>, frame: FrameOptions) -> Self {
        Resolver {
            transport,
            symbols: DashMap::new(),
            memo: DashMap::new(),
            frame,
        }
    }

    /// Name of the backend in use.
    pub fn backend(&self) -> &'static str {
        self.transport.backend()
    }

    /// Number of distinct symbols resolved so far.
    pub fn resolved(&self) -> usize {
        self.symbols.len()
    }

    /// Resolve `name`, consulting the cache first.
    pub fn lookup(&self, name: &str) -> Result<Address, TransportError> {
        if let Some(address) = self.symbols.get(name) {
            return Ok(*address);
        }
        match self.transport.resolve(name) {
            Ok(address) => {
                tracing::trace!(symbol = name, backend = self.backend(), "bound entry point");
                self.symbols.insert(name.to_string(), address);
                Ok(address)
            }
            Err(err) => {
                tracing::debug!(symbol = name, backend = self.backend(), %err, "entry point missing");
                Err(err)
            }
        }
    }

    /// Resolve a mandatory entry point. A miss is a fault.
    pub fn require(&self, name: &str) -> Address {
        match self.lookup(name) {
            Ok(address) => address,
            Err(err) => panic!("mandatory entry point {} unavailable: {}", name, err),
        }
    }

    /// Fresh frame with the configured capacity.
    pub fn frame(&self) -> Frame {
        Frame::with_capacity(self.frame.max_args, self.frame.max_words)
    }

    /// Invoke an already resolved address with `frame`.
    ///
    /// # Safety
    ///
    /// `frame` must match the signature of the entry point at `address`.
    pub unsafe fn invoke(&self, address: Address, frame: &Frame) {
        self.transport
            .invoke(address, &frame.args(), frame.ret_slot())
    }

    /// Resolve the mandatory entry point `name` and invoke it with `frame`.
    ///
    /// # Safety
    ///
    /// As for [`Resolver::invoke`].
    pub unsafe fn call(&self, name: &str, frame: &Frame) {
        let address = self.require(name);
        self.invoke(address, frame)
    }

    /// Cached address for `op`, computing it with `resolve` on first use.
    ///
    /// Null results are not cached so that a later registration on the host
    /// side can still be picked up.
    pub fn memoize(&self, op: NativeOp, resolve: impl FnOnce() -> Address) -> Address {
        if let Some(address) = self.memo.get(&op) {
            return *address;
        }
        let address = resolve();
        if !address.is_null() {
            tracing::trace!(?op, address = address.0, "memoized entry point");
            self.memo.insert(op, address);
        }
        address
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("backend", &self.backend())
            .field("resolved", &self.symbols.len())
            .field("memoized", &self.memo.len())
            .finish()
    }
}
