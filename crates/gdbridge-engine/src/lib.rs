//! gdbridge runtime
//!
//! This crate implements the boundary between managed Rust code and a host
//! engine that loads it as an extension:
//! - **Transport**: pluggable ways of reaching host entry points (`transport`)
//! - **Call frames**: the pointer-array calling convention (`callframe`)
//! - **Pointers**: lifetimes of host values held by managed code (`pointers`)
//! - **Variants**: dynamic values and the host's variant API (`variant`)
//! - **Handles**: integers the host stores to call back into managed code (`handles`)
//! - **Classes**: registration and instance dispatch (`classdb`, `dispatch`)
//! - **Callables**: managed closures as host Callables (`callable`)
//! - **Context**: owns all of the above and runs the initialization protocol (`context`)
//!
//! # Example
//!
//! ```rust,ignore
//! use gdbridge_engine::{BridgeContext, BridgeOptions, ClassBuilder, ExtensionToken};
//! use gdbridge_sdk::{InitializationLevel, MethodInfo, Value, VariantType};
//!
//! let ctx = BridgeContext::new(transport, ExtensionToken(token), BridgeOptions::default(), callbacks);
//! ctx.on_initialize(InitializationLevel::Scene, |ctx| {
//!     let class = ClassBuilder::new("Counter", "Node").method(
//!         MethodInfo::new("double").arg(VariantType::Int, "x").returns(VariantType::Int),
//!         |_, args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2)),
//!     );
//!     ctx.classdb().register(class).unwrap();
//! });
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]
#![allow(clippy::missing_safety_doc)]

// ============================================================================
// Boundary plumbing
// ============================================================================

/// Raw records exchanged with the host
pub mod abi;

/// Call frames for the host calling convention
pub mod callframe;

/// Names and slot layouts of host entry points
pub mod symbols;

/// Transport backends and the caching resolver
pub mod transport;

/// Pointer lifetime registry
pub mod pointers;

/// Dynamic values
pub mod variant;

/// Handle table for native-to-managed callbacks
pub mod handles;

// ============================================================================
// Binding
// ============================================================================

/// Instance callback dispatch
pub mod dispatch;

/// Class and signal registration
pub mod classdb;

/// Managed closures as host Callables
pub mod callable;

/// Host objects and method binds
pub mod object;

// ============================================================================
// Context
// ============================================================================

/// Bridge configuration
pub mod config;

/// Bridge context and initialization protocol
pub mod context;

// ============================================================================
// Re-exports
// ============================================================================

pub use abi::{CallbackTable, RawVariant};
pub use callable::{CallableBridge, CallableFn};
pub use callframe::{Frame, PtrArgs, PtrRet};
pub use classdb::{ClassBuilder, ClassDB, ClassInfo};
pub use config::{BridgeOptions, ConfigError, FrameOptions};
pub use context::{BridgeContext, ExtensionToken};
pub use dispatch::{ClassInterface, Dispatcher, InstanceState, ObjectInterface, VirtualFn};
pub use handles::{Handle, HandleTable};
pub use object::{MethodBind, Object};
pub use pointers::{Ownership, Pointer, PointerRegistry, ShutdownReport};
pub use transport::{Resolver, Transport, TransportError};
pub use variant::{Variant, VariantCodec};
