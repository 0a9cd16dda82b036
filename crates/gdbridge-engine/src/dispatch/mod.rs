//! Object binding dispatcher
//!
//! Routes host callbacks for instances of managed classes to the managed
//! implementation. Every instance goes through:
//!
//! ```text
//! Unbound --create_instance--> Bound --first routed call--> Active --free_instance--> Freed
//! ```
//!
//! The host only ever holds the instance [`Handle`]; once it is freed the
//! handle is deleted and any further callback through it faults.
//!
//! Virtual methods use a two-step protocol: the host asks once per method
//! name for a token ([`Dispatcher::get_virtual_call_data`]) and passes it
//! back on every call ([`Dispatcher::call_virtual_with_data`]), which skips
//! name lookup on the hot path.

mod dispatcher;

pub use dispatcher::Dispatcher;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gdbridge_sdk::{PropertyInfo, Value};

use crate::callframe::{PtrArgs, PtrRet};
use crate::handles::Handle;

/// Managed implementation of one instance of a registered class.
///
/// Every method has a default that reports "not handled", so implementors
/// only override what they need. Methods take `&self`; instances are shared
/// with the host and use interior mutability for state.
pub trait ObjectInterface: Send + Sync + 'static {
    /// Set property `name`. Returns false if the property is unknown.
    fn set(&self, _name: &str, _value: Value) -> bool {
        false
    }

    /// Value of property `name`, `None` if unknown. A known property that
    /// is nil returns `Some(Value::Nil)`.
    fn get(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Dynamic properties reported on top of the registered ones.
    fn property_list(&self) -> Vec<PropertyInfo> {
        Vec::new()
    }

    /// True if property `name` has a revert value.
    fn property_can_revert(&self, _name: &str) -> bool {
        false
    }

    /// Revert value of property `name`.
    fn property_get_revert(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Adjust how property `info` is presented. Returns true if it changed.
    fn validate_property(&self, _info: &mut PropertyInfo) -> bool {
        false
    }

    /// Host notification.
    fn notification(&self, _what: i32, _reversed: bool) {}

    /// Text form, `None` for the host default.
    fn to_string(&self) -> Option<String> {
        None
    }

    /// Host took a reference.
    fn reference(&self) {}

    /// Host dropped a reference.
    fn unreference(&self) {}

    /// Resource id, 0 for none.
    fn rid(&self) -> u64 {
        0
    }

    /// The host is destroying the instance.
    fn free(&self) {}
}

/// Trampoline for a virtual method, receiving raw ptrcall arguments.
pub type VirtualFn = Arc<dyn Fn(&dyn ObjectInterface, PtrArgs, PtrRet) + Send + Sync>;

/// Managed side of a registered class.
pub trait ClassInterface: Send + Sync + 'static {
    /// New managed instance.
    fn create_instance(&self) -> Arc<dyn ObjectInterface>;

    /// Virtual methods this class overrides, by name.
    fn virtuals(&self) -> Vec<(String, VirtualFn)> {
        Vec::new()
    }
}

impl<F> ClassInterface for F
where
    F: Fn() -> Arc<dyn ObjectInterface> + Send + Sync + 'static,
{
    fn create_instance(&self) -> Arc<dyn ObjectInterface> {
        self()
    }
}

/// Lifecycle of a bound instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, not yet attached to a host object
    Unbound,
    /// Attached, no callback routed yet
    Bound,
    /// Callbacks are being routed
    Active,
    /// Released by the host
    Freed,
}

/// Registered class as seen by the dispatcher; stored in the handle table
/// under the class handle the host receives as class userdata.
pub struct ClassBinding {
    /// Class name
    pub name: String,
    /// Host class the instances extend
    pub parent: String,
    /// Managed implementation, `None` for classes that cannot be
    /// instantiated
    pub class: Option<Arc<dyn ClassInterface>>,
    /// Virtual method name → token
    pub virtuals: HashMap<String, Handle>,
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("virtuals", &self.virtuals.len())
            .finish()
    }
}

/// A virtual trampoline stored under its token.
pub struct VirtualEntry {
    /// Method name
    pub name: String,
    /// Trampoline
    pub call: VirtualFn,
}
