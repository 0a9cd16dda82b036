//! Managed closures exposed to the host as Callables
//!
//! [`CallableBridge::create`] stores a closure in the handle table and asks
//! the host for a custom Callable whose userdata is that handle. The host
//! then drives the closure through the custom-callable vtable: every
//! callback below takes the userdata handle first.

use std::fmt;
use std::sync::Arc;

use gdbridge_sdk::{BridgeResult, CallError, CallErrorKind, Value, VariantType};

use crate::abi::{CallableCallbacks, RawCallableCustomInfo, RawVariant};
use crate::context::ExtensionToken;
use crate::handles::{Handle, HandleTable};
use crate::symbols;
use crate::variant::{Variant, VariantCodec};

/// Closure behind a custom Callable.
pub type CallableFn = Arc<dyn Fn(&[Value]) -> Result<Value, CallError> + Send + Sync>;

struct CallableEntry {
    name: Option<String>,
    object_id: u64,
    call: CallableFn,
}

/// Creates custom Callables and serves the host's callbacks for them.
pub struct CallableBridge {
    codec: Arc<VariantCodec>,
    handles: Arc<HandleTable>,
    token: ExtensionToken,
    callbacks: CallableCallbacks,
}

impl CallableBridge {
    /// Bridge creating callables for the extension `token`.
    pub fn new(
        codec: Arc<VariantCodec>,
        handles: Arc<HandleTable>,
        token: ExtensionToken,
        callbacks: CallableCallbacks,
    ) -> Self {
        CallableBridge {
            codec,
            handles,
            token,
            callbacks,
        }
    }

    /// Wrap `f` in a host Callable.
    pub fn create<F>(&self, f: F) -> BridgeResult<Variant>
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.create_entry(None, 0, Arc::new(f))
    }

    /// Wrap `f` in a host Callable with a display name, bound to the object
    /// with `object_id` (0 for none).
    pub fn create_named<F>(&self, name: &str, object_id: u64, f: F) -> BridgeResult<Variant>
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.create_entry(Some(name.to_string()), object_id, Arc::new(f))
    }

    fn create_entry(
        &self,
        name: Option<String>,
        object_id: u64,
        call: CallableFn,
    ) -> BridgeResult<Variant> {
        let handle = self.handles.insert(CallableEntry {
            name,
            object_id,
            call,
        });
        let info = RawCallableCustomInfo {
            callable_userdata: handle.raw(),
            token: self.token.0,
            object_id,
            callbacks: self.callbacks,
        };
        let resolver = self.codec.resolver();
        let frame = resolver.frame();
        frame.arg(&info as *const RawCallableCustomInfo);
        let ret = frame.ret::<[u64; 2]>();
        // SAFETY: (info: ptr RawCallableCustomInfo) -> 2 words; info outlives the call
        unsafe { resolver.call(symbols::CALLABLE_CUSTOM_CREATE, &frame) };
        let [a, b] = ret.get();
        drop(frame);
        tracing::trace!(callable = handle.raw(), "created custom callable");
        Ok(self
            .codec
            .adopt_raw(RawVariant::new(VariantType::Callable, [a, b, 0])))
    }

    // ========================================================================
    // Host callbacks
    // ========================================================================

    /// Invoke the closure behind `userdata` with wire arguments. The returned
    /// variant is owned by the host.
    pub fn call(&self, userdata: Handle, args: &[RawVariant]) -> Result<RawVariant, CallError> {
        let entry = match self.handles.try_get::<CallableEntry>(userdata) {
            Some(entry) => entry,
            None => return Err(CallError::new(CallErrorKind::InstanceIsNil)),
        };
        let mut values = Vec::with_capacity(args.len());
        for (i, raw) in args.iter().enumerate() {
            let variant = self.codec.borrow_raw(*raw);
            match self.codec.decode(&variant) {
                Ok(value) => values.push(value),
                Err(err) => {
                    tracing::warn!(callable = userdata.raw(), argument = i, %err, "could not decode argument");
                    return Err(CallError::invalid_argument(i, raw.kind()));
                }
            }
        }
        let result = (entry.call)(&values)?;
        match self.codec.encode(&result) {
            Ok(variant) => Ok(variant.into_raw()),
            Err(err) => {
                tracing::warn!(callable = userdata.raw(), %err, "could not encode return value");
                Err(CallError::new(CallErrorKind::Managed))
            }
        }
    }

    /// The host dropped its last reference.
    pub fn free(&self, userdata: Handle) {
        self.handles.delete(userdata);
    }

    /// True while the closure is alive.
    pub fn is_valid(&self, userdata: Handle) -> bool {
        self.handles.try_get::<CallableEntry>(userdata).is_some()
    }

    /// Identity hash.
    pub fn hash(&self, userdata: Handle) -> u32 {
        let raw = userdata.raw();
        (raw ^ (raw >> 32)) as u32
    }

    /// Two custom callables are equal when they wrap the same closure.
    pub fn equal(&self, a: Handle, b: Handle) -> bool {
        a == b
    }

    /// Ordering by creation.
    pub fn less_than(&self, a: Handle, b: Handle) -> bool {
        a.raw() < b.raw()
    }

    /// Text form as a host String payload word (owned by the host).
    pub fn to_string(&self, userdata: Handle) -> u64 {
        let entry = self.handles.get::<CallableEntry>(userdata);
        let text = match (&entry.name, entry.object_id) {
            (Some(name), 0) => format!("Callable({})", name),
            (Some(name), id) => format!("Callable({}, #{})", name, id),
            (None, _) => format!("Callable({})", userdata),
        };
        let (words, _) = self.codec.string(&text).end();
        words[0]
    }
}

impl fmt::Debug for CallableBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableBridge")
            .field("token", &self.token)
            .finish()
    }
}
