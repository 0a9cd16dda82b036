//! Raw instance callbacks

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ClassBinding, InstanceState, ObjectInterface, VirtualEntry};
use crate::abi::{RawPropertyInfo, RawVariant};
use crate::callframe::{PtrArgs, PtrRet};
use crate::classdb::records::{pin_property, read_property};
use crate::handles::{Handle, HandleTable};
use crate::pointers::PinScope;
use crate::symbols;
use crate::variant::VariantCodec;

/// Instance record stored under the handle the host holds.
pub(crate) struct BoundInstance {
    class: Arc<ClassBinding>,
    object: u64,
    native: Arc<dyn ObjectInterface>,
    state: Mutex<InstanceState>,
    property_lists: Mutex<HashMap<usize, PinScope>>,
    validated: Mutex<PinScope>,
}

/// Entry points the host calls for instances of managed classes.
///
/// Names arrive as StringName payload words and values as wire variants;
/// the dispatcher decodes them and calls the [`ObjectInterface`].
pub struct Dispatcher {
    codec: Arc<VariantCodec>,
    handles: Arc<HandleTable>,
}

impl Dispatcher {
    /// Dispatcher decoding through `codec` and resolving handles in
    /// `handles`.
    pub fn new(codec: Arc<VariantCodec>, handles: Arc<HandleTable>) -> Self {
        Dispatcher { codec, handles }
    }

    fn instance(&self, handle: Handle) -> Arc<BoundInstance> {
        let instance = self.handles.get::<BoundInstance>(handle);
        let mut state = instance.state.lock();
        if *state == InstanceState::Bound {
            *state = InstanceState::Active;
        }
        drop(state);
        instance
    }

    fn name(&self, word: u64) -> Option<String> {
        match self.codec.read_string_name(word) {
            Ok(name) => Some(name),
            Err(err) => {
                tracing::warn!(%err, "could not read member name");
                None
            }
        }
    }

    /// Managed implementation behind an instance handle.
    pub fn native(&self, instance: Handle) -> Arc<dyn ObjectInterface> {
        self.instance(instance).native.clone()
    }

    /// Host object an instance is attached to.
    pub fn object(&self, instance: Handle) -> u64 {
        self.handles.get::<BoundInstance>(instance).object
    }

    /// Current lifecycle state; `Freed` once the handle is gone.
    pub fn instance_state(&self, instance: Handle) -> InstanceState {
        match self.handles.try_get::<BoundInstance>(instance) {
            Some(instance) => *instance.state.lock(),
            None => InstanceState::Freed,
        }
    }

    /// Create a managed instance of the class behind `class`, construct the
    /// host object it extends and attach the two. Returns the host object.
    pub fn create_instance(&self, class: Handle) -> u64 {
        let binding = self.handles.get::<ClassBinding>(class);
        let Some(interface) = binding.class.as_ref() else {
            panic!("class {} cannot be instantiated", binding.name);
        };
        let native = interface.create_instance();
        let resolver = self.codec.resolver();

        let parent = self.codec.intern(&binding.parent);
        let object = {
            let frame = resolver.frame();
            frame.arg(parent);
            let ret = frame.ret::<u64>();
            // SAFETY: (class: sn) -> object
            unsafe { resolver.call(symbols::CLASSDB_CONSTRUCT_OBJECT, &frame) };
            ret.get()
        };
        if object == 0 {
            panic!("host could not construct a {} for {}", binding.parent, binding.name);
        }

        let class_name = self.codec.intern(&binding.name);
        let instance = Arc::new(BoundInstance {
            class: binding.clone(),
            object,
            native,
            state: Mutex::new(InstanceState::Unbound),
            property_lists: Mutex::new(HashMap::new()),
            validated: Mutex::new(PinScope::new()),
        });
        let handle = self.handles.insert_arc(instance.clone());
        {
            let frame = resolver.frame();
            frame.arg(object);
            frame.arg(class_name);
            frame.arg(handle.raw());
            // SAFETY: (object, class: sn, instance: handle)
            unsafe { resolver.call(symbols::OBJECT_SET_INSTANCE, &frame) };
        }
        *instance.state.lock() = InstanceState::Bound;
        tracing::trace!(class = %binding.name, object, instance = handle.raw(), "bound instance");
        object
    }

    /// The host destroyed the object; release the managed instance.
    pub fn free_instance(&self, handle: Handle) {
        let entry = self.handles.delete(handle);
        let Ok(instance) = entry.downcast::<BoundInstance>() else {
            panic!("handle {} is not an instance", handle);
        };
        *instance.state.lock() = InstanceState::Freed;
        instance.native.free();
        instance.property_lists.lock().clear();
        tracing::trace!(class = %instance.class.name, object = instance.object, "freed instance");
    }

    /// Property write. False if the property is unknown.
    pub fn set(&self, instance: Handle, name: u64, value: RawVariant) -> bool {
        let instance = self.instance(instance);
        let Some(name) = self.name(name) else {
            return false;
        };
        let value = self.codec.borrow_raw(value);
        match self.codec.decode(&value) {
            Ok(value) => instance.native.set(&name, value),
            Err(err) => {
                tracing::warn!(property = %name, %err, "could not decode property value");
                false
            }
        }
    }

    /// Property read. `None` if the property is unknown; the returned
    /// variant is owned by the host.
    pub fn get(&self, instance: Handle, name: u64) -> Option<RawVariant> {
        let instance = self.instance(instance);
        let name = self.name(name)?;
        let value = instance.native.get(&name)?;
        match self.codec.encode(&value) {
            Ok(variant) => Some(variant.into_raw()),
            Err(err) => {
                tracing::warn!(property = %name, %err, "could not encode property value");
                None
            }
        }
    }

    /// Dynamic property list as a contiguous array, valid until
    /// [`Dispatcher::free_property_list`]. Null when empty.
    pub fn get_property_list(&self, instance: Handle) -> (*const RawPropertyInfo, u32) {
        let instance = self.instance(instance);
        let infos = instance.native.property_list();
        if infos.is_empty() {
            return (std::ptr::null(), 0);
        }
        let mut scope = PinScope::new();
        let raws: Vec<RawPropertyInfo> = infos
            .iter()
            .map(|info| pin_property(&self.codec, &mut scope, info))
            .collect();
        let list = scope.slice(&raws);
        instance
            .property_lists
            .lock()
            .insert(list as usize, scope);
        (list, raws.len() as u32)
    }

    /// Release a list returned by [`Dispatcher::get_property_list`].
    pub fn free_property_list(&self, instance: Handle, list: *const RawPropertyInfo) {
        if list.is_null() {
            return;
        }
        let instance = self.handles.get::<BoundInstance>(instance);
        if instance.property_lists.lock().remove(&(list as usize)).is_none() {
            panic!("free of a property list that was not handed out");
        }
    }

    /// True if property `name` has a revert value.
    pub fn property_can_revert(&self, instance: Handle, name: u64) -> bool {
        let instance = self.instance(instance);
        self.name(name)
            .map(|name| instance.native.property_can_revert(&name))
            .unwrap_or(false)
    }

    /// Revert value of property `name`, owned by the host.
    pub fn property_get_revert(&self, instance: Handle, name: u64) -> Option<RawVariant> {
        let instance = self.instance(instance);
        let name = self.name(name)?;
        let value = instance.native.property_get_revert(&name)?;
        self.codec.encode(&value).ok().map(|v| v.into_raw())
    }

    /// Let the instance adjust a property record in place.
    pub fn validate_property(&self, instance: Handle, info: &mut RawPropertyInfo) -> bool {
        let instance = self.instance(instance);
        // SAFETY: the host hands out records whose string pointers are valid
        let mut property = match unsafe { read_property(&self.codec, info) } {
            Ok(property) => property,
            Err(err) => {
                tracing::warn!(%err, "could not read property record");
                return false;
            }
        };
        if !instance.native.validate_property(&mut property) {
            return false;
        }
        let mut validated = instance.validated.lock();
        *info = pin_property(&self.codec, &mut validated, &property);
        true
    }

    /// Forward a host notification.
    pub fn notification(&self, instance: Handle, what: i32, reversed: bool) {
        self.instance(instance).native.notification(what, reversed);
    }

    /// Text form as a host String payload word (owned by the host), `None`
    /// for the host default.
    pub fn to_string(&self, instance: Handle) -> Option<u64> {
        let instance = self.instance(instance);
        let text = ObjectInterface::to_string(&*instance.native)?;
        let (words, _) = self.codec.string(&text).end();
        Some(words[0])
    }

    /// Host took a reference.
    pub fn reference(&self, instance: Handle) {
        self.instance(instance).native.reference();
    }

    /// Host dropped a reference.
    pub fn unreference(&self, instance: Handle) {
        self.instance(instance).native.unreference();
    }

    /// Resource id of the instance.
    pub fn get_rid(&self, instance: Handle) -> u64 {
        self.instance(instance).native.rid()
    }

    /// Token for the virtual method `name` of `class`, 0 if the class does
    /// not override it. The same name always yields the same token.
    pub fn get_virtual_call_data(&self, class: Handle, name: u64) -> u64 {
        let binding = self.handles.get::<ClassBinding>(class);
        if binding.virtuals.is_empty() {
            return 0;
        }
        let Some(name) = self.name(name) else {
            return 0;
        };
        binding.virtuals.get(&name).map_or(0, |token| token.raw())
    }

    /// Run the virtual trampoline identified by `token` on `instance`.
    pub fn call_virtual_with_data(&self, instance: Handle, token: u64, args: PtrArgs, ret: PtrRet) {
        let instance = self.instance(instance);
        let entry = self.handles.get::<VirtualEntry>(Handle::from_raw(token));
        tracing::trace!(class = %instance.class.name, method = %entry.name, "virtual call");
        (entry.call)(&*instance.native, args, ret);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handles", &self.handles.len())
            .finish()
    }
}
