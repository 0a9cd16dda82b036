//! Class and signal registration
//!
//! [`ClassDB::register`] runs the host's registration sequence for one
//! [`ClassBuilder`]:
//!
//! 1. the class itself (name, parent, flags, instance vtable)
//! 2. each method
//! 3. each integer constant
//! 4. properties, groups and subgroups, in declaration order
//! 5. each signal
//!
//! Every name and record handed to the host stays pinned until the class is
//! unregistered, since the host may keep raw pointers into them.
//! [`ClassDB::unregister`] is the exact inverse; [`ClassDB::unregister_all`]
//! runs at shutdown in reverse registration order.
//!
//! The host calls registered methods back through [`ClassDB::call_method`]
//! and [`ClassDB::ptrcall_method`], addressed by the method handle it got as
//! method userdata.

mod builder;
pub(crate) mod records;

pub use builder::{
    ClassBuilder, ConstantDefinition, Member, MethodDefinition, MethodFn, PropertyDefinition,
    PtrcallFn,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gdbridge_sdk::{
    BridgeError, BridgeResult, CallError, CallErrorKind, MethodInfo, PropertyInfo, SignalInfo,
    VariantType,
};
use parking_lot::{Mutex, RwLock};

use crate::abi::{CallbackTable, RawClassCreationInfo, RawPropertyInfo, RawVariant};
use crate::callframe::{PtrArgs, PtrRet};
use crate::context::ExtensionToken;
use crate::dispatch::{ClassBinding, Dispatcher, ObjectInterface, VirtualEntry};
use crate::handles::{Handle, HandleTable};
use crate::pointers::PinScope;
use crate::symbols;
use crate::variant::VariantCodec;
use records::{pin_method, pin_property};

/// Summary of a registered class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Class name
    pub name: String,
    /// Parent class name
    pub parent: String,
    /// Only inheritable by scripts
    pub is_virtual: bool,
    /// Not instantiable
    pub is_abstract: bool,
    /// Visible in the editor
    pub is_exposed: bool,
    /// Method names in registration order
    pub methods: Vec<String>,
    /// Property names in registration order
    pub properties: Vec<String>,
    /// Signal names in registration order
    pub signals: Vec<String>,
    /// Handle the host holds as class userdata
    pub handle: Handle,
}

/// Method record stored under the method handle.
pub(crate) struct MethodEntry {
    class: String,
    definition: MethodDefinition,
}

struct RegisteredClass {
    info: ClassInfo,
    class_name: u64,
    methods: HashMap<String, MethodInfo>,
    properties: HashMap<String, PropertyInfo>,
    signals: HashMap<String, SignalInfo>,
    constants: Vec<ConstantDefinition>,
    handles: Vec<Handle>,
    _pins: PinScope,
}

/// Registered classes of one extension.
pub struct ClassDB {
    codec: Arc<VariantCodec>,
    handles: Arc<HandleTable>,
    dispatcher: Arc<Dispatcher>,
    token: ExtensionToken,
    callbacks: CallbackTable,
    classes: RwLock<Vec<RegisteredClass>>,
    // names with a registration in flight
    reserved: Mutex<HashSet<String>>,
}

/// Claim on a class name for the duration of one registration.
struct Reservation<'a> {
    reserved: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved.lock().remove(&self.name);
    }
}

impl ClassDB {
    /// Registry for the extension identified by `token`; `callbacks` are
    /// written into every registration record.
    pub fn new(
        codec: Arc<VariantCodec>,
        handles: Arc<HandleTable>,
        dispatcher: Arc<Dispatcher>,
        token: ExtensionToken,
        callbacks: CallbackTable,
    ) -> Self {
        ClassDB {
            codec,
            handles,
            dispatcher,
            token,
            callbacks,
            classes: RwLock::new(Vec::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a class and everything declared on it.
    pub fn register(&self, builder: ClassBuilder) -> BridgeResult<Handle> {
        for definition in &builder.methods {
            let info = &definition.info;
            if info.default_arguments.len() > info.arguments.len() {
                return Err(BridgeError::InvalidMethod {
                    class: builder.name.clone(),
                    method: info.name.clone(),
                    reason: format!(
                        "{} defaults for {} arguments",
                        info.default_arguments.len(),
                        info.arguments.len()
                    ),
                });
            }
        }
        let reservation = self.reserve(&builder.name)?;
        let mut pins = PinScope::new();
        let mut handles = Vec::new();

        // method records are prepared first: encoding a default argument can
        // fail, and nothing may reach the host before that is known
        let mut method_records = Vec::with_capacity(builder.methods.len());
        for definition in &builder.methods {
            let handle = self.handles.insert(MethodEntry {
                class: builder.name.clone(),
                definition: definition.clone(),
            });
            handles.push(handle);
            match pin_method(
                &self.codec,
                &mut pins,
                &definition.info,
                handle.raw(),
                self.callbacks.method_call,
                self.callbacks.method_ptrcall,
            ) {
                Ok(record) => method_records.push(record),
                Err(err) => {
                    for handle in handles {
                        self.handles.delete(handle);
                    }
                    return Err(err);
                }
            }
        }

        let mut virtuals = HashMap::new();
        if let Some(class) = &builder.class {
            for (name, call) in class.virtuals() {
                let token = self.handles.insert(VirtualEntry {
                    name: name.clone(),
                    call,
                });
                handles.push(token);
                virtuals.insert(name, token);
            }
        }
        let class_handle = self.handles.insert(ClassBinding {
            name: builder.name.clone(),
            parent: builder.parent.clone(),
            class: builder.class.clone(),
            virtuals,
        });
        handles.push(class_handle);

        let class_name = self.codec.string_name(&builder.name);
        let class_word = class_name.word();
        pins.keep(class_name);
        let parent_name = self.codec.string_name(&builder.parent);
        let parent_word = parent_name.word();
        pins.keep(parent_name);

        let mut callbacks = self.callbacks.instance;
        if builder.class.is_none() {
            callbacks.create_instance = 0;
        }
        let creation = pins.one(RawClassCreationInfo {
            is_virtual: builder.is_virtual as u8,
            is_abstract: builder.is_abstract as u8,
            is_exposed: builder.is_exposed as u8,
            callbacks,
            class_userdata: class_handle.raw(),
        });
        self.emit(symbols::REGISTER_CLASS, |frame| {
            frame.arg(self.token.0);
            frame.arg(class_word);
            frame.arg(parent_word);
            frame.arg(creation as u64);
        });

        for record in &method_records {
            let record = pins.one(*record);
            self.emit(symbols::REGISTER_METHOD, |frame| {
                frame.arg(self.token.0);
                frame.arg(class_word);
                frame.arg(record as u64);
            });
        }

        for constant in &builder.constants {
            let enum_name = self.codec.string_name(&constant.enum_name);
            let name = self.codec.string_name(&constant.name);
            self.emit(symbols::REGISTER_INTEGER_CONSTANT, |frame| {
                frame.arg(self.token.0);
                frame.arg(class_word);
                frame.arg(enum_name.word());
                frame.arg(name.word());
                frame.arg(constant.value);
                frame.arg(constant.bitfield as u8);
            });
            pins.keep(enum_name);
            pins.keep(name);
        }

        let mut properties = HashMap::new();
        for member in &builder.members {
            match member {
                Member::Property(property) => {
                    let raw = pin_property(&self.codec, &mut pins, &property.info);
                    let info: *const RawPropertyInfo = pins.one(raw);
                    let setter = self.codec.string_name(&property.setter);
                    let getter = self.codec.string_name(&property.getter);
                    let symbol = match property.index {
                        Some(_) => symbols::REGISTER_PROPERTY_INDEXED,
                        None => symbols::REGISTER_PROPERTY,
                    };
                    self.emit(symbol, |frame| {
                        frame.arg(self.token.0);
                        frame.arg(class_word);
                        frame.arg(info as u64);
                        frame.arg(setter.word());
                        frame.arg(getter.word());
                        if let Some(index) = property.index {
                            frame.arg(index);
                        }
                    });
                    pins.keep(setter);
                    pins.keep(getter);
                    properties.insert(property.info.name.clone(), property.info.clone());
                }
                Member::Group { name, prefix } | Member::Subgroup { name, prefix } => {
                    let symbol = match member {
                        Member::Group { .. } => symbols::REGISTER_PROPERTY_GROUP,
                        _ => symbols::REGISTER_PROPERTY_SUBGROUP,
                    };
                    let name = self.codec.string(name);
                    let prefix = self.codec.string(prefix);
                    self.emit(symbol, |frame| {
                        frame.arg(self.token.0);
                        frame.arg(class_word);
                        frame.arg(name.word());
                        frame.arg(prefix.word());
                    });
                    pins.keep(name);
                    pins.keep(prefix);
                }
            }
        }

        for signal in &builder.signals {
            let name = self.codec.string_name(&signal.name);
            let args: Vec<RawPropertyInfo> = signal
                .arguments
                .iter()
                .map(|arg| pin_property(&self.codec, &mut pins, arg))
                .collect();
            let list = pins.slice(&args);
            self.emit(symbols::REGISTER_SIGNAL, |frame| {
                frame.arg(self.token.0);
                frame.arg(class_word);
                frame.arg(name.word());
                frame.arg(list as u64);
                frame.arg(args.len() as i64);
            });
            pins.keep(name);
        }

        tracing::debug!(
            class = %builder.name,
            parent = %builder.parent,
            methods = builder.methods.len(),
            properties = properties.len(),
            signals = builder.signals.len(),
            backend = self.codec.resolver().backend(),
            "registered class"
        );

        let info = ClassInfo {
            name: builder.name.clone(),
            parent: builder.parent.clone(),
            is_virtual: builder.is_virtual,
            is_abstract: builder.is_abstract,
            is_exposed: builder.is_exposed,
            methods: builder.methods.iter().map(|m| m.info.name.clone()).collect(),
            properties: builder
                .members
                .iter()
                .filter_map(|member| match member {
                    Member::Property(p) => Some(p.info.name.clone()),
                    _ => None,
                })
                .collect(),
            signals: builder.signals.iter().map(|s| s.name.clone()).collect(),
            handle: class_handle,
        };
        self.classes.write().push(RegisteredClass {
            info,
            class_name: class_word,
            methods: builder
                .methods
                .iter()
                .map(|m| (m.info.name.clone(), m.info.clone()))
                .collect(),
            properties,
            signals: builder
                .signals
                .iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
            constants: builder.constants,
            handles,
            _pins: pins,
        });
        drop(reservation);
        Ok(class_handle)
    }

    /// Claim `name` unless it is registered or being registered.
    fn reserve(&self, name: &str) -> BridgeResult<Reservation<'_>> {
        let classes = self.classes.read();
        let mut reserved = self.reserved.lock();
        if classes.iter().any(|c| c.info.name == name) || !reserved.insert(name.to_string()) {
            return Err(BridgeError::AlreadyRegistered(name.to_string()));
        }
        Ok(Reservation {
            reserved: &self.reserved,
            name: name.to_string(),
        })
    }

    fn emit(&self, symbol: &str, fill: impl FnOnce(&crate::callframe::Frame)) {
        let resolver = self.codec.resolver();
        let frame = resolver.frame();
        fill(&frame);
        // SAFETY: each registration symbol documents the slots `fill` appends
        unsafe { resolver.call(symbol, &frame) };
    }

    /// Unregister a class, releasing its pinned metadata and handles.
    pub fn unregister(&self, name: &str) -> BridgeResult<()> {
        let class = {
            let mut classes = self.classes.write();
            let Some(pos) = classes.iter().position(|c| c.info.name == name) else {
                return Err(BridgeError::ClassNotFound(name.to_string()));
            };
            classes.remove(pos)
        };
        self.emit(symbols::UNREGISTER_CLASS, |frame| {
            frame.arg(self.token.0);
            frame.arg(class.class_name);
        });
        for handle in &class.handles {
            self.handles.delete(*handle);
        }
        tracing::debug!(class = name, "unregistered class");
        Ok(())
    }

    /// Unregister every class, most recently registered first. Returns how
    /// many were unregistered.
    pub fn unregister_all(&self) -> usize {
        let names: Vec<String> = self
            .classes
            .read()
            .iter()
            .rev()
            .map(|c| c.info.name.clone())
            .collect();
        names
            .iter()
            .filter(|name| self.unregister(name).is_ok())
            .count()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// True if `name` is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.read().iter().any(|c| c.info.name == name)
    }

    /// Registered class names in registration order.
    pub fn class_names(&self) -> Vec<String> {
        self.classes
            .read()
            .iter()
            .map(|c| c.info.name.clone())
            .collect()
    }

    fn with_class<R>(
        &self,
        name: &str,
        f: impl FnOnce(&RegisteredClass) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        let classes = self.classes.read();
        match classes.iter().find(|c| c.info.name == name) {
            Some(class) => f(class),
            None => Err(BridgeError::ClassNotFound(name.to_string())),
        }
    }

    /// Summary of a registered class.
    pub fn class_info(&self, class: &str) -> BridgeResult<ClassInfo> {
        self.with_class(class, |c| Ok(c.info.clone()))
    }

    /// Metadata of a registered method.
    pub fn method_info(&self, class: &str, method: &str) -> BridgeResult<MethodInfo> {
        self.with_class(class, |c| {
            c.methods
                .get(method)
                .cloned()
                .ok_or_else(|| BridgeError::MethodNotFound {
                    class: class.to_string(),
                    method: method.to_string(),
                })
        })
    }

    /// Metadata of a registered property.
    pub fn property_info(&self, class: &str, property: &str) -> BridgeResult<PropertyInfo> {
        self.with_class(class, |c| {
            c.properties
                .get(property)
                .cloned()
                .ok_or_else(|| BridgeError::MemberNotFound {
                    class: class.to_string(),
                    member: property.to_string(),
                })
        })
    }

    /// Metadata of a registered signal.
    pub fn signal_info(&self, class: &str, signal: &str) -> BridgeResult<SignalInfo> {
        self.with_class(class, |c| {
            c.signals
                .get(signal)
                .cloned()
                .ok_or_else(|| BridgeError::MemberNotFound {
                    class: class.to_string(),
                    member: signal.to_string(),
                })
        })
    }

    /// Value of a registered integer constant.
    pub fn constant(&self, class: &str, name: &str) -> BridgeResult<i64> {
        self.with_class(class, |c| {
            c.constants
                .iter()
                .find(|k| k.name == name)
                .map(|k| k.value)
                .ok_or_else(|| BridgeError::MemberNotFound {
                    class: class.to_string(),
                    member: name.to_string(),
                })
        })
    }

    // ========================================================================
    // Host -> managed method calls
    // ========================================================================

    fn receiver(
        &self,
        entry: &MethodEntry,
        instance: Option<Handle>,
    ) -> Result<Option<Arc<dyn ObjectInterface>>, CallError> {
        if entry.definition.info.is_static() {
            return Ok(None);
        }
        match instance {
            Some(handle) if !handle.is_null() => Ok(Some(self.dispatcher.native(handle))),
            _ => Err(CallError::new(CallErrorKind::InstanceIsNil)),
        }
    }

    /// Varcall of the method behind `method`. Validates the argument count
    /// (honoring defaults) and the declared argument kinds; the returned
    /// variant is owned by the host.
    pub fn call_method(
        &self,
        method: Handle,
        instance: Option<Handle>,
        args: &[RawVariant],
    ) -> Result<RawVariant, CallError> {
        let entry = self.handles.get::<MethodEntry>(method);
        let info = &entry.definition.info;
        let declared = info.arguments.len();
        if args.len() > declared && !info.is_vararg() {
            return Err(CallError::too_many(declared));
        }
        if args.len() < info.required_arguments() {
            return Err(CallError::too_few(info.required_arguments()));
        }
        let receiver = self.receiver(&entry, instance)?;

        let mut values = Vec::with_capacity(declared.max(args.len()));
        for (i, raw) in args.iter().enumerate() {
            let variant = self.codec.borrow_raw(*raw);
            let value = self.codec.decode(&variant).map_err(|err| {
                tracing::warn!(class = %entry.class, method = %info.name, argument = i, %err, "could not decode argument");
                CallError::new(CallErrorKind::Managed)
            })?;
            if let Some(expected) = info.arguments.get(i).map(|a| a.kind) {
                if expected != VariantType::Nil && value.kind() != expected {
                    return Err(CallError::invalid_argument(i, expected));
                }
            }
            values.push(value);
        }
        let first_default = info.required_arguments();
        for i in values.len()..declared {
            values.push(info.default_arguments[i - first_default].clone());
        }

        let result = (entry.definition.call)(receiver.as_deref(), &values)?;
        match self.codec.encode(&result) {
            Ok(variant) => Ok(variant.into_raw()),
            Err(err) => {
                tracing::warn!(class = %entry.class, method = %info.name, %err, "could not encode return value");
                Err(CallError::new(CallErrorKind::Managed))
            }
        }
    }

    /// Ptrcall of the method behind `method`. Uses the typed fast path if
    /// one was registered, otherwise decodes each slot by its declared kind.
    pub fn ptrcall_method(
        &self,
        method: Handle,
        instance: Option<Handle>,
        args: PtrArgs,
        ret: PtrRet,
    ) {
        let entry = self.handles.get::<MethodEntry>(method);
        let info = &entry.definition.info;
        let receiver = match self.receiver(&entry, instance) {
            Ok(receiver) => receiver,
            Err(_) => panic!("ptrcall of {}.{} on a nil instance", entry.class, info.name),
        };
        if let Some(ptrcall) = &entry.definition.ptrcall {
            ptrcall(receiver.as_deref(), args, ret);
            return;
        }

        let mut values = Vec::with_capacity(info.arguments.len());
        for (i, arg) in info.arguments.iter().enumerate().take(args.len()) {
            // SAFETY: ptrcall slots hold the declared kind's payload, or a
            // full variant for untyped arguments
            let raw = unsafe { read_slot(&args, i, arg.kind) };
            match self.codec.decode(&self.codec.borrow_raw(raw)) {
                Ok(value) => values.push(value),
                Err(err) => {
                    tracing::error!(class = %entry.class, method = %info.name, argument = i, %err, "ptrcall argument");
                    return;
                }
            }
        }
        let result = match (entry.definition.call)(receiver.as_deref(), &values) {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(class = %entry.class, method = %info.name, %err, "ptrcall failed");
                return;
            }
        };
        let Some(declared) = info.return_value.as_ref().map(|r| r.kind) else {
            return;
        };
        match self.codec.encode(&result) {
            Ok(variant) if declared != VariantType::Nil && variant.kind() != declared => {
                tracing::error!(
                    class = %entry.class,
                    method = %info.name,
                    expected = %declared,
                    got = %variant.kind(),
                    "ptrcall return kind does not match declaration"
                );
                // unreferenced now, destroyed by the next sweep
                drop(variant);
            }
            // SAFETY: the return slot has room for the declared kind
            Ok(variant) => unsafe { write_slot(&ret, declared, variant.into_raw()) },
            Err(err) => {
                tracing::error!(class = %entry.class, method = %info.name, %err, "ptrcall return value")
            }
        }
    }
}

impl std::fmt::Debug for ClassDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDB")
            .field("token", &self.token)
            .field("classes", &self.class_names())
            .finish()
    }
}

/// Wire variant for ptrcall slot `index` of declared kind `kind`.
unsafe fn read_slot(args: &PtrArgs, index: usize, kind: VariantType) -> RawVariant {
    if kind == VariantType::Nil {
        return args.get::<RawVariant>(index);
    }
    let src = args.ptr::<u64>(index);
    let mut payload = [0u64; 3];
    std::ptr::copy_nonoverlapping(src, payload.as_mut_ptr(), kind.payload_words());
    RawVariant::new(kind, payload)
}

/// Store a returned variant into a ptrcall return slot of declared kind
/// `kind`.
unsafe fn write_slot(ret: &PtrRet, kind: VariantType, value: RawVariant) {
    if ret.is_null() {
        return;
    }
    if kind == VariantType::Nil {
        ret.write(value);
        return;
    }
    let dst = ret.as_ptr() as *mut u64;
    std::ptr::copy_nonoverlapping(value.payload.as_ptr(), dst, kind.payload_words());
}
