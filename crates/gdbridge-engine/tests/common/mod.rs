//! In-process fake host shared by the integration tests
//!
//! Implements the entry points the bridge uses on top of an [`ImportTable`].
//! Host values with a native payload live in a cell table keyed by their
//! payload word; destructor calls are counted per word so tests can check
//! that every owned value is released exactly once.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gdbridge_engine::abi::{
    RawCallableCustomInfo, RawClassCreationInfo, RawMethodInfo, RawPropertyInfo,
};
use gdbridge_engine::symbols;
use gdbridge_engine::transport::{Address, ImportTable};
use gdbridge_engine::{
    BridgeContext, BridgeOptions, CallbackTable, ExtensionToken, PtrArgs, PtrRet, RawVariant,
};
use gdbridge_sdk::{
    words_for, Basis, CallError, CallErrorKind, Operator, Projection, Transform3D, VariantType,
};
use parking_lot::Mutex;

pub const TOKEN: ExtensionToken = ExtensionToken(0x7e57);
pub const LIBRARY_PATH: &str = "res://bin/libgdbridge_demo.so";

/// Classes the fake host can construct without registration.
const NATIVE_CLASSES: &[&str] = &["Object", "RefCounted", "Node", "Node2D", "Resource"];

// ============================================================================
// Host values
// ============================================================================

/// A value as the fake host stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Inline(VariantType, [u64; 3]),
    Str(String),
    Name(String),
    Path(String),
    Boxed(VariantType, Vec<u64>),
    Array(Vec<HostValue>),
    Dict(Vec<(HostValue, HostValue)>),
    Packed(VariantType, Vec<HostValue>),
    Callable { userdata: u64, token: u64 },
}

impl HostValue {
    pub fn kind(&self) -> VariantType {
        match self {
            HostValue::Inline(kind, _) | HostValue::Boxed(kind, _) | HostValue::Packed(kind, _) => {
                *kind
            }
            HostValue::Str(_) => VariantType::String,
            HostValue::Name(_) => VariantType::StringName,
            HostValue::Path(_) => VariantType::NodePath,
            HostValue::Array(_) => VariantType::Array,
            HostValue::Dict(_) => VariantType::Dictionary,
            HostValue::Callable { .. } => VariantType::Callable,
        }
    }

    pub fn int(value: i64) -> Self {
        HostValue::Inline(VariantType::Int, [value as u64, 0, 0])
    }

    pub fn nil() -> Self {
        HostValue::Inline(VariantType::Nil, [0; 3])
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Inline(VariantType::Int, words) => Some(words[0] as i64),
            _ => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) | HostValue::Name(s) | HostValue::Path(s) => Some(s),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            HostValue::Inline(VariantType::Nil, _) => "<null>".to_string(),
            HostValue::Inline(VariantType::Bool, w) => (w[0] & 0xff != 0).to_string(),
            HostValue::Inline(VariantType::Int, w) => (w[0] as i64).to_string(),
            HostValue::Inline(VariantType::Float, w) => f64::from_bits(w[0]).to_string(),
            HostValue::Inline(kind, w) => format!("{}({:x?})", kind, w),
            HostValue::Str(s) | HostValue::Name(s) | HostValue::Path(s) => s.clone(),
            HostValue::Boxed(kind, _) => kind.to_string(),
            HostValue::Array(items) | HostValue::Packed(_, items) => {
                let parts: Vec<String> = items.iter().map(|i| i.render()).collect();
                format!("[{}]", parts.join(", "))
            }
            HostValue::Dict(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.render(), v.render()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            HostValue::Callable { userdata, .. } => format!("Callable({})", userdata),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            HostValue::Inline(VariantType::Nil, _) => false,
            HostValue::Inline(_, w) => w.iter().any(|&x| x != 0),
            HostValue::Str(s) | HostValue::Name(s) | HostValue::Path(s) => !s.is_empty(),
            HostValue::Array(items) | HostValue::Packed(_, items) => !items.is_empty(),
            HostValue::Dict(entries) => !entries.is_empty(),
            _ => true,
        }
    }
}

/// A host object.
#[derive(Debug, Clone, PartialEq)]
pub struct HostObject {
    pub class: String,
    pub instance_id: u64,
    pub instance: u64,
    pub priority: i64,
}

/// A method as the host recorded it at registration.
#[derive(Debug, Clone)]
pub struct HostMethod {
    pub class: String,
    pub name: String,
    pub userdata: u64,
    pub argument_count: u32,
    pub default_argument_count: u32,
    pub argument_metadata: Vec<u32>,
    name_ptr: u64,
}

/// Everything the fake host knows.
pub struct HostState {
    cells: Mutex<HashMap<u64, HostValue>>,
    next_cell: AtomicU64,
    destroyed: Mutex<HashMap<u64, usize>>,
    objects: Mutex<HashMap<u64, HostObject>>,
    next_object: AtomicU64,
    destroyed_objects: Mutex<Vec<u64>>,
    log: Mutex<Vec<String>>,
    classes: Mutex<Vec<(String, RawClassCreationInfo)>>,
    methods: Mutex<Vec<HostMethod>>,
    binds: HashMap<(String, String), u64>,
}

const BIND_GET_INSTANCE_ID: u64 = 0xb1;
const BIND_SET_PRIORITY: u64 = 0xb2;
const BIND_GET_PRIORITY: u64 = 0xb3;

impl HostState {
    fn new() -> Self {
        let mut binds = HashMap::new();
        binds.insert(("Object".into(), "get_instance_id".into()), BIND_GET_INSTANCE_ID);
        binds.insert(("Node".into(), "set_process_priority".into()), BIND_SET_PRIORITY);
        binds.insert(("Node".into(), "get_process_priority".into()), BIND_GET_PRIORITY);
        HostState {
            cells: Mutex::new(HashMap::new()),
            next_cell: AtomicU64::new(0x1000),
            destroyed: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            next_object: AtomicU64::new(1),
            destroyed_objects: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            classes: Mutex::new(Vec::new()),
            methods: Mutex::new(Vec::new()),
            binds,
        }
    }

    /// Store `value` in a new cell and return its payload word.
    pub fn alloc(&self, value: HostValue) -> u64 {
        let word = self.next_cell.fetch_add(8, Ordering::Relaxed);
        self.cells.lock().insert(word, value);
        word
    }

    /// Contents of a cell.
    pub fn cell(&self, word: u64) -> Option<HostValue> {
        self.cells.lock().get(&word).cloned()
    }

    /// Number of live cells.
    pub fn live_cells(&self) -> usize {
        self.cells.lock().len()
    }

    /// Destructor calls for the value with payload word `word`.
    pub fn destroy_count(&self, word: u64) -> usize {
        self.destroyed.lock().get(&word).copied().unwrap_or(0)
    }

    /// Words destroyed more than once.
    pub fn double_frees(&self) -> Vec<u64> {
        self.destroyed
            .lock()
            .iter()
            .filter(|(_, &n)| n > 1)
            .map(|(w, _)| *w)
            .collect()
    }

    /// Total destructor calls.
    pub fn total_destroyed(&self) -> usize {
        self.destroyed.lock().values().sum()
    }

    fn destroy(&self, word: u64) {
        *self.destroyed.lock().entry(word).or_insert(0) += 1;
        self.cells.lock().remove(&word);
    }

    /// Text of a String, StringName or NodePath cell.
    pub fn text(&self, word: u64) -> String {
        match self.cell(word) {
            Some(value) => match value.text() {
                Some(text) => text.to_string(),
                None => panic!("cell {:#x} is not text: {:?}", word, value),
            },
            None => panic!("read of destroyed host string {:#x}", word),
        }
    }

    /// Host view of a wire variant.
    pub fn read(&self, raw: RawVariant) -> HostValue {
        let kind = raw.kind();
        if kind.has_native_payload() {
            match self.cell(raw.payload[0]) {
                Some(value) => value,
                None => panic!("use of destroyed host {} {:#x}", kind, raw.payload[0]),
            }
        } else {
            HostValue::Inline(kind, raw.masked())
        }
    }

    /// Wire variant for a host value; heap kinds get a new cell owned by
    /// the receiver.
    pub fn materialize(&self, value: HostValue) -> RawVariant {
        match value {
            HostValue::Inline(kind, words) => RawVariant::new(kind, words),
            other => {
                let kind = other.kind();
                RawVariant::new(kind, [self.alloc(other), 0, 0])
            }
        }
    }

    fn mutate(&self, word: u64, f: impl FnOnce(&mut HostValue)) {
        let mut cells = self.cells.lock();
        match cells.get_mut(&word) {
            Some(value) => f(value),
            None => panic!("mutation of destroyed host value {:#x}", word),
        }
    }

    /// Registration calls in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }

    /// Creation record of a registered class.
    pub fn class(&self, name: &str) -> Option<RawClassCreationInfo> {
        self.classes
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, info)| *info)
    }

    /// Methods registered so far.
    pub fn methods(&self) -> Vec<HostMethod> {
        self.methods.lock().clone()
    }

    /// Method userdata recorded for `class.method`.
    pub fn method_userdata(&self, class: &str, method: &str) -> u64 {
        match self
            .methods
            .lock()
            .iter()
            .find(|m| m.class == class && m.name == method)
        {
            Some(m) => m.userdata,
            None => panic!("{}.{} was not registered", class, method),
        }
    }

    /// Re-read a registered method's name through the pointer the bridge
    /// handed over at registration.
    pub fn method_name_through_pointer(&self, index: usize) -> String {
        let ptr = self.methods.lock()[index].name_ptr as *const u64;
        // SAFETY: the bridge keeps registration records pinned until unregister
        self.text(unsafe { *ptr })
    }

    /// Object record.
    pub fn object(&self, object: u64) -> Option<HostObject> {
        self.objects.lock().get(&object).cloned()
    }

    /// Objects destroyed through `object_destroy`.
    pub fn destroyed_objects(&self) -> Vec<u64> {
        self.destroyed_objects.lock().clone()
    }

    /// Create a host object directly, as if the engine had made it.
    pub fn spawn(&self, class: &str) -> (u64, u64) {
        let n = self.next_object.fetch_add(1, Ordering::Relaxed);
        let object = 0x10_0000 + n * 0x40;
        let instance_id = 1000 + n;
        self.objects.lock().insert(
            object,
            HostObject {
                class: class.to_string(),
                instance_id,
                instance: 0,
                priority: 0,
            },
        );
        (object, instance_id)
    }

    /// Forget an object without going through the bridge.
    pub fn free_object(&self, object: u64) {
        self.objects.lock().remove(&object);
    }
}

// ============================================================================
// Fake host
// ============================================================================

/// Import table wired to a [`HostState`].
pub struct FakeHost {
    pub imports: Arc<ImportTable>,
    pub state: Arc<HostState>,
}

/// Route bridge logs to the test output; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl FakeHost {
    pub fn new() -> Self {
        init_tracing();
        let imports = Arc::new(ImportTable::new());
        let state = Arc::new(HostState::new());
        install(&imports, &state);
        FakeHost { imports, state }
    }

    /// Context with default options.
    pub fn context(&self) -> Arc<BridgeContext> {
        self.context_with(BridgeOptions::default())
    }

    /// Context with `options`.
    pub fn context_with(&self, options: BridgeOptions) -> Arc<BridgeContext> {
        BridgeContext::new(
            self.imports.clone(),
            TOKEN,
            options,
            CallbackTable::default(),
        )
    }
}

unsafe fn list<T: gdbridge_sdk::Pod>(args: &PtrArgs, index: usize, count: usize) -> Vec<T> {
    let table = args.get::<u64>(index) as *const u64;
    (0..count)
        .map(|i| (*table.add(i) as *const T).read_unaligned())
        .collect()
}

unsafe fn variants(state: &HostState, args: &PtrArgs, index: usize) -> Vec<HostValue> {
    let count = args.get::<i64>(index + 1).max(0) as usize;
    list::<RawVariant>(args, index, count)
        .into_iter()
        .map(|raw| state.read(raw))
        .collect()
}

fn call_error(kind: CallErrorKind) -> CallError {
    CallError::new(kind)
}

fn define(
    imports: &ImportTable,
    state: &Arc<HostState>,
    name: &str,
    f: impl Fn(&HostState, PtrArgs, PtrRet) + Send + Sync + 'static,
) -> Address {
    let state = state.clone();
    imports.define(name, move |args, ret| f(&state, args, ret))
}

fn install(imports: &ImportTable, state: &Arc<HostState>) {
    // ===== strings =====
    for (symbol, make) in [
        (symbols::STRING_NEW_UTF8, HostValue::Str as fn(String) -> HostValue),
        (symbols::STRING_NAME_NEW_UTF8, HostValue::Name as fn(String) -> HostValue),
    ] {
        define(imports, state, symbol, move |s, args, ret| unsafe {
            let ptr = args.get::<u64>(0) as *const u8;
            let len = args.get::<i64>(1).max(0) as usize;
            let bytes = if len == 0 {
                &[][..]
            } else {
                std::slice::from_raw_parts(ptr, len)
            };
            let text = String::from_utf8_lossy(bytes).into_owned();
            ret.write(s.alloc(make(text)));
        });
    }
    define(imports, state, symbols::STRING_TO_UTF8, |s, args, ret| unsafe {
        let text = s.text(args.get::<u64>(0));
        let buf = args.get::<u64>(1) as *mut u8;
        let cap = args.get::<i64>(2).max(0) as usize;
        if !buf.is_null() {
            let n = cap.min(text.len());
            std::ptr::copy_nonoverlapping(text.as_ptr(), buf, n);
        }
        ret.write(text.len() as i64);
    });
    define(imports, state, symbols::STRING_APPEND, |s, args, _| unsafe {
        let this = args.get::<u64>(0);
        let other = s.text(args.get::<u64>(1));
        s.mutate(this, |v| {
            if let HostValue::Str(text) = v {
                text.push_str(&other);
            }
        });
    });

    // ===== per-kind factories =====
    let destroy = define(imports, state, "fake.destroy", |s, args, _| unsafe {
        s.destroy(args.get::<u64>(0));
    });
    define(imports, state, symbols::GET_PTR_DESTRUCTOR, move |_, _, ret| unsafe {
        ret.write(destroy);
    });
    let copy = define(imports, state, "fake.copy", |s, args, ret| unsafe {
        let word = args.get::<u64>(0);
        let value = match s.cell(word) {
            Some(value) => value,
            None => panic!("copy of destroyed host value {:#x}", word),
        };
        ret.write([s.alloc(value), 0u64, 0u64]);
    });
    define(imports, state, symbols::GET_PTR_CONSTRUCTOR, move |_, args, ret| unsafe {
        let kind = VariantType::from_id(args.get::<i64>(0) as u64);
        let index = args.get::<i64>(1);
        let found = matches!(kind, Some(k) if k.has_native_payload()) && index == 1;
        ret.write(if found { copy } else { Address(0) });
    });

    let mut from_type = HashMap::new();
    let mut to_type = HashMap::new();
    for (kind, words) in [
        (VariantType::Basis, words_for::<Basis>()),
        (VariantType::Transform3D, words_for::<Transform3D>()),
        (VariantType::Projection, words_for::<Projection>()),
    ] {
        let boxer = define(imports, state, &format!("fake.box.{}", kind), move |s, args, ret| unsafe {
            let src = args.ptr::<u64>(0);
            let data = std::slice::from_raw_parts(src, words).to_vec();
            ret.write(s.alloc(HostValue::Boxed(kind, data)));
        });
        let unboxer = define(imports, state, &format!("fake.unbox.{}", kind), move |s, args, ret| unsafe {
            let word = args.get::<u64>(0);
            let Some(HostValue::Boxed(_, data)) = s.cell(word) else {
                panic!("unbox of a non-boxed value {:#x}", word);
            };
            std::ptr::copy_nonoverlapping(data.as_ptr(), ret.as_ptr() as *mut u64, data.len());
        });
        from_type.insert(kind.id() as i64, boxer);
        to_type.insert(kind.id() as i64, unboxer);
    }
    define(imports, state, symbols::GET_FROM_TYPE_CONSTRUCTOR, move |_, args, ret| unsafe {
        let kind = args.get::<i64>(0);
        ret.write(from_type.get(&kind).copied().unwrap_or(Address(0)));
    });
    define(imports, state, symbols::GET_TO_TYPE_CONSTRUCTOR, move |_, args, ret| unsafe {
        let kind = args.get::<i64>(0);
        ret.write(to_type.get(&kind).copied().unwrap_or(Address(0)));
    });

    let string_length = define(imports, state, "fake.String.length", |s, args, ret| unsafe {
        let this = args.get::<[u64; 3]>(0);
        let len = s.text(this[0]).chars().count();
        ret.write([len as u64, 0u64, 0u64]);
    });
    define(imports, state, symbols::GET_PTR_BUILTIN_METHOD, move |s, args, ret| unsafe {
        let kind = VariantType::from_id(args.get::<i64>(0) as u64);
        let name = s.text(args.get::<u64>(1));
        let found = kind == Some(VariantType::String) && name == "length";
        ret.write(if found { string_length } else { Address(0) });
    });

    let add_int = define(imports, state, "fake.evaluate.add_int", |_, args, ret| unsafe {
        let l = args.get::<[u64; 3]>(0)[0] as i64;
        let r = args.get::<[u64; 3]>(1)[0] as i64;
        ret.write([l.wrapping_add(r) as u64, 0u64, 0u64]);
    });
    define(imports, state, symbols::GET_PTR_OPERATOR_EVALUATOR, move |_, args, ret| unsafe {
        let op = args.get::<i64>(0);
        let l = args.get::<i64>(1);
        let r = args.get::<i64>(2);
        let int = VariantType::Int.id() as i64;
        let found = op == Operator::Add.id() as i64 && l == int && r == int;
        ret.write(if found { add_int } else { Address(0) });
    });

    let max = define(imports, state, "fake.utility.max", |s, args, ret| unsafe {
        let values = variants(s, &args, 0);
        let best = values.iter().filter_map(|v| v.as_int()).max().unwrap_or(0);
        ret.write(RawVariant::new(VariantType::Int, [best as u64, 0, 0]));
    });
    define(imports, state, symbols::GET_PTR_UTILITY_FUNCTION, move |s, args, ret| unsafe {
        let name = s.text(args.get::<u64>(0));
        ret.write(if name == "max" { max } else { Address(0) });
    });

    // ===== generic variant operations =====
    define(imports, state, symbols::VARIANT_CONSTRUCT, |s, args, ret| unsafe {
        let kind = match VariantType::from_id(args.get::<i64>(0) as u64) {
            Some(kind) => kind,
            None => panic!("construct of unknown kind"),
        };
        let values = variants(s, &args, 1);
        let value = construct(kind, &values);
        match value {
            Ok(value) => ret.write(s.materialize(value)),
            Err(err) => {
                args.set(3, err);
                ret.write(RawVariant::NIL);
            }
        }
    });
    define(imports, state, symbols::VARIANT_CALL, |s, args, ret| unsafe {
        let this = args.get::<RawVariant>(0);
        let method = s.text(args.get::<u64>(1));
        let values = variants(s, &args, 2);
        match call(s, this, &method, &values) {
            Ok(value) => ret.write(s.materialize(value)),
            Err(err) => {
                args.set(4, err);
                ret.write(RawVariant::NIL);
            }
        }
    });
    define(imports, state, symbols::VARIANT_CALL_STATIC, |s, args, ret| unsafe {
        let kind = VariantType::from_id(args.get::<i64>(0) as u64);
        let method = s.text(args.get::<u64>(1));
        let values = variants(s, &args, 2);
        let result = match (kind, method.as_str(), values.as_slice()) {
            (Some(VariantType::String), "chr", [code]) => code
                .as_int()
                .and_then(|c| char::from_u32(c as u32))
                .map(|c| HostValue::Str(c.to_string()))
                .ok_or(CallError::invalid_argument(0, VariantType::Int)),
            _ => Err(call_error(CallErrorKind::InvalidMethod)),
        };
        match result {
            Ok(value) => ret.write(s.materialize(value)),
            Err(err) => {
                args.set(4, err);
                ret.write(RawVariant::NIL);
            }
        }
    });
    define(imports, state, symbols::VARIANT_EVALUATE, |s, args, ret| unsafe {
        let op = args.get::<i64>(0);
        let l = s.read(args.get::<RawVariant>(1));
        let r = s.read(args.get::<RawVariant>(2));
        let result = if op == Operator::Add.id() as i64 {
            match (&l, &r) {
                (HostValue::Str(a), HostValue::Str(b)) => Some(HostValue::Str(format!("{a}{b}"))),
                _ => match (l.as_int(), r.as_int()) {
                    (Some(a), Some(b)) => Some(HostValue::int(a.wrapping_add(b))),
                    _ => None,
                },
            }
        } else if op == Operator::Equal.id() as i64 {
            let eq = (l == r) as u64;
            Some(HostValue::Inline(VariantType::Bool, [eq, 0, 0]))
        } else {
            None
        };
        match result {
            Some(value) => {
                args.set(3, 1u8);
                ret.write(s.materialize(value));
            }
            None => ret.write(RawVariant::NIL),
        }
    });
    define(imports, state, symbols::VARIANT_GET_INDEXED, |s, args, ret| unsafe {
        let this = s.read(args.get::<RawVariant>(0));
        let index = args.get::<i64>(1);
        match &this {
            HostValue::Array(items) | HostValue::Packed(_, items) => {
                args.set(2, 1u8);
                match usize::try_from(index).ok().and_then(|i| items.get(i)) {
                    Some(item) => ret.write(s.materialize(item.clone())),
                    None => args.set(3, 1u8),
                }
            }
            _ => {}
        }
    });
    define(imports, state, symbols::VARIANT_SET_INDEXED, |s, args, _| unsafe {
        let this = args.get::<RawVariant>(0);
        let index = args.get::<i64>(1);
        let value = s.read(args.get::<RawVariant>(2));
        if !matches!(this.kind(), VariantType::Array) && !this.kind().is_packed_array() {
            return;
        }
        args.set(3, 1u8);
        let mut oob = false;
        s.mutate(this.payload[0], |v| {
            if let HostValue::Array(items) | HostValue::Packed(_, items) = v {
                match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                    Some(slot) => *slot = value,
                    None => oob = true,
                }
            }
        });
        if oob {
            args.set(4, 1u8);
        }
    });
    define(imports, state, symbols::VARIANT_GET_KEYED, |s, args, ret| unsafe {
        let this = s.read(args.get::<RawVariant>(0));
        let key = s.read(args.get::<RawVariant>(1));
        if let HostValue::Dict(entries) = this {
            if let Some((_, value)) = entries.into_iter().find(|(k, _)| *k == key) {
                args.set(2, 1u8);
                ret.write(s.materialize(value));
            }
        }
    });
    define(imports, state, symbols::VARIANT_SET_KEYED, |s, args, _| unsafe {
        let this = args.get::<RawVariant>(0);
        let key = s.read(args.get::<RawVariant>(1));
        let value = s.read(args.get::<RawVariant>(2));
        if this.kind() != VariantType::Dictionary {
            return;
        }
        s.mutate(this.payload[0], |v| {
            if let HostValue::Dict(entries) = v {
                dict_set(entries, key, value);
            }
        });
        args.set(3, 1u8);
    });
    define(imports, state, symbols::VARIANT_GET_NAMED, |s, args, ret| unsafe {
        let this = args.get::<RawVariant>(0);
        let name = s.text(args.get::<u64>(1));
        if this.kind() != VariantType::Vector2 {
            return;
        }
        let shift = match name.as_str() {
            "x" => 0,
            "y" => 32,
            _ => return,
        };
        let component = f32::from_bits((this.payload[0] >> shift) as u32) as f64;
        args.set(2, 1u8);
        ret.write(RawVariant::new(VariantType::Float, [component.to_bits(), 0, 0]));
    });
    define(imports, state, symbols::VARIANT_SET_NAMED, |s, args, _| unsafe {
        let mut this = args.get::<RawVariant>(0);
        let name = s.text(args.get::<u64>(1));
        let value = args.get::<RawVariant>(2);
        if this.kind() != VariantType::Vector2 || value.kind() != VariantType::Float {
            return;
        }
        let shift = match name.as_str() {
            "x" => 0,
            "y" => 32,
            _ => return,
        };
        let bits = (f64::from_bits(value.payload[0]) as f32).to_bits() as u64;
        let mask = 0xffff_ffffu64 << shift;
        this.payload[0] = (this.payload[0] & !mask) | (bits << shift);
        args.set(0, this);
        args.set(3, 1u8);
    });
    define(imports, state, symbols::VARIANT_STRINGIFY, |s, args, ret| unsafe {
        let value = s.read(args.get::<RawVariant>(0));
        ret.write(s.alloc(HostValue::Str(value.render())));
    });
    define(imports, state, symbols::VARIANT_HASH, |s, args, ret| unsafe {
        let value = s.read(args.get::<RawVariant>(0));
        let mut hasher = DefaultHasher::new();
        value.render().hash(&mut hasher);
        ret.write(hasher.finish() as i64);
    });
    define(imports, state, symbols::VARIANT_BOOLEANIZE, |s, args, ret| unsafe {
        let value = s.read(args.get::<RawVariant>(0));
        ret.write(value.truthy() as u8);
    });

    // ===== objects =====
    define(imports, state, symbols::CLASSDB_CONSTRUCT_OBJECT, |s, args, ret| unsafe {
        let class = s.text(args.get::<u64>(0));
        let known = NATIVE_CLASSES.contains(&class.as_str())
            || s.classes.lock().iter().any(|(name, _)| *name == class);
        if known {
            ret.write(s.spawn(&class).0);
        } else {
            ret.write(0u64);
        }
    });
    define(imports, state, symbols::OBJECT_SET_INSTANCE, |s, args, _| unsafe {
        let object = args.get::<u64>(0);
        let class = s.text(args.get::<u64>(1));
        let instance = args.get::<u64>(2);
        match s.objects.lock().get_mut(&object) {
            Some(record) => {
                record.class = class;
                record.instance = instance;
            }
            None => panic!("set_instance on unknown object {:#x}", object),
        }
    });
    define(imports, state, symbols::OBJECT_DESTROY, |s, args, _| unsafe {
        let object = args.get::<u64>(0);
        s.objects.lock().remove(&object);
        s.destroyed_objects.lock().push(object);
    });
    define(imports, state, symbols::OBJECT_GET_INSTANCE_ID, |s, args, ret| unsafe {
        let object = args.get::<u64>(0);
        ret.write(s.object(object).map_or(0, |o| o.instance_id));
    });
    define(imports, state, symbols::OBJECT_GET_INSTANCE_FROM_ID, |s, args, ret| unsafe {
        let id = args.get::<u64>(0);
        let objects = s.objects.lock();
        let found = objects
            .iter()
            .find(|(_, o)| o.instance_id == id)
            .map_or(0, |(ptr, _)| *ptr);
        ret.write(found);
    });
    define(imports, state, symbols::CLASSDB_GET_METHOD_BIND, |s, args, ret| unsafe {
        let class = s.text(args.get::<u64>(0));
        let method = s.text(args.get::<u64>(1));
        ret.write(s.binds.get(&(class, method)).copied().unwrap_or(0));
    });
    define(imports, state, symbols::OBJECT_METHOD_BIND_PTRCALL, |s, args, _| unsafe {
        let bind = args.get::<u64>(0);
        let object = args.get::<u64>(1);
        let table = args.get::<u64>(2) as *const u64;
        let ret = args.get::<u64>(3) as *mut u64;
        let mut objects = s.objects.lock();
        let Some(record) = objects.get_mut(&object) else {
            panic!("ptrcall on unknown object {:#x}", object);
        };
        match bind {
            BIND_GET_INSTANCE_ID => *ret = record.instance_id,
            BIND_SET_PRIORITY => record.priority = *(*table as *const i64),
            BIND_GET_PRIORITY => *(ret as *mut i64) = record.priority,
            other => panic!("unknown method bind {:#x}", other),
        }
    });

    // ===== registration =====
    define(imports, state, symbols::REGISTER_CLASS, |s, args, _| unsafe {
        let class = s.text(args.get::<u64>(1));
        let parent = s.text(args.get::<u64>(2));
        let info = *(args.get::<u64>(3) as *const RawClassCreationInfo);
        s.record(format!("class:{}:{}", class, parent));
        s.classes.lock().push((class, info));
    });
    define(imports, state, symbols::REGISTER_METHOD, |s, args, _| unsafe {
        let class = s.text(args.get::<u64>(1));
        let info = *(args.get::<u64>(2) as *const RawMethodInfo);
        let name = s.text(*info.name);
        s.record(format!("method:{}.{}", class, name));
        s.methods.lock().push(HostMethod {
            class,
            name,
            userdata: info.method_userdata,
            argument_count: info.argument_count,
            default_argument_count: info.default_argument_count,
            argument_metadata: (0..info.argument_count as usize)
                .map(|i| *info.arguments_metadata.add(i))
                .collect(),
            name_ptr: info.name as u64,
        });
    });
    define(imports, state, symbols::REGISTER_INTEGER_CONSTANT, |s, args, _| unsafe {
        let class = s.text(args.get::<u64>(1));
        let enum_name = s.text(args.get::<u64>(2));
        let name = s.text(args.get::<u64>(3));
        let value = args.get::<i64>(4);
        let bitfield = args.get::<u8>(5) != 0;
        let tag = if bitfield { "flag" } else { "constant" };
        s.record(format!("{}:{}.{}.{}={}", tag, class, enum_name, name, value));
    });
    for (symbol, tag) in [
        (symbols::REGISTER_PROPERTY, "property"),
        (symbols::REGISTER_PROPERTY_INDEXED, "property_indexed"),
    ] {
        define(imports, state, symbol, move |s, args, _| unsafe {
            let class = s.text(args.get::<u64>(1));
            let info = *(args.get::<u64>(2) as *const RawPropertyInfo);
            let name = s.text(*info.name);
            let setter = s.text(args.get::<u64>(3));
            let getter = s.text(args.get::<u64>(4));
            let mut entry = format!("{}:{}.{}({},{})", tag, class, name, setter, getter);
            if args.len() > 5 {
                entry.push_str(&format!("[{}]", args.get::<i64>(5)));
            }
            s.record(entry);
        });
    }
    for (symbol, tag) in [
        (symbols::REGISTER_PROPERTY_GROUP, "group"),
        (symbols::REGISTER_PROPERTY_SUBGROUP, "subgroup"),
    ] {
        define(imports, state, symbol, move |s, args, _| unsafe {
            let class = s.text(args.get::<u64>(1));
            let name = s.text(args.get::<u64>(2));
            let prefix = s.text(args.get::<u64>(3));
            s.record(format!("{}:{}.{}/{}", tag, class, name, prefix));
        });
    }
    define(imports, state, symbols::REGISTER_SIGNAL, |s, args, _| unsafe {
        let class = s.text(args.get::<u64>(1));
        let name = s.text(args.get::<u64>(2));
        let list = args.get::<u64>(3) as *const RawPropertyInfo;
        let argc = args.get::<i64>(4).max(0) as usize;
        let names: Vec<String> = (0..argc)
            .map(|i| s.text(*(*list.add(i)).name))
            .collect();
        s.record(format!("signal:{}.{}({})", class, name, names.join(",")));
    });
    define(imports, state, symbols::UNREGISTER_CLASS, |s, args, _| unsafe {
        let class = s.text(args.get::<u64>(1));
        s.record(format!("unregister:{}", class));
        s.classes.lock().retain(|(name, _)| *name != class);
        s.methods.lock().retain(|m| m.class != class);
    });

    // ===== misc =====
    define(imports, state, symbols::GET_LIBRARY_PATH, |s, _, ret| unsafe {
        ret.write(s.alloc(HostValue::Str(LIBRARY_PATH.to_string())));
    });
    define(imports, state, symbols::CALLABLE_CUSTOM_CREATE, |s, args, ret| unsafe {
        let info = *(args.get::<u64>(0) as *const RawCallableCustomInfo);
        let word = s.alloc(HostValue::Callable {
            userdata: info.callable_userdata,
            token: info.token,
        });
        ret.write([word, info.object_id]);
    });
}

fn dict_set(entries: &mut Vec<(HostValue, HostValue)>, key: HostValue, value: HostValue) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

fn construct(kind: VariantType, args: &[HostValue]) -> Result<HostValue, CallError> {
    let bad = || CallError::invalid_argument(0, kind);
    Ok(match (kind, args) {
        (VariantType::String, []) => HostValue::Str(String::new()),
        (VariantType::String, [v]) => HostValue::Str(v.text().ok_or_else(bad)?.to_string()),
        (VariantType::StringName, []) => HostValue::Name(String::new()),
        (VariantType::StringName, [v @ (HostValue::Str(_) | HostValue::Name(_))]) => {
            HostValue::Name(v.text().unwrap_or_default().to_string())
        }
        (VariantType::NodePath, []) => HostValue::Path(String::new()),
        (VariantType::NodePath, [v @ (HostValue::Str(_) | HostValue::Path(_))]) => {
            HostValue::Path(v.text().unwrap_or_default().to_string())
        }
        (VariantType::Array, []) => HostValue::Array(Vec::new()),
        (VariantType::Array, [HostValue::Array(items)]) => HostValue::Array(items.clone()),
        (VariantType::Dictionary, []) => HostValue::Dict(Vec::new()),
        (k, []) if k.is_packed_array() => HostValue::Packed(k, Vec::new()),
        (k, [v]) if v.kind() == k => v.clone(),
        (k, []) if !k.has_native_payload() => HostValue::Inline(k, [0; 3]),
        (_, []) => return Err(call_error(CallErrorKind::InvalidMethod)),
        (_, [_]) => return Err(bad()),
        (_, _) => return Err(CallError::too_many(1)),
    })
}

fn call(
    state: &HostState,
    this: RawVariant,
    method: &str,
    args: &[HostValue],
) -> Result<HostValue, CallError> {
    let value = state.read(this);
    let word = this.payload[0];
    match (&value, method, args) {
        (HostValue::Str(s), "length", []) => Ok(HostValue::int(s.chars().count() as i64)),
        (HostValue::Str(s), "to_upper", []) => Ok(HostValue::Str(s.to_uppercase())),
        (HostValue::Array(items) | HostValue::Packed(_, items), "size", []) => {
            Ok(HostValue::int(items.len() as i64))
        }
        (HostValue::Dict(entries), "size", []) => Ok(HostValue::int(entries.len() as i64)),
        (HostValue::Array(_) | HostValue::Packed(..), "append", [item]) => {
            if let HostValue::Packed(kind, _) = &value {
                if kind.packed_element() != Some(item.kind()) {
                    return Err(CallError::invalid_argument(0, kind.packed_element().unwrap_or(*kind)));
                }
            }
            let item = item.clone();
            state.mutate(word, |v| {
                if let HostValue::Array(items) | HostValue::Packed(_, items) = v {
                    items.push(item);
                }
            });
            Ok(HostValue::nil())
        }
        (HostValue::Dict(_), "set", [key, item]) => {
            let (key, item) = (key.clone(), item.clone());
            state.mutate(word, |v| {
                if let HostValue::Dict(entries) = v {
                    dict_set(entries, key, item);
                }
            });
            Ok(HostValue::Inline(VariantType::Bool, [1, 0, 0]))
        }
        (HostValue::Dict(entries), "keys", []) => Ok(HostValue::Array(
            entries.iter().map(|(k, _)| k.clone()).collect(),
        )),
        (_, "length" | "size" | "append" | "set" | "keys" | "to_upper", _) => {
            Err(CallError::too_many(0))
        }
        _ => Err(call_error(CallErrorKind::InvalidMethod)),
    }
}
