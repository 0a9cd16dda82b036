//! Generic variant operations against the host

use std::sync::Arc;

use dashmap::DashMap;
use gdbridge_sdk::{BridgeError, BridgeResult, CallError, Operator, VariantType};

use super::{ownership_for, Variant};
use crate::abi::RawVariant;
use crate::pointers::{Pointer, PointerRegistry};
use crate::symbols;
use crate::transport::{Address, NativeOp, Resolver};

/// A method name passed to the host as a StringName word.
enum MethodName {
    /// Pinned in the codec's intern table
    Interned(u64),
    /// Built for this call only
    Temporary(Pointer),
}

impl MethodName {
    fn word(&self) -> u64 {
        match self {
            MethodName::Interned(word) => *word,
            MethodName::Temporary(ptr) => ptr.word(),
        }
    }
}

/// Converts values and runs generic variant operations.
pub struct VariantCodec {
    pub(super) resolver: Arc<Resolver>,
    pub(super) pointers: Arc<PointerRegistry>,
    names: DashMap<String, Pointer>,
    intern: bool,
}

impl VariantCodec {
    /// Codec over `resolver`, adopting results into `pointers`. With
    /// `intern` set, method names are kept as pinned StringNames.
    pub fn new(resolver: Arc<Resolver>, pointers: Arc<PointerRegistry>, intern: bool) -> Self {
        VariantCodec {
            resolver,
            pointers,
            names: DashMap::new(),
            intern,
        }
    }

    /// Resolver used for every native call.
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Registry values are adopted into.
    pub fn pointers(&self) -> &Arc<PointerRegistry> {
        &self.pointers
    }

    // ========================================================================
    // Adoption
    // ========================================================================

    /// The nil value.
    pub fn nil(&self) -> Variant {
        self.adopt_raw(RawVariant::NIL)
    }

    /// Adopt a value returned by the host, with the default ownership for its
    /// kind.
    pub fn adopt_raw(&self, raw: RawVariant) -> Variant {
        let kind = raw.kind();
        Variant::from_pointer(
            self.pointers
                .adopt_as(kind, ownership_for(kind), raw.masked()),
        )
    }

    /// Read-only view of a value the host keeps (callback arguments).
    pub fn borrow_raw(&self, raw: RawVariant) -> Variant {
        let kind = raw.kind();
        Variant::from_pointer(self.pointers.borrow(kind, raw.masked()))
    }

    pub(super) fn inline(&self, kind: VariantType, words: [u64; 3]) -> Variant {
        Variant::from_pointer(self.pointers.adopt_as(kind, ownership_for(kind), words))
    }

    // ========================================================================
    // Strings
    // ========================================================================

    fn new_utf8(&self, symbol: &str, text: &str) -> u64 {
        let frame = self.resolver.frame();
        frame.arg(text.as_ptr() as u64);
        frame.arg(text.len() as i64);
        let ret = frame.ret::<u64>();
        // SAFETY: (bytes: ptr, len: i64) -> 1 word; text outlives the call
        unsafe { self.resolver.call(symbol, &frame) };
        ret.get()
    }

    /// New host String, owned by the bridge.
    pub fn string(&self, text: &str) -> Pointer {
        let word = self.new_utf8(symbols::STRING_NEW_UTF8, text);
        self.pointers.adopt(VariantType::String, [word, 0, 0])
    }

    /// New host StringName, owned by the bridge.
    pub fn string_name(&self, text: &str) -> Pointer {
        let word = self.new_utf8(symbols::STRING_NAME_NEW_UTF8, text);
        self.pointers.adopt(VariantType::StringName, [word, 0, 0])
    }

    /// Pinned StringName for `name`, created once and shared until
    /// [`VariantCodec::release_names`]. Returns its payload word.
    pub fn intern(&self, name: &str) -> u64 {
        if let Some(ptr) = self.names.get(name) {
            return ptr.word();
        }
        let word = self.new_utf8(symbols::STRING_NAME_NEW_UTF8, name);
        let ptr = self.pointers.pin(VariantType::StringName, [word, 0, 0]);
        match self.names.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                // lost a race; keep the first one
                let word = existing.get().word();
                drop(existing);
                self.pointers.unpin(ptr);
                word
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ptr);
                word
            }
        }
    }

    /// Number of interned names.
    pub fn interned(&self) -> usize {
        self.names.len()
    }

    /// Unpin every interned name. Returns how many were released.
    pub fn release_names(&self) -> usize {
        let keys: Vec<String> = self.names.iter().map(|entry| entry.key().clone()).collect();
        let mut released = 0;
        for key in keys {
            if let Some((_, ptr)) = self.names.remove(&key) {
                self.pointers.unpin(ptr);
                released += 1;
            }
        }
        released
    }

    fn method_name(&self, name: &str) -> MethodName {
        if self.intern {
            MethodName::Interned(self.intern(name))
        } else {
            MethodName::Temporary(self.string_name(name))
        }
    }

    /// Text of the host String whose payload word is `word`.
    pub fn read_string(&self, word: u64) -> String {
        let len = self.utf8_chars(word, &mut []);
        let mut buf = vec![0u8; len];
        let written = self.utf8_chars(word, &mut buf);
        buf.truncate(written.min(len));
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn utf8_chars(&self, word: u64, buf: &mut [u8]) -> usize {
        let frame = self.resolver.frame();
        frame.arg(word);
        frame.arg(if buf.is_empty() {
            0
        } else {
            buf.as_mut_ptr() as u64
        });
        frame.arg(buf.len() as i64);
        let ret = frame.ret::<i64>();
        // SAFETY: (self: str, buf: ptr, cap: i64) -> len; writes at most cap bytes
        unsafe { self.resolver.call(symbols::STRING_TO_UTF8, &frame) };
        usize::try_from(ret.get()).unwrap_or(0)
    }

    /// Append `text` to the String behind `target` in place.
    pub fn append_string(&self, target: &Pointer, text: &str) {
        let other = self.string(text);
        let frame = self.resolver.frame();
        let this = frame.arg(target.word());
        frame.arg(other.word());
        // SAFETY: (self: inout str, other: str)
        unsafe { self.resolver.call(symbols::STRING_APPEND, &frame) };
        target.set([this.get(), 0, 0]);
    }

    // ========================================================================
    // Generic operations
    // ========================================================================

    /// Construct a value of `kind` from `args` (empty for the default value).
    pub fn construct(&self, kind: VariantType, args: &[&Variant]) -> BridgeResult<Variant> {
        let raws: Vec<RawVariant> = args.iter().map(|a| a.raw()).collect();
        let (error, result) = {
            let frame = self.resolver.frame();
            frame.arg(kind.id() as i64);
            frame.arg_list(&raws);
            frame.arg(raws.len() as i64);
            let error = frame.arg(CallError::OK);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (kind: i64, args: list, argc: i64, error: out err) -> var
            unsafe { self.resolver.call(symbols::VARIANT_CONSTRUCT, &frame) };
            (error.get(), ret.get())
        };
        if !error.is_ok() {
            return Err(BridgeError::Call(error));
        }
        Ok(self.adopt_raw(result))
    }

    /// Call `method` on `target`. Mutations of the target's payload are
    /// written back into its pointer.
    pub fn call(&self, target: &Variant, method: &str, args: &[&Variant]) -> BridgeResult<Variant> {
        let name = self.method_name(method);
        let raws: Vec<RawVariant> = args.iter().map(|a| a.raw()).collect();
        let before = target.raw();
        let (error, result, after) = {
            let frame = self.resolver.frame();
            let this = frame.arg(before);
            frame.arg(name.word());
            frame.arg_list(&raws);
            frame.arg(raws.len() as i64);
            let error = frame.arg(CallError::OK);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (self: inout var, method: sn, args: list, argc: i64, error: out err) -> var
            unsafe { self.resolver.call(symbols::VARIANT_CALL, &frame) };
            (error.get(), ret.get(), this.get())
        };
        if after.payload != before.payload {
            target.pointer().set(after.masked());
        }
        if !error.is_ok() {
            tracing::debug!(kind = %target.kind(), method, %error, "variant call failed");
            return Err(BridgeError::Call(error));
        }
        Ok(self.adopt_raw(result))
    }

    /// Call the static method `method` of `kind`.
    pub fn call_static(
        &self,
        kind: VariantType,
        method: &str,
        args: &[&Variant],
    ) -> BridgeResult<Variant> {
        let name = self.method_name(method);
        let raws: Vec<RawVariant> = args.iter().map(|a| a.raw()).collect();
        let (error, result) = {
            let frame = self.resolver.frame();
            frame.arg(kind.id() as i64);
            frame.arg(name.word());
            frame.arg_list(&raws);
            frame.arg(raws.len() as i64);
            let error = frame.arg(CallError::OK);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (kind: i64, method: sn, args: list, argc: i64, error: out err) -> var
            unsafe { self.resolver.call(symbols::VARIANT_CALL_STATIC, &frame) };
            (error.get(), ret.get())
        };
        if !error.is_ok() {
            return Err(BridgeError::Call(error));
        }
        Ok(self.adopt_raw(result))
    }

    fn builtin_method(&self, kind: VariantType, method: &str, hash: i64) -> Address {
        self.resolver
            .memoize(NativeOp::BuiltinMethod(kind, method.to_string(), hash), || {
                let name = self.method_name(method);
                let frame = self.resolver.frame();
                frame.arg(kind.id() as i64);
                frame.arg(name.word());
                frame.arg(hash);
                let ret = frame.ret::<Address>();
                // SAFETY: (kind: i64, method: sn, hash: i64) -> address
                unsafe { self.resolver.call(symbols::GET_PTR_BUILTIN_METHOD, &frame) };
                ret.get()
            })
    }

    /// Call a builtin method through its typed entry point, resolved once per
    /// (kind, name, hash). `target` is `None` for static methods; `returns`
    /// is the declared return kind.
    pub fn call_builtin(
        &self,
        kind: VariantType,
        method: &str,
        hash: i64,
        target: Option<&Variant>,
        args: &[&Variant],
        returns: VariantType,
    ) -> BridgeResult<Variant> {
        if let Some(target) = target {
            if target.kind() != kind {
                return Err(BridgeError::TypeMismatch {
                    expected: kind,
                    got: target.kind(),
                });
            }
        }
        let address = self.builtin_method(kind, method, hash);
        if address.is_null() {
            return Err(BridgeError::MethodNotFound {
                class: kind.name().to_string(),
                method: method.to_string(),
            });
        }
        let payloads: Vec<[u64; 3]> = args.iter().map(|a| a.payload()).collect();
        let before = target.map_or([0; 3], |t| t.payload());
        let (result, after) = {
            let frame = self.resolver.frame();
            let this = frame.arg(before);
            frame.arg_list(&payloads);
            frame.arg(payloads.len() as i64);
            let ret = frame.ret::<[u64; 3]>();
            // SAFETY: (self: inout payload, args: list, argc: i64) -> payload
            unsafe { self.resolver.invoke(address, &frame) };
            (ret.get(), this.get())
        };
        if let Some(target) = target {
            if after != before {
                target.pointer().set(after);
            }
        }
        Ok(self.inline(returns, result))
    }

    /// Evaluate `op` through the host's generic evaluator.
    pub fn evaluate(&self, op: Operator, left: &Variant, right: &Variant) -> BridgeResult<Variant> {
        let (valid, result) = {
            let frame = self.resolver.frame();
            frame.arg(op.id() as i64);
            frame.arg(left.raw());
            frame.arg(right.raw());
            let valid = frame.arg(0u8);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (op: i64, left: var, right: var, valid: out u8) -> var
            unsafe { self.resolver.call(symbols::VARIANT_EVALUATE, &frame) };
            (valid.get() != 0, ret.get())
        };
        if !valid {
            return Err(invalid_operator(op, left.kind(), right.kind()));
        }
        Ok(self.adopt_raw(result))
    }

    /// Evaluate `op` through the typed evaluator for this operand pair,
    /// resolved once per (op, left kind, right kind).
    pub fn evaluate_typed(
        &self,
        op: Operator,
        left: &Variant,
        right: &Variant,
        returns: VariantType,
    ) -> BridgeResult<Variant> {
        let (lk, rk) = (left.kind(), right.kind());
        let address = self.resolver.memoize(NativeOp::Evaluator(op, lk, rk), || {
            let frame = self.resolver.frame();
            frame.arg(op.id() as i64);
            frame.arg(lk.id() as i64);
            frame.arg(rk.id() as i64);
            let ret = frame.ret::<Address>();
            // SAFETY: (op: i64, left: i64, right: i64) -> address
            unsafe { self.resolver.call(symbols::GET_PTR_OPERATOR_EVALUATOR, &frame) };
            ret.get()
        });
        if address.is_null() {
            return Err(invalid_operator(op, lk, rk));
        }
        let result = {
            let frame = self.resolver.frame();
            frame.arg(left.payload());
            frame.arg(right.payload());
            let ret = frame.ret::<[u64; 3]>();
            // SAFETY: evaluator shape (left, right) -> payload
            unsafe { self.resolver.invoke(address, &frame) };
            ret.get()
        };
        Ok(self.inline(returns, result))
    }

    /// Call a global utility function, resolved once per (name, hash).
    pub fn call_utility(&self, name: &str, hash: i64, args: &[&Variant]) -> BridgeResult<Variant> {
        let address = self
            .resolver
            .memoize(NativeOp::Utility(name.to_string(), hash), || {
                let sn = self.method_name(name);
                let frame = self.resolver.frame();
                frame.arg(sn.word());
                frame.arg(hash);
                let ret = frame.ret::<Address>();
                // SAFETY: (name: sn, hash: i64) -> address
                unsafe { self.resolver.call(symbols::GET_PTR_UTILITY_FUNCTION, &frame) };
                ret.get()
            });
        if address.is_null() {
            return Err(BridgeError::MethodNotFound {
                class: "@GlobalScope".to_string(),
                method: name.to_string(),
            });
        }
        let raws: Vec<RawVariant> = args.iter().map(|a| a.raw()).collect();
        let result = {
            let frame = self.resolver.frame();
            frame.arg_list(&raws);
            frame.arg(raws.len() as i64);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: utility shape (args: list, argc: i64) -> var
            unsafe { self.resolver.invoke(address, &frame) };
            ret.get()
        };
        Ok(self.adopt_raw(result))
    }

    // ========================================================================
    // Member access
    // ========================================================================

    /// Element `index` of an indexable value.
    pub fn get_indexed(&self, target: &Variant, index: i64) -> BridgeResult<Variant> {
        let (valid, oob, result) = {
            let frame = self.resolver.frame();
            frame.arg(target.raw());
            frame.arg(index);
            let valid = frame.arg(0u8);
            let oob = frame.arg(0u8);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (self: var, index: i64, valid: out u8, oob: out u8) -> var
            unsafe { self.resolver.call(symbols::VARIANT_GET_INDEXED, &frame) };
            (valid.get() != 0, oob.get() != 0, ret.get())
        };
        indexed_result(target.kind(), index, valid, oob)?;
        Ok(self.adopt_raw(result))
    }

    /// Overwrite element `index` of an indexable value.
    pub fn set_indexed(&self, target: &Variant, index: i64, value: &Variant) -> BridgeResult<()> {
        let before = target.raw();
        let (valid, oob, after) = {
            let frame = self.resolver.frame();
            let this = frame.arg(before);
            frame.arg(index);
            frame.arg(value.raw());
            let valid = frame.arg(0u8);
            let oob = frame.arg(0u8);
            // SAFETY: (self: inout var, index: i64, value: var, valid: out u8, oob: out u8)
            unsafe { self.resolver.call(symbols::VARIANT_SET_INDEXED, &frame) };
            (valid.get() != 0, oob.get() != 0, this.get())
        };
        if after.payload != before.payload {
            target.pointer().set(after.masked());
        }
        indexed_result(target.kind(), index, valid, oob)
    }

    /// Value stored under `key`.
    pub fn get_keyed(&self, target: &Variant, key: &Variant) -> BridgeResult<Variant> {
        let (valid, result) = {
            let frame = self.resolver.frame();
            frame.arg(target.raw());
            frame.arg(key.raw());
            let valid = frame.arg(0u8);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (self: var, key: var, valid: out u8) -> var
            unsafe { self.resolver.call(symbols::VARIANT_GET_KEYED, &frame) };
            (valid.get() != 0, ret.get())
        };
        if !valid {
            return Err(BridgeError::InvalidAccess(target.kind()));
        }
        Ok(self.adopt_raw(result))
    }

    /// Store `value` under `key`.
    pub fn set_keyed(&self, target: &Variant, key: &Variant, value: &Variant) -> BridgeResult<()> {
        let before = target.raw();
        let (valid, after) = {
            let frame = self.resolver.frame();
            let this = frame.arg(before);
            frame.arg(key.raw());
            frame.arg(value.raw());
            let valid = frame.arg(0u8);
            // SAFETY: (self: inout var, key: var, value: var, valid: out u8)
            unsafe { self.resolver.call(symbols::VARIANT_SET_KEYED, &frame) };
            (valid.get() != 0, this.get())
        };
        if after.payload != before.payload {
            target.pointer().set(after.masked());
        }
        if !valid {
            return Err(BridgeError::InvalidAccess(target.kind()));
        }
        Ok(())
    }

    /// Named member of a value (e.g. `x` of a vector).
    pub fn get_named(&self, target: &Variant, name: &str) -> BridgeResult<Variant> {
        let sn = self.method_name(name);
        let (valid, result) = {
            let frame = self.resolver.frame();
            frame.arg(target.raw());
            frame.arg(sn.word());
            let valid = frame.arg(0u8);
            let ret = frame.ret::<RawVariant>();
            // SAFETY: (self: var, name: sn, valid: out u8) -> var
            unsafe { self.resolver.call(symbols::VARIANT_GET_NAMED, &frame) };
            (valid.get() != 0, ret.get())
        };
        if !valid {
            return Err(BridgeError::InvalidAccess(target.kind()));
        }
        Ok(self.adopt_raw(result))
    }

    /// Overwrite a named member.
    pub fn set_named(&self, target: &Variant, name: &str, value: &Variant) -> BridgeResult<()> {
        let sn = self.method_name(name);
        let before = target.raw();
        let (valid, after) = {
            let frame = self.resolver.frame();
            let this = frame.arg(before);
            frame.arg(sn.word());
            frame.arg(value.raw());
            let valid = frame.arg(0u8);
            // SAFETY: (self: inout var, name: sn, value: var, valid: out u8)
            unsafe { self.resolver.call(symbols::VARIANT_SET_NAMED, &frame) };
            (valid.get() != 0, this.get())
        };
        if after.payload != before.payload {
            target.pointer().set(after.masked());
        }
        if !valid {
            return Err(BridgeError::InvalidAccess(target.kind()));
        }
        Ok(())
    }

    // ========================================================================
    // Misc
    // ========================================================================

    /// Host text form of a value.
    pub fn stringify(&self, value: &Variant) -> String {
        let word = {
            let frame = self.resolver.frame();
            frame.arg(value.raw());
            let ret = frame.ret::<u64>();
            // SAFETY: (self: var) -> str
            unsafe { self.resolver.call(symbols::VARIANT_STRINGIFY, &frame) };
            ret.get()
        };
        let text = self.pointers.adopt(VariantType::String, [word, 0, 0]);
        self.read_string(text.word())
    }

    /// Host hash of a value.
    pub fn hash(&self, value: &Variant) -> i64 {
        let frame = self.resolver.frame();
        frame.arg(value.raw());
        let ret = frame.ret::<i64>();
        // SAFETY: (self: var) -> i64
        unsafe { self.resolver.call(symbols::VARIANT_HASH, &frame) };
        ret.get()
    }

    /// Host truthiness of a value.
    pub fn booleanize(&self, value: &Variant) -> bool {
        let frame = self.resolver.frame();
        frame.arg(value.raw());
        let ret = frame.ret::<u8>();
        // SAFETY: (self: var) -> u8
        unsafe { self.resolver.call(symbols::VARIANT_BOOLEANIZE, &frame) };
        ret.get() != 0
    }

    fn constructor(&self, kind: VariantType, index: u32) -> Address {
        self.resolver
            .memoize(NativeOp::Constructor(kind, index), || {
                let frame = self.resolver.frame();
                frame.arg(kind.id() as i64);
                frame.arg(index as i64);
                let ret = frame.ret::<Address>();
                // SAFETY: (kind: i64, index: i64) -> address
                unsafe { self.resolver.call(symbols::GET_PTR_CONSTRUCTOR, &frame) };
                ret.get()
            })
    }

    /// Independent copy of `value`: a new owned value, or a new reference for
    /// shared kinds.
    pub fn copy(&self, value: &Variant) -> BridgeResult<Variant> {
        let kind = value.kind();
        if kind == VariantType::Object {
            return Ok(Variant::from_pointer(
                self.pointers.borrow(kind, value.payload()),
            ));
        }
        if !kind.has_native_payload() {
            return Ok(self.inline(kind, value.payload()));
        }
        // constructor 1 is the copy constructor for every kind with a payload
        let address = self.constructor(kind, 1);
        if address.is_null() {
            return self.construct(kind, &[value]);
        }
        let payload = value.payload();
        let result = {
            let frame = self.resolver.frame();
            frame.arg_words(&payload[..kind.payload_words()]);
            let ret = frame.ret::<[u64; 3]>();
            // SAFETY: constructor shape (source payload) -> payload
            unsafe { self.resolver.invoke(address, &frame) };
            ret.get()
        };
        Ok(self.inline(kind, result))
    }
}

impl std::fmt::Debug for VariantCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantCodec")
            .field("interned", &self.names.len())
            .field("intern", &self.intern)
            .finish()
    }
}

fn invalid_operator(op: Operator, left: VariantType, right: VariantType) -> BridgeError {
    BridgeError::InvalidOperator {
        op: format!("{:?}", op),
        left,
        right,
    }
}

fn indexed_result(kind: VariantType, index: i64, valid: bool, oob: bool) -> BridgeResult<()> {
    if oob {
        Err(BridgeError::IndexOutOfBounds { kind, index })
    } else if !valid {
        Err(BridgeError::InvalidAccess(kind))
    } else {
        Ok(())
    }
}
