//! Bridge context and initialization protocol
//!
//! A [`BridgeContext`] owns every piece of bridge state for one extension:
//! the resolver, the pointer registry, the variant codec, the handle table,
//! the dispatcher, the class registry and the callable bridge. Nothing in
//! the engine is global; the FFI crate keeps the single process-wide
//! context.
//!
//! The host drives the context through initialization levels:
//!
//! ```text
//! initialize:   Core -> Servers -> Scene -> Editor
//! deinitialize: Editor -> Scene -> Servers -> Core
//! ```
//!
//! Leaving the main level (Scene by default) tears the bridge down: user
//! cleanups, class unregistration, interned-name release, unpinning, then
//! the shutdown sweeps.

use std::fmt;
use std::sync::Arc;

use gdbridge_sdk::{BridgeError, BridgeResult, InitializationLevel};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::abi::CallbackTable;
use crate::callable::CallableBridge;
use crate::callframe::Frame;
use crate::classdb::ClassDB;
use crate::config::BridgeOptions;
use crate::dispatch::Dispatcher;
use crate::handles::HandleTable;
use crate::object::{MethodBind, Object};
use crate::pointers::{PointerRegistry, ShutdownReport};
use crate::symbols;
use crate::transport::{Resolver, Transport};
use crate::variant::VariantCodec;

/// Opaque token the host gave the extension; passed back on every
/// registration call.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExtensionToken(pub u64);

type LevelFn = Box<dyn FnOnce(&BridgeContext) + Send>;
type CleanupFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Lifecycle {
    on_initialize: Vec<(InitializationLevel, LevelFn)>,
    on_deinitialize: Vec<(InitializationLevel, LevelFn)>,
    cleanups: Vec<CleanupFn>,
    initialized: [bool; 4],
    shut_down: bool,
}

impl Lifecycle {
    fn take(
        list: &mut Vec<(InitializationLevel, LevelFn)>,
        level: InitializationLevel,
    ) -> Vec<LevelFn> {
        let (matching, rest): (Vec<_>, Vec<_>) = list.drain(..).partition(|(l, _)| *l == level);
        *list = rest;
        matching.into_iter().map(|(_, f)| f).collect()
    }
}

/// All bridge state for one extension.
pub struct BridgeContext {
    token: ExtensionToken,
    options: BridgeOptions,
    resolver: Arc<Resolver>,
    pointers: Arc<PointerRegistry>,
    codec: Arc<VariantCodec>,
    handles: Arc<HandleTable>,
    dispatcher: Arc<Dispatcher>,
    classdb: ClassDB,
    callables: CallableBridge,
    lifecycle: Mutex<Lifecycle>,
    library_path: OnceCell<String>,
}

impl BridgeContext {
    /// Context reaching the host through `transport`. `callbacks` are the
    /// addresses written into registration records.
    pub fn new(
        transport: Arc<dyn Transport>,
        token: ExtensionToken,
        options: BridgeOptions,
        callbacks: CallbackTable,
    ) -> Arc<Self> {
        let resolver = Arc::new(Resolver::with_frame_options(transport, options.frame));
        let pointers = PointerRegistry::new(resolver.clone());
        let codec = Arc::new(VariantCodec::new(
            resolver.clone(),
            pointers.clone(),
            options.intern_method_names,
        ));
        let handles = Arc::new(HandleTable::new());
        let dispatcher = Arc::new(Dispatcher::new(codec.clone(), handles.clone()));
        let classdb = ClassDB::new(
            codec.clone(),
            handles.clone(),
            dispatcher.clone(),
            token,
            callbacks,
        );
        let callables =
            CallableBridge::new(codec.clone(), handles.clone(), token, callbacks.callable);
        tracing::debug!(backend = resolver.backend(), token = token.0, "created bridge context");
        Arc::new(BridgeContext {
            token,
            options,
            resolver,
            pointers,
            codec,
            handles,
            dispatcher,
            classdb,
            callables,
            lifecycle: Mutex::new(Lifecycle::default()),
            library_path: OnceCell::new(),
        })
    }

    /// Extension token.
    pub fn token(&self) -> ExtensionToken {
        self.token
    }

    /// Options the context was created with.
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Resolver over the host transport.
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Pointer lifetime registry.
    pub fn pointers(&self) -> &Arc<PointerRegistry> {
        &self.pointers
    }

    /// Variant codec.
    pub fn codec(&self) -> &Arc<VariantCodec> {
        &self.codec
    }

    /// Handle table shared by every callback path.
    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    /// Instance callback dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Class registry.
    pub fn classdb(&self) -> &ClassDB {
        &self.classdb
    }

    /// Custom callable bridge.
    pub fn callables(&self) -> &CallableBridge {
        &self.callables
    }

    // ========================================================================
    // Initialization protocol
    // ========================================================================

    /// Run `f` when `level` is initialized.
    pub fn on_initialize<F>(&self, level: InitializationLevel, f: F)
    where
        F: FnOnce(&BridgeContext) + Send + 'static,
    {
        self.lifecycle.lock().on_initialize.push((level, Box::new(f)));
    }

    /// Run `f` when `level` is deinitialized. Callbacks of one level run in
    /// reverse registration order.
    pub fn on_deinitialize<F>(&self, level: InitializationLevel, f: F)
    where
        F: FnOnce(&BridgeContext) + Send + 'static,
    {
        self.lifecycle.lock().on_deinitialize.push((level, Box::new(f)));
    }

    /// Run `f` at shutdown, before any class is unregistered.
    pub fn on_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lifecycle.lock().cleanups.push(Box::new(f));
    }

    /// True while `level` is initialized.
    pub fn is_initialized(&self, level: InitializationLevel) -> bool {
        self.lifecycle.lock().initialized[level.id() as usize]
    }

    /// The host reached `level`. Runs that level's startup callbacks once,
    /// in registration order. Levels below the configured minimum are
    /// ignored.
    pub fn initialize(&self, level: InitializationLevel) {
        if level < self.options.minimum_level {
            tracing::trace!(?level, "below minimum initialization level");
            return;
        }
        let callbacks = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.shut_down || lifecycle.initialized[level.id() as usize] {
                return;
            }
            lifecycle.initialized[level.id() as usize] = true;
            Lifecycle::take(&mut lifecycle.on_initialize, level)
        };
        tracing::debug!(?level, callbacks = callbacks.len(), "initializing level");
        for f in callbacks {
            f(self);
        }
    }

    /// The host is leaving `level`. Runs that level's deinit callbacks in
    /// reverse order; leaving the main level also shuts the bridge down and
    /// returns the sweep report.
    pub fn deinitialize(&self, level: InitializationLevel) -> Option<ShutdownReport> {
        let callbacks = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.initialized[level.id() as usize] {
                return None;
            }
            lifecycle.initialized[level.id() as usize] = false;
            Lifecycle::take(&mut lifecycle.on_deinitialize, level)
        };
        tracing::debug!(?level, callbacks = callbacks.len(), "deinitializing level");
        for f in callbacks.into_iter().rev() {
            f(self);
        }
        if level == self.options.main_level {
            return Some(self.shutdown());
        }
        None
    }

    fn shutdown(&self) -> ShutdownReport {
        let cleanups = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.shut_down = true;
            std::mem::take(&mut lifecycle.cleanups)
        };
        for f in cleanups {
            f();
        }
        let classes = self.classdb.unregister_all();
        let names = self.codec.release_names();
        let pinned = self.pointers.unpin_all();
        let report = self.pointers.shutdown(self.options.shutdown_sweeps);
        tracing::info!(
            classes,
            names,
            pinned,
            destroyed = report.destroyed,
            leftover = report.leftover,
            "bridge shut down"
        );
        report
    }

    /// Run one reclamation sweep.
    pub fn cycle(&self) -> usize {
        self.pointers.cycle()
    }

    // ========================================================================
    // Host services
    // ========================================================================

    /// Path of the loaded extension library, as the host reports it.
    pub fn library_path(&self) -> BridgeResult<String> {
        self.library_path
            .get_or_try_init(|| -> BridgeResult<String> {
                let address = self.resolver.lookup(symbols::GET_LIBRARY_PATH)?;
                let frame = self.resolver.frame();
                frame.arg(self.token.0);
                let ret = frame.ret::<u64>();
                // SAFETY: (token) -> str
                unsafe { self.resolver.invoke(address, &frame) };
                let path = self
                    .pointers
                    .adopt(gdbridge_sdk::VariantType::String, [ret.get(), 0, 0]);
                Ok(self.codec.read_string(path.word()))
            })
            .cloned()
    }

    /// Construct a host object of class `class`, owned by the bridge.
    pub fn instantiate(&self, class: &str) -> BridgeResult<Object> {
        let class_name = self.codec.intern(class);
        let object = {
            let frame = self.resolver.frame();
            frame.arg(class_name);
            let ret = frame.ret::<u64>();
            // SAFETY: (class: sn) -> object
            unsafe { self.resolver.call(symbols::CLASSDB_CONSTRUCT_OBJECT, &frame) };
            ret.get()
        };
        if object == 0 {
            return Err(BridgeError::ClassNotFound(class.to_string()));
        }
        let instance_id = {
            let frame = self.resolver.frame();
            frame.arg(object);
            let ret = frame.ret::<u64>();
            // SAFETY: (object) -> id
            unsafe { self.resolver.call(symbols::OBJECT_GET_INSTANCE_ID, &frame) };
            ret.get()
        };
        Ok(Object::owned(&self.pointers, object, instance_id))
    }

    /// Method bind for `class.method` with API hash `hash`.
    pub fn method_bind(&self, class: &str, method: &str, hash: i64) -> BridgeResult<MethodBind> {
        MethodBind::resolve(&self.codec, class, method, hash).ok_or_else(|| {
            BridgeError::MethodNotFound {
                class: class.to_string(),
                method: method.to_string(),
            }
        })
    }

    /// Call `bind` on `object` with the slots of `args`.
    ///
    /// # Safety
    ///
    /// As for [`MethodBind::ptrcall`].
    pub unsafe fn ptrcall(&self, bind: MethodBind, object: &Object, args: &Frame) {
        bind.ptrcall(&self.codec, object, args)
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("token", &self.token)
            .field("backend", &self.resolver.backend())
            .field("classdb", &self.classdb)
            .field("pointers", &self.pointers.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ImportTable;

    fn context(options: BridgeOptions) -> Arc<BridgeContext> {
        BridgeContext::new(
            Arc::new(ImportTable::new()),
            ExtensionToken(1),
            options,
            CallbackTable::default(),
        )
    }

    #[test]
    fn test_initialize_runs_callbacks_once_in_order() {
        let ctx = context(BridgeOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let log = log.clone();
            ctx.on_initialize(InitializationLevel::Scene, move |_| log.lock().push(name));
        }
        let core = log.clone();
        ctx.on_initialize(InitializationLevel::Core, move |_| core.lock().push("core"));

        ctx.initialize(InitializationLevel::Core);
        ctx.initialize(InitializationLevel::Scene);
        ctx.initialize(InitializationLevel::Scene);
        assert_eq!(*log.lock(), vec!["core", "a", "b"]);
        assert!(ctx.is_initialized(InitializationLevel::Scene));
    }

    #[test]
    fn test_deinitialize_reverse_order_and_shutdown() {
        let ctx = context(BridgeOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let log = log.clone();
            ctx.on_deinitialize(InitializationLevel::Scene, move |_| log.lock().push(name));
        }
        let cleanup = log.clone();
        ctx.on_cleanup(move || cleanup.lock().push("cleanup"));

        ctx.initialize(InitializationLevel::Scene);
        let report = ctx.deinitialize(InitializationLevel::Scene);
        assert_eq!(*log.lock(), vec!["second", "first", "cleanup"]);
        assert_eq!(report, Some(ShutdownReport::default()));
        assert_eq!(ctx.pointers().stats().sweeps, 2);
    }

    #[test]
    fn test_deinitialize_other_level_does_not_shut_down() {
        let ctx = context(BridgeOptions::default());
        ctx.initialize(InitializationLevel::Servers);
        assert_eq!(ctx.deinitialize(InitializationLevel::Servers), None);
        assert_eq!(ctx.deinitialize(InitializationLevel::Scene), None);
        assert_eq!(ctx.pointers().stats().sweeps, 0);
    }

    #[test]
    fn test_below_minimum_level_is_ignored() {
        let options = BridgeOptions {
            minimum_level: InitializationLevel::Servers,
            ..BridgeOptions::default()
        };
        let ctx = context(options);
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        ctx.on_initialize(InitializationLevel::Core, move |_| *flag.lock() = true);
        ctx.initialize(InitializationLevel::Core);
        assert!(!*ran.lock());
        assert!(!ctx.is_initialized(InitializationLevel::Core));
    }

    #[test]
    fn test_missing_library_path_is_an_error() {
        let ctx = context(BridgeOptions::default());
        assert!(matches!(ctx.library_path(), Err(BridgeError::Transport(_))));
    }
}
