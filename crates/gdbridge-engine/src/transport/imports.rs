//! Host-import table backend
//!
//! Entry points are Rust closures registered by name. Used when the bridge
//! runs inside a virtual machine that exposes the host as a set of imports,
//! and as the host side of [`super::ChannelHost`].

use std::ffi::c_void;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{Address, Transport, TransportError};
use crate::callframe::{Args, PtrArgs, PtrRet, RetSlot};

/// Host import implementation.
pub type HostFn = Arc<dyn Fn(PtrArgs, PtrRet) + Send + Sync>;

/// Named table of host imports. Addresses are 1-based table indices.
#[derive(Default)]
pub struct ImportTable {
    entries: RwLock<Vec<(String, HostFn)>>,
    index: DashMap<String, usize>,
}

impl ImportTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) the import `name`.
    pub fn define<F>(&self, name: &str, f: F) -> Address
    where
        F: Fn(PtrArgs, PtrRet) + Send + Sync + 'static,
    {
        let mut entries = self.entries.write();
        let f: HostFn = Arc::new(f);
        let slot = match self.index.get(name).map(|i| *i) {
            Some(slot) => {
                entries[slot].1 = f;
                slot
            }
            None => {
                entries.push((name.to_string(), f));
                let slot = entries.len() - 1;
                self.index.insert(name.to_string(), slot);
                slot
            }
        };
        Address(slot as u64 + 1)
    }

    /// Number of imports.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is defined.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Implementation behind `address`.
    pub fn get(&self, address: Address) -> Option<HostFn> {
        let slot = usize::try_from(address.0.checked_sub(1)?).ok()?;
        self.entries.read().get(slot).map(|(_, f)| f.clone())
    }

    /// Name behind `address`.
    pub fn name(&self, address: Address) -> Option<String> {
        let slot = usize::try_from(address.0.checked_sub(1)?).ok()?;
        self.entries.read().get(slot).map(|(name, _)| name.clone())
    }

    /// Call the import at `address` with a raw argument array.
    ///
    /// # Safety
    ///
    /// `args` must hold `len` valid slot pointers and `ret` must be null or
    /// valid for what the import writes.
    pub unsafe fn call_raw(
        &self,
        address: Address,
        args: *const *const c_void,
        len: usize,
        ret: *mut c_void,
    ) {
        let f = match self.get(address) {
            Some(f) => f,
            None => panic!("unknown import address {}", address.0),
        };
        f(PtrArgs::from_raw(args, len), PtrRet::from_raw(ret))
    }
}

impl Transport for ImportTable {
    fn backend(&self) -> &'static str {
        "imports"
    }

    fn resolve(&self, name: &str) -> Result<Address, TransportError> {
        self.index
            .get(name)
            .map(|slot| Address(*slot as u64 + 1))
            .ok_or_else(|| TransportError::SymbolNotFound {
                symbol: name.to_string(),
                backend: "imports",
            })
    }

    unsafe fn invoke(&self, address: Address, args: &Args<'_>, ret: Option<RetSlot>) {
        let ret = ret.map_or(std::ptr::null_mut(), |r| r.ptr as *mut c_void);
        self.call_raw(address, args.as_ptr(), args.len(), ret)
    }
}
