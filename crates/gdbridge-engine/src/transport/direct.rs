//! Direct transport: native function pointers

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::path::Path;

use super::{Address, Library, Transport, TransportError};
use crate::callframe::{Args, RetSlot};

/// Uniform native calling shape: argument slot pointers and a return address.
pub type PtrCallFn = unsafe extern "C" fn(args: *const *const c_void, ret: *mut c_void);

/// Host lookup function handed to the extension at load time.
pub type GetProcAddressFn = unsafe extern "C" fn(name: *const c_char) -> *const c_void;

enum Source {
    GetProcAddress(GetProcAddressFn),
    Library(Library),
    Table(HashMap<String, PtrCallFn>),
}

/// Resolves entry points to raw function pointers and calls them directly.
pub struct ProcTable {
    source: Source,
}

impl ProcTable {
    /// Use the host's `get_proc_address` function.
    pub fn from_get_proc_address(get_proc_address: GetProcAddressFn) -> Self {
        ProcTable {
            source: Source::GetProcAddress(get_proc_address),
        }
    }

    /// Resolve against the exports of a shared library.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        Ok(ProcTable {
            source: Source::Library(Library::open(path)?),
        })
    }

    /// Resolve against a fixed table.
    pub fn from_table<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, PtrCallFn)>,
        S: Into<String>,
    {
        ProcTable {
            source: Source::Table(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    fn not_found(name: &str) -> TransportError {
        TransportError::SymbolNotFound {
            symbol: name.to_string(),
            backend: "direct",
        }
    }
}

impl Transport for ProcTable {
    fn backend(&self) -> &'static str {
        "direct"
    }

    fn resolve(&self, name: &str) -> Result<Address, TransportError> {
        let ptr = match &self.source {
            Source::GetProcAddress(get_proc_address) => {
                let c_name =
                    CString::new(name).map_err(|_| TransportError::InvalidName(name.to_string()))?;
                // SAFETY: the host guarantees get_proc_address accepts any NUL-terminated name
                unsafe { get_proc_address(c_name.as_ptr()) }
            }
            Source::Library(library) => library.symbol(name)?,
            Source::Table(table) => table
                .get(name)
                .map_or(std::ptr::null(), |f| *f as *const c_void),
        };
        if ptr.is_null() {
            return Err(Self::not_found(name));
        }
        Ok(Address(ptr as u64))
    }

    unsafe fn invoke(&self, address: Address, args: &Args<'_>, ret: Option<RetSlot>) {
        if address.is_null() {
            panic!("invoke of a null entry point");
        }
        let f: PtrCallFn = std::mem::transmute::<usize, PtrCallFn>(address.0 as usize);
        let ret = ret.map_or(std::ptr::null_mut(), |r| r.ptr as *mut c_void);
        f(args.as_ptr(), ret)
    }
}
