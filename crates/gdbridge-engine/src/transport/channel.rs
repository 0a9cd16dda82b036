//! Byte-channel transport for sandboxed module runtimes
//!
//! Requests and responses are little-endian byte messages:
//!
//! ```text
//! request  := 0x01 name:str                          resolve
//!           | 0x02 address:u64 argc:u32 slot* ret:u32 invoke
//! slot     := n:u32 word:u64{n}
//! response := 0x00 address:u64                       resolved
//!           | 0x00 argc:u32 slot* n:u32 word:u64{n}  returned (args written back)
//!           | 0x01 name:str                          not found
//!           | 0x02 message:str                       failed
//! str      := len:u32 utf8{len}
//! ```
//!
//! Argument slots travel by value and come back after the call, so in/out
//! slots behave exactly as with the direct backend. Words that are addresses
//! refer to memory both sides can read (the sandbox's linear memory).

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Address, ImportTable, Transport, TransportError};
use crate::callframe::{Args, RetSlot, RET_WORDS};

const OP_RESOLVE: u8 = 0x01;
const OP_INVOKE: u8 = 0x02;

const STATUS_OK: u8 = 0x00;
const STATUS_NOT_FOUND: u8 = 0x01;
const STATUS_FAILED: u8 = 0x02;

/// A request/response byte pipe to the host.
pub trait ByteChannel: Send + Sync {
    /// Send one request and wait for its response.
    fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

// ============================================================================
// Wire encoding
// ============================================================================

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn words(&mut self, words: &[u64]) {
        self.u32(words.len() as u32);
        for w in words {
            self.u64(*w);
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let end = end.ok_or_else(|| {
            TransportError::Protocol(format!("truncated message at byte {}", self.pos))
        })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, TransportError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64, TransportError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn str(&mut self) -> Result<String, TransportError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TransportError::Protocol(format!("invalid utf-8: {}", e)))
    }

    fn words(&mut self) -> Result<Vec<u64>, TransportError> {
        let n = self.u32()? as usize;
        (0..n).map(|_| self.u64()).collect()
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Transport that forwards every resolve and invoke over a [`ByteChannel`].
pub struct ChannelTransport<C> {
    channel: C,
}

impl<C: ByteChannel> ChannelTransport<C> {
    /// Wrap a channel.
    pub fn new(channel: C) -> Self {
        ChannelTransport { channel }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C: ByteChannel> Transport for ChannelTransport<C> {
    fn backend(&self) -> &'static str {
        "channel"
    }

    fn resolve(&self, name: &str) -> Result<Address, TransportError> {
        let mut w = Writer::default();
        w.u8(OP_RESOLVE);
        w.str(name);
        let response = self.channel.exchange(&w.buf)?;
        let mut r = Reader::new(&response);
        match r.u8()? {
            STATUS_OK => Ok(Address(r.u64()?)),
            STATUS_NOT_FOUND => Err(TransportError::SymbolNotFound {
                symbol: r.str()?,
                backend: "channel",
            }),
            STATUS_FAILED => Err(TransportError::Channel(r.str()?)),
            other => Err(TransportError::Protocol(format!("unknown status {}", other))),
        }
    }

    unsafe fn invoke(&self, address: Address, args: &Args<'_>, ret: Option<RetSlot>) {
        let mut w = Writer::default();
        w.u8(OP_INVOKE);
        w.u64(address.0);
        w.u32(args.len() as u32);
        for i in 0..args.len() {
            w.words(args.slot(i));
        }
        w.u32(ret.map_or(0, |r| r.words as u32));

        let outcome = self.channel.exchange(&w.buf).and_then(|response| {
            let mut r = Reader::new(&response);
            match r.u8()? {
                STATUS_OK => {
                    let argc = r.u32()? as usize;
                    if argc != args.len() {
                        return Err(TransportError::Protocol(format!(
                            "{} argument slots returned for {} sent",
                            argc,
                            args.len()
                        )));
                    }
                    for i in 0..argc {
                        args.write_back(i, &r.words()?);
                    }
                    let words = r.words()?;
                    if let Some(ret) = ret {
                        ret.write(&words);
                    }
                    Ok(())
                }
                STATUS_FAILED => Err(TransportError::Channel(r.str()?)),
                other => Err(TransportError::Protocol(format!("unknown status {}", other))),
            }
        });
        if let Err(err) = outcome {
            tracing::error!(address = address.0, %err, "channel invoke failed");
            panic!("channel transport failed to invoke {}: {}", address.0, err);
        }
    }
}

// ============================================================================
// Host side
// ============================================================================

/// Serves channel requests from an [`ImportTable`].
pub struct ChannelHost {
    imports: Arc<ImportTable>,
}

impl ChannelHost {
    /// Serve `imports`.
    pub fn new(imports: Arc<ImportTable>) -> Self {
        ChannelHost { imports }
    }

    /// Handle one request and produce its response.
    pub fn serve(&self, request: &[u8]) -> Vec<u8> {
        let mut w = Writer::default();
        if let Err(err) = self.handle(request, &mut w) {
            w = Writer::default();
            w.u8(STATUS_FAILED);
            w.str(&err.to_string());
        }
        w.buf
    }

    fn handle(&self, request: &[u8], w: &mut Writer) -> Result<(), TransportError> {
        let mut r = Reader::new(request);
        match r.u8()? {
            OP_RESOLVE => {
                let name = r.str()?;
                match self.imports.resolve(&name) {
                    Ok(address) => {
                        w.u8(STATUS_OK);
                        w.u64(address.0);
                    }
                    Err(_) => {
                        w.u8(STATUS_NOT_FOUND);
                        w.str(&name);
                    }
                }
                Ok(())
            }
            OP_INVOKE => {
                let address = Address(r.u64()?);
                let argc = r.u32()? as usize;
                let mut slots = Vec::with_capacity(argc);
                for _ in 0..argc {
                    slots.push(r.words()?);
                }
                let ret_words = (r.u32()? as usize).min(RET_WORDS);
                if self.imports.get(address).is_none() {
                    return Err(TransportError::Protocol(format!(
                        "unknown address {}",
                        address.0
                    )));
                }

                let ptrs: Vec<*const c_void> = slots
                    .iter_mut()
                    .map(|s| {
                        if s.is_empty() {
                            s.push(0);
                        }
                        s.as_mut_ptr() as *const c_void
                    })
                    .collect();
                let mut ret = [0u64; RET_WORDS];
                let ret_ptr = if ret_words == 0 {
                    std::ptr::null_mut()
                } else {
                    ret.as_mut_ptr() as *mut c_void
                };
                // SAFETY: every slot pointer refers to a live Vec in `slots`
                unsafe {
                    self.imports
                        .call_raw(address, ptrs.as_ptr(), ptrs.len(), ret_ptr)
                };

                w.u8(STATUS_OK);
                w.u32(slots.len() as u32);
                for slot in &slots {
                    w.words(slot);
                }
                w.words(&ret[..ret_words]);
                Ok(())
            }
            other => Err(TransportError::Protocol(format!("unknown opcode {}", other))),
        }
    }
}

/// In-process channel connected straight to a [`ChannelHost`].
pub struct LoopbackChannel {
    host: ChannelHost,
    exchanges: AtomicU64,
}

impl LoopbackChannel {
    /// Channel served by `imports`.
    pub fn new(imports: Arc<ImportTable>) -> Self {
        LoopbackChannel {
            host: ChannelHost::new(imports),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Number of request/response round trips so far.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }
}

impl ByteChannel for LoopbackChannel {
    fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        Ok(self.host.serve(request))
    }
}
