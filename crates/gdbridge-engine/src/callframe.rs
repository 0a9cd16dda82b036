//! Call frames for the host calling convention
//!
//! Every native entry point is invoked with the same shape: an array of
//! pointers to argument slots and one pointer to a return slot. A [`Frame`]
//! owns the scratch memory behind both:
//!
//! - arguments are packed as whole 64-bit words, in the order they are added
//! - the return slot lives after the argument area
//! - capacity is fixed when the frame is created; overflowing it panics before
//!   any native call can observe a truncated frame
//! - buffers come from a per-thread pool and go back to it on drop, so every
//!   exit path (early return, `?`, unwinding) releases them
//!
//! [`PtrArgs`] and [`PtrRet`] are the receiving side of the same convention:
//! views over a raw argument array and return address, used by host imports
//! and by callbacks the host makes into managed code.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::NonNull;

use gdbridge_sdk::{words_for, Pod};

/// Default argument capacity of a frame.
pub const DEFAULT_MAX_ARGS: usize = 16;

/// Default word capacity of a frame's argument area.
pub const DEFAULT_MAX_WORDS: usize = 128;

/// Size of the return slot in words.
pub const RET_WORDS: usize = 16;

/// Maximum number of idle buffers kept per thread.
const POOL_LIMIT: usize = 32;

/// Word range of one argument inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First word
    pub start: usize,
    /// Number of words
    pub len: usize,
}

struct Scratch {
    words: Box<[u64]>,
    ptrs: Box<[*const c_void]>,
}

thread_local! {
    static POOL: RefCell<Vec<Scratch>> = const { RefCell::new(Vec::new()) };
}

fn take_scratch(max_args: usize, max_words: usize) -> Scratch {
    let pooled = POOL
        .try_with(|pool| {
            let mut pool = pool.borrow_mut();
            let pos = pool.iter().position(|s| {
                s.words.len() >= max_words + RET_WORDS && s.ptrs.len() >= max_args
            })?;
            Some(pool.swap_remove(pos))
        })
        .ok()
        .flatten();
    pooled.unwrap_or_else(|| Scratch {
        words: vec![0u64; max_words + RET_WORDS].into_boxed_slice(),
        ptrs: vec![std::ptr::null(); max_args.max(1)].into_boxed_slice(),
    })
}

fn give_back(scratch: Scratch) {
    let _ = POOL.try_with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOL_LIMIT {
            pool.push(scratch);
        }
    });
}

/// Scratch buffer for one native call.
///
/// Frames are per call and per thread; they are deliberately `!Send`.
pub struct Frame {
    words: NonNull<u64>,
    words_len: usize,
    ptrs: NonNull<*const c_void>,
    ptrs_len: usize,
    max_args: usize,
    max_words: usize,
    used: Cell<usize>,
    spans: RefCell<Vec<Span>>,
    ret: Cell<Option<usize>>,
    _not_send: PhantomData<*mut ()>,
}

impl Frame {
    /// Frame with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ARGS, DEFAULT_MAX_WORDS)
    }

    /// Frame that accepts at most `max_args` arguments occupying at most
    /// `max_words` words in total.
    pub fn with_capacity(max_args: usize, max_words: usize) -> Self {
        let scratch = take_scratch(max_args, max_words);
        let words_len = scratch.words.len();
        let ptrs_len = scratch.ptrs.len();
        // SAFETY: Box::into_raw never returns null; rebuilt in Drop with the same lengths.
        let words = unsafe { NonNull::new_unchecked(Box::into_raw(scratch.words) as *mut u64) };
        let ptrs = unsafe {
            NonNull::new_unchecked(Box::into_raw(scratch.ptrs) as *mut *const c_void)
        };
        Frame {
            words,
            words_len,
            ptrs,
            ptrs_len,
            max_args,
            max_words,
            used: Cell::new(0),
            spans: RefCell::new(Vec::with_capacity(max_args)),
            ret: Cell::new(None),
            _not_send: PhantomData,
        }
    }

    /// Declared argument capacity.
    pub fn capacity(&self) -> usize {
        self.max_args
    }

    /// Number of arguments added so far.
    pub fn len(&self) -> usize {
        self.spans.borrow().len()
    }

    /// True if no argument was added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn alloc(&self, n: usize) -> *mut u64 {
        let start = self.used.get();
        if start + n > self.max_words {
            panic!(
                "frame capacity exceeded: {} words requested, {} of {} in use",
                n, start, self.max_words
            );
        }
        self.used.set(start + n);
        // SAFETY: start + n <= max_words < words_len
        unsafe {
            let dst = self.words.as_ptr().add(start);
            std::ptr::write_bytes(dst, 0, n);
            dst
        }
    }

    fn push_slot(&self, dst: *mut u64, n: usize) {
        let mut spans = self.spans.borrow_mut();
        let index = spans.len();
        // SAFETY: index < max_args <= ptrs_len, checked by the callers
        unsafe { self.ptrs.as_ptr().add(index).write(dst as *const c_void) };
        let start = (dst as usize - self.words.as_ptr() as usize) / 8;
        spans.push(Span { start, len: n });
    }

    fn check_arg_capacity(&self) {
        if self.len() >= self.max_args {
            panic!(
                "frame capacity exceeded: more than {} arguments",
                self.max_args
            );
        }
    }

    /// Append one argument and return the address of its slot.
    pub fn arg<T: Pod>(&self, value: T) -> Addr<'_, T> {
        self.check_arg_capacity();
        let n = words_for::<T>().max(1);
        let dst = self.alloc(n);
        // SAFETY: dst is 8-aligned, zeroed, and spans n >= size_of::<T>() bytes
        unsafe { (dst as *mut T).write(value) };
        self.push_slot(dst, n);
        Addr::new(dst as *mut T)
    }

    /// Append one argument whose payload is `words`.
    pub fn arg_words(&self, words: &[u64]) -> Addr<'_, u64> {
        self.check_arg_capacity();
        let n = words.len().max(1);
        let dst = self.alloc(n);
        // SAFETY: dst has room for n >= words.len() words
        unsafe { std::ptr::copy_nonoverlapping(words.as_ptr(), dst, words.len()) };
        self.push_slot(dst, n);
        Addr::new(dst)
    }

    /// Copy `items` into the frame and append one argument holding the address
    /// of an array of pointers to those copies (null when `items` is empty).
    pub fn arg_list<T: Pod>(&self, items: &[T]) -> Addr<'_, u64> {
        self.check_arg_capacity();
        if items.is_empty() {
            return self.arg(0u64);
        }
        let per_item = words_for::<T>().max(1);
        let storage = self.alloc(per_item * items.len());
        let table = self.alloc(items.len());
        for (i, item) in items.iter().enumerate() {
            // SAFETY: both regions were sized for items.len() entries above
            unsafe {
                let at = storage.add(i * per_item);
                (at as *mut T).write(*item);
                table.add(i).write(at as u64);
            }
        }
        self.arg(table as u64)
    }

    /// Reserve the single return slot, zeroed, typed as `T`.
    pub fn ret<T: Pod>(&self) -> Addr<'_, T> {
        let n = words_for::<T>().max(1);
        if n > RET_WORDS {
            panic!("return slot too small: {} words requested, {} available", n, RET_WORDS);
        }
        if self.ret.get().is_some() {
            panic!("frame return slot already reserved");
        }
        // SAFETY: the return area starts after max_words and has RET_WORDS words
        let dst = unsafe {
            let dst = self.words.as_ptr().add(self.max_words);
            std::ptr::write_bytes(dst, 0, RET_WORDS);
            dst
        };
        self.ret.set(Some(n));
        Addr::new(dst as *mut T)
    }

    /// Argument view handed to a transport.
    pub fn args(&self) -> Args<'_> {
        Args { frame: self }
    }

    /// Return slot handed to a transport, if one was reserved.
    pub fn ret_slot(&self) -> Option<RetSlot> {
        self.ret.get().map(|words| RetSlot {
            // SAFETY: same address as in `ret`
            ptr: unsafe { self.words.as_ptr().add(self.max_words) },
            words,
        })
    }

    /// Release the frame's buffers. Equivalent to dropping it.
    pub fn free(self) {}
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // SAFETY: rebuilt from the exact pointers and lengths produced in with_capacity
        let scratch = unsafe {
            Scratch {
                words: Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    self.words.as_ptr(),
                    self.words_len,
                )),
                ptrs: Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    self.ptrs.as_ptr(),
                    self.ptrs_len,
                )),
            }
        };
        give_back(scratch);
    }
}

/// Typed address of a slot inside a live [`Frame`].
pub struct Addr<'f, T> {
    ptr: NonNull<T>,
    _frame: PhantomData<&'f Frame>,
}

impl<'f, T: Pod> Addr<'f, T> {
    fn new(ptr: *mut T) -> Self {
        Addr {
            // SAFETY: frame slots are never null
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            _frame: PhantomData,
        }
    }

    /// Current slot contents.
    pub fn get(&self) -> T {
        // SAFETY: the frame outlives 'f and the slot holds a valid T
        unsafe { self.ptr.as_ptr().read() }
    }

    /// Overwrite the slot.
    pub fn set(&self, value: T) {
        // SAFETY: as in get
        unsafe { self.ptr.as_ptr().write(value) }
    }

    /// Raw pointer to the slot.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Slot address as a word, for passing by value to the host.
    pub fn addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }
}

/// Read-only view of a frame's arguments, as seen by a transport.
pub struct Args<'f> {
    frame: &'f Frame,
}

impl<'f> Args<'f> {
    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    /// True if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pointer array passed to native code.
    pub fn as_ptr(&self) -> *const *const c_void {
        self.frame.ptrs.as_ptr()
    }

    /// Word ranges of every argument.
    pub fn spans(&self) -> Vec<Span> {
        self.frame.spans.borrow().clone()
    }

    /// Words of argument `index`.
    pub fn slot(&self, index: usize) -> &'f [u64] {
        let span = self.frame.spans.borrow()[index];
        // SAFETY: span lies inside the argument area
        unsafe {
            std::slice::from_raw_parts(self.frame.words.as_ptr().add(span.start), span.len)
        }
    }

    /// Overwrite argument `index` with `words` (write-back of in/out slots).
    ///
    /// Extra words are ignored; missing words leave the slot tail untouched.
    pub fn write_back(&self, index: usize, words: &[u64]) {
        let span = self.frame.spans.borrow()[index];
        let n = span.len.min(words.len());
        // SAFETY: span lies inside the argument area
        unsafe {
            std::ptr::copy_nonoverlapping(
                words.as_ptr(),
                self.frame.words.as_ptr().add(span.start),
                n,
            )
        }
    }
}

/// Return slot of a frame.
#[derive(Debug, Clone, Copy)]
pub struct RetSlot {
    /// Slot address
    pub ptr: *mut u64,
    /// Words reserved for the declared return type
    pub words: usize,
}

impl RetSlot {
    /// Copy `words` into the slot, truncated to the reserved size.
    pub fn write(&self, words: &[u64]) {
        let n = self.words.min(words.len());
        // SAFETY: ptr has room for RET_WORDS >= self.words words
        unsafe { std::ptr::copy_nonoverlapping(words.as_ptr(), self.ptr, n) }
    }
}

/// Receiving-side view of a raw argument pointer array.
#[derive(Debug, Clone, Copy)]
pub struct PtrArgs {
    ptr: *const *const c_void,
    len: usize,
}

impl PtrArgs {
    /// Wrap a host-supplied argument array of `len` entries.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` valid slot pointers for as long as the view
    /// is used (it may be null when `len` is 0).
    pub unsafe fn from_raw(ptr: *const *const c_void, len: usize) -> Self {
        PtrArgs { ptr, len }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The underlying pointer array.
    pub fn as_ptr(&self) -> *const *const c_void {
        self.ptr
    }

    fn slot(&self, index: usize) -> *const c_void {
        if index >= self.len {
            panic!("argument {} out of range ({} passed)", index, self.len);
        }
        // SAFETY: index < len, guaranteed by from_raw's contract
        unsafe { *self.ptr.add(index) }
    }

    /// Read argument `index` as `T`.
    ///
    /// # Safety
    ///
    /// The slot must hold a valid `T`.
    pub unsafe fn get<T: Pod>(&self, index: usize) -> T {
        (self.slot(index) as *const T).read_unaligned()
    }

    /// Read a one-byte host flag at `index`. Any nonzero byte is true.
    ///
    /// # Safety
    ///
    /// The slot must hold at least one initialized byte.
    pub unsafe fn get_flag(&self, index: usize) -> bool {
        self.get::<u8>(index) != 0
    }

    /// Address of argument `index`, for in/out slots.
    ///
    /// # Safety
    ///
    /// The slot must hold a valid `T` that the caller allows to be written.
    pub unsafe fn ptr<T>(&self, index: usize) -> *mut T {
        self.slot(index) as *mut T
    }

    /// Overwrite argument `index`.
    ///
    /// # Safety
    ///
    /// As for [`PtrArgs::ptr`].
    pub unsafe fn set<T: Pod>(&self, index: usize, value: T) {
        self.ptr::<T>(index).write_unaligned(value)
    }
}

/// Receiving-side view of a raw return address.
#[derive(Debug, Clone, Copy)]
pub struct PtrRet {
    ptr: *mut c_void,
}

impl PtrRet {
    /// Wrap a host-supplied return address (may be null for void calls).
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be valid for writes of whatever type the callee
    /// writes.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Self {
        PtrRet { ptr }
    }

    /// True for void calls.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// The raw return address.
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    /// Write the return value. Writing to a void return panics.
    ///
    /// # Safety
    ///
    /// The return slot must have room for a `T`.
    pub unsafe fn write<T: Pod>(&self, value: T) {
        if self.ptr.is_null() {
            panic!("write to the return slot of a void call");
        }
        (self.ptr as *mut T).write_unaligned(value)
    }
}
