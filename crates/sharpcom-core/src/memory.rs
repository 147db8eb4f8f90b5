//! Unmanaged memory for marshalling.
//!
//! Native parameter blocks point into memory that must stay put for the
//! duration of a call and be released deterministically afterwards. This
//! module provides the three shapes that show up in the bindings:
//!
//! - [`NativeBuffer`]: one owned, aligned array freed on drop
//! - [`ScratchArena`]: every buffer staged for a single native call, freed
//!   together when the arena drops (success and error paths alike)
//! - task memory ([`alloc_task_memory`] / [`free_task_memory`]): blocks
//!   allocated by one side of the ABI and freed by the other, as with
//!   `CoTaskMemAlloc`
//!
//! # Zero-length arrays
//!
//! An empty array is always represented by a null pointer and a count of
//! zero. No allocation is made and none is freed.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::result::HResult;

/// Alignment used for every unmanaged allocation unless a larger one is requested.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Two `usize` values (total size, alignment) live just before the returned pointer.
const HEADER_SIZE: usize = 2 * std::mem::size_of::<usize>();

// =========================================================================
// Raw aligned allocation
// =========================================================================

/// Allocate `size` zeroed bytes aligned to at least `align`.
///
/// The alignment is raised to [`DEFAULT_ALIGNMENT`] when smaller. Returns null
/// when `size` is zero, the alignment is not a power of two, or allocation
/// fails. Free with [`free_aligned`].
pub fn alloc_aligned(size: usize, align: usize) -> *mut u8 {
    let align = align.max(DEFAULT_ALIGNMENT);
    if size == 0 || !align.is_power_of_two() {
        return ptr::null_mut();
    }
    let Some(total) = size.checked_add(align) else {
        return ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, align) else {
        return ptr::null_mut();
    };

    // SAFETY: layout has a non-zero size.
    let base = unsafe { alloc_zeroed(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }

    // SAFETY: align >= HEADER_SIZE, so the header fits between base and user,
    // and user stays within the allocation. The header is usize-aligned
    // because user is aligned to at least 16.
    unsafe {
        let user = base.add(align);
        let header = user.cast::<usize>().sub(2);
        header.write(total);
        header.add(1).write(align);
        user
    }
}

/// Free memory returned by [`alloc_aligned`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by [`alloc_aligned`] that has not
/// been freed yet.
pub unsafe fn free_aligned(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: the caller guarantees ptr came from alloc_aligned, which wrote
    // the header immediately before it.
    unsafe {
        let header = ptr.cast::<usize>().sub(2);
        let total = header.read();
        let align = header.add(1).read();
        dealloc(ptr.sub(align), Layout::from_size_align_unchecked(total, align));
    }
}

const _: () = assert!(DEFAULT_ALIGNMENT >= HEADER_SIZE);

// =========================================================================
// Task memory
// =========================================================================

/// Allocate a block that the other side of the ABI frees.
///
/// Used for callee-allocated out parameters (`XAPO_REGISTRATION_PROPERTIES**`,
/// `WAVEFORMATEX**`). On Windows this is `CoTaskMemAlloc`; elsewhere a zeroed
/// block from [`alloc_aligned`]. Returns null on failure or for `size == 0`.
pub fn alloc_task_memory(size: usize) -> *mut c_void {
    if size == 0 {
        return ptr::null_mut();
    }
    #[cfg(target_os = "windows")]
    {
        // SAFETY: plain allocation call; the result is checked by callers.
        let block = unsafe { windows::Win32::System::Com::CoTaskMemAlloc(size) };
        if !block.is_null() {
            // SAFETY: block points to at least `size` writable bytes.
            unsafe { ptr::write_bytes(block.cast::<u8>(), 0, size) };
        }
        block
    }
    #[cfg(not(target_os = "windows"))]
    {
        alloc_aligned(size, DEFAULT_ALIGNMENT).cast()
    }
}

/// Free a block from [`alloc_task_memory`]. Null is ignored.
///
/// # Safety
///
/// `block` must be null or a live block returned by [`alloc_task_memory`].
pub unsafe fn free_task_memory(block: *mut c_void) {
    if block.is_null() {
        return;
    }
    #[cfg(target_os = "windows")]
    {
        // SAFETY: block came from CoTaskMemAlloc per the caller's contract.
        unsafe { windows::Win32::System::Com::CoTaskMemFree(Some(block.cast_const())) };
    }
    #[cfg(not(target_os = "windows"))]
    {
        // SAFETY: block came from alloc_aligned per the caller's contract.
        unsafe { free_aligned(block.cast()) };
    }
}

// =========================================================================
// MemoryStats
// =========================================================================

/// Allocation counters shared between arenas, for verifying that every
/// staged buffer is released.
#[derive(Debug, Default)]
pub struct MemoryStats {
    allocations: AtomicUsize,
    frees: AtomicUsize,
    bytes: AtomicUsize,
}

impl MemoryStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of buffers allocated.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    /// Number of buffers freed.
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Acquire)
    }

    /// Total bytes requested across all allocations.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Buffers allocated but not yet freed.
    pub fn outstanding(&self) -> usize {
        self.allocations().saturating_sub(self.frees())
    }

    /// True when every allocation has been freed.
    pub fn is_balanced(&self) -> bool {
        self.allocations() == self.frees()
    }

    fn record_alloc(&self, size: usize) {
        self.allocations.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(size, Ordering::AcqRel);
    }

    fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::AcqRel);
    }
}

// =========================================================================
// NativeBuffer
// =========================================================================

/// An owned, aligned, fixed-length native array.
///
/// Empty buffers hold a null pointer. The memory is freed on drop.
pub struct NativeBuffer<T: Copy> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: NativeBuffer owns its allocation exclusively, like a Vec<T>.
unsafe impl<T: Copy + Send> Send for NativeBuffer<T> {}
// SAFETY: shared access only hands out &T.
unsafe impl<T: Copy + Sync> Sync for NativeBuffer<T> {}

impl<T: Copy> NativeBuffer<T> {
    /// Allocate `len` elements, each set to `fill`.
    pub fn new(len: usize, fill: T) -> Result<Self> {
        let buffer = Self::allocate(len)?;
        for i in 0..len {
            // SAFETY: allocate reserved len elements.
            unsafe { buffer.ptr.add(i).write(fill) };
        }
        Ok(buffer)
    }

    /// Allocate a copy of `items`.
    pub fn from_slice(items: &[T]) -> Result<Self> {
        let buffer = Self::allocate(items.len())?;
        if !items.is_empty() {
            // SAFETY: both regions hold items.len() elements and do not overlap.
            unsafe { ptr::copy_nonoverlapping(items.as_ptr(), buffer.ptr, items.len()) };
        }
        Ok(buffer)
    }

    fn allocate(len: usize) -> Result<Self> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::InvalidArgument(format!("buffer of {len} elements overflows")))?;
        if size == 0 {
            return Ok(Self {
                ptr: ptr::null_mut(),
                len,
                _marker: PhantomData,
            });
        }
        let ptr = alloc_aligned(size, std::mem::align_of::<T>());
        if ptr.is_null() {
            return Err(Error::Native(HResult::E_OUTOFMEMORY));
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
            _marker: PhantomData,
        })
    }

    /// Pointer for native code; null when empty.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        if self.ptr.is_null() {
            return &[];
        }
        // SAFETY: ptr holds len initialized elements owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        if self.ptr.is_null() {
            return &mut [];
        }
        // SAFETY: ptr holds len initialized elements owned exclusively by self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<T: Copy> Default for NativeBuffer<T> {
    fn default() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: Copy> Drop for NativeBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: ptr is null or came from alloc_aligned in allocate().
        unsafe { free_aligned(self.ptr.cast()) };
    }
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for NativeBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

// =========================================================================
// ScratchArena
// =========================================================================

/// Buffers staged for a single native call.
///
/// Every pointer handed out stays valid until the arena is reset or dropped.
/// Dropping the arena frees everything, so an early `?` return after a failed
/// native call cannot leak.
pub struct ScratchArena {
    blocks: Vec<*mut u8>,
    bytes: usize,
    stats: Option<Arc<MemoryStats>>,
}

// SAFETY: the arena exclusively owns its blocks.
unsafe impl Send for ScratchArena {}

impl ScratchArena {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            bytes: 0,
            stats: None,
        }
    }

    /// Create an arena that reports allocations and frees to `stats`.
    pub fn with_stats(stats: Arc<MemoryStats>) -> Self {
        Self {
            blocks: Vec::new(),
            bytes: 0,
            stats: Some(stats),
        }
    }

    /// Allocate `size` zeroed bytes aligned to at least `align`.
    ///
    /// Returns null for `size == 0`.
    pub fn alloc_bytes(&mut self, size: usize, align: usize) -> Result<*mut u8> {
        if size == 0 {
            return Ok(ptr::null_mut());
        }
        let block = alloc_aligned(size, align);
        if block.is_null() {
            return Err(Error::Native(HResult::E_OUTOFMEMORY));
        }
        self.blocks.push(block);
        self.bytes += size;
        if let Some(stats) = &self.stats {
            stats.record_alloc(size);
        }
        Ok(block)
    }

    /// Copy `items` into a new native array. Empty slices yield null.
    pub fn alloc_slice<T: Copy>(&mut self, items: &[T]) -> Result<*mut T> {
        let size = std::mem::size_of_val(items);
        let block = self.alloc_bytes(size, std::mem::align_of::<T>())?.cast::<T>();
        if !block.is_null() {
            // SAFETY: block holds size bytes, exactly items.len() elements.
            unsafe { ptr::copy_nonoverlapping(items.as_ptr(), block, items.len()) };
        }
        Ok(block)
    }

    /// Copy a single value into native memory.
    pub fn alloc_value<T: Copy>(&mut self, value: T) -> Result<*mut T> {
        self.alloc_slice(std::slice::from_ref(&value))
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bytes requested since the last reset.
    pub fn allocated_bytes(&self) -> usize {
        self.bytes
    }

    /// Free every block. Pointers handed out earlier become dangling.
    pub fn reset(&mut self) {
        for block in self.blocks.drain(..) {
            // SAFETY: every block came from alloc_aligned and is freed once.
            unsafe { free_aligned(block) };
            if let Some(stats) = &self.stats {
                stats.record_free();
            }
        }
        self.bytes = 0;
    }
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScratchArena {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_aligned_alignment() {
        for align in [1, 4, 16, 64, 256] {
            let block = alloc_aligned(40, align);
            assert!(!block.is_null());
            assert_eq!(block as usize % align.max(DEFAULT_ALIGNMENT), 0);
            // SAFETY: 40 bytes were allocated.
            let bytes = unsafe { std::slice::from_raw_parts(block, 40) };
            assert!(bytes.iter().all(|&b| b == 0));
            // SAFETY: block came from alloc_aligned.
            unsafe { free_aligned(block) };
        }
    }

    #[test]
    fn test_alloc_aligned_rejects_zero_and_bad_align() {
        assert!(alloc_aligned(0, 16).is_null());
        assert!(alloc_aligned(8, 48).is_null());
        // SAFETY: null is ignored.
        unsafe { free_aligned(ptr::null_mut()) };
    }

    #[test]
    fn test_task_memory() {
        let block = alloc_task_memory(24);
        assert!(!block.is_null());
        // SAFETY: block came from alloc_task_memory.
        unsafe { free_task_memory(block) };
        assert!(alloc_task_memory(0).is_null());
    }

    #[test]
    fn test_native_buffer() {
        let mut buffer = NativeBuffer::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.as_slice(), &[1.0, 2.0, 3.0]);
        buffer.as_mut_slice()[1] = 5.0;
        assert_eq!(buffer.as_slice()[1], 5.0);

        let filled = NativeBuffer::new(4, 7u16).unwrap();
        assert_eq!(filled.as_slice(), &[7, 7, 7, 7]);
    }

    #[test]
    fn test_native_buffer_empty_is_null() {
        let buffer = NativeBuffer::<f32>::from_slice(&[]).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.as_ptr().is_null());
        assert!(buffer.as_slice().is_empty());
    }

    #[test]
    fn test_arena_frees_everything() {
        let stats = MemoryStats::new();
        {
            let mut arena = ScratchArena::with_stats(stats.clone());
            let floats = arena.alloc_slice(&[0.5f32, 0.25]).unwrap();
            let value = arena.alloc_value(42u64).unwrap();
            // SAFETY: both pointers are live arena allocations.
            unsafe {
                assert_eq!(*floats.add(1), 0.25);
                assert_eq!(*value, 42);
            }
            assert_eq!(arena.len(), 2);
            assert_eq!(arena.allocated_bytes(), 16);
            assert_eq!(stats.outstanding(), 2);
        }
        assert_eq!(stats.allocations(), 2);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_arena_empty_slice_is_null() {
        let stats = MemoryStats::new();
        let mut arena = ScratchArena::with_stats(stats.clone());
        let empty = arena.alloc_slice::<f32>(&[]).unwrap();
        assert!(empty.is_null());
        assert!(arena.is_empty());
        drop(arena);
        assert_eq!(stats.allocations(), 0);
        assert_eq!(stats.frees(), 0);
    }

    #[test]
    fn test_arena_reset() {
        let stats = MemoryStats::new();
        let mut arena = ScratchArena::with_stats(stats.clone());
        arena.alloc_bytes(64, 16).unwrap();
        arena.reset();
        assert!(arena.is_empty());
        assert_eq!(arena.allocated_bytes(), 0);
        assert!(stats.is_balanced());
    }
}
