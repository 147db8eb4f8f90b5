//! Structured marshalling between Rust values and native mirror structs.
//!
//! A mirror struct has exactly the layout of a native C struct: scalar fields
//! copied as-is and variable-length arrays replaced by pointer + count pairs.
//! [`Marshal`] describes how a Rust value fills its mirror before a call and
//! reads output fields back afterwards.
//!
//! # Lifetime of pointer fields
//!
//! Pointer fields written by [`Marshal::to_native`] point into the
//! [`ScratchArena`] passed alongside (or into the mirror itself, for embedded
//! sub-structs). They are valid until the arena is dropped and the mirror is
//! not moved. [`call`] scopes all three for one native call.
//!
//! # Example
//!
//! ```ignore
//! let mut settings = DspSettings::new(1, 2)?;
//! marshal::call(&mut settings, |native| {
//!     // SAFETY: native points to a fully populated mirror.
//!     unsafe { (api.calculate)(handle, listener, emitter, flags, native) };
//!     Ok(())
//! })?;
//! // settings now holds the coefficients the callee wrote.
//! ```

use crate::error::{Error, Result};
use crate::memory::ScratchArena;

/// A Rust value with a layout-exact native mirror.
pub trait Marshal {
    /// The native mirror. `Default` yields an all-null, all-zero mirror.
    type Native: Default;

    /// Populate `native` from `self`.
    ///
    /// Arrays are copied into `arena`; embedded sub-structs may be pointed at
    /// from within `native`, so `native` must not move afterwards.
    fn to_native(&self, native: &mut Self::Native, arena: &mut ScratchArena) -> Result<()>;

    /// Read output fields back after the native call.
    ///
    /// Only fields the native contract writes are read. The default reads
    /// nothing.
    fn from_native(&mut self, native: &Self::Native) -> Result<()> {
        let _ = native;
        Ok(())
    }
}

/// Marshal `value`, run `native_call` against the mirror, and read outputs back.
///
/// Outputs are only read when the call succeeds. Every staged buffer is
/// freed before returning, whichever way the call went.
pub fn call<M, R, F>(value: &mut M, native_call: F) -> Result<R>
where
    M: Marshal,
    F: FnOnce(*mut M::Native) -> Result<R>,
{
    let mut arena = ScratchArena::new();
    call_in(&mut arena, value, native_call)
}

/// Like [`call`], staging buffers in a caller-provided arena.
pub fn call_in<M, R, F>(arena: &mut ScratchArena, value: &mut M, native_call: F) -> Result<R>
where
    M: Marshal,
    F: FnOnce(*mut M::Native) -> Result<R>,
{
    let mut native = M::Native::default();
    // Every access goes through one pointer so that interior pointers written
    // by to_native stay valid for the call and the read-back.
    let native_ptr: *mut M::Native = &mut native;
    // SAFETY: native_ptr points to the local above for the rest of the function.
    value.to_native(unsafe { &mut *native_ptr }, arena)?;
    let result = native_call(native_ptr)?;
    // SAFETY: as above; the callee's access ended with the call.
    value.from_native(unsafe { &*native_ptr })?;
    Ok(result)
}

/// Copy a native pointer + count pair into a `Vec`.
///
/// A null pointer or a zero count yields an empty `Vec`.
///
/// # Safety
///
/// When non-null, `ptr` must point to `count` initialized elements.
pub unsafe fn read_array<T: Copy>(ptr: *const T, count: usize) -> Vec<T> {
    if ptr.is_null() || count == 0 {
        return Vec::new();
    }
    // SAFETY: guaranteed by the caller.
    unsafe { std::slice::from_raw_parts(ptr, count) }.to_vec()
}

/// Convert a length to the `UINT32` count used by native structs.
pub fn native_count(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::InvalidArgument(format!("{what} has {len} elements, more than UINT32 allows")))
}

/// Native `BOOL`: a 32-bit integer where any non-zero value is true.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawBool(pub i32);

impl RawBool {
    pub const FALSE: RawBool = RawBool(0);
    pub const TRUE: RawBool = RawBool(1);

    #[inline]
    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for RawBool {
    fn from(value: bool) -> Self {
        Self(value as i32)
    }
}

impl From<RawBool> for bool {
    fn from(value: RawBool) -> Self {
        value.as_bool()
    }
}
