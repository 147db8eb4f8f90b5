//! Wrappers around native COM interface pointers.
//!
//! [`ComObject`] owns exactly one native reference. Disposal releases it and
//! nulls the stored pointer atomically, so a second `dispose` (or the `Drop`
//! after an explicit `dispose`) is a no-op and a disposed wrapper reports
//! [`Error::Disposed`] instead of calling through a dangling pointer.
//!
//! Typed wrappers are newtypes declared with [`com_interface!`](crate::com_interface),
//! which ties a Rust type to an IID and a vtable layout.
//!
//! # Example
//!
//! ```ignore
//! // Adopt the reference returned by a native factory.
//! let content = unsafe { Content::from_raw(raw) }.ok_or(Error::NullPointer)?;
//!
//! // Narrow to another interface of the same object.
//! if let Some(primary) = content.query_interface_or_none::<PrimaryContent>()? {
//!     primary.set_zoom_boundaries(1.0, 4.0)?;
//! }
//! ```

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::result::HResult;
use crate::tracker::{ObjectTracker, TrackingState};

/// `IUnknown` vtable, the prefix of every COM vtable.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(this: *mut c_void, iid: *const Guid, out: *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

/// `IID_IUnknown`.
pub const IID_IUNKNOWN: Guid = Guid::parse("00000000-0000-0000-C000-000000000046");

/// Call `AddRef` on a raw interface pointer.
///
/// # Safety
///
/// `ptr` must be a live COM interface pointer.
pub unsafe fn add_ref(ptr: *mut c_void) -> u32 {
    // SAFETY: every COM object starts with a pointer to an IUnknown-prefixed vtable.
    unsafe {
        let vtbl = &**ptr.cast::<*const IUnknownVtbl>();
        (vtbl.add_ref)(ptr)
    }
}

/// Call `Release` on a raw interface pointer.
///
/// # Safety
///
/// `ptr` must be a live COM interface pointer holding a reference owned by
/// the caller. The pointer must not be used afterwards unless other
/// references remain.
pub unsafe fn release(ptr: *mut c_void) -> u32 {
    // SAFETY: see add_ref.
    unsafe {
        let vtbl = &**ptr.cast::<*const IUnknownVtbl>();
        (vtbl.release)(ptr)
    }
}

// =========================================================================
// ComObject
// =========================================================================

/// Owner of one reference to a native COM object.
pub struct ComObject {
    ptr: AtomicPtr<c_void>,
    interface: &'static str,
    tracking: Arc<TrackingState>,
}

// SAFETY: the wrapped interfaces are free-threaded (or apartment rules are
// the caller's concern, as with the native API). The pointer itself is only
// swapped atomically.
unsafe impl Send for ComObject {}
// SAFETY: see above; &ComObject only exposes atomic loads and native calls.
unsafe impl Sync for ComObject {}

impl ComObject {
    /// Adopt the reference held by `ptr` (no `AddRef`).
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live COM interface pointer whose reference the
    /// caller transfers to the wrapper.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        // SAFETY: forwarded contract.
        unsafe { Self::from_raw_named(ptr, "IUnknown") }
    }

    /// [`from_raw`](Self::from_raw) recording the interface name for diagnostics.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw`](Self::from_raw).
    pub unsafe fn from_raw_named(ptr: *mut c_void, interface: &'static str) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        let object = Self {
            ptr: AtomicPtr::new(ptr),
            interface,
            tracking: Arc::new(TrackingState::new()),
        };
        if Configuration::current().enable_object_tracking {
            ObjectTracker::track(&object);
        }
        Some(object)
    }

    /// Wrap `ptr` with a new reference of its own (`AddRef`).
    ///
    /// Used for interface pointers received as callback arguments, which the
    /// callee does not own.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live COM interface pointer.
    pub unsafe fn from_raw_borrowed(ptr: *mut c_void) -> Option<Self> {
        // SAFETY: forwarded contract.
        unsafe { Self::from_raw_borrowed_named(ptr, "IUnknown") }
    }

    /// [`from_raw_borrowed`](Self::from_raw_borrowed) recording the interface name.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_borrowed`](Self::from_raw_borrowed).
    pub unsafe fn from_raw_borrowed_named(ptr: *mut c_void, interface: &'static str) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: ptr is a live interface pointer per the caller's contract.
        unsafe {
            add_ref(ptr);
            Self::from_raw_named(ptr, interface)
        }
    }

    /// A wrapper that holds nothing.
    fn disposed(interface: &'static str) -> Self {
        let tracking = Arc::new(TrackingState::new());
        tracking.mark_dead();
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            interface,
            tracking,
        }
    }

    /// The native pointer, or null once disposed. No reference is added.
    #[inline]
    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.load(Ordering::Acquire)
    }

    /// Name of the interface this wrapper was created for.
    #[inline]
    pub fn interface_name(&self) -> &'static str {
        self.interface
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.as_raw().is_null()
    }

    /// The native pointer, or [`Error::Disposed`].
    #[inline]
    pub fn raw(&self) -> Result<*mut c_void> {
        let ptr = self.as_raw();
        if ptr.is_null() {
            Err(Error::Disposed)
        } else {
            Ok(ptr)
        }
    }

    /// The vtable of the wrapped pointer, viewed as `V`, together with `this`.
    ///
    /// # Safety
    ///
    /// `V` must be the vtable layout of the interface this pointer was
    /// obtained for (or a prefix of it, such as [`IUnknownVtbl`]).
    #[inline]
    pub unsafe fn vtable<V>(&self) -> Result<(&V, *mut c_void)> {
        let this = self.raw()?;
        // SAFETY: a COM pointer points at its vtable pointer; the layout is
        // guaranteed by the caller.
        let vtbl = unsafe { &**this.cast::<*const V>() };
        Ok((vtbl, this))
    }

    /// Ask the native object for `iid`, returning a new owned reference.
    pub fn query_interface_raw(&self, iid: &Guid) -> Result<*mut c_void> {
        // SAFETY: every COM vtable starts with IUnknown.
        let (vtbl, this) = unsafe { self.vtable::<IUnknownVtbl>()? };
        let mut out = ptr::null_mut();
        // SAFETY: iid and out are valid for the duration of the call.
        let hr = unsafe { (vtbl.query_interface)(this, iid, &mut out) };
        if hr == HResult::E_NOINTERFACE || (hr.is_success() && out.is_null()) {
            return Err(Error::NoInterface {
                iid: *iid,
                interface: "(raw)",
            });
        }
        hr.ok()?;
        Ok(out)
    }

    /// Narrow to interface `T`.
    ///
    /// The returned wrapper holds its own reference; `self` is unaffected.
    /// Fails with [`Error::NoInterface`] when the object does not implement `T`.
    pub fn query_interface<T: Interface>(&self) -> Result<T> {
        let raw = self.query_interface_raw(&T::IID).map_err(|err| match err {
            Error::NoInterface { iid, .. } => Error::NoInterface {
                iid,
                interface: T::NAME,
            },
            other => other,
        })?;
        // SAFETY: raw is a fresh reference to T returned by QueryInterface.
        unsafe { T::from_raw(raw) }.ok_or(Error::NullPointer)
    }

    /// Like [`query_interface`](Self::query_interface), mapping "no such
    /// interface" to `Ok(None)`.
    pub fn query_interface_or_none<T: Interface>(&self) -> Result<Option<T>> {
        match self.query_interface::<T>() {
            Ok(object) => Ok(Some(object)),
            Err(err) if err.is_no_interface() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// True if the object answers `QueryInterface` for `iid`.
    pub fn supports(&self, iid: &Guid) -> bool {
        match self.query_interface_raw(iid) {
            Ok(raw) => {
                // SAFETY: raw is an owned reference from QueryInterface.
                unsafe { release(raw) };
                true
            }
            Err(_) => false,
        }
    }

    /// Give up ownership of the reference without releasing it.
    ///
    /// Returns null if already disposed.
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        ObjectTracker::untrack_raw(ptr, &self.tracking);
        self.tracking.mark_dead();
        ptr
    }

    /// Release the native reference. Later calls are no-ops.
    pub fn dispose(&self) {
        let ptr = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            return;
        }
        ObjectTracker::untrack_raw(ptr, &self.tracking);
        self.tracking.mark_dead();
        // SAFETY: ptr held the reference owned by this wrapper; the swap
        // above guarantees it is released exactly once.
        let remaining = unsafe { release(ptr) };
        log::trace!("released {} at {ptr:p} ({remaining} references remain)", self.interface);
    }

    pub(crate) fn tracking_state(&self) -> &Arc<TrackingState> {
        &self.tracking
    }
}

impl Clone for ComObject {
    /// A new wrapper with its own reference (`AddRef`).
    fn clone(&self) -> Self {
        let ptr = self.as_raw();
        // SAFETY: ptr is null or the live pointer owned by self.
        unsafe { Self::from_raw_borrowed_named(ptr, self.interface) }
            .unwrap_or_else(|| Self::disposed(self.interface))
    }
}

impl Drop for ComObject {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ComObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComObject")
            .field("interface", &self.interface)
            .field("ptr", &self.as_raw())
            .finish()
    }
}

// =========================================================================
// Interface
// =========================================================================

/// A typed wrapper for one COM interface.
///
/// Implemented by [`com_interface!`](crate::com_interface).
pub trait Interface: Sized {
    /// The interface identifier passed to `QueryInterface`.
    const IID: Guid;
    /// The native interface name, used in diagnostics.
    const NAME: &'static str;

    fn from_object(object: ComObject) -> Self;
    fn as_object(&self) -> &ComObject;
    fn into_object(self) -> ComObject;

    /// Adopt the reference held by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer to this interface whose reference
    /// is transferred to the wrapper.
    unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        // SAFETY: forwarded contract.
        unsafe { ComObject::from_raw_named(ptr, Self::NAME) }.map(Self::from_object)
    }

    /// Wrap `ptr` with an added reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer to this interface.
    unsafe fn from_raw_borrowed(ptr: *mut c_void) -> Option<Self> {
        // SAFETY: forwarded contract.
        unsafe { ComObject::from_raw_borrowed_named(ptr, Self::NAME) }.map(Self::from_object)
    }
}

/// Declare a typed wrapper for a native COM interface.
///
/// Generates a newtype over [`ComObject`] implementing [`Interface`],
/// `Deref<Target = ComObject>`, and a private `vtbl()` accessor returning the
/// interface's vtable and `this` pointer.
///
/// # Example
///
/// ```ignore
/// com_interface! {
///     /// IDirectManipulationContent
///     pub struct Content("IDirectManipulationContent", "B89962CB-3D89-442B-BB58-5098FA0F9F16", ContentVtbl);
/// }
/// ```
#[macro_export]
macro_rules! com_interface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($native:literal, $iid:literal, $vtbl:ty);
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        #[repr(transparent)]
        $vis struct $name($crate::ComObject);

        impl $crate::Interface for $name {
            const IID: $crate::Guid = $crate::Guid::parse($iid);
            const NAME: &'static str = $native;

            fn from_object(object: $crate::ComObject) -> Self {
                Self(object)
            }

            fn as_object(&self) -> &$crate::ComObject {
                &self.0
            }

            fn into_object(self) -> $crate::ComObject {
                self.0
            }
        }

        impl $name {
            /// The native vtable and `this` pointer.
            #[inline]
            #[allow(dead_code)]
            fn vtbl(&self) -> $crate::Result<(&$vtbl, *mut ::std::ffi::c_void)> {
                // SAFETY: this wrapper only ever holds pointers to its own interface.
                unsafe { self.0.vtable::<$vtbl>() }
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = $crate::ComObject;

            fn deref(&self) -> &$crate::ComObject {
                &self.0
            }
        }
    };
}

com_interface! {
    /// `IUnknown`: the base interface every COM object implements.
    pub struct Unknown("IUnknown", "00000000-0000-0000-C000-000000000046", IUnknownVtbl);
}
