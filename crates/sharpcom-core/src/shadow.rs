//! Rust callbacks exposed to native code as COM objects.
//!
//! A [`Shadow`] binds an `Arc<T: ComCallback>` to a set of synthesized
//! native-visible blocks, one per interface the callback implements. Each
//! block starts with a pointer to a static vtable (one per interface per
//! callback type) followed by a pointer to the shared `ShadowCore`:
//!
//! ```text
//! native caller ──► ShadowBlock { vtable, core } ──► ShadowCore { ref_count, handle, blocks }
//!                                                         │
//!                                    registry[handle] ◄───┘
//!                                          │
//!                                          ▼
//!                                     Arc<T: ComCallback>
//! ```
//!
//! Thunks never dereference the callback through the block. They look the
//! handle up in a process-wide registry, clone the `Arc` under the read lock
//! and call the method after the lock is dropped. [`Shadow::detach`] removes
//! the registry entry, after which every slot call returns
//! `RPC_E_DISCONNECTED` without touching the callback, while calls already
//! in flight finish on their own strong reference.
//!
//! # Lifetime
//!
//! The core is reference counted on the native side. The count starts at
//! one for the binding itself; native `AddRef`/`Release` and
//! [`Shadow::detach`] adjust it, and the core with all its blocks is freed
//! when it reaches zero.
//!
//! # Writing thunks
//!
//! Per-interface vtables embed [`UNKNOWN_VTBL`] as their first field and
//! route every method through [`invoke`] or [`invoke_or`]:
//!
//! ```ignore
//! unsafe extern "system" fn reset<T: AudioProcessor>(this: *mut c_void) {
//!     unsafe { shadow::invoke_or::<T, _>(this, "IXAPO::Reset", (), |p| p.reset()) }
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::object::{IUnknownVtbl, IID_IUNKNOWN};
use crate::result::HResult;

// =========================================================================
// Callback contract
// =========================================================================

/// One interface a callback type exposes: its IID and the static vtable
/// native callers use for it.
#[derive(Clone, Copy)]
pub struct InterfaceEntry {
    iid: Guid,
    name: &'static str,
    vtable: *const c_void,
}

// SAFETY: the vtable pointer refers to immutable static data.
unsafe impl Send for InterfaceEntry {}
// SAFETY: see above.
unsafe impl Sync for InterfaceEntry {}

impl InterfaceEntry {
    /// Describe an interface backed by `vtable`.
    ///
    /// `V` must be `#[repr(C)]` and start with an [`IUnknownVtbl`] built from
    /// [`UNKNOWN_VTBL`].
    pub fn new<V>(iid: Guid, name: &'static str, vtable: &'static V) -> Self {
        Self {
            iid,
            name,
            vtable: (vtable as *const V).cast(),
        }
    }

    pub fn iid(&self) -> Guid {
        self.iid
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for InterfaceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceEntry")
            .field("iid", &self.iid)
            .field("name", &self.name)
            .finish()
    }
}

/// A Rust type that can be exposed to native code.
///
/// The first entry returned by [`interfaces`](Self::interfaces) is the
/// primary interface; `QueryInterface(IID_IUnknown)` resolves to it.
pub trait ComCallback: Any + Send + Sync {
    /// The interfaces this callback implements, primary first.
    fn interfaces() -> Vec<InterfaceEntry>
    where
        Self: Sized;
}

// =========================================================================
// Registry
// =========================================================================

struct RegistryEntry {
    target: Arc<dyn Any + Send + Sync>,
    in_flight: AtomicU32,
}

type Registry = RwLock<HashMap<u64, Arc<RegistryEntry>>>;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn read_registry() -> RwLockReadGuard<'static, HashMap<u64, Arc<RegistryEntry>>> {
    registry().read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_registry() -> RwLockWriteGuard<'static, HashMap<u64, Arc<RegistryEntry>>> {
    registry().write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lookup(handle: u64) -> Option<Arc<RegistryEntry>> {
    read_registry().get(&handle).cloned()
}

// =========================================================================
// Native blocks
// =========================================================================

/// The native-visible part of a shadow: what `this` points at.
#[repr(C)]
struct ShadowBlock {
    vtable: *const c_void,
    core: *const ShadowCore,
}

/// State shared by every block of one shadow.
struct ShadowCore {
    ref_count: AtomicU32,
    handle: u64,
    type_name: &'static str,
    detached: AtomicBool,
    interfaces: Vec<InterfaceEntry>,
    blocks: Vec<OnceLock<Box<ShadowBlock>>>,
}

impl ShadowCore {
    /// The block for interface `index`, created on first use.
    fn block(&self, index: usize) -> Option<*mut c_void> {
        let entry = self.interfaces.get(index)?;
        let block = self.blocks.get(index)?.get_or_init(|| {
            Box::new(ShadowBlock {
                vtable: entry.vtable,
                core: self,
            })
        });
        Some(&**block as *const ShadowBlock as *mut c_void)
    }

    fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference, freeing the core at zero.
    ///
    /// # Safety
    ///
    /// `core` must come from the `Box` leaked in [`Shadow::bind`] and the
    /// caller must own one of its references.
    unsafe fn release(core: *const ShadowCore) -> u32 {
        // SAFETY: the caller owns a reference, so the core is live.
        let previous = unsafe { (*core).ref_count.fetch_sub(1, Ordering::AcqRel) };
        if previous == 1 {
            // SAFETY: last reference; nobody else can observe the core.
            let core = unsafe { Box::from_raw(core as *mut ShadowCore) };
            log::debug!("freed shadow #{} ({})", core.handle, core.type_name);
            return 0;
        }
        previous - 1
    }
}

/// Resolve `this` to the core it belongs to.
///
/// # Safety
///
/// `this` must be null or a pointer handed out by a [`Shadow`] whose core is
/// still referenced by the caller.
unsafe fn core_of<'a>(this: *mut c_void) -> Option<&'a ShadowCore> {
    if this.is_null() {
        return None;
    }
    // SAFETY: per the contract this points to a ShadowBlock whose core is live.
    unsafe {
        let block = &*this.cast::<ShadowBlock>();
        block.core.as_ref()
    }
}

unsafe extern "system" fn query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    // SAFETY: out is non-null and writable per the COM contract.
    unsafe { *out = ptr::null_mut() };
    if iid.is_null() {
        return HResult::E_POINTER;
    }
    // SAFETY: native callers pass a pointer obtained from this shadow.
    let Some(core) = (unsafe { core_of(this) }) else {
        return HResult::E_POINTER;
    };
    if core.detached.load(Ordering::Acquire) {
        log::warn!("QueryInterface on detached shadow #{} ({})", core.handle, core.type_name);
        return HResult::RPC_E_DISCONNECTED;
    }

    // SAFETY: iid is non-null.
    let iid = unsafe { *iid };
    let index = if iid == IID_IUNKNOWN {
        Some(0)
    } else {
        core.interfaces.iter().position(|entry| entry.iid == iid)
    };
    let Some(block) = index.and_then(|index| core.block(index)) else {
        log::trace!("shadow #{} does not implement {iid}", core.handle);
        return HResult::E_NOINTERFACE;
    };

    core.add_ref();
    // SAFETY: checked non-null above.
    unsafe { *out = block };
    HResult::S_OK
}

unsafe extern "system" fn add_ref(this: *mut c_void) -> u32 {
    // SAFETY: native callers pass a pointer obtained from this shadow.
    match unsafe { core_of(this) } {
        Some(core) => core.add_ref(),
        None => 0,
    }
}

unsafe extern "system" fn release(this: *mut c_void) -> u32 {
    // SAFETY: native callers pass a pointer obtained from this shadow.
    let Some(core) = (unsafe { core_of(this) }) else {
        return 0;
    };
    // SAFETY: the caller owns the reference it releases.
    unsafe { ShadowCore::release(core) }
}

/// `IUnknown` slots shared by every shadow vtable.
pub const UNKNOWN_VTBL: IUnknownVtbl = IUnknownVtbl {
    query_interface,
    add_ref,
    release,
};

// =========================================================================
// Dispatch
// =========================================================================

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Dispatch<R> {
    Done(R),
    Stale,
    Mismatch,
    Panicked,
}

/// Resolve `this` to its callback and run `f`, catching panics.
///
/// # Safety
///
/// Same as [`invoke`].
unsafe fn dispatch<T, R>(this: *mut c_void, method: &'static str, f: impl FnOnce(&T) -> R) -> Option<Dispatch<R>>
where
    T: ComCallback,
{
    // SAFETY: forwarded contract.
    let core = unsafe { core_of(this) }?;
    log::trace!("{method} -> shadow #{}", core.handle);

    if core.detached.load(Ordering::Acquire) {
        return Some(Dispatch::Stale);
    }
    let Some(entry) = lookup(core.handle) else {
        return Some(Dispatch::Stale);
    };
    let Some(target) = (*entry.target).downcast_ref::<T>() else {
        return Some(Dispatch::Mismatch);
    };

    entry.in_flight.fetch_add(1, Ordering::AcqRel);
    let _guard = InFlight(&entry.in_flight);
    Some(match catch_unwind(AssertUnwindSafe(|| f(target))) {
        Ok(value) => Dispatch::Done(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("{method} panicked in {}: {message}", core.type_name);
            Dispatch::Panicked
        }
    })
}

/// Run an `HRESULT`-returning slot against the callback behind `this`.
///
/// - detached shadow: `RPC_E_DISCONNECTED`, the callback is not touched
/// - `Err(e)`: `e.to_hresult()`
/// - panic: `E_FAIL`
///
/// # Safety
///
/// `this` must be null or a pointer handed out by a live shadow core (the
/// native caller holds a reference to it).
pub unsafe fn invoke<T, F>(this: *mut c_void, method: &'static str, f: F) -> HResult
where
    T: ComCallback,
    F: FnOnce(&T) -> Result<()>,
{
    // SAFETY: forwarded contract.
    match unsafe { dispatch::<T, _>(this, method, f) } {
        None => HResult::E_POINTER,
        Some(Dispatch::Done(Ok(()))) => HResult::S_OK,
        Some(Dispatch::Done(Err(err))) => {
            match &err {
                Error::Native(_) => log::debug!("{method} returned {err}"),
                _ => log::error!("{method} failed: {err}"),
            }
            err.to_hresult()
        }
        Some(Dispatch::Stale) => {
            log::warn!("{method} called on a detached shadow");
            HResult::RPC_E_DISCONNECTED
        }
        Some(Dispatch::Mismatch) => {
            log::error!("{method}: shadow target is not a {}", std::any::type_name::<T>());
            HResult::E_UNEXPECTED
        }
        Some(Dispatch::Panicked) => HResult::E_FAIL,
    }
}

/// Run a slot without an `HRESULT` (void or a plain count), returning
/// `default` whenever the callback cannot be reached or panics.
///
/// # Safety
///
/// Same as [`invoke`].
pub unsafe fn invoke_or<T, R>(this: *mut c_void, method: &'static str, default: R, f: impl FnOnce(&T) -> R) -> R
where
    T: ComCallback,
{
    // SAFETY: forwarded contract.
    match unsafe { dispatch::<T, _>(this, method, f) } {
        Some(Dispatch::Done(value)) => value,
        Some(Dispatch::Stale) => {
            log::warn!("{method} called on a detached shadow");
            default
        }
        Some(Dispatch::Mismatch) => {
            log::error!("{method}: shadow target is not a {}", std::any::type_name::<T>());
            default
        }
        Some(Dispatch::Panicked) | None => default,
    }
}

// =========================================================================
// Shadow
// =========================================================================

/// Lifecycle of a shadow as seen from Rust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    /// Detached; slot calls are stale.
    Unbound,
    /// Reachable from native code, no call running.
    Bound,
    /// At least one slot call is running.
    Invoking,
}

/// Owner of the binding between a callback and its native blocks.
///
/// Dropping the shadow detaches it. Native references obtained through
/// [`to_raw`](Self::to_raw) keep the blocks alive, but calls through them
/// return `RPC_E_DISCONNECTED` from then on.
pub struct Shadow {
    core: NonNull<ShadowCore>,
    handle: u64,
    detached: AtomicBool,
}

// SAFETY: the core is only mutated through atomics and OnceLock.
unsafe impl Send for Shadow {}
// SAFETY: see above.
unsafe impl Sync for Shadow {}

impl Shadow {
    /// Expose `callback` to native code.
    pub fn bind<T: ComCallback>(callback: Arc<T>) -> Result<Self> {
        let interfaces = T::interfaces();
        if interfaces.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} exposes no interfaces",
                std::any::type_name::<T>()
            )));
        }

        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        let type_name = std::any::type_name::<T>();
        let blocks = interfaces.iter().map(|_| OnceLock::new()).collect();
        let core = Box::new(ShadowCore {
            ref_count: AtomicU32::new(1),
            handle,
            type_name,
            detached: AtomicBool::new(false),
            interfaces,
            blocks,
        });
        // Primary block exists from the start so as_raw() never allocates.
        core.block(0);

        write_registry().insert(
            handle,
            Arc::new(RegistryEntry {
                target: callback,
                in_flight: AtomicU32::new(0),
            }),
        );

        let core = NonNull::from(Box::leak(core));
        log::debug!("bound shadow #{handle} ({type_name})");
        Ok(Self {
            core,
            handle,
            detached: AtomicBool::new(false),
        })
    }

    fn core(&self) -> Option<&ShadowCore> {
        if self.detached.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the binding reference keeps the core alive until detach.
        Some(unsafe { self.core.as_ref() })
    }

    /// Registry handle of this shadow.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// The primary interface pointer, without a reference. Null once detached.
    pub fn as_raw(&self) -> *mut c_void {
        self.core()
            .and_then(|core| core.block(0))
            .unwrap_or(ptr::null_mut())
    }

    /// The primary interface pointer with a new reference, for handing
    /// ownership to native code.
    pub fn to_raw(&self) -> Result<*mut c_void> {
        let core = self.core().ok_or(Error::StaleShadow)?;
        let block = core.block(0).ok_or(Error::NullPointer)?;
        core.add_ref();
        Ok(block)
    }

    /// The pointer for interface `iid`, without a reference.
    pub fn as_raw_for(&self, iid: &Guid) -> Result<*mut c_void> {
        let core = self.core().ok_or(Error::StaleShadow)?;
        core.interfaces
            .iter()
            .position(|entry| entry.iid == *iid)
            .and_then(|index| core.block(index))
            .ok_or(Error::NoInterface {
                iid: *iid,
                interface: "(shadow)",
            })
    }

    /// Current native reference count, including the binding's own.
    /// Zero once detached.
    pub fn ref_count(&self) -> u32 {
        self.core()
            .map(|core| core.ref_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn state(&self) -> ShadowState {
        if self.is_detached() {
            return ShadowState::Unbound;
        }
        match lookup(self.handle) {
            Some(entry) if entry.in_flight.load(Ordering::Acquire) > 0 => ShadowState::Invoking,
            Some(_) => ShadowState::Bound,
            None => ShadowState::Unbound,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Cut the link to the callback and drop the binding's reference.
    ///
    /// Later slot calls return `RPC_E_DISCONNECTED`. Calls already running
    /// complete normally. Idempotent.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: the binding reference is still held at this point.
        let core = unsafe { self.core.as_ref() };
        core.detached.store(true, Ordering::Release);
        write_registry().remove(&self.handle);
        log::debug!("detached shadow #{} ({})", self.handle, core.type_name);
        // SAFETY: releases the binding's reference exactly once thanks to the swap above.
        unsafe { ShadowCore::release(self.core.as_ptr()) };
    }
}

impl Drop for Shadow {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Shadow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shadow")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .finish()
    }
}
