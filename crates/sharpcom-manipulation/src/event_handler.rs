//! `IDirectManipulationViewportEventHandler`: viewport notifications
//! delivered to Rust.
//!
//! Implement [`ViewportEventHandler`], [`bind`] it and pass the resulting
//! [`Shadow`] to [`Viewport::add_event_handler`]. Notifications arrive on
//! the thread that owns the viewport's window.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::Arc;

use sharpcom_core::shadow::{self, ComCallback, InterfaceEntry, UNKNOWN_VTBL};
use sharpcom_core::{com_interface, Error, HResult, IUnknownVtbl, Interface, Result, Shadow};

use crate::content::Content;
use crate::types::ViewportStatus;
use crate::viewport::Viewport;

/// `IDirectManipulationViewportEventHandler` vtable.
#[repr(C)]
pub struct EventHandlerVtbl {
    pub base: IUnknownVtbl,
    pub on_viewport_status_changed: unsafe extern "system" fn(
        this: *mut c_void,
        viewport: *mut c_void,
        current: i32,
        previous: i32,
    ) -> HResult,
    pub on_viewport_updated: unsafe extern "system" fn(this: *mut c_void, viewport: *mut c_void) -> HResult,
    pub on_content_updated:
        unsafe extern "system" fn(this: *mut c_void, viewport: *mut c_void, content: *mut c_void) -> HResult,
}

com_interface! {
    /// A native (or shadowed) viewport event handler.
    pub struct EventHandler(
        "IDirectManipulationViewportEventHandler",
        "952121DA-D69F-45F9-B0F9-F23944321A6D",
        EventHandlerVtbl
    );
}

impl EventHandler {
    pub fn on_viewport_status_changed(
        &self,
        viewport: &Viewport,
        current: ViewportStatus,
        previous: ViewportStatus,
    ) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let viewport = viewport.raw()?;
        // SAFETY: viewport stays referenced by the caller for the call.
        unsafe { (vtbl.on_viewport_status_changed)(this, viewport, current as i32, previous as i32) }.ok()
    }

    pub fn on_viewport_updated(&self, viewport: &Viewport) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let viewport = viewport.raw()?;
        // SAFETY: see above.
        unsafe { (vtbl.on_viewport_updated)(this, viewport) }.ok()
    }

    pub fn on_content_updated(&self, viewport: &Viewport, content: &Content) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let viewport = viewport.raw()?;
        let content = content.raw()?;
        // SAFETY: see above.
        unsafe { (vtbl.on_content_updated)(this, viewport, content) }.ok()
    }
}

/// Receiver of viewport notifications.
///
/// The viewport and content passed in are borrowed for the duration of the
/// call; clone them to keep them. An `Err` is reported back to
/// DirectManipulation as its `HRESULT`.
pub trait ViewportEventHandler: Send + Sync + 'static {
    fn on_viewport_status_changed(
        &self,
        viewport: &Viewport,
        current: ViewportStatus,
        previous: ViewportStatus,
    ) -> Result<()>;

    /// Called once per frame after all content in the viewport updated.
    fn on_viewport_updated(&self, viewport: &Viewport) -> Result<()> {
        let _ = viewport;
        Ok(())
    }

    /// Called when `content` moved.
    fn on_content_updated(&self, viewport: &Viewport, content: &Content) -> Result<()> {
        let _ = (viewport, content);
        Ok(())
    }
}

/// Expose `handler` as `IDirectManipulationViewportEventHandler`.
pub fn bind<T: ViewportEventHandler>(handler: Arc<T>) -> Result<Shadow> {
    Shadow::bind(Arc::new(HandlerCallback { handler }))
}

struct HandlerCallback<T> {
    handler: Arc<T>,
}

impl<T: ViewportEventHandler> ComCallback for HandlerCallback<T> {
    fn interfaces() -> Vec<InterfaceEntry> {
        vec![InterfaceEntry::new(EventHandler::IID, EventHandler::NAME, HandlerThunks::<T>::VTBL)]
    }
}

struct HandlerThunks<T>(PhantomData<T>);

impl<T: ViewportEventHandler> HandlerThunks<T> {
    const VTBL: &'static EventHandlerVtbl = &EventHandlerVtbl {
        base: UNKNOWN_VTBL,
        on_viewport_status_changed: on_viewport_status_changed::<T>,
        on_viewport_updated: on_viewport_updated::<T>,
        on_content_updated: on_content_updated::<T>,
    };
}

/// Wrap an argument pointer, adding the reference the wrapper releases.
///
/// # Safety
///
/// `ptr` must be null or a live object of interface `I`.
unsafe fn borrow_arg<I: Interface>(ptr: *mut c_void) -> Result<I> {
    // SAFETY: forwarded contract.
    unsafe { I::from_raw_borrowed(ptr) }.ok_or(Error::NullPointer)
}

unsafe extern "system" fn on_viewport_status_changed<T: ViewportEventHandler>(
    this: *mut c_void,
    viewport: *mut c_void,
    current: i32,
    previous: i32,
) -> HResult {
    // SAFETY: this is one of our blocks; viewport is live for the call.
    unsafe {
        shadow::invoke::<HandlerCallback<T>, _>(this, "OnViewportStatusChanged", |callback| {
            let viewport = borrow_arg::<Viewport>(viewport)?;
            let current = ViewportStatus::try_from(current)?;
            let previous = ViewportStatus::try_from(previous)?;
            log::trace!("viewport status {previous:?} -> {current:?}");
            callback.handler.on_viewport_status_changed(&viewport, current, previous)
        })
    }
}

unsafe extern "system" fn on_viewport_updated<T: ViewportEventHandler>(
    this: *mut c_void,
    viewport: *mut c_void,
) -> HResult {
    // SAFETY: see above.
    unsafe {
        shadow::invoke::<HandlerCallback<T>, _>(this, "OnViewportUpdated", |callback| {
            let viewport = borrow_arg::<Viewport>(viewport)?;
            callback.handler.on_viewport_updated(&viewport)
        })
    }
}

unsafe extern "system" fn on_content_updated<T: ViewportEventHandler>(
    this: *mut c_void,
    viewport: *mut c_void,
    content: *mut c_void,
) -> HResult {
    // SAFETY: see above.
    unsafe {
        shadow::invoke::<HandlerCallback<T>, _>(this, "OnContentUpdated", |callback| {
            let viewport = borrow_arg::<Viewport>(viewport)?;
            let content = borrow_arg::<Content>(content)?;
            callback.handler.on_content_updated(&viewport, &content)
        })
    }
}
