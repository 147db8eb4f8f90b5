//! In-process stand-ins for the native viewport and content objects.
//!
//! Each fake is a boxed `#[repr(C)]` object whose first field is a vtable
//! pointer, so wrappers drive it exactly like a DirectManipulation object.
//! The test owns the box; `Release` only counts.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use sharpcom_core::marshal::RawBool;
use sharpcom_core::object::{add_ref, release, IID_IUNKNOWN};
use sharpcom_core::{Guid, HResult, IUnknownVtbl, Interface};

use crate::content::{Content, ContentVtbl};
use crate::event_handler::EventHandlerVtbl;
use crate::types::{ContentTransform, Rect, TRANSFORM_LEN};
use crate::viewport::{Viewport, ViewportVtbl};

const IDENTITY: [f32; TRANSFORM_LEN] = ContentTransform::IDENTITY.to_array();

/// Shared `IUnknown` behaviour: the object answers `IUnknown` and `iid`.
#[repr(C)]
struct FakeHeader {
    vtbl: *const c_void,
    count: AtomicU32,
    iid: Guid,
}

unsafe extern "system" fn query_interface(this: *mut c_void, iid: *const Guid, out: *mut *mut c_void) -> HResult {
    // SAFETY: this starts with a FakeHeader; test callers pass valid pointers.
    unsafe {
        let header = &*this.cast::<FakeHeader>();
        if *iid == IID_IUNKNOWN || *iid == header.iid {
            header.count.fetch_add(1, Ordering::AcqRel);
            *out = this;
            HResult::S_OK
        } else {
            *out = ptr::null_mut();
            HResult::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn fake_add_ref(this: *mut c_void) -> u32 {
    // SAFETY: this starts with a FakeHeader.
    unsafe { (*this.cast::<FakeHeader>()).count.fetch_add(1, Ordering::AcqRel) + 1 }
}

unsafe extern "system" fn fake_release(this: *mut c_void) -> u32 {
    // SAFETY: this starts with a FakeHeader; the box is freed by the test.
    unsafe { (*this.cast::<FakeHeader>()).count.fetch_sub(1, Ordering::AcqRel) - 1 }
}

const UNKNOWN: IUnknownVtbl = IUnknownVtbl {
    query_interface,
    add_ref: fake_add_ref,
    release: fake_release,
};

/// Store `object` with a new reference, dropping the previous one.
///
/// # Safety
///
/// Both pointers must be null or live COM objects.
unsafe fn swap_object(slot: &mut usize, object: *mut c_void) {
    if !object.is_null() {
        // SAFETY: forwarded contract.
        unsafe { add_ref(object) };
    }
    let previous = std::mem::replace(slot, object as usize);
    if previous != 0 {
        // SAFETY: we held the reference taken when it was stored.
        unsafe { release(previous as *mut c_void) };
    }
}

/// Hand out a new reference to a stored object.
///
/// # Safety
///
/// `stored` must be 0 or a live COM object; `out` must be writable.
unsafe fn hand_out(stored: usize, out: *mut *mut c_void) -> HResult {
    if stored == 0 {
        // SAFETY: forwarded contract.
        unsafe { *out = ptr::null_mut() };
        return HResult::E_FAIL;
    }
    // SAFETY: forwarded contract.
    unsafe {
        add_ref(stored as *mut c_void);
        *out = stored as *mut c_void;
    }
    HResult::S_OK
}

// =========================================================================
// FakeContent
// =========================================================================

#[derive(Debug)]
pub(crate) struct ContentState {
    pub calls: Vec<&'static str>,
    pub rect: Rect,
    pub transform: [f32; TRANSFORM_LEN],
    /// Owning viewport, not referenced.
    pub viewport: usize,
    pub tag: (usize, u32),
}

#[repr(C)]
pub(crate) struct FakeContent {
    header: FakeHeader,
    state: Mutex<ContentState>,
}

static CONTENT_VTBL: ContentVtbl = ContentVtbl {
    base: UNKNOWN,
    get_content_rect: content_get_rect,
    set_content_rect: content_set_rect,
    get_viewport: content_get_viewport,
    get_tag: content_get_tag,
    set_tag: content_set_tag,
    get_output_transform: content_get_output_transform,
    get_content_transform: content_get_content_transform,
    sync_content_transform: content_sync_transform,
};

impl FakeContent {
    pub(crate) fn new() -> Box<Self> {
        Box::new(Self {
            header: FakeHeader {
                vtbl: (&CONTENT_VTBL as *const ContentVtbl).cast(),
                count: AtomicU32::new(1),
                iid: Content::IID,
            },
            state: Mutex::new(ContentState {
                calls: Vec::new(),
                rect: Rect::default(),
                transform: IDENTITY,
                viewport: 0,
                tag: (0, 0),
            }),
        })
    }

    /// # Safety
    ///
    /// `this` must be a `FakeContent` that outlives the returned reference.
    unsafe fn from_this<'a>(this: *mut c_void) -> &'a Self {
        // SAFETY: forwarded contract.
        unsafe { &*this.cast::<Self>() }
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    pub(crate) fn refs(&self) -> u32 {
        self.header.count.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ContentState> {
        self.state.lock().unwrap()
    }

    /// A wrapper holding its own reference.
    pub(crate) fn wrapper(&self) -> Content {
        // SAFETY: the fake is live for the test.
        unsafe { Content::from_raw_borrowed(self.as_ptr()) }.unwrap()
    }
}

unsafe extern "system" fn content_get_rect(this: *mut c_void, rect: *mut Rect) -> HResult {
    // SAFETY: this is a FakeContent; rect is writable.
    unsafe {
        let mut state = FakeContent::from_this(this).state();
        state.calls.push("GetContentRect");
        *rect = state.rect;
    }
    HResult::S_OK
}

unsafe extern "system" fn content_set_rect(this: *mut c_void, rect: *const Rect) -> HResult {
    // SAFETY: this is a FakeContent; rect is readable.
    unsafe {
        let mut state = FakeContent::from_this(this).state();
        state.calls.push("SetContentRect");
        state.rect = *rect;
    }
    HResult::S_OK
}

unsafe extern "system" fn content_get_viewport(this: *mut c_void, iid: *const Guid, out: *mut *mut c_void) -> HResult {
    // SAFETY: this is a FakeContent; iid and out are valid.
    unsafe {
        let viewport = {
            let mut state = FakeContent::from_this(this).state();
            state.calls.push("GetViewport");
            state.viewport
        };
        if *iid != Viewport::IID {
            *out = ptr::null_mut();
            return HResult::E_NOINTERFACE;
        }
        hand_out(viewport, out)
    }
}

unsafe extern "system" fn content_get_tag(
    this: *mut c_void,
    _iid: *const Guid,
    object: *mut *mut c_void,
    id: *mut u32,
) -> HResult {
    // SAFETY: this is a FakeContent; out pointers are writable.
    unsafe {
        let (stored, tag_id) = {
            let mut state = FakeContent::from_this(this).state();
            state.calls.push("GetTag");
            state.tag
        };
        *id = tag_id;
        if stored == 0 {
            *object = ptr::null_mut();
            return HResult::S_OK;
        }
        hand_out(stored, object)
    }
}

unsafe extern "system" fn content_set_tag(this: *mut c_void, object: *mut c_void, id: u32) -> HResult {
    // SAFETY: this is a FakeContent; object is null or live.
    unsafe {
        let mut state = FakeContent::from_this(this).state();
        state.calls.push("SetTag");
        swap_object(&mut state.tag.0, object);
        state.tag.1 = id;
    }
    HResult::S_OK
}

/// # Safety
///
/// `this` must be a FakeContent and `matrix` must hold `count` floats.
unsafe fn read_content_transform(this: *mut c_void, label: &'static str, matrix: *mut f32, count: u32) -> HResult {
    if count as usize != TRANSFORM_LEN {
        return HResult::E_INVALIDARG;
    }
    // SAFETY: forwarded contract.
    unsafe {
        let mut state = FakeContent::from_this(this).state();
        state.calls.push(label);
        ptr::copy_nonoverlapping(state.transform.as_ptr(), matrix, TRANSFORM_LEN);
    }
    HResult::S_OK
}

unsafe extern "system" fn content_get_output_transform(this: *mut c_void, matrix: *mut f32, count: u32) -> HResult {
    // SAFETY: forwarded from the caller.
    unsafe { read_content_transform(this, "GetOutputTransform", matrix, count) }
}

unsafe extern "system" fn content_get_content_transform(this: *mut c_void, matrix: *mut f32, count: u32) -> HResult {
    // SAFETY: forwarded from the caller.
    unsafe { read_content_transform(this, "GetContentTransform", matrix, count) }
}

unsafe extern "system" fn content_sync_transform(this: *mut c_void, matrix: *const f32, count: u32) -> HResult {
    if count as usize != TRANSFORM_LEN {
        return HResult::E_INVALIDARG;
    }
    // SAFETY: this is a FakeContent; matrix holds six floats.
    unsafe {
        let mut state = FakeContent::from_this(this).state();
        state.calls.push("SyncContentTransform");
        ptr::copy_nonoverlapping(matrix, state.transform.as_mut_ptr(), TRANSFORM_LEN);
    }
    HResult::S_OK
}

// =========================================================================
// FakeViewport
// =========================================================================

#[derive(Debug, Default)]
pub(crate) struct ViewportState {
    pub calls: Vec<&'static str>,
    pub status: i32,
    pub rect: Rect,
    pub zoom: Option<[f32; 4]>,
    pub animated: bool,
    pub viewport_transform: [f32; TRANSFORM_LEN],
    pub display_transform: [f32; TRANSFORM_LEN],
    /// Primary content, not referenced.
    pub primary: usize,
    pub contents: Vec<usize>,
    pub options: u32,
    pub configurations: Vec<u32>,
    pub active_configuration: u32,
    pub handlers: Vec<(u32, usize)>,
    pub next_cookie: u32,
    pub tag: (usize, u32),
}

#[repr(C)]
pub(crate) struct FakeViewport {
    header: FakeHeader,
    state: Mutex<ViewportState>,
}

static VIEWPORT_VTBL: ViewportVtbl = ViewportVtbl {
    base: UNKNOWN,
    enable: viewport_enable,
    disable: viewport_disable,
    set_contact: viewport_set_contact,
    release_contact: viewport_release_contact,
    release_all_contacts: viewport_release_all_contacts,
    get_status: viewport_get_status,
    get_tag: viewport_get_tag,
    set_tag: viewport_set_tag,
    get_viewport_rect: viewport_get_rect,
    set_viewport_rect: viewport_set_rect,
    zoom_to_rect: viewport_zoom_to_rect,
    set_viewport_transform: viewport_set_transform,
    sync_display_transform: viewport_sync_display_transform,
    get_primary_content: viewport_get_primary_content,
    add_content: viewport_add_content,
    remove_content: viewport_remove_content,
    set_viewport_options: viewport_set_options,
    add_configuration: viewport_add_configuration,
    remove_configuration: viewport_remove_configuration,
    activate_configuration: viewport_activate_configuration,
    set_manual_gesture: viewport_set_manual_gesture,
    set_chaining: viewport_set_chaining,
    add_event_handler: viewport_add_event_handler,
    remove_event_handler: viewport_remove_event_handler,
    set_input_mode: viewport_set_input_mode,
    set_update_mode: viewport_set_update_mode,
    stop: viewport_stop,
    abandon: viewport_abandon,
};

impl FakeViewport {
    pub(crate) fn new() -> Box<Self> {
        Box::new(Self {
            header: FakeHeader {
                vtbl: (&VIEWPORT_VTBL as *const ViewportVtbl).cast(),
                count: AtomicU32::new(1),
                iid: Viewport::IID,
            },
            state: Mutex::new(ViewportState {
                next_cookie: 1,
                ..ViewportState::default()
            }),
        })
    }

    /// # Safety
    ///
    /// `this` must be a `FakeViewport` that outlives the returned reference.
    unsafe fn from_this<'a>(this: *mut c_void) -> &'a Self {
        // SAFETY: forwarded contract.
        unsafe { &*this.cast::<Self>() }
    }

    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    pub(crate) fn refs(&self) -> u32 {
        self.header.count.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ViewportState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn wrapper(&self) -> Viewport {
        // SAFETY: the fake is live for the test.
        unsafe { Viewport::from_raw_borrowed(self.as_ptr()) }.unwrap()
    }

    fn handlers(&self) -> Vec<*mut c_void> {
        self.state().handlers.iter().map(|&(_, h)| h as *mut c_void).collect()
    }

    /// Deliver `OnViewportStatusChanged` to every handler, as the native
    /// viewport does on its window thread.
    pub(crate) fn fire_status_changed(&self, current: i32, previous: i32) -> Vec<HResult> {
        self.handlers()
            .into_iter()
            .map(|handler| {
                // SAFETY: handler is a referenced event handler object.
                unsafe {
                    let vtbl = &**handler.cast::<*const EventHandlerVtbl>();
                    (vtbl.on_viewport_status_changed)(handler, self.as_ptr(), current, previous)
                }
            })
            .collect()
    }

    pub(crate) fn fire_content_updated(&self, content: *mut c_void) -> Vec<HResult> {
        self.handlers()
            .into_iter()
            .map(|handler| {
                // SAFETY: handler is a referenced event handler object.
                unsafe {
                    let vtbl = &**handler.cast::<*const EventHandlerVtbl>();
                    (vtbl.on_content_updated)(handler, self.as_ptr(), content)
                }
            })
            .collect()
    }
}

impl Drop for FakeViewport {
    /// Handlers are shadows that stay alive while referenced; release them.
    fn drop(&mut self) {
        let handlers = std::mem::take(&mut self.state().handlers);
        for (_, handler) in handlers {
            // SAFETY: the reference was taken in AddEventHandler.
            unsafe { release(handler as *mut c_void) };
        }
    }
}

macro_rules! viewport_slot {
    ($name:ident, $label:literal, |$state:ident| $body:expr) => {
        unsafe extern "system" fn $name(this: *mut c_void) -> HResult {
            // SAFETY: this is a FakeViewport.
            let mut $state = unsafe { FakeViewport::from_this(this) }.state();
            $state.calls.push($label);
            $body
        }
    };
    ($name:ident, $label:literal, |$state:ident, $value:ident| $body:expr) => {
        unsafe extern "system" fn $name(this: *mut c_void, $value: u32) -> HResult {
            // SAFETY: this is a FakeViewport.
            let mut $state = unsafe { FakeViewport::from_this(this) }.state();
            $state.calls.push($label);
            $body
        }
    };
}

viewport_slot!(viewport_enable, "Enable", |state| {
    state.status = 1;
    HResult::S_OK
});
viewport_slot!(viewport_disable, "Disable", |state| {
    state.status = 2;
    HResult::S_OK
});
viewport_slot!(viewport_set_contact, "SetContact", |state, _pointer| HResult::S_OK);
viewport_slot!(viewport_release_contact, "ReleaseContact", |state, _pointer| HResult::S_OK);
viewport_slot!(viewport_release_all_contacts, "ReleaseAllContacts", |state| HResult::S_OK);
viewport_slot!(viewport_set_options, "SetViewportOptions", |state, options| {
    state.options = options;
    HResult::S_OK
});
viewport_slot!(viewport_add_configuration, "AddConfiguration", |state, configuration| {
    state.configurations.push(configuration);
    HResult::S_OK
});
viewport_slot!(viewport_remove_configuration, "RemoveConfiguration", |state, configuration| {
    state.configurations.retain(|&c| c != configuration);
    HResult::S_OK
});
viewport_slot!(viewport_activate_configuration, "ActivateConfiguration", |state, configuration| {
    if !state.configurations.contains(&configuration) {
        return HResult::E_INVALIDARG;
    }
    state.active_configuration = configuration;
    HResult::S_OK
});
viewport_slot!(viewport_set_manual_gesture, "SetManualGesture", |state, _configuration| HResult::S_OK);
viewport_slot!(viewport_set_chaining, "SetChaining", |state, _types| HResult::S_OK);
viewport_slot!(viewport_set_input_mode, "SetInputMode", |state, _mode| HResult::S_OK);
viewport_slot!(viewport_set_update_mode, "SetUpdateMode", |state, _mode| HResult::S_OK);
viewport_slot!(viewport_stop, "Stop", |state| {
    state.status = 5;
    HResult::S_OK
});
viewport_slot!(viewport_abandon, "Abandon", |state| {
    state.status = 2;
    HResult::S_OK
});

unsafe extern "system" fn viewport_get_status(this: *mut c_void, status: *mut i32) -> HResult {
    // SAFETY: this is a FakeViewport; status is writable.
    unsafe { *status = FakeViewport::from_this(this).state().status };
    HResult::S_OK
}

unsafe extern "system" fn viewport_get_tag(
    this: *mut c_void,
    _iid: *const Guid,
    object: *mut *mut c_void,
    id: *mut u32,
) -> HResult {
    // SAFETY: this is a FakeViewport; out pointers are writable.
    unsafe {
        let (stored, tag_id) = FakeViewport::from_this(this).state().tag;
        *id = tag_id;
        if stored == 0 {
            *object = ptr::null_mut();
            return HResult::S_OK;
        }
        hand_out(stored, object)
    }
}

unsafe extern "system" fn viewport_set_tag(this: *mut c_void, object: *mut c_void, id: u32) -> HResult {
    // SAFETY: this is a FakeViewport; object is null or live.
    unsafe {
        let mut state = FakeViewport::from_this(this).state();
        swap_object(&mut state.tag.0, object);
        state.tag.1 = id;
    }
    HResult::S_OK
}

unsafe extern "system" fn viewport_get_rect(this: *mut c_void, rect: *mut Rect) -> HResult {
    // SAFETY: this is a FakeViewport; rect is writable.
    unsafe { *rect = FakeViewport::from_this(this).state().rect };
    HResult::S_OK
}

unsafe extern "system" fn viewport_set_rect(this: *mut c_void, rect: *const Rect) -> HResult {
    // SAFETY: this is a FakeViewport; rect is readable.
    unsafe { FakeViewport::from_this(this).state().rect = *rect };
    HResult::S_OK
}

unsafe extern "system" fn viewport_zoom_to_rect(
    this: *mut c_void,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    animate: RawBool,
) -> HResult {
    // SAFETY: this is a FakeViewport.
    let mut state = unsafe { FakeViewport::from_this(this) }.state();
    state.zoom = Some([left, top, right, bottom]);
    state.animated = animate.as_bool();
    HResult::S_OK
}

/// # Safety
///
/// `matrix` must hold `count` floats.
unsafe fn copy_matrix(target: &mut [f32; TRANSFORM_LEN], matrix: *const f32, count: u32) -> HResult {
    if count as usize != TRANSFORM_LEN || matrix.is_null() {
        return HResult::E_INVALIDARG;
    }
    // SAFETY: forwarded contract.
    unsafe { ptr::copy_nonoverlapping(matrix, target.as_mut_ptr(), TRANSFORM_LEN) };
    HResult::S_OK
}

unsafe extern "system" fn viewport_set_transform(this: *mut c_void, matrix: *const f32, count: u32) -> HResult {
    // SAFETY: this is a FakeViewport; matrix holds count floats.
    unsafe {
        let mut state = FakeViewport::from_this(this).state();
        copy_matrix(&mut state.viewport_transform, matrix, count)
    }
}

unsafe extern "system" fn viewport_sync_display_transform(this: *mut c_void, matrix: *const f32, count: u32) -> HResult {
    // SAFETY: this is a FakeViewport; matrix holds count floats.
    unsafe {
        let mut state = FakeViewport::from_this(this).state();
        copy_matrix(&mut state.display_transform, matrix, count)
    }
}

unsafe extern "system" fn viewport_get_primary_content(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    // SAFETY: this is a FakeViewport; iid and out are valid.
    unsafe {
        if *iid != Content::IID {
            *out = ptr::null_mut();
            return HResult::E_NOINTERFACE;
        }
        let primary = FakeViewport::from_this(this).state().primary;
        hand_out(primary, out)
    }
}

unsafe extern "system" fn viewport_add_content(this: *mut c_void, content: *mut c_void) -> HResult {
    if content.is_null() {
        return HResult::E_POINTER;
    }
    // SAFETY: this is a FakeViewport; content is live.
    unsafe {
        add_ref(content);
        FakeViewport::from_this(this).state().contents.push(content as usize);
    }
    HResult::S_OK
}

unsafe extern "system" fn viewport_remove_content(this: *mut c_void, content: *mut c_void) -> HResult {
    // SAFETY: this is a FakeViewport.
    let mut state = unsafe { FakeViewport::from_this(this) }.state();
    let Some(index) = state.contents.iter().position(|&c| c == content as usize) else {
        return HResult::E_INVALIDARG;
    };
    state.contents.remove(index);
    drop(state);
    // SAFETY: the reference was taken in AddContent.
    unsafe { release(content) };
    HResult::S_OK
}

unsafe extern "system" fn viewport_add_event_handler(
    this: *mut c_void,
    _window: *mut c_void,
    handler: *mut c_void,
    cookie: *mut u32,
) -> HResult {
    if handler.is_null() || cookie.is_null() {
        return HResult::E_POINTER;
    }
    // SAFETY: this is a FakeViewport; handler is live; cookie is writable.
    unsafe {
        add_ref(handler);
        let mut state = FakeViewport::from_this(this).state();
        let id = state.next_cookie;
        state.next_cookie += 1;
        state.handlers.push((id, handler as usize));
        *cookie = id;
    }
    HResult::S_OK
}

unsafe extern "system" fn viewport_remove_event_handler(this: *mut c_void, cookie: u32) -> HResult {
    // SAFETY: this is a FakeViewport.
    let mut state = unsafe { FakeViewport::from_this(this) }.state();
    let Some(index) = state.handlers.iter().position(|&(id, _)| id == cookie) else {
        return HResult::E_INVALIDARG;
    };
    let (_, handler) = state.handlers.remove(index);
    drop(state);
    // SAFETY: the reference was taken in AddEventHandler.
    unsafe { release(handler as *mut c_void) };
    HResult::S_OK
}
