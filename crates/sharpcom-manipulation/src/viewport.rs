//! `IDirectManipulationViewport`: the region that receives input and moves
//! its content.

use std::ffi::c_void;
use std::ptr;

use sharpcom_core::marshal::RawBool;
use sharpcom_core::{com_interface, ComObject, Error, Guid, HResult, IUnknownVtbl, Interface, Result, Shadow};

use crate::content::Content;
use crate::event_handler::EventHandler;
use crate::types::{
    self, ContentTransform, GetTagFn, InputMode, ManipulationConfiguration, MotionTypes, Rect, SetTagFn, Tag,
    ViewportOptions, ViewportStatus,
};

type ThisFn = unsafe extern "system" fn(this: *mut c_void) -> HResult;
type U32Fn = unsafe extern "system" fn(this: *mut c_void, value: u32) -> HResult;
type ContentFn = unsafe extern "system" fn(this: *mut c_void, content: *mut c_void) -> HResult;
type MatrixFn = unsafe extern "system" fn(this: *mut c_void, matrix: *const f32, count: u32) -> HResult;

/// `IDirectManipulationViewport` vtable.
#[repr(C)]
pub struct ViewportVtbl {
    pub base: IUnknownVtbl,
    pub enable: ThisFn,
    pub disable: ThisFn,
    pub set_contact: U32Fn,
    pub release_contact: U32Fn,
    pub release_all_contacts: ThisFn,
    pub get_status: unsafe extern "system" fn(this: *mut c_void, status: *mut i32) -> HResult,
    pub get_tag: GetTagFn,
    pub set_tag: SetTagFn,
    pub get_viewport_rect: unsafe extern "system" fn(this: *mut c_void, rect: *mut Rect) -> HResult,
    pub set_viewport_rect: unsafe extern "system" fn(this: *mut c_void, rect: *const Rect) -> HResult,
    pub zoom_to_rect: unsafe extern "system" fn(
        this: *mut c_void,
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        animate: RawBool,
    ) -> HResult,
    pub set_viewport_transform: MatrixFn,
    pub sync_display_transform: MatrixFn,
    pub get_primary_content:
        unsafe extern "system" fn(this: *mut c_void, iid: *const Guid, object: *mut *mut c_void) -> HResult,
    pub add_content: ContentFn,
    pub remove_content: ContentFn,
    pub set_viewport_options: U32Fn,
    pub add_configuration: U32Fn,
    pub remove_configuration: U32Fn,
    pub activate_configuration: U32Fn,
    pub set_manual_gesture: U32Fn,
    pub set_chaining: U32Fn,
    pub add_event_handler: unsafe extern "system" fn(
        this: *mut c_void,
        window: *mut c_void,
        handler: *mut c_void,
        cookie: *mut u32,
    ) -> HResult,
    pub remove_event_handler: U32Fn,
    pub set_input_mode: U32Fn,
    pub set_update_mode: U32Fn,
    pub stop: ThisFn,
    pub abandon: ThisFn,
}

com_interface! {
    /// A DirectManipulation viewport.
    pub struct Viewport("IDirectManipulationViewport", "28B85A3D-60A0-48BD-9BA1-5CE8D9EA3A6D", ViewportVtbl);
}

impl Viewport {
    fn call(&self, slot: impl FnOnce(&ViewportVtbl) -> ThisFn) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: this is live; the slot takes no other arguments.
        unsafe { slot(vtbl)(this) }.ok()
    }

    fn call_u32(&self, slot: impl FnOnce(&ViewportVtbl) -> U32Fn, value: u32) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: this is live; value is passed by value.
        unsafe { slot(vtbl)(this, value) }.ok()
    }

    /// Start processing input and callbacks.
    pub fn enable(&self) -> Result<()> {
        self.call(|v| v.enable)
    }

    pub fn disable(&self) -> Result<()> {
        self.call(|v| v.disable)
    }

    /// Route pointer `pointer_id` to this viewport.
    pub fn set_contact(&self, pointer_id: u32) -> Result<()> {
        self.call_u32(|v| v.set_contact, pointer_id)
    }

    pub fn release_contact(&self, pointer_id: u32) -> Result<()> {
        self.call_u32(|v| v.release_contact, pointer_id)
    }

    pub fn release_all_contacts(&self) -> Result<()> {
        self.call(|v| v.release_all_contacts)
    }

    pub fn status(&self) -> Result<ViewportStatus> {
        let (vtbl, this) = self.vtbl()?;
        let mut status = 0i32;
        // SAFETY: status is a valid out pointer.
        unsafe { (vtbl.get_status)(this, &mut status) }.ok()?;
        ViewportStatus::try_from(status)
    }

    pub fn tag(&self) -> Result<Tag> {
        let (vtbl, this) = self.vtbl()?;
        types::get_tag(vtbl.get_tag, this)
    }

    pub fn set_tag(&self, object: Option<&ComObject>, id: u32) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        types::set_tag(vtbl.set_tag, this, object, id)
    }

    /// Bounds of the viewport in client coordinates.
    pub fn viewport_rect(&self) -> Result<Rect> {
        let (vtbl, this) = self.vtbl()?;
        let mut rect = Rect::default();
        // SAFETY: rect is a valid out pointer.
        unsafe { (vtbl.get_viewport_rect)(this, &mut rect) }.ok()?;
        Ok(rect)
    }

    pub fn set_viewport_rect(&self, rect: &Rect) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: rect outlives the call.
        unsafe { (vtbl.set_viewport_rect)(this, rect) }.ok()
    }

    /// Move and zoom so the content rectangle fills the viewport.
    pub fn zoom_to_rect(&self, left: f32, top: f32, right: f32, bottom: f32, animate: bool) -> Result<()> {
        if right <= left || bottom <= top {
            return Err(Error::InvalidArgument(format!(
                "empty zoom rectangle ({left}, {top}) - ({right}, {bottom})"
            )));
        }
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: plain values only.
        unsafe { (vtbl.zoom_to_rect)(this, left, top, right, bottom, RawBool::from(animate)) }.ok()
    }

    /// Transform from viewport to client coordinates.
    pub fn set_viewport_transform(&self, transform: &ContentTransform) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        types::write_transform(vtbl.set_viewport_transform, this, transform)
    }

    /// Tell the viewport about the transform actually displayed.
    pub fn sync_display_transform(&self, transform: &ContentTransform) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        types::write_transform(vtbl.sync_display_transform, this, transform)
    }

    /// The content created with the viewport.
    pub fn primary_content(&self) -> Result<Content> {
        let (vtbl, this) = self.vtbl()?;
        let mut object = ptr::null_mut();
        // SAFETY: the out pointer is valid; a success returns a new reference.
        unsafe { (vtbl.get_primary_content)(this, &Content::IID, &mut object) }.ok()?;
        // SAFETY: object is a fresh Content reference or null.
        unsafe { Content::from_raw(object) }.ok_or(Error::NullPointer)
    }

    /// Add secondary content. The viewport keeps its own reference.
    pub fn add_content(&self, content: &Content) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let content = content.raw()?;
        // SAFETY: content is live for the call; the callee AddRefs it.
        unsafe { (vtbl.add_content)(this, content) }.ok()
    }

    pub fn remove_content(&self, content: &Content) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let content = content.raw()?;
        // SAFETY: content is live for the call.
        unsafe { (vtbl.remove_content)(this, content) }.ok()
    }

    pub fn set_viewport_options(&self, options: ViewportOptions) -> Result<()> {
        self.call_u32(|v| v.set_viewport_options, options.0)
    }

    pub fn add_configuration(&self, configuration: ManipulationConfiguration) -> Result<()> {
        self.call_u32(|v| v.add_configuration, configuration.0)
    }

    pub fn remove_configuration(&self, configuration: ManipulationConfiguration) -> Result<()> {
        self.call_u32(|v| v.remove_configuration, configuration.0)
    }

    pub fn activate_configuration(&self, configuration: ManipulationConfiguration) -> Result<()> {
        self.call_u32(|v| v.activate_configuration, configuration.0)
    }

    /// `DIRECTMANIPULATION_GESTURE_CONFIGURATION` bits.
    pub fn set_manual_gesture(&self, configuration: u32) -> Result<()> {
        self.call_u32(|v| v.set_manual_gesture, configuration)
    }

    /// Motions handed to the parent viewport once this one hits a boundary.
    pub fn set_chaining(&self, enabled_types: MotionTypes) -> Result<()> {
        self.call_u32(|v| v.set_chaining, enabled_types.0)
    }

    /// Register a bound event handler shadow. Returns the cookie for
    /// [`remove_event_handler`](Self::remove_event_handler).
    ///
    /// `window` is the `HWND` whose thread receives the callbacks; null
    /// uses the viewport's own window.
    pub fn add_event_handler(&self, window: *mut c_void, handler: &Shadow) -> Result<u32> {
        let (vtbl, this) = self.vtbl()?;
        let handler = handler.as_raw_for(&EventHandler::IID)?;
        let mut cookie = 0u32;
        // SAFETY: handler is a live shadow block; the callee AddRefs it.
        unsafe { (vtbl.add_event_handler)(this, window, handler, &mut cookie) }.ok()?;
        log::debug!("viewport event handler registered, cookie {cookie}");
        Ok(cookie)
    }

    pub fn remove_event_handler(&self, cookie: u32) -> Result<()> {
        self.call_u32(|v| v.remove_event_handler, cookie)
    }

    pub fn set_input_mode(&self, mode: InputMode) -> Result<()> {
        self.call_u32(|v| v.set_input_mode, mode as u32)
    }

    pub fn set_update_mode(&self, mode: InputMode) -> Result<()> {
        self.call_u32(|v| v.set_update_mode, mode as u32)
    }

    /// End the current manipulation, snapping to the nearest rest point.
    pub fn stop(&self) -> Result<()> {
        self.call(|v| v.stop)
    }

    /// Stop and release every resource; the viewport is unusable after.
    pub fn abandon(&self) -> Result<()> {
        self.call(|v| v.abandon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeContent, FakeViewport};
    use std::mem::size_of;

    #[test]
    fn test_vtable_layout() {
        assert_eq!(size_of::<ViewportVtbl>(), 31 * size_of::<usize>());
    }

    #[test]
    fn test_enable_disable_status() {
        let fake = FakeViewport::new();
        let viewport = fake.wrapper();
        assert_eq!(viewport.status().unwrap(), ViewportStatus::Building);
        viewport.enable().unwrap();
        assert_eq!(viewport.status().unwrap(), ViewportStatus::Enabled);
        viewport.disable().unwrap();
        assert_eq!(viewport.status().unwrap(), ViewportStatus::Disabled);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let fake = FakeViewport::new();
        fake.state().status = 42;
        assert!(matches!(fake.wrapper().status(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rect_and_zoom() {
        let fake = FakeViewport::new();
        let viewport = fake.wrapper();
        viewport.set_viewport_rect(&Rect::new(0, 0, 640, 480)).unwrap();
        assert_eq!(viewport.viewport_rect().unwrap(), Rect::new(0, 0, 640, 480));

        viewport.zoom_to_rect(10.0, 20.0, 330.0, 260.0, true).unwrap();
        assert_eq!(fake.state().zoom, Some([10.0, 20.0, 330.0, 260.0]));
        assert!(fake.state().animated);
        assert!(viewport.zoom_to_rect(5.0, 5.0, 5.0, 10.0, false).is_err());
    }

    #[test]
    fn test_transforms_reach_native() {
        let fake = FakeViewport::new();
        let viewport = fake.wrapper();
        viewport.set_viewport_transform(&ContentTransform::translation(3.0, 4.0)).unwrap();
        assert_eq!(fake.state().viewport_transform, [1.0, 0.0, 0.0, 1.0, 3.0, 4.0]);
        viewport.sync_display_transform(&ContentTransform::scale(2.0, 2.0)).unwrap();
        assert_eq!(fake.state().display_transform, [2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_primary_and_secondary_content() {
        let fake = FakeViewport::new();
        let primary = FakeContent::new();
        fake.state().primary = primary.as_ptr() as usize;
        let viewport = fake.wrapper();

        let content = viewport.primary_content().unwrap();
        assert_eq!(content.as_raw(), primary.as_ptr());
        assert_eq!(primary.refs(), 2);

        let secondary = FakeContent::new();
        let secondary_wrapper = secondary.wrapper();
        viewport.add_content(&secondary_wrapper).unwrap();
        assert_eq!(secondary.refs(), 3);
        viewport.remove_content(&secondary_wrapper).unwrap();
        assert_eq!(secondary.refs(), 2);
        assert!(viewport.remove_content(&secondary_wrapper).is_err());
    }

    #[test]
    fn test_configuration_and_modes() {
        let fake = FakeViewport::new();
        let viewport = fake.wrapper();
        let pan = ManipulationConfiguration::INTERACTION | ManipulationConfiguration::TRANSLATION_X;
        viewport.add_configuration(pan).unwrap();
        viewport.activate_configuration(pan).unwrap();
        viewport.set_viewport_options(ViewportOptions::MANUALUPDATE).unwrap();
        viewport.set_chaining(MotionTypes::ALL).unwrap();
        viewport.set_input_mode(InputMode::Manual).unwrap();
        viewport.set_update_mode(InputMode::Manual).unwrap();
        viewport.set_contact(7).unwrap();
        viewport.release_contact(7).unwrap();
        viewport.release_all_contacts().unwrap();
        viewport.set_manual_gesture(0).unwrap();
        viewport.remove_configuration(pan).unwrap();
        viewport.stop().unwrap();
        viewport.abandon().unwrap();

        let state = fake.state();
        assert_eq!(state.active_configuration, pan.0);
        assert!(state.configurations.is_empty());
        assert_eq!(state.options, ViewportOptions::MANUALUPDATE.0);
        assert_eq!(
            state.calls,
            vec![
                "AddConfiguration",
                "ActivateConfiguration",
                "SetViewportOptions",
                "SetChaining",
                "SetInputMode",
                "SetUpdateMode",
                "SetContact",
                "ReleaseContact",
                "ReleaseAllContacts",
                "SetManualGesture",
                "RemoveConfiguration",
                "Stop",
                "Abandon",
            ]
        );
    }

    #[test]
    fn test_tag_round_trip() {
        let fake = FakeViewport::new();
        let viewport = fake.wrapper();
        viewport.set_tag(None, 9).unwrap();
        let tag = viewport.tag().unwrap();
        assert_eq!(tag.id, 9);
        assert!(tag.object.is_none());
    }
}
