//! `IDirectManipulationContent`: the surface a viewport moves.

use std::ffi::c_void;
use std::ptr;

use sharpcom_core::{com_interface, ComObject, Error, Guid, HResult, IUnknownVtbl, Interface, Result};

use crate::types::{self, ContentTransform, GetTagFn, Rect, SetTagFn, Tag};
use crate::viewport::Viewport;

/// `IDirectManipulationContent` vtable.
#[repr(C)]
pub struct ContentVtbl {
    pub base: IUnknownVtbl,
    pub get_content_rect: unsafe extern "system" fn(this: *mut c_void, rect: *mut Rect) -> HResult,
    pub set_content_rect: unsafe extern "system" fn(this: *mut c_void, rect: *const Rect) -> HResult,
    pub get_viewport:
        unsafe extern "system" fn(this: *mut c_void, iid: *const Guid, object: *mut *mut c_void) -> HResult,
    pub get_tag: GetTagFn,
    pub set_tag: SetTagFn,
    pub get_output_transform: unsafe extern "system" fn(this: *mut c_void, matrix: *mut f32, count: u32) -> HResult,
    pub get_content_transform: unsafe extern "system" fn(this: *mut c_void, matrix: *mut f32, count: u32) -> HResult,
    pub sync_content_transform:
        unsafe extern "system" fn(this: *mut c_void, matrix: *const f32, count: u32) -> HResult,
}

com_interface! {
    /// Content inside a viewport.
    pub struct Content("IDirectManipulationContent", "B89962CB-3D89-442B-BB58-5098FA0F9F16", ContentVtbl);
}

impl Content {
    /// Bounds of the content, in content coordinates.
    pub fn content_rect(&self) -> Result<Rect> {
        let (vtbl, this) = self.vtbl()?;
        let mut rect = Rect::default();
        // SAFETY: rect is a valid out pointer.
        unsafe { (vtbl.get_content_rect)(this, &mut rect) }.ok()?;
        Ok(rect)
    }

    pub fn set_content_rect(&self, rect: &Rect) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: rect outlives the call.
        unsafe { (vtbl.set_content_rect)(this, rect) }.ok()
    }

    /// The viewport this content belongs to.
    pub fn viewport(&self) -> Result<Viewport> {
        let (vtbl, this) = self.vtbl()?;
        let mut object = ptr::null_mut();
        // SAFETY: the out pointer is valid; a success returns a new reference.
        unsafe { (vtbl.get_viewport)(this, &Viewport::IID, &mut object) }.ok()?;
        // SAFETY: object is a fresh Viewport reference or null.
        unsafe { Viewport::from_raw(object) }.ok_or(Error::NullPointer)
    }

    pub fn tag(&self) -> Result<Tag> {
        let (vtbl, this) = self.vtbl()?;
        types::get_tag(vtbl.get_tag, this)
    }

    pub fn set_tag(&self, object: Option<&ComObject>, id: u32) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        types::set_tag(vtbl.set_tag, this, object, id)
    }

    /// Transform applied to the content's visual, including any
    /// non-manipulation offsets.
    pub fn output_transform(&self) -> Result<ContentTransform> {
        let (vtbl, this) = self.vtbl()?;
        types::read_transform(vtbl.get_output_transform, this)
    }

    /// Transform produced by the manipulation alone.
    pub fn content_transform(&self) -> Result<ContentTransform> {
        let (vtbl, this) = self.vtbl()?;
        types::read_transform(vtbl.get_content_transform, this)
    }

    /// Overwrite the content transform, e.g. to snap after a manipulation.
    pub fn sync_content_transform(&self, transform: &ContentTransform) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        types::write_transform(vtbl.sync_content_transform, this, transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeContent, FakeViewport};

    #[test]
    fn test_rect_round_trip() {
        let fake = FakeContent::new();
        let content = fake.wrapper();
        content.set_content_rect(&Rect::new(0, 0, 800, 600)).unwrap();
        assert_eq!(content.content_rect().unwrap(), Rect::new(0, 0, 800, 600));
        drop(content);
        assert_eq!(fake.refs(), 1);
    }

    #[test]
    fn test_transforms() {
        let fake = FakeContent::new();
        let content = fake.wrapper();
        assert!(content.content_transform().unwrap().is_identity());

        let zoomed = ContentTransform::scale(1.5, 1.5);
        content.sync_content_transform(&zoomed).unwrap();
        assert_eq!(content.content_transform().unwrap(), zoomed);
        assert_eq!(content.output_transform().unwrap().m11, 1.5);
        assert_eq!(fake.state().calls, vec!["GetContentTransform", "SyncContentTransform", "GetContentTransform", "GetOutputTransform"]);
    }

    #[test]
    fn test_tag() {
        let fake = FakeContent::new();
        let content = fake.wrapper();
        assert!(content.tag().unwrap().object.is_none());

        let other = FakeContent::new();
        let other_wrapper = other.wrapper();
        content.set_tag(Some(&other_wrapper), 42).unwrap();
        assert_eq!(other.refs(), 3);

        let tag = content.tag().unwrap();
        assert_eq!(tag.id, 42);
        assert_eq!(tag.object.as_ref().map(|o| o.as_raw()), Some(other.as_ptr()));
        drop(tag);
        content.set_tag(None, 0).unwrap();
        assert_eq!(other.refs(), 2);
    }

    #[test]
    fn test_viewport_back_reference() {
        let viewport = FakeViewport::new();
        let fake = FakeContent::new();
        fake.state().viewport = viewport.as_ptr() as usize;
        let content = fake.wrapper();

        let owner = content.viewport().unwrap();
        assert_eq!(owner.as_raw(), viewport.as_ptr());
        assert_eq!(viewport.refs(), 2);
        drop(owner);
        assert_eq!(viewport.refs(), 1);
    }

    #[test]
    fn test_missing_viewport() {
        let fake = FakeContent::new();
        let content = fake.wrapper();
        assert!(content.viewport().is_err());
    }

    #[test]
    fn test_disposed_content() {
        let fake = FakeContent::new();
        let content = fake.wrapper();
        content.dispose();
        assert_eq!(content.content_rect(), Err(Error::Disposed));
        assert_eq!(fake.refs(), 1);
    }
}
