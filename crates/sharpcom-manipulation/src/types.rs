//! Value types shared by content, viewport and event handler.

use std::ffi::c_void;
use std::ptr;

use serde::{Deserialize, Serialize};
use sharpcom_core::object::IID_IUNKNOWN;
use sharpcom_core::{ComObject, Error, Guid, HResult, Interface, Result, Unknown};

/// Native `RECT`, in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// Number of floats in a DirectManipulation transform.
pub const TRANSFORM_LEN: usize = 6;

/// A 2D affine transform as DirectManipulation passes it: six floats,
/// row-major `[m11, m12, m21, m22, dx, dy]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentTransform {
    pub m11: f32,
    pub m12: f32,
    pub m21: f32,
    pub m22: f32,
    pub m31: f32,
    pub m32: f32,
}

impl Default for ContentTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ContentTransform {
    pub const IDENTITY: ContentTransform = ContentTransform::from_array([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub const fn from_array(m: [f32; TRANSFORM_LEN]) -> Self {
        Self {
            m11: m[0],
            m12: m[1],
            m21: m[2],
            m22: m[3],
            m31: m[4],
            m32: m[5],
        }
    }

    pub const fn to_array(self) -> [f32; TRANSFORM_LEN] {
        [self.m11, self.m12, self.m21, self.m22, self.m31, self.m32]
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::from_array([sx, 0.0, 0.0, sy, 0.0, 0.0])
    }

    pub const fn translation(dx: f32, dy: f32) -> Self {
        Self::from_array([1.0, 0.0, 0.0, 1.0, dx, dy])
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Horizontal zoom factor.
    pub fn zoom(&self) -> f32 {
        self.m11
    }

    /// `(x, y)` mapped through the transform.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.m11 + y * self.m21 + self.m31,
            x * self.m12 + y * self.m22 + self.m32,
        )
    }
}

/// `DIRECTMANIPULATION_STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ViewportStatus {
    Building = 0,
    Enabled = 1,
    Disabled = 2,
    Running = 3,
    Inertia = 4,
    Ready = 5,
    Suspended = 6,
}

impl TryFrom<i32> for ViewportStatus {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => Self::Building,
            1 => Self::Enabled,
            2 => Self::Disabled,
            3 => Self::Running,
            4 => Self::Inertia,
            5 => Self::Ready,
            6 => Self::Suspended,
            other => return Err(Error::InvalidArgument(format!("unknown viewport status {other}"))),
        })
    }
}

/// `DIRECTMANIPULATION_INPUT_MODE`, also used for the update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum InputMode {
    #[default]
    Automatic = 0,
    Manual = 1,
}

macro_rules! flags {
    ($(#[$meta:meta])* $name:ident { $($(#[$flag_meta:meta])* $flag:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$flag_meta])* pub const $flag: $name = $name($value);)*

            #[inline]
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

flags! {
    /// `DIRECTMANIPULATION_VIEWPORT_OPTIONS`
    ViewportOptions {
        DEFAULT = 0x0,
        AUTODISABLE = 0x1,
        MANUALUPDATE = 0x2,
        INPUT = 0x4,
        EXPLICITHITTEST = 0x8,
        DISABLEPIXELSNAPPING = 0x10,
    }
}

flags! {
    /// `DIRECTMANIPULATION_CONFIGURATION`: which interactions a viewport
    /// responds to.
    ManipulationConfiguration {
        NONE = 0x0,
        INTERACTION = 0x1,
        TRANSLATION_X = 0x2,
        TRANSLATION_Y = 0x4,
        SCALING = 0x10,
        TRANSLATION_INERTIA = 0x20,
        SCALING_INERTIA = 0x80,
        RAILS_X = 0x100,
        RAILS_Y = 0x200,
    }
}

flags! {
    /// `DIRECTMANIPULATION_MOTION_TYPES`
    MotionTypes {
        NONE = 0x0,
        TRANSLATE_X = 0x1,
        TRANSLATE_Y = 0x2,
        ZOOM = 0x4,
        CENTER_X = 0x10,
        CENTER_Y = 0x20,
        ALL = 0x37,
    }
}

/// The object and id attached to a content or viewport with `SetTag`.
#[derive(Debug, Clone, Default)]
pub struct Tag {
    pub object: Option<Unknown>,
    pub id: u32,
}

/// `GetTag` slot, identical for content and viewport.
pub type GetTagFn =
    unsafe extern "system" fn(this: *mut c_void, iid: *const Guid, object: *mut *mut c_void, id: *mut u32) -> HResult;
/// `SetTag` slot, identical for content and viewport.
pub type SetTagFn = unsafe extern "system" fn(this: *mut c_void, object: *mut c_void, id: u32) -> HResult;

pub(crate) fn get_tag(slot: GetTagFn, this: *mut c_void) -> Result<Tag> {
    let mut object = ptr::null_mut();
    let mut id = 0u32;
    // SAFETY: out pointers are valid for the call; this is live.
    unsafe { slot(this, &IID_IUNKNOWN, &mut object, &mut id) }.ok()?;
    Ok(Tag {
        // SAFETY: a non-null object is a fresh reference owned by us.
        object: unsafe { Unknown::from_raw(object) },
        id,
    })
}

pub(crate) fn set_tag(slot: SetTagFn, this: *mut c_void, object: Option<&ComObject>, id: u32) -> Result<()> {
    let object = match object {
        Some(object) => object.raw()?,
        None => ptr::null_mut(),
    };
    // SAFETY: the native side takes its own reference to object.
    unsafe { slot(this, object, id) }.ok()
}

/// Read a six-float transform through a `(float*, DWORD)` slot.
pub(crate) fn read_transform(
    slot: unsafe extern "system" fn(*mut c_void, *mut f32, u32) -> HResult,
    this: *mut c_void,
) -> Result<ContentTransform> {
    let mut matrix = [0f32; TRANSFORM_LEN];
    // SAFETY: matrix holds TRANSFORM_LEN floats.
    unsafe { slot(this, matrix.as_mut_ptr(), TRANSFORM_LEN as u32) }.ok()?;
    Ok(ContentTransform::from_array(matrix))
}

/// Send a six-float transform through a `(const float*, DWORD)` slot.
pub(crate) fn write_transform(
    slot: unsafe extern "system" fn(*mut c_void, *const f32, u32) -> HResult,
    this: *mut c_void,
    transform: &ContentTransform,
) -> Result<()> {
    let matrix = transform.to_array();
    // SAFETY: matrix holds TRANSFORM_LEN floats for the call.
    unsafe { slot(this, matrix.as_ptr(), TRANSFORM_LEN as u32) }.ok()
}
