//! X3DAudio positional audio.
//!
//! `X3DAudioCalculate` reads a listener and an emitter, both full of
//! pointers to optional cones, azimuth arrays and distance curves, and
//! writes coefficients into caller-owned arrays. The Rust types here own
//! all of that data and implement [`Marshal`]; the native frames are built
//! in a [`ScratchArena`] for each call. Native layouts use 1-byte packing,
//! as in `x3daudio.h`.
//!
//! The library itself is reached through [`X3DAudioApi`], the two entry
//! points resolved by the caller from `XAudio2_9.dll` / `X3DAudio1_7.dll`.

use std::ptr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sharpcom_core::marshal::{self, native_count, Marshal};
use sharpcom_core::{Error, HResult, MemoryStats, Result, ScratchArena};

/// Speed of sound in meters per second, `X3DAUDIO_SPEED_OF_SOUND`.
pub const SPEED_OF_SOUND: f32 = 343.5;
/// Size of the opaque calculation handle.
pub const HANDLE_BYTESIZE: usize = 20;

/// Speaker position bits and the common channel masks.
pub mod speakers {
    pub const FRONT_LEFT: u32 = 0x1;
    pub const FRONT_RIGHT: u32 = 0x2;
    pub const FRONT_CENTER: u32 = 0x4;
    pub const LOW_FREQUENCY: u32 = 0x8;
    pub const BACK_LEFT: u32 = 0x10;
    pub const BACK_RIGHT: u32 = 0x20;
    pub const FRONT_LEFT_OF_CENTER: u32 = 0x40;
    pub const FRONT_RIGHT_OF_CENTER: u32 = 0x80;
    pub const BACK_CENTER: u32 = 0x100;
    pub const SIDE_LEFT: u32 = 0x200;
    pub const SIDE_RIGHT: u32 = 0x400;

    pub const MONO: u32 = FRONT_CENTER;
    pub const STEREO: u32 = FRONT_LEFT | FRONT_RIGHT;
    pub const TWO_POINT_ONE: u32 = STEREO | LOW_FREQUENCY;
    pub const SURROUND: u32 = STEREO | FRONT_CENTER | BACK_CENTER;
    pub const QUAD: u32 = STEREO | BACK_LEFT | BACK_RIGHT;
    pub const FOUR_POINT_ONE: u32 = QUAD | LOW_FREQUENCY;
    pub const FIVE_POINT_ONE: u32 = QUAD | FRONT_CENTER | LOW_FREQUENCY;
    pub const SEVEN_POINT_ONE: u32 = FIVE_POINT_ONE | FRONT_LEFT_OF_CENTER | FRONT_RIGHT_OF_CENTER;
    pub const FIVE_POINT_ONE_SURROUND: u32 = STEREO | FRONT_CENTER | LOW_FREQUENCY | SIDE_LEFT | SIDE_RIGHT;
    pub const SEVEN_POINT_ONE_SURROUND: u32 = FIVE_POINT_ONE_SURROUND | BACK_LEFT | BACK_RIGHT;

    /// Number of speakers in `mask`.
    pub const fn channel_count(mask: u32) -> u32 {
        mask.count_ones()
    }
}

/// `X3DAUDIO_CALCULATE_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalculateFlags(pub u32);

impl CalculateFlags {
    pub const MATRIX: CalculateFlags = CalculateFlags(0x0000_0001);
    pub const DELAY: CalculateFlags = CalculateFlags(0x0000_0002);
    pub const LPF_DIRECT: CalculateFlags = CalculateFlags(0x0000_0004);
    pub const LPF_REVERB: CalculateFlags = CalculateFlags(0x0000_0008);
    pub const REVERB: CalculateFlags = CalculateFlags(0x0000_0010);
    pub const DOPPLER: CalculateFlags = CalculateFlags(0x0000_0020);
    pub const EMITTER_ANGLE: CalculateFlags = CalculateFlags(0x0000_0040);
    pub const ZEROCENTER: CalculateFlags = CalculateFlags(0x0001_0000);
    pub const REDIRECT_TO_LFE: CalculateFlags = CalculateFlags(0x0002_0000);

    #[inline]
    pub const fn contains(self, other: CalculateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CalculateFlags {
    type Output = CalculateFlags;

    fn bitor(self, rhs: CalculateFlags) -> CalculateFlags {
        CalculateFlags(self.0 | rhs.0)
    }
}

// =========================================================================
// Plain value types (shared layout)
// =========================================================================

/// `X3DAUDIO_VECTOR`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    /// Default front orientation, +Z.
    pub const FRONT: Vector3 = Vector3::new(0.0, 0.0, 1.0);
    /// Default top orientation, +Y.
    pub const UP: Vector3 = Vector3::new(0.0, 1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }
}

impl std::ops::Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// `X3DAUDIO_CONE`: angles in radians, levels as linear scalers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cone {
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub inner_volume: f32,
    pub outer_volume: f32,
    pub inner_lpf: f32,
    pub outer_lpf: f32,
    pub inner_reverb: f32,
    pub outer_reverb: f32,
}

impl Cone {
    /// `X3DAudioDefault_DirectionalCone`
    pub const DIRECTIONAL: Cone = Cone {
        inner_angle: std::f32::consts::FRAC_PI_2,
        outer_angle: std::f32::consts::PI,
        inner_volume: 1.0,
        outer_volume: 0.708,
        inner_lpf: 0.0,
        outer_lpf: 0.25,
        inner_reverb: 0.708,
        outer_reverb: 1.0,
    };
}

/// `X3DAUDIO_DISTANCE_CURVE_POINT`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Normalized distance, 0.0 to 1.0.
    pub distance: f32,
    pub dsp_setting: f32,
}

impl CurvePoint {
    pub const fn new(distance: f32, dsp_setting: f32) -> Self {
        Self { distance, dsp_setting }
    }
}

/// A piecewise-linear curve over normalized distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceCurve {
    pub points: Vec<CurvePoint>,
}

impl DistanceCurve {
    pub fn new(points: Vec<CurvePoint>) -> Self {
        Self { points }
    }

    /// `X3DAudioDefault_LinearCurve`: full level at the emitter, silence at
    /// the curve distance scaler.
    pub fn linear() -> Self {
        Self::new(vec![CurvePoint::new(0.0, 1.0), CurvePoint::new(1.0, 0.0)])
    }

    /// At least two points, ascending distance from 0.0 to 1.0.
    pub fn validate(&self) -> Result<()> {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return Err(Error::InvalidArgument("distance curve has no points".into()));
        };
        if self.points.len() < 2 {
            return Err(Error::InvalidArgument("distance curve needs at least two points".into()));
        }
        if first.distance != 0.0 || last.distance != 1.0 {
            return Err(Error::InvalidArgument(format!(
                "distance curve must span 0.0 to 1.0, got {} to {}",
                first.distance, last.distance
            )));
        }
        if self.points.windows(2).any(|pair| pair[1].distance < pair[0].distance) {
            return Err(Error::InvalidArgument("distance curve points are not ascending".into()));
        }
        Ok(())
    }
}

// =========================================================================
// Native frames
// =========================================================================

/// `X3DAUDIO_DISTANCE_CURVE`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct DistanceCurveNative {
    pub points: *const CurvePoint,
    pub point_count: u32,
}

impl Default for DistanceCurveNative {
    fn default() -> Self {
        Self {
            points: ptr::null(),
            point_count: 0,
        }
    }
}

/// `X3DAUDIO_LISTENER`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct ListenerNative {
    pub orient_front: Vector3,
    pub orient_top: Vector3,
    pub position: Vector3,
    pub velocity: Vector3,
    pub cone: *const Cone,
}

impl Default for ListenerNative {
    fn default() -> Self {
        Self {
            orient_front: Vector3::ZERO,
            orient_top: Vector3::ZERO,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            cone: ptr::null(),
        }
    }
}

/// `X3DAUDIO_EMITTER`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct EmitterNative {
    pub cone: *const Cone,
    pub orient_front: Vector3,
    pub orient_top: Vector3,
    pub position: Vector3,
    pub velocity: Vector3,
    pub inner_radius: f32,
    pub inner_radius_angle: f32,
    pub channel_count: u32,
    pub channel_radius: f32,
    pub channel_azimuths: *const f32,
    pub volume_curve: *const DistanceCurveNative,
    pub lfe_curve: *const DistanceCurveNative,
    pub lpf_direct_curve: *const DistanceCurveNative,
    pub lpf_reverb_curve: *const DistanceCurveNative,
    pub reverb_curve: *const DistanceCurveNative,
    pub curve_distance_scaler: f32,
    pub doppler_scaler: f32,
}

impl Default for EmitterNative {
    fn default() -> Self {
        Self {
            cone: ptr::null(),
            orient_front: Vector3::ZERO,
            orient_top: Vector3::ZERO,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            inner_radius: 0.0,
            inner_radius_angle: 0.0,
            channel_count: 0,
            channel_radius: 0.0,
            channel_azimuths: ptr::null(),
            volume_curve: ptr::null(),
            lfe_curve: ptr::null(),
            lpf_direct_curve: ptr::null(),
            lpf_reverb_curve: ptr::null(),
            reverb_curve: ptr::null(),
            curve_distance_scaler: 0.0,
            doppler_scaler: 0.0,
        }
    }
}

/// `X3DAUDIO_DSP_SETTINGS`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct DspSettingsNative {
    pub matrix_coefficients: *mut f32,
    pub delay_times: *mut f32,
    pub src_channel_count: u32,
    pub dst_channel_count: u32,
    pub lpf_direct_coefficient: f32,
    pub lpf_reverb_coefficient: f32,
    pub reverb_level: f32,
    pub doppler_factor: f32,
    pub emitter_to_listener_angle: f32,
    pub emitter_to_listener_distance: f32,
    pub emitter_velocity_component: f32,
    pub listener_velocity_component: f32,
}

impl Default for DspSettingsNative {
    fn default() -> Self {
        Self {
            matrix_coefficients: ptr::null_mut(),
            delay_times: ptr::null_mut(),
            src_channel_count: 0,
            dst_channel_count: 0,
            lpf_direct_coefficient: 0.0,
            lpf_reverb_coefficient: 0.0,
            reverb_level: 0.0,
            doppler_factor: 0.0,
            emitter_to_listener_angle: 0.0,
            emitter_to_listener_distance: 0.0,
            emitter_velocity_component: 0.0,
            listener_velocity_component: 0.0,
        }
    }
}

fn optional_value<T: Copy>(arena: &mut ScratchArena, value: Option<T>) -> Result<*const T> {
    match value {
        Some(value) => Ok(arena.alloc_value(value)?.cast_const()),
        None => Ok(ptr::null()),
    }
}

/// Curve header with its points in `arena`. A missing curve keeps a null
/// header, which the emitter frame turns into a null pointer.
fn curve_header(arena: &mut ScratchArena, curve: Option<&DistanceCurve>) -> Result<DistanceCurveNative> {
    let Some(curve) = curve else {
        return Ok(DistanceCurveNative::default());
    };
    curve.validate()?;
    Ok(DistanceCurveNative {
        points: arena.alloc_slice(&curve.points)?.cast_const(),
        point_count: native_count(curve.points.len(), "distance curve")?,
    })
}

/// Copy a staged array back into `dst`.
///
/// # Safety
///
/// When non-null, `src` must hold `dst.len()` initialized elements.
unsafe fn copy_back(src: *const f32, dst: &mut [f32]) {
    if src.is_null() || dst.is_empty() {
        return;
    }
    // SAFETY: guaranteed by the caller; dst is a distinct Rust allocation.
    unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
}

/// The native mirror of an [`Emitter`]: the emitter with its cone and
/// curve headers embedded, so the frame must stay put once populated.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct EmitterFrame {
    emitter: EmitterNative,
    cone: Cone,
    curves: [DistanceCurveNative; 5],
}

impl EmitterFrame {
    /// The `X3DAUDIO_EMITTER` to pass to native code.
    pub fn emitter(&self) -> *const EmitterNative {
        ptr::addr_of!(self.emitter)
    }
}

// =========================================================================
// Listener / Emitter / DSP settings
// =========================================================================

/// The point of hearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub orient_front: Vector3,
    pub orient_top: Vector3,
    pub position: Vector3,
    pub velocity: Vector3,
    /// `None` makes the listener omnidirectional.
    #[serde(default)]
    pub cone: Option<Cone>,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            orient_front: Vector3::FRONT,
            orient_top: Vector3::UP,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            cone: None,
        }
    }
}

impl Marshal for Listener {
    type Native = ListenerNative;

    fn to_native(&self, native: &mut ListenerNative, arena: &mut ScratchArena) -> Result<()> {
        *native = ListenerNative {
            orient_front: self.orient_front,
            orient_top: self.orient_top,
            position: self.position,
            velocity: self.velocity,
            cone: optional_value(arena, self.cone)?,
        };
        Ok(())
    }
}

/// A sound source.
///
/// Multi-channel emitters place each channel on a circle of
/// `channel_radius` around `position`, at the given azimuths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    #[serde(default)]
    pub cone: Option<Cone>,
    pub orient_front: Vector3,
    pub orient_top: Vector3,
    pub position: Vector3,
    pub velocity: Vector3,
    pub inner_radius: f32,
    pub inner_radius_angle: f32,
    pub channel_count: u32,
    pub channel_radius: f32,
    /// One azimuth per channel, radians. Required when `channel_count > 1`.
    #[serde(default)]
    pub channel_azimuths: Vec<f32>,
    /// `None` selects the native default (inverse square law).
    #[serde(default)]
    pub volume_curve: Option<DistanceCurve>,
    #[serde(default)]
    pub lfe_curve: Option<DistanceCurve>,
    #[serde(default)]
    pub lpf_direct_curve: Option<DistanceCurve>,
    #[serde(default)]
    pub lpf_reverb_curve: Option<DistanceCurve>,
    #[serde(default)]
    pub reverb_curve: Option<DistanceCurve>,
    pub curve_distance_scaler: f32,
    pub doppler_scaler: f32,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            cone: None,
            orient_front: Vector3::FRONT,
            orient_top: Vector3::UP,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            inner_radius: 0.0,
            inner_radius_angle: 0.0,
            channel_count: 1,
            channel_radius: 0.0,
            channel_azimuths: Vec::new(),
            volume_curve: None,
            lfe_curve: None,
            lpf_direct_curve: None,
            lpf_reverb_curve: None,
            reverb_curve: None,
            curve_distance_scaler: 1.0,
            doppler_scaler: 1.0,
        }
    }
}

impl Emitter {
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 {
            return Err(Error::InvalidArgument("emitter has no channels".into()));
        }
        if self.channel_count > 1 && self.channel_azimuths.len() < self.channel_count as usize {
            return Err(Error::InvalidArgument(format!(
                "{} channels but {} azimuths",
                self.channel_count,
                self.channel_azimuths.len()
            )));
        }
        if self.curve_distance_scaler <= 0.0 {
            return Err(Error::InvalidArgument("curve distance scaler must be positive".into()));
        }
        if self.doppler_scaler < 0.0 {
            return Err(Error::InvalidArgument("doppler scaler must not be negative".into()));
        }
        Ok(())
    }

    fn curves(&self) -> [Option<&DistanceCurve>; 5] {
        [
            self.volume_curve.as_ref(),
            self.lfe_curve.as_ref(),
            self.lpf_direct_curve.as_ref(),
            self.lpf_reverb_curve.as_ref(),
            self.reverb_curve.as_ref(),
        ]
    }
}

impl Marshal for Emitter {
    type Native = EmitterFrame;

    /// The cone and the five curve headers are written into the frame;
    /// azimuths and curve points are arena arrays.
    fn to_native(&self, native: &mut EmitterFrame, arena: &mut ScratchArena) -> Result<()> {
        self.validate()?;
        let curves = self.curves();
        for (header, curve) in native.curves.iter_mut().zip(curves) {
            *header = curve_header(arena, curve)?;
        }
        native.cone = self.cone.unwrap_or_default();
        let channel_azimuths = arena.alloc_slice(&self.channel_azimuths)?.cast_const();

        let frame: *mut EmitterFrame = native;
        let headers: [*const DistanceCurveNative; 5] = std::array::from_fn(|index| {
            if curves[index].is_none() {
                return ptr::null();
            }
            // SAFETY: frame points to the caller's frame; only the address is taken.
            unsafe { ptr::addr_of!((*frame).curves[index]) }
        });
        let cone = if self.cone.is_some() {
            // SAFETY: as above.
            unsafe { ptr::addr_of!((*frame).cone) }
        } else {
            ptr::null()
        };
        let emitter = EmitterNative {
            cone,
            orient_front: self.orient_front,
            orient_top: self.orient_top,
            position: self.position,
            velocity: self.velocity,
            inner_radius: self.inner_radius,
            inner_radius_angle: self.inner_radius_angle,
            channel_count: self.channel_count,
            channel_radius: self.channel_radius,
            channel_azimuths,
            volume_curve: headers[0],
            lfe_curve: headers[1],
            lpf_direct_curve: headers[2],
            lpf_reverb_curve: headers[3],
            reverb_curve: headers[4],
            curve_distance_scaler: self.curve_distance_scaler,
            doppler_scaler: self.doppler_scaler,
        };
        // SAFETY: frame is the exclusive frame passed in.
        unsafe { (*frame).emitter = emitter };
        Ok(())
    }
}

/// Output of a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DspSettings {
    /// `src_channel_count * dst_channel_count` levels, source-major.
    pub matrix_coefficients: Vec<f32>,
    /// One delay per destination channel, milliseconds.
    pub delay_times: Vec<f32>,
    pub src_channel_count: u32,
    pub dst_channel_count: u32,
    pub lpf_direct_coefficient: f32,
    pub lpf_reverb_coefficient: f32,
    pub reverb_level: f32,
    pub doppler_factor: f32,
    pub emitter_to_listener_angle: f32,
    pub emitter_to_listener_distance: f32,
    pub emitter_velocity_component: f32,
    pub listener_velocity_component: f32,
}

impl DspSettings {
    /// Settings sized for `src` emitter channels into `dst` speakers.
    ///
    /// Fails when the matrix size does not fit the native `UINT32` count.
    pub fn new(src_channel_count: u32, dst_channel_count: u32) -> Result<Self> {
        let matrix_len = src_channel_count.checked_mul(dst_channel_count).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "{src_channel_count} x {dst_channel_count} matrix exceeds UINT32"
            ))
        })?;
        Ok(Self {
            matrix_coefficients: vec![0.0; matrix_len as usize],
            delay_times: vec![0.0; dst_channel_count as usize],
            src_channel_count,
            dst_channel_count,
            lpf_direct_coefficient: 0.0,
            lpf_reverb_coefficient: 0.0,
            reverb_level: 0.0,
            doppler_factor: 1.0,
            emitter_to_listener_angle: 0.0,
            emitter_to_listener_distance: 0.0,
            emitter_velocity_component: 0.0,
            listener_velocity_component: 0.0,
        })
    }

    /// Level from source channel `src` to destination channel `dst`.
    pub fn coefficient(&self, src: u32, dst: u32) -> Option<f32> {
        if src >= self.src_channel_count || dst >= self.dst_channel_count {
            return None;
        }
        let index = src as usize * self.dst_channel_count as usize + dst as usize;
        self.matrix_coefficients.get(index).copied()
    }

    fn check_buffers(&self, flags: CalculateFlags) -> Result<()> {
        let matrix_len = self.src_channel_count as usize * self.dst_channel_count as usize;
        if flags.contains(CalculateFlags::MATRIX) && self.matrix_coefficients.len() < matrix_len {
            return Err(Error::InvalidArgument(format!(
                "matrix holds {} coefficients, {} needed",
                self.matrix_coefficients.len(),
                matrix_len
            )));
        }
        if flags.contains(CalculateFlags::DELAY) && self.delay_times.len() < self.dst_channel_count as usize {
            return Err(Error::InvalidArgument(format!(
                "{} delay slots for {} channels",
                self.delay_times.len(),
                self.dst_channel_count
            )));
        }
        Ok(())
    }
}

impl Marshal for DspSettings {
    type Native = DspSettingsNative;

    /// Both arrays are staged in `arena`; the results are copied back by
    /// [`from_native`](Marshal::from_native).
    fn to_native(&self, native: &mut DspSettingsNative, arena: &mut ScratchArena) -> Result<()> {
        *native = DspSettingsNative {
            matrix_coefficients: arena.alloc_slice(&self.matrix_coefficients)?,
            delay_times: arena.alloc_slice(&self.delay_times)?,
            src_channel_count: self.src_channel_count,
            dst_channel_count: self.dst_channel_count,
            lpf_direct_coefficient: self.lpf_direct_coefficient,
            lpf_reverb_coefficient: self.lpf_reverb_coefficient,
            reverb_level: self.reverb_level,
            doppler_factor: self.doppler_factor,
            emitter_to_listener_angle: self.emitter_to_listener_angle,
            emitter_to_listener_distance: self.emitter_to_listener_distance,
            emitter_velocity_component: self.emitter_velocity_component,
            listener_velocity_component: self.listener_velocity_component,
        };
        Ok(())
    }

    fn from_native(&mut self, native: &DspSettingsNative) -> Result<()> {
        let (matrix, delays) = (native.matrix_coefficients, native.delay_times);
        // SAFETY: to_native staged both arrays with these lengths and the
        // arena outlives the read-back.
        unsafe {
            copy_back(matrix, &mut self.matrix_coefficients);
            copy_back(delays, &mut self.delay_times);
        }
        self.lpf_direct_coefficient = native.lpf_direct_coefficient;
        self.lpf_reverb_coefficient = native.lpf_reverb_coefficient;
        self.reverb_level = native.reverb_level;
        self.doppler_factor = native.doppler_factor;
        self.emitter_to_listener_angle = native.emitter_to_listener_angle;
        self.emitter_to_listener_distance = native.emitter_to_listener_distance;
        self.emitter_velocity_component = native.emitter_velocity_component;
        self.listener_velocity_component = native.listener_velocity_component;
        Ok(())
    }
}

// =========================================================================
// Library entry points
// =========================================================================

/// `X3DAudioInitialize`
pub type InitializeFn =
    unsafe extern "C" fn(speaker_channel_mask: u32, speed_of_sound: f32, instance: *mut u8) -> HResult;

/// `X3DAudioCalculate`
pub type CalculateFn = unsafe extern "C" fn(
    instance: *const u8,
    listener: *const ListenerNative,
    emitter: *const EmitterNative,
    flags: u32,
    dsp_settings: *mut DspSettingsNative,
);

/// The X3DAudio exports, resolved by the caller.
#[derive(Debug, Clone, Copy)]
pub struct X3DAudioApi {
    pub initialize: InitializeFn,
    pub calculate: CalculateFn,
}

/// An initialized X3DAudio instance for one speaker layout.
#[derive(Debug, Clone)]
pub struct X3DAudio {
    api: X3DAudioApi,
    handle: [u8; HANDLE_BYTESIZE],
    speaker_channel_mask: u32,
    speed_of_sound: f32,
    stats: Option<Arc<MemoryStats>>,
}

impl X3DAudio {
    pub fn new(api: X3DAudioApi, speaker_channel_mask: u32) -> Result<Self> {
        Self::with_speed_of_sound(api, speaker_channel_mask, SPEED_OF_SOUND)
    }

    pub fn with_speed_of_sound(api: X3DAudioApi, speaker_channel_mask: u32, speed_of_sound: f32) -> Result<Self> {
        if speaker_channel_mask == 0 {
            return Err(Error::InvalidArgument("empty speaker channel mask".into()));
        }
        let mut handle = [0u8; HANDLE_BYTESIZE];
        // SAFETY: handle has the documented size.
        unsafe { (api.initialize)(speaker_channel_mask, speed_of_sound, handle.as_mut_ptr()) }.ok()?;
        log::debug!(
            "X3DAudio initialized for mask {speaker_channel_mask:#x} ({} speakers)",
            speakers::channel_count(speaker_channel_mask)
        );
        Ok(Self {
            api,
            handle,
            speaker_channel_mask,
            speed_of_sound,
            stats: None,
        })
    }

    /// Report the buffers staged by each calculation to `stats`.
    pub fn with_memory_stats(mut self, stats: Arc<MemoryStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn handle(&self) -> &[u8; HANDLE_BYTESIZE] {
        &self.handle
    }

    pub fn speaker_channel_mask(&self) -> u32 {
        self.speaker_channel_mask
    }

    pub fn speed_of_sound(&self) -> f32 {
        self.speed_of_sound
    }

    /// Compute `settings` for `emitter` as heard by `listener`.
    ///
    /// `settings` must be sized for the emitter's channels and the output
    /// layout; see [`DspSettings::new`].
    pub fn calculate(
        &self,
        listener: &Listener,
        emitter: &Emitter,
        flags: CalculateFlags,
        settings: &mut DspSettings,
    ) -> Result<()> {
        if settings.src_channel_count != emitter.channel_count {
            return Err(Error::InvalidArgument(format!(
                "settings sized for {} source channels, emitter has {}",
                settings.src_channel_count, emitter.channel_count
            )));
        }
        settings.check_buffers(flags)?;

        let mut arena = match &self.stats {
            Some(stats) => ScratchArena::with_stats(stats.clone()),
            None => ScratchArena::new(),
        };
        let mut listener_native = ListenerNative::default();
        listener.to_native(&mut listener_native, &mut arena)?;
        let mut emitter_frame = EmitterFrame::default();
        emitter.to_native(&mut emitter_frame, &mut arena)?;
        let emitter_native = emitter_frame.emitter();

        let (calculate, handle) = (self.api.calculate, self.handle.as_ptr());
        marshal::call_in(&mut arena, settings, |dsp| {
            // SAFETY: the listener and emitter frames and every staged array
            // stay alive and unmoved until call_in returns.
            unsafe { calculate(handle, &listener_native, emitter_native, flags.0, dsp) };
            Ok(())
        })
    }

    /// [`calculate`](Self::calculate) into fresh settings for the
    /// instance's speaker layout.
    pub fn calculate_new(&self, listener: &Listener, emitter: &Emitter, flags: CalculateFlags) -> Result<DspSettings> {
        let mut settings = DspSettings::new(emitter.channel_count, speakers::channel_count(self.speaker_channel_mask))?;
        self.calculate(listener, emitter, flags, &mut settings)?;
        Ok(settings)
    }
}
