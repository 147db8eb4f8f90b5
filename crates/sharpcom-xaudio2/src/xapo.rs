//! XAPO: XAudio2 audio effects.
//!
//! Two directions are covered:
//!
//! - Rust effects implement [`AudioProcessor`] (and optionally
//!   [`ParameterProvider`]) and are handed to XAudio2 as native `IXAPO`
//!   objects through [`bind`] / [`bind_with_parameters`]. Every vtable slot
//!   is a thunk that unpacks the native parameter blocks, calls the trait
//!   method and packs the results back.
//! - Native effects (the built-in reverb, volume meter, ...) are driven
//!   through the [`Xapo`] and [`XapoParameters`] wrappers.
//!
//! All native parameter blocks here use 1-byte packing, as in `xapo.h`.
//!
//! # Example
//!
//! ```ignore
//! struct Gain { state: XapoState, gain: AtomicU32 }
//!
//! impl AudioProcessor for Gain { /* ... */ }
//! impl ParameterProvider for Gain { /* ... */ }
//!
//! let shadow = xapo::bind_with_parameters(Arc::new(Gain::new()))?;
//! let effect = shadow.to_raw()?; // pass to XAUDIO2_EFFECT_DESCRIPTOR::pEffect
//! ```

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

use sharpcom_core::marshal::{native_count, Marshal, RawBool};
use sharpcom_core::memory::{alloc_task_memory, free_task_memory, NativeBuffer};
use sharpcom_core::shadow::{self, ComCallback, InterfaceEntry, UNKNOWN_VTBL};
use sharpcom_core::{com_interface, Error, Guid, HResult, IUnknownVtbl, Interface, Result, ScratchArena, Shadow};
use sharpcom_utils::{copy_str_to_wide, wide_to_string};

use crate::wave_format::{WaveFormat, WaveFormatEx};
use crate::{register_result_descriptors, XAPO_E_FORMAT_UNSUPPORTED, XAUDIO2_E_INVALID_CALL};

/// Length of the friendly name and copyright strings, terminator included.
pub const XAPO_REGISTRATION_STRING_LENGTH: usize = 256;
pub const XAPO_MIN_CHANNELS: u16 = 1;
pub const XAPO_MAX_CHANNELS: u16 = 64;
pub const XAPO_MIN_FRAMERATE: u32 = 1_000;
pub const XAPO_MAX_FRAMERATE: u32 = 200_000;

// =========================================================================
// Flags
// =========================================================================

/// `XAPO_FLAG_*` registration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct XapoFlags(pub u32);

impl XapoFlags {
    pub const CHANNELS_MUST_MATCH: XapoFlags = XapoFlags(0x0000_0001);
    pub const FRAMERATE_MUST_MATCH: XapoFlags = XapoFlags(0x0000_0002);
    pub const BITSPERSAMPLE_MUST_MATCH: XapoFlags = XapoFlags(0x0000_0004);
    pub const BUFFERCOUNT_MUST_MATCH: XapoFlags = XapoFlags(0x0000_0008);
    pub const INPLACE_SUPPORTED: XapoFlags = XapoFlags(0x0000_0010);
    pub const INPLACE_REQUIRED: XapoFlags = XapoFlags(0x0000_0020);

    /// `XAPOBASE_DEFAULT_FLAG`
    pub const DEFAULT: XapoFlags = XapoFlags(
        Self::CHANNELS_MUST_MATCH.0
            | Self::FRAMERATE_MUST_MATCH.0
            | Self::BITSPERSAMPLE_MUST_MATCH.0
            | Self::BUFFERCOUNT_MUST_MATCH.0
            | Self::INPLACE_SUPPORTED.0,
    );

    #[inline]
    pub const fn contains(self, other: XapoFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for XapoFlags {
    type Output = XapoFlags;

    fn bitor(self, rhs: XapoFlags) -> XapoFlags {
        XapoFlags(self.0 | rhs.0)
    }
}

/// `XAPO_BUFFER_FLAGS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum BufferFlags {
    /// The buffer holds only silence; its contents are undefined.
    #[default]
    Silent = 0,
    /// The buffer holds valid samples.
    Valid = 1,
}

impl BufferFlags {
    pub fn from_raw(value: u32) -> Self {
        if value == BufferFlags::Valid as u32 {
            BufferFlags::Valid
        } else {
            BufferFlags::Silent
        }
    }
}

// =========================================================================
// Native mirrors
// =========================================================================

/// `XAPO_REGISTRATION_PROPERTIES`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct RegistrationPropertiesNative {
    pub clsid: Guid,
    pub friendly_name: [u16; XAPO_REGISTRATION_STRING_LENGTH],
    pub copyright_info: [u16; XAPO_REGISTRATION_STRING_LENGTH],
    pub major_version: u32,
    pub minor_version: u32,
    pub flags: u32,
    pub min_input_buffer_count: u32,
    pub max_input_buffer_count: u32,
    pub min_output_buffer_count: u32,
    pub max_output_buffer_count: u32,
}

/// `XAPO_LOCKFORPROCESS_PARAMETERS`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct LockParametersNative {
    pub format: *const WaveFormatEx,
    pub max_frame_count: u32,
}

impl Default for LockParametersNative {
    fn default() -> Self {
        Self {
            format: ptr::null(),
            max_frame_count: 0,
        }
    }
}

/// `XAPO_PROCESS_BUFFER_PARAMETERS`
#[repr(C, packed(1))]
#[derive(Clone, Copy)]
pub struct ProcessBufferNative {
    pub buffer: *mut c_void,
    pub buffer_flags: u32,
    pub valid_frame_count: u32,
}

/// `IXAPO` vtable.
#[repr(C)]
pub struct IXapoVtbl {
    pub base: IUnknownVtbl,
    pub get_registration_properties:
        unsafe extern "system" fn(this: *mut c_void, properties: *mut *mut RegistrationPropertiesNative) -> HResult,
    pub is_input_format_supported: unsafe extern "system" fn(
        this: *mut c_void,
        output_format: *const WaveFormatEx,
        requested_input_format: *const WaveFormatEx,
        supported_input_format: *mut *mut WaveFormatEx,
    ) -> HResult,
    pub is_output_format_supported: unsafe extern "system" fn(
        this: *mut c_void,
        input_format: *const WaveFormatEx,
        requested_output_format: *const WaveFormatEx,
        supported_output_format: *mut *mut WaveFormatEx,
    ) -> HResult,
    pub initialize: unsafe extern "system" fn(this: *mut c_void, data: *const c_void, byte_size: u32) -> HResult,
    pub reset: unsafe extern "system" fn(this: *mut c_void),
    pub lock_for_process: unsafe extern "system" fn(
        this: *mut c_void,
        input_count: u32,
        inputs: *const LockParametersNative,
        output_count: u32,
        outputs: *const LockParametersNative,
    ) -> HResult,
    pub unlock_for_process: unsafe extern "system" fn(this: *mut c_void),
    pub process: unsafe extern "system" fn(
        this: *mut c_void,
        input_count: u32,
        inputs: *const ProcessBufferNative,
        output_count: u32,
        outputs: *mut ProcessBufferNative,
        is_enabled: RawBool,
    ),
    pub calc_input_frames: unsafe extern "system" fn(this: *mut c_void, output_frame_count: u32) -> u32,
    pub calc_output_frames: unsafe extern "system" fn(this: *mut c_void, input_frame_count: u32) -> u32,
}

/// `IXAPOParameters` vtable.
#[repr(C)]
pub struct IXapoParametersVtbl {
    pub base: IUnknownVtbl,
    pub set_parameters: unsafe extern "system" fn(this: *mut c_void, parameters: *const c_void, byte_size: u32),
    pub get_parameters: unsafe extern "system" fn(this: *mut c_void, parameters: *mut c_void, byte_size: u32),
}

// =========================================================================
// Rust-side types
// =========================================================================

/// Identity and capabilities an effect reports to XAudio2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationProperties {
    pub clsid: Guid,
    pub friendly_name: String,
    pub copyright_info: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub flags: XapoFlags,
    pub min_input_buffer_count: u32,
    pub max_input_buffer_count: u32,
    pub min_output_buffer_count: u32,
    pub max_output_buffer_count: u32,
}

impl RegistrationProperties {
    /// Version 1.0, default flags, exactly one input and one output buffer.
    pub fn new(clsid: Guid, friendly_name: impl Into<String>) -> Self {
        Self {
            clsid,
            friendly_name: friendly_name.into(),
            copyright_info: String::new(),
            major_version: 1,
            minor_version: 0,
            flags: XapoFlags::DEFAULT,
            min_input_buffer_count: 1,
            max_input_buffer_count: 1,
            min_output_buffer_count: 1,
            max_output_buffer_count: 1,
        }
    }

    /// Strings longer than 255 UTF-16 units are truncated.
    pub fn to_native(&self) -> RegistrationPropertiesNative {
        let mut friendly_name = [0u16; XAPO_REGISTRATION_STRING_LENGTH];
        let mut copyright_info = [0u16; XAPO_REGISTRATION_STRING_LENGTH];
        copy_str_to_wide(&self.friendly_name, &mut friendly_name);
        copy_str_to_wide(&self.copyright_info, &mut copyright_info);
        RegistrationPropertiesNative {
            clsid: self.clsid,
            friendly_name,
            copyright_info,
            major_version: self.major_version,
            minor_version: self.minor_version,
            flags: self.flags.0,
            min_input_buffer_count: self.min_input_buffer_count,
            max_input_buffer_count: self.max_input_buffer_count,
            min_output_buffer_count: self.min_output_buffer_count,
            max_output_buffer_count: self.max_output_buffer_count,
        }
    }

    pub fn from_native(native: &RegistrationPropertiesNative) -> Self {
        let friendly_name = native.friendly_name;
        let copyright_info = native.copyright_info;
        Self {
            clsid: native.clsid,
            friendly_name: wide_to_string(&friendly_name),
            copyright_info: wide_to_string(&copyright_info),
            major_version: native.major_version,
            minor_version: native.minor_version,
            flags: XapoFlags(native.flags),
            min_input_buffer_count: native.min_input_buffer_count,
            max_input_buffer_count: native.max_input_buffer_count,
            min_output_buffer_count: native.min_output_buffer_count,
            max_output_buffer_count: native.max_output_buffer_count,
        }
    }

    /// Copy into task memory for `GetRegistrationProperties`, which hands
    /// ownership to the caller.
    fn to_task_memory(&self) -> Result<*mut RegistrationPropertiesNative> {
        let block = alloc_task_memory(std::mem::size_of::<RegistrationPropertiesNative>())
            .cast::<RegistrationPropertiesNative>();
        if block.is_null() {
            return Err(Error::Native(HResult::E_OUTOFMEMORY));
        }
        // SAFETY: block is large enough; the mirror has alignment 1.
        unsafe { block.write(self.to_native()) };
        Ok(block)
    }
}

/// One input or output of `LockForProcess`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockParameters {
    pub format: WaveFormat,
    pub max_frame_count: u32,
}

impl LockParameters {
    pub fn new(format: WaveFormat, max_frame_count: u32) -> Self {
        Self {
            format,
            max_frame_count,
        }
    }

    /// # Safety
    ///
    /// `native.format` must be null or point to a complete format.
    unsafe fn read_native(native: &LockParametersNative) -> Result<Self> {
        let format = native.format;
        Ok(Self {
            // SAFETY: forwarded contract.
            format: unsafe { WaveFormat::from_raw(format) }?,
            max_frame_count: native.max_frame_count,
        })
    }

}

impl Marshal for LockParameters {
    type Native = LockParametersNative;

    fn to_native(&self, native: &mut LockParametersNative, arena: &mut ScratchArena) -> Result<()> {
        native.format = self.format.to_arena(arena)?;
        native.max_frame_count = self.max_frame_count;
        Ok(())
    }
}

/// One input or output buffer of `Process`.
///
/// `buffer` points to interleaved samples owned by XAudio2 and is only
/// valid for the duration of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessBuffer {
    pub buffer: *mut c_void,
    pub flags: BufferFlags,
    pub valid_frame_count: u32,
}

impl ProcessBuffer {
    const EMPTY: ProcessBuffer = ProcessBuffer {
        buffer: ptr::null_mut(),
        flags: BufferFlags::Silent,
        valid_frame_count: 0,
    };

    pub fn new(buffer: *mut c_void, flags: BufferFlags, valid_frame_count: u32) -> Self {
        Self {
            buffer,
            flags,
            valid_frame_count,
        }
    }

    fn from_native(native: &ProcessBufferNative) -> Self {
        Self {
            buffer: native.buffer,
            flags: BufferFlags::from_raw(native.buffer_flags),
            valid_frame_count: native.valid_frame_count,
        }
    }

    fn to_native(self) -> ProcessBufferNative {
        ProcessBufferNative {
            buffer: self.buffer,
            buffer_flags: self.flags as u32,
            valid_frame_count: self.valid_frame_count,
        }
    }

    /// The valid frames as float samples.
    ///
    /// # Safety
    ///
    /// `buffer` must hold at least `valid_frame_count * channels` floats and
    /// no mutable view of the same memory may be alive.
    pub unsafe fn samples(&self, channels: usize) -> &[f32] {
        let len = self.valid_frame_count as usize * channels;
        if self.buffer.is_null() || len == 0 {
            return &[];
        }
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts(self.buffer.cast::<f32>(), len) }
    }

    /// `frames * channels` float samples for writing.
    ///
    /// # Safety
    ///
    /// `buffer` must hold at least `frames * channels` floats and no other
    /// view of the same memory may be alive.
    pub unsafe fn samples_mut(&mut self, channels: usize, frames: u32) -> &mut [f32] {
        let len = frames as usize * channels;
        if self.buffer.is_null() || len == 0 {
            return &mut [];
        }
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts_mut(self.buffer.cast::<f32>(), len) }
    }
}

/// Outcome of a format negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Not supported; optionally the nearest format that would be.
    Unsupported(Option<WaveFormat>),
}

impl FormatSupport {
    pub fn is_supported(&self) -> bool {
        matches!(self, FormatSupport::Supported)
    }
}

/// The default XAPO format check: 32-bit float, 1 to 64 channels,
/// 1 kHz to 200 kHz. Suggests the nearest such format otherwise.
pub fn validate_float_format(requested: &WaveFormat) -> FormatSupport {
    let channels_ok = (XAPO_MIN_CHANNELS..=XAPO_MAX_CHANNELS).contains(&requested.channels);
    let rate_ok = (XAPO_MIN_FRAMERATE..=XAPO_MAX_FRAMERATE).contains(&requested.sample_rate);
    let float_ok = requested.is_ieee_float() && requested.bits_per_sample == 32;
    if channels_ok && rate_ok && float_ok {
        return FormatSupport::Supported;
    }
    let nearest = WaveFormat::ieee_float(
        requested.sample_rate.clamp(XAPO_MIN_FRAMERATE, XAPO_MAX_FRAMERATE),
        requested.channels.clamp(XAPO_MIN_CHANNELS, XAPO_MAX_CHANNELS),
    );
    FormatSupport::Unsupported(nearest.ok())
}

// =========================================================================
// Effect contracts
// =========================================================================

/// A Rust audio effect (`IXAPO`).
///
/// Methods take `&self`: XAudio2 calls `Process` on its audio thread while
/// other slots may arrive from the application thread, so mutable state
/// belongs behind atomics or locks ([`XapoState`] covers the lock
/// bookkeeping).
pub trait AudioProcessor: Send + Sync + 'static {
    fn registration_properties(&self) -> RegistrationProperties;

    /// Can the effect accept `requested_input` when producing `output`?
    fn is_input_format_supported(&self, output: &WaveFormat, requested_input: &WaveFormat) -> FormatSupport {
        let _ = output;
        validate_float_format(requested_input)
    }

    /// Can the effect produce `requested_output` from `input`?
    fn is_output_format_supported(&self, input: &WaveFormat, requested_output: &WaveFormat) -> FormatSupport {
        let _ = input;
        validate_float_format(requested_output)
    }

    /// Effect-specific initialization data.
    fn initialize(&self, data: &[u8]) -> Result<()> {
        let _ = data;
        Ok(())
    }

    /// Clear internal state (delay lines, filters) without unlocking.
    fn reset(&self) {}

    fn lock_for_process(&self, inputs: &[LockParameters], outputs: &[LockParameters]) -> Result<()>;

    fn unlock_for_process(&self);

    /// Process one block. Runs on the audio thread: no allocation, no locks
    /// that the application thread holds for long.
    fn process(&self, inputs: &[ProcessBuffer], outputs: &mut [ProcessBuffer], is_enabled: bool);

    fn calc_input_frames(&self, output_frame_count: u32) -> u32 {
        output_frame_count
    }

    fn calc_output_frames(&self, input_frame_count: u32) -> u32 {
        input_frame_count
    }
}

/// Effect parameters (`IXAPOParameters`), as raw bytes.
pub trait ParameterProvider: Send + Sync + 'static {
    fn set_parameters(&self, parameters: &[u8]);

    /// Fill `parameters` with the current values.
    fn get_parameters(&self, parameters: &mut [u8]);
}

// =========================================================================
// XapoState
// =========================================================================

#[derive(Debug, Default)]
struct LockState {
    locked: bool,
    inputs: Vec<LockParameters>,
    outputs: Vec<LockParameters>,
}

/// Lock bookkeeping for an [`AudioProcessor`].
///
/// Validates `LockForProcess` arguments against the registration
/// properties, remembers the locked formats and rejects processing while
/// unlocked.
#[derive(Debug, Default)]
pub struct XapoState {
    inner: Mutex<LockState>,
}

impl XapoState {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate and record a `LockForProcess` call.
    pub fn lock(
        &self,
        properties: &RegistrationProperties,
        inputs: &[LockParameters],
        outputs: &[LockParameters],
    ) -> Result<()> {
        let mut state = self.state();
        if state.locked {
            return Err(Error::Native(XAUDIO2_E_INVALID_CALL));
        }

        check_count("input", inputs.len(), properties.min_input_buffer_count, properties.max_input_buffer_count)?;
        check_count("output", outputs.len(), properties.min_output_buffer_count, properties.max_output_buffer_count)?;

        let flags = properties.flags;
        if flags.contains(XapoFlags::BUFFERCOUNT_MUST_MATCH) && inputs.len() != outputs.len() {
            return Err(Error::InvalidArgument(format!(
                "{} inputs but {} outputs",
                inputs.len(),
                outputs.len()
            )));
        }
        for (input, output) in inputs.iter().zip(outputs) {
            let (i, o) = (&input.format, &output.format);
            if flags.contains(XapoFlags::CHANNELS_MUST_MATCH) && i.channels != o.channels {
                return Err(Error::InvalidArgument(format!("channel mismatch: {} -> {}", i.channels, o.channels)));
            }
            if flags.contains(XapoFlags::FRAMERATE_MUST_MATCH) && i.sample_rate != o.sample_rate {
                return Err(Error::InvalidArgument(format!(
                    "frame rate mismatch: {} -> {}",
                    i.sample_rate, o.sample_rate
                )));
            }
            if flags.contains(XapoFlags::BITSPERSAMPLE_MUST_MATCH) && i.bits_per_sample != o.bits_per_sample {
                return Err(Error::InvalidArgument(format!(
                    "bit depth mismatch: {} -> {}",
                    i.bits_per_sample, o.bits_per_sample
                )));
            }
        }

        state.locked = true;
        state.inputs = inputs.to_vec();
        state.outputs = outputs.to_vec();
        Ok(())
    }

    pub fn unlock(&self) {
        let mut state = self.state();
        if !state.locked {
            log::warn!("UnlockForProcess without a matching LockForProcess");
        }
        *state = LockState::default();
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    pub fn input_format(&self, index: usize) -> Option<WaveFormat> {
        self.state().inputs.get(index).map(|p| p.format.clone())
    }

    pub fn output_format(&self, index: usize) -> Option<WaveFormat> {
        self.state().outputs.get(index).map(|p| p.format.clone())
    }

    /// Maximum frames per `Process` call, from the first locked input.
    pub fn max_frame_count(&self) -> u32 {
        self.state().inputs.first().map(|p| p.max_frame_count).unwrap_or(0)
    }

    /// Check a `Process` call against the locked configuration.
    pub fn check_process(&self, inputs: &[ProcessBuffer], outputs: &[ProcessBuffer]) -> Result<()> {
        let state = self.state();
        if !state.locked {
            return Err(Error::Native(XAUDIO2_E_INVALID_CALL));
        }
        if inputs.len() != state.inputs.len() || outputs.len() != state.outputs.len() {
            return Err(Error::InvalidArgument(format!(
                "process called with {}/{} buffers, locked for {}/{}",
                inputs.len(),
                outputs.len(),
                state.inputs.len(),
                state.outputs.len()
            )));
        }
        for (buffer, locked) in inputs.iter().zip(&state.inputs) {
            if buffer.valid_frame_count > locked.max_frame_count {
                return Err(Error::InvalidArgument(format!(
                    "{} frames exceed the locked maximum of {}",
                    buffer.valid_frame_count, locked.max_frame_count
                )));
            }
        }
        Ok(())
    }
}

fn check_count(what: &str, count: usize, min: u32, max: u32) -> Result<()> {
    let count_u32 = native_count(count, what)?;
    if count_u32 < min || count_u32 > max {
        return Err(Error::InvalidArgument(format!(
            "{count} {what} buffers, expected {min} to {max}"
        )));
    }
    Ok(())
}

// =========================================================================
// Shadow adapters
// =========================================================================

/// Expose `processor` to native code as `IXAPO`.
pub fn bind<T: AudioProcessor>(processor: Arc<T>) -> Result<Shadow> {
    register_result_descriptors();
    Shadow::bind(Arc::new(XapoCallback {
        processor,
        scratch: Mutex::default(),
    }))
}

/// Expose `processor` as `IXAPO` with `IXAPOParameters` reachable through
/// `QueryInterface`.
pub fn bind_with_parameters<T: AudioProcessor + ParameterProvider>(processor: Arc<T>) -> Result<Shadow> {
    register_result_descriptors();
    Shadow::bind(Arc::new(XapoParametersCallback {
        processor,
        scratch: Mutex::default(),
    }))
}

/// Buffer descriptors handed to [`AudioProcessor::process`].
///
/// Sized by `LockForProcess` so that `Process` only copies descriptors in
/// and out on the audio thread.
#[derive(Default)]
struct ProcessScratch {
    inputs: NativeBuffer<ProcessBuffer>,
    outputs: NativeBuffer<ProcessBuffer>,
}

// SAFETY: the buffer pointers held are copies of `Process` arguments and are
// only dereferenced by the processor during that call.
unsafe impl Send for ProcessScratch {}

impl ProcessScratch {
    fn sized(input_count: usize, output_count: usize) -> Result<Self> {
        Ok(Self {
            inputs: NativeBuffer::new(input_count, ProcessBuffer::EMPTY)?,
            outputs: NativeBuffer::new(output_count, ProcessBuffer::EMPTY)?,
        })
    }

    /// Views of exactly `input_count` and `output_count` descriptors, or
    /// `None` when the counts exceed what was locked.
    fn views(&mut self, input_count: usize, output_count: usize) -> Option<(&mut [ProcessBuffer], &mut [ProcessBuffer])> {
        let inputs = self.inputs.as_mut_slice().get_mut(..input_count)?;
        let outputs = self.outputs.as_mut_slice().get_mut(..output_count)?;
        Some((inputs, outputs))
    }
}

trait ProcessorHost: ComCallback + Sized {
    type Processor: AudioProcessor;

    fn processor(&self) -> &Self::Processor;

    fn scratch(&self) -> MutexGuard<'_, ProcessScratch>;
}

fn lock_scratch(scratch: &Mutex<ProcessScratch>) -> MutexGuard<'_, ProcessScratch> {
    scratch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct XapoCallback<T> {
    processor: Arc<T>,
    scratch: Mutex<ProcessScratch>,
}

impl<T: AudioProcessor> ProcessorHost for XapoCallback<T> {
    type Processor = T;

    fn processor(&self) -> &T {
        &self.processor
    }

    fn scratch(&self) -> MutexGuard<'_, ProcessScratch> {
        lock_scratch(&self.scratch)
    }
}

impl<T: AudioProcessor> ComCallback for XapoCallback<T> {
    fn interfaces() -> Vec<InterfaceEntry> {
        vec![InterfaceEntry::new(Xapo::IID, Xapo::NAME, XapoThunks::<Self>::VTBL)]
    }
}

struct XapoParametersCallback<T> {
    processor: Arc<T>,
    scratch: Mutex<ProcessScratch>,
}

impl<T: AudioProcessor + ParameterProvider> ProcessorHost for XapoParametersCallback<T> {
    type Processor = T;

    fn processor(&self) -> &T {
        &self.processor
    }

    fn scratch(&self) -> MutexGuard<'_, ProcessScratch> {
        lock_scratch(&self.scratch)
    }
}

impl<T: AudioProcessor + ParameterProvider> ComCallback for XapoParametersCallback<T> {
    fn interfaces() -> Vec<InterfaceEntry> {
        vec![
            InterfaceEntry::new(Xapo::IID, Xapo::NAME, XapoThunks::<Self>::VTBL),
            InterfaceEntry::new(XapoParameters::IID, XapoParameters::NAME, ParameterThunks::<T>::VTBL),
        ]
    }
}

struct XapoThunks<H>(PhantomData<H>);

impl<H: ProcessorHost> XapoThunks<H> {
    const VTBL: &'static IXapoVtbl = &IXapoVtbl {
        base: UNKNOWN_VTBL,
        get_registration_properties: get_registration_properties::<H>,
        is_input_format_supported: is_input_format_supported::<H>,
        is_output_format_supported: is_output_format_supported::<H>,
        initialize: initialize::<H>,
        reset: reset::<H>,
        lock_for_process: lock_for_process::<H>,
        unlock_for_process: unlock_for_process::<H>,
        process: process::<H>,
        calc_input_frames: calc_input_frames::<H>,
        calc_output_frames: calc_output_frames::<H>,
    };
}

struct ParameterThunks<T>(PhantomData<T>);

impl<T: AudioProcessor + ParameterProvider> ParameterThunks<T> {
    const VTBL: &'static IXapoParametersVtbl = &IXapoParametersVtbl {
        base: UNKNOWN_VTBL,
        set_parameters: set_parameters::<T>,
        get_parameters: get_parameters::<T>,
    };
}

/// Report a negotiation outcome through the native out parameter.
///
/// # Safety
///
/// `supported` must be null or writable.
unsafe fn write_format_support(support: FormatSupport, supported: *mut *mut WaveFormatEx) -> Result<()> {
    match support {
        FormatSupport::Supported => Ok(()),
        FormatSupport::Unsupported(nearest) => {
            if let (Some(nearest), false) = (nearest, supported.is_null()) {
                let block = nearest.to_task_memory()?;
                // SAFETY: checked non-null; the caller frees the block.
                unsafe { *supported = block };
            }
            Err(Error::Native(XAPO_E_FORMAT_UNSUPPORTED))
        }
    }
}

unsafe extern "system" fn get_registration_properties<H: ProcessorHost>(
    this: *mut c_void,
    properties: *mut *mut RegistrationPropertiesNative,
) -> HResult {
    // SAFETY: this is one of our blocks; properties is checked before writing.
    unsafe {
        shadow::invoke::<H, _>(this, "IXAPO::GetRegistrationProperties", |host| {
            if properties.is_null() {
                return Err(Error::NullPointer);
            }
            *properties = host.processor().registration_properties().to_task_memory()?;
            Ok(())
        })
    }
}

unsafe extern "system" fn is_input_format_supported<H: ProcessorHost>(
    this: *mut c_void,
    output_format: *const WaveFormatEx,
    requested_input_format: *const WaveFormatEx,
    supported_input_format: *mut *mut WaveFormatEx,
) -> HResult {
    // SAFETY: XAudio2 passes complete formats and a writable or null out pointer.
    unsafe {
        shadow::invoke::<H, _>(this, "IXAPO::IsInputFormatSupported", |host| {
            let output = WaveFormat::from_raw(output_format)?;
            let requested = WaveFormat::from_raw(requested_input_format)?;
            let support = host.processor().is_input_format_supported(&output, &requested);
            write_format_support(support, supported_input_format)
        })
    }
}

unsafe extern "system" fn is_output_format_supported<H: ProcessorHost>(
    this: *mut c_void,
    input_format: *const WaveFormatEx,
    requested_output_format: *const WaveFormatEx,
    supported_output_format: *mut *mut WaveFormatEx,
) -> HResult {
    // SAFETY: XAudio2 passes complete formats and a writable or null out pointer.
    unsafe {
        shadow::invoke::<H, _>(this, "IXAPO::IsOutputFormatSupported", |host| {
            let input = WaveFormat::from_raw(input_format)?;
            let requested = WaveFormat::from_raw(requested_output_format)?;
            let support = host.processor().is_output_format_supported(&input, &requested);
            write_format_support(support, supported_output_format)
        })
    }
}

/// View a native byte block without copying it.
///
/// # Safety
///
/// When non-null, `data` must hold `len` readable bytes for `'a`.
unsafe fn native_bytes<'a>(data: *const c_void, len: u32) -> &'a [u8] {
    if data.is_null() || len == 0 {
        return &[];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len as usize) }
}

/// View a native parameter array without copying it.
///
/// # Safety
///
/// When non-null, `ptr` must hold `count` initialized elements for `'a`.
unsafe fn native_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        return &[];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { std::slice::from_raw_parts(ptr, count as usize) }
}

unsafe extern "system" fn initialize<H: ProcessorHost>(this: *mut c_void, data: *const c_void, byte_size: u32) -> HResult {
    // SAFETY: data is null or holds byte_size bytes.
    unsafe {
        shadow::invoke::<H, _>(this, "IXAPO::Initialize", |host| {
            host.processor().initialize(native_bytes(data, byte_size))
        })
    }
}

unsafe extern "system" fn reset<H: ProcessorHost>(this: *mut c_void) {
    // SAFETY: this is one of our blocks.
    unsafe { shadow::invoke_or::<H, _>(this, "IXAPO::Reset", (), |host| host.processor().reset()) }
}

unsafe extern "system" fn lock_for_process<H: ProcessorHost>(
    this: *mut c_void,
    input_count: u32,
    inputs: *const LockParametersNative,
    output_count: u32,
    outputs: *const LockParametersNative,
) -> HResult {
    // SAFETY: the arrays hold the given counts of complete parameter blocks.
    unsafe {
        shadow::invoke::<H, _>(this, "IXAPO::LockForProcess", |host| {
            let inputs = native_slice(inputs, input_count)
                .iter()
                .map(|native| LockParameters::read_native(native))
                .collect::<Result<Vec<_>>>()?;
            let outputs = native_slice(outputs, output_count)
                .iter()
                .map(|native| LockParameters::read_native(native))
                .collect::<Result<Vec<_>>>()?;
            // Off the audio thread: size the descriptors Process reuses.
            let scratch = ProcessScratch::sized(inputs.len(), outputs.len())?;
            host.processor().lock_for_process(&inputs, &outputs)?;
            *host.scratch() = scratch;
            Ok(())
        })
    }
}

unsafe extern "system" fn unlock_for_process<H: ProcessorHost>(this: *mut c_void) {
    // SAFETY: this is one of our blocks.
    unsafe {
        shadow::invoke_or::<H, _>(this, "IXAPO::UnlockForProcess", (), |host| {
            host.processor().unlock_for_process();
            *host.scratch() = ProcessScratch::default();
        })
    }
}

unsafe extern "system" fn process<H: ProcessorHost>(
    this: *mut c_void,
    input_count: u32,
    inputs: *const ProcessBufferNative,
    output_count: u32,
    outputs: *mut ProcessBufferNative,
    is_enabled: RawBool,
) {
    // SAFETY: the arrays hold the given counts; outputs is writable.
    unsafe {
        shadow::invoke_or::<H, _>(this, "IXAPO::Process", (), |host| {
            let mut scratch = host.scratch();
            let Some((in_views, out_views)) = scratch.views(input_count as usize, output_count as usize) else {
                log::warn!("IXAPO::Process with {input_count}/{output_count} buffers outside LockForProcess");
                return;
            };
            for (view, native) in in_views.iter_mut().zip(native_slice(inputs, input_count)) {
                *view = ProcessBuffer::from_native(native);
            }
            for (view, native) in out_views.iter_mut().zip(native_slice(outputs.cast_const(), output_count)) {
                *view = ProcessBuffer::from_native(native);
            }
            host.processor().process(in_views, out_views, is_enabled.as_bool());
            for (index, view) in out_views.iter().enumerate() {
                outputs.add(index).write(view.to_native());
            }
        })
    }
}

unsafe extern "system" fn calc_input_frames<H: ProcessorHost>(this: *mut c_void, output_frame_count: u32) -> u32 {
    // SAFETY: this is one of our blocks.
    unsafe {
        shadow::invoke_or::<H, _>(this, "IXAPO::CalcInputFrames", output_frame_count, |host| {
            host.processor().calc_input_frames(output_frame_count)
        })
    }
}

unsafe extern "system" fn calc_output_frames<H: ProcessorHost>(this: *mut c_void, input_frame_count: u32) -> u32 {
    // SAFETY: this is one of our blocks.
    unsafe {
        shadow::invoke_or::<H, _>(this, "IXAPO::CalcOutputFrames", input_frame_count, |host| {
            host.processor().calc_output_frames(input_frame_count)
        })
    }
}

unsafe extern "system" fn set_parameters<T: AudioProcessor + ParameterProvider>(
    this: *mut c_void,
    parameters: *const c_void,
    byte_size: u32,
) {
    // SAFETY: parameters is null or holds byte_size bytes.
    unsafe {
        shadow::invoke_or::<XapoParametersCallback<T>, _>(this, "IXAPOParameters::SetParameters", (), |host| {
            host.processor.set_parameters(native_bytes(parameters, byte_size));
        })
    }
}

unsafe extern "system" fn get_parameters<T: AudioProcessor + ParameterProvider>(
    this: *mut c_void,
    parameters: *mut c_void,
    byte_size: u32,
) {
    // SAFETY: parameters is null or holds byte_size writable bytes.
    unsafe {
        shadow::invoke_or::<XapoParametersCallback<T>, _>(this, "IXAPOParameters::GetParameters", (), |host| {
            if parameters.is_null() || byte_size == 0 {
                return;
            }
            let bytes = std::slice::from_raw_parts_mut(parameters.cast::<u8>(), byte_size as usize);
            host.processor.get_parameters(bytes);
        })
    }
}

// =========================================================================
// Native wrappers
// =========================================================================

com_interface! {
    /// A native `IXAPO` effect.
    pub struct Xapo("IXAPO", "A410B984-9839-4819-A0BE-2856AE6B3ADB", IXapoVtbl);
}

com_interface! {
    /// The parameter interface of a native effect.
    pub struct XapoParameters("IXAPOParameters", "26D95C66-80F2-499A-AD54-5AE7F01C6D98", IXapoParametersVtbl);
}

/// Read and free a format the callee allocated with task memory.
///
/// # Safety
///
/// `block` must be null or a task-memory `WAVEFORMATEX` owned by the caller.
unsafe fn take_task_format(block: *mut WaveFormatEx) -> Result<Option<WaveFormat>> {
    if block.is_null() {
        return Ok(None);
    }
    // SAFETY: forwarded contract.
    let format = unsafe { WaveFormat::from_raw(block) };
    // SAFETY: forwarded contract; freed exactly once.
    unsafe { free_task_memory(block.cast()) };
    format.map(Some)
}

/// Stage `parameters` in `arena` as native `XAPO_LOCKFORPROCESS_PARAMETERS`.
fn stage_lock_parameters(parameters: &[LockParameters], arena: &mut ScratchArena) -> Result<Vec<LockParametersNative>> {
    parameters
        .iter()
        .map(|p| {
            let mut native = LockParametersNative::default();
            p.to_native(&mut native, arena)?;
            Ok(native)
        })
        .collect()
}

impl Xapo {
    pub fn registration_properties(&self) -> Result<RegistrationProperties> {
        let (vtbl, this) = self.vtbl()?;
        let mut block = ptr::null_mut();
        // SAFETY: out pointer is valid for the call.
        unsafe { (vtbl.get_registration_properties)(this, &mut block) }.ok()?;
        if block.is_null() {
            return Err(Error::NullPointer);
        }
        // SAFETY: the callee returned an owned, complete block.
        let properties = RegistrationProperties::from_native(unsafe { &*block });
        // SAFETY: ownership of the block was transferred to us.
        unsafe { free_task_memory(block.cast()) };
        Ok(properties)
    }

    pub fn is_input_format_supported(&self, output: &WaveFormat, requested_input: &WaveFormat) -> Result<FormatSupport> {
        let (vtbl, this) = self.vtbl()?;
        let mut arena = ScratchArena::new();
        let output = output.to_arena(&mut arena)?;
        let requested = requested_input.to_arena(&mut arena)?;
        let mut supported = ptr::null_mut();
        // SAFETY: both formats live in the arena for the call.
        let hr = unsafe { (vtbl.is_input_format_supported)(this, output, requested, &mut supported) };
        // SAFETY: supported is null or an owned task-memory block.
        let nearest = unsafe { take_task_format(supported) }?;
        negotiation_result(hr, nearest)
    }

    pub fn is_output_format_supported(&self, input: &WaveFormat, requested_output: &WaveFormat) -> Result<FormatSupport> {
        let (vtbl, this) = self.vtbl()?;
        let mut arena = ScratchArena::new();
        let input = input.to_arena(&mut arena)?;
        let requested = requested_output.to_arena(&mut arena)?;
        let mut supported = ptr::null_mut();
        // SAFETY: both formats live in the arena for the call.
        let hr = unsafe { (vtbl.is_output_format_supported)(this, input, requested, &mut supported) };
        // SAFETY: supported is null or an owned task-memory block.
        let nearest = unsafe { take_task_format(supported) }?;
        negotiation_result(hr, nearest)
    }

    pub fn initialize(&self, data: &[u8]) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let size = native_count(data.len(), "initialization data")?;
        let ptr = if data.is_empty() { ptr::null() } else { data.as_ptr().cast() };
        // SAFETY: data outlives the call.
        unsafe { (vtbl.initialize)(this, ptr, size) }.ok()
    }

    pub fn reset(&self) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: plain slot call on a live pointer.
        unsafe { (vtbl.reset)(this) };
        Ok(())
    }

    pub fn lock_for_process(&self, inputs: &[LockParameters], outputs: &[LockParameters]) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let mut arena = ScratchArena::new();
        let inputs = stage_lock_parameters(inputs, &mut arena)?;
        let outputs = stage_lock_parameters(outputs, &mut arena)?;
        let input_ptr = arena.alloc_slice(&inputs)?;
        let output_ptr = arena.alloc_slice(&outputs)?;
        // SAFETY: every pointer lives in the arena for the call.
        unsafe {
            (vtbl.lock_for_process)(
                this,
                native_count(inputs.len(), "inputs")?,
                input_ptr,
                native_count(outputs.len(), "outputs")?,
                output_ptr,
            )
        }
        .ok()
    }

    pub fn unlock_for_process(&self) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: plain slot call on a live pointer.
        unsafe { (vtbl.unlock_for_process)(this) };
        Ok(())
    }

    /// Run one block. Output flags and frame counts are read back.
    pub fn process(&self, inputs: &[ProcessBuffer], outputs: &mut [ProcessBuffer], is_enabled: bool) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let native_inputs: Vec<ProcessBufferNative> = inputs.iter().map(|b| b.to_native()).collect();
        let mut native_outputs: Vec<ProcessBufferNative> = outputs.iter().map(|b| b.to_native()).collect();
        let input_ptr = if native_inputs.is_empty() { ptr::null() } else { native_inputs.as_ptr() };
        let output_ptr = if native_outputs.is_empty() {
            ptr::null_mut()
        } else {
            native_outputs.as_mut_ptr()
        };
        // SAFETY: both arrays outlive the call; sample buffers are the caller's.
        unsafe {
            (vtbl.process)(
                this,
                native_count(native_inputs.len(), "inputs")?,
                input_ptr,
                native_count(native_outputs.len(), "outputs")?,
                output_ptr,
                RawBool::from(is_enabled),
            )
        };
        for (buffer, native) in outputs.iter_mut().zip(&native_outputs) {
            *buffer = ProcessBuffer::from_native(native);
        }
        Ok(())
    }

    pub fn calc_input_frames(&self, output_frame_count: u32) -> Result<u32> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: plain slot call on a live pointer.
        Ok(unsafe { (vtbl.calc_input_frames)(this, output_frame_count) })
    }

    pub fn calc_output_frames(&self, input_frame_count: u32) -> Result<u32> {
        let (vtbl, this) = self.vtbl()?;
        // SAFETY: plain slot call on a live pointer.
        Ok(unsafe { (vtbl.calc_output_frames)(this, input_frame_count) })
    }
}

fn negotiation_result(hr: HResult, nearest: Option<WaveFormat>) -> Result<FormatSupport> {
    if hr == XAPO_E_FORMAT_UNSUPPORTED {
        return Ok(FormatSupport::Unsupported(nearest));
    }
    hr.ok()?;
    Ok(FormatSupport::Supported)
}

impl XapoParameters {
    pub fn set_parameters(&self, parameters: &[u8]) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let size = native_count(parameters.len(), "parameters")?;
        let ptr = if parameters.is_empty() { ptr::null() } else { parameters.as_ptr().cast() };
        // SAFETY: parameters outlives the call.
        unsafe { (vtbl.set_parameters)(this, ptr, size) };
        Ok(())
    }

    /// Fill `parameters` with the effect's current values.
    pub fn get_parameters(&self, parameters: &mut [u8]) -> Result<()> {
        let (vtbl, this) = self.vtbl()?;
        let size = native_count(parameters.len(), "parameters")?;
        let ptr = if parameters.is_empty() {
            ptr::null_mut()
        } else {
            parameters.as_mut_ptr().cast()
        };
        // SAFETY: parameters outlives the call and is writable.
        unsafe { (vtbl.get_parameters)(this, ptr, size) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{GlobalAlloc, Layout, System};
    use std::cell::Cell;
    use std::mem::{offset_of, size_of};
    use std::sync::atomic::{AtomicU32, Ordering};

    thread_local! {
        static COUNTING: Cell<bool> = const { Cell::new(false) };
        static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
    }

    /// Counts allocations made by the current thread while counting is on.
    struct CountingAllocator;

    // SAFETY: every request is forwarded to the system allocator unchanged.
    unsafe impl GlobalAlloc for CountingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            if COUNTING.try_with(Cell::get).unwrap_or(false) {
                let _ = ALLOCATIONS.try_with(|count| count.set(count.get() + 1));
            }
            // SAFETY: forwarded contract.
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            // SAFETY: forwarded contract.
            unsafe { System.dealloc(ptr, layout) }
        }
    }

    #[global_allocator]
    static ALLOCATOR: CountingAllocator = CountingAllocator;

    /// Allocations `f` makes on this thread.
    fn allocations_during(f: impl FnOnce()) -> usize {
        ALLOCATIONS.with(|count| count.set(0));
        COUNTING.with(|counting| counting.set(true));
        f();
        COUNTING.with(|counting| counting.set(false));
        ALLOCATIONS.with(Cell::get)
    }

    const CLSID_GAIN: Guid = Guid::parse("5E4B1F00-3C2A-4D9B-8E7F-60A1B2C3D4E5");

    struct Gain {
        state: XapoState,
        gain: AtomicU32,
        resets: AtomicU32,
    }

    impl Gain {
        fn new() -> Self {
            Self {
                state: XapoState::new(),
                gain: AtomicU32::new(1.0f32.to_bits()),
                resets: AtomicU32::new(0),
            }
        }
    }

    impl AudioProcessor for Gain {
        fn registration_properties(&self) -> RegistrationProperties {
            let mut properties = RegistrationProperties::new(CLSID_GAIN, "Gain");
            properties.copyright_info = "(c) sharpcom".into();
            properties
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::AcqRel);
        }

        fn lock_for_process(&self, inputs: &[LockParameters], outputs: &[LockParameters]) -> Result<()> {
            self.state.lock(&self.registration_properties(), inputs, outputs)
        }

        fn unlock_for_process(&self) {
            self.state.unlock();
        }

        fn process(&self, inputs: &[ProcessBuffer], outputs: &mut [ProcessBuffer], is_enabled: bool) {
            if self.state.check_process(inputs, outputs).is_err() {
                return;
            }
            let channels = self.state.input_format(0).map(|f| f.channels as usize).unwrap_or(1);
            let gain = if is_enabled {
                f32::from_bits(self.gain.load(Ordering::Acquire))
            } else {
                1.0
            };
            let (input, output) = (&inputs[0], &mut outputs[0]);
            output.valid_frame_count = input.valid_frame_count;
            output.flags = input.flags;
            if input.flags == BufferFlags::Silent {
                return;
            }
            // SAFETY: the test passes distinct, correctly sized buffers.
            let (src, dst) = unsafe { (input.samples(channels), output.samples_mut(channels, input.valid_frame_count)) };
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s * gain;
            }
        }
    }

    impl ParameterProvider for Gain {
        fn set_parameters(&self, parameters: &[u8]) {
            if let Ok(bytes) = <[u8; 4]>::try_from(parameters) {
                self.gain.store(f32::from_le_bytes(bytes).to_bits(), Ordering::Release);
            }
        }

        fn get_parameters(&self, parameters: &mut [u8]) {
            let bytes = f32::from_bits(self.gain.load(Ordering::Acquire)).to_le_bytes();
            let len = parameters.len().min(4);
            parameters[..len].copy_from_slice(&bytes[..len]);
        }
    }

    fn stereo_lock() -> Vec<LockParameters> {
        vec![LockParameters::new(WaveFormat::ieee_float(48_000, 2).unwrap(), 64)]
    }

    #[test]
    fn test_native_layouts() {
        assert_eq!(size_of::<RegistrationPropertiesNative>(), 1068);
        assert_eq!(offset_of!(RegistrationPropertiesNative, friendly_name), 16);
        assert_eq!(offset_of!(RegistrationPropertiesNative, major_version), 1040);
        assert_eq!(offset_of!(RegistrationPropertiesNative, max_output_buffer_count), 1064);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(size_of::<LockParametersNative>(), 12);
            assert_eq!(size_of::<ProcessBufferNative>(), 16);
            assert_eq!(offset_of!(ProcessBufferNative, valid_frame_count), 12);
        }
        assert_eq!(size_of::<IXapoVtbl>(), 13 * size_of::<usize>());
        assert_eq!(size_of::<IXapoParametersVtbl>(), 5 * size_of::<usize>());
    }

    #[test]
    fn test_registration_properties_native() {
        let mut properties = RegistrationProperties::new(CLSID_GAIN, "x".repeat(300));
        properties.flags = XapoFlags::DEFAULT | XapoFlags::INPLACE_REQUIRED;
        let native = properties.to_native();
        let back = RegistrationProperties::from_native(&native);
        assert_eq!(back.friendly_name.len(), 255);
        assert_eq!(back.clsid, CLSID_GAIN);
        assert!(back.flags.contains(XapoFlags::INPLACE_REQUIRED));
        assert!(back.flags.contains(XapoFlags::BUFFERCOUNT_MUST_MATCH));
    }

    #[test]
    fn test_validate_float_format() {
        assert!(validate_float_format(&WaveFormat::ieee_float(44_100, 2).unwrap()).is_supported());
        match validate_float_format(&WaveFormat::pcm(500, 16, 80).unwrap()) {
            FormatSupport::Unsupported(Some(nearest)) => {
                assert!(nearest.is_ieee_float());
                assert_eq!(nearest.sample_rate, XAPO_MIN_FRAMERATE);
                assert_eq!(nearest.channels, XAPO_MAX_CHANNELS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_state_lock_rules() {
        let state = XapoState::new();
        let properties = RegistrationProperties::new(CLSID_GAIN, "Gain");
        assert_eq!(
            state.check_process(&[], &[]),
            Err(Error::Native(XAUDIO2_E_INVALID_CALL))
        );

        let mono = vec![LockParameters::new(WaveFormat::ieee_float(48_000, 1).unwrap(), 64)];
        assert!(matches!(
            state.lock(&properties, &stereo_lock(), &mono),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            state.lock(&properties, &[], &stereo_lock()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!state.is_locked());

        state.lock(&properties, &stereo_lock(), &stereo_lock()).unwrap();
        assert!(state.is_locked());
        assert_eq!(state.max_frame_count(), 64);
        assert_eq!(state.output_format(0).unwrap().channels, 2);
        assert_eq!(
            state.lock(&properties, &stereo_lock(), &stereo_lock()),
            Err(Error::Native(XAUDIO2_E_INVALID_CALL))
        );

        let too_long = ProcessBuffer::new(ptr::null_mut(), BufferFlags::Valid, 65);
        assert!(state.check_process(&[too_long], &[too_long]).is_err());

        state.unlock();
        assert!(!state.is_locked());
        assert!(state.input_format(0).is_none());
    }

    #[test]
    fn test_effect_through_native_vtable() {
        let gain = Arc::new(Gain::new());
        let shadow = bind_with_parameters(gain.clone()).unwrap();
        // SAFETY: to_raw hands over a fresh reference.
        let xapo = unsafe { Xapo::from_raw(shadow.to_raw().unwrap()) }.unwrap();

        let properties = xapo.registration_properties().unwrap();
        assert_eq!(properties.friendly_name, "Gain");
        assert_eq!(properties.copyright_info, "(c) sharpcom");
        assert_eq!(properties.clsid, CLSID_GAIN);

        let float = WaveFormat::ieee_float(48_000, 2).unwrap();
        assert_eq!(
            xapo.is_input_format_supported(&float, &float).unwrap(),
            FormatSupport::Supported
        );
        match xapo.is_output_format_supported(&float, &WaveFormat::pcm(48_000, 16, 2).unwrap()).unwrap() {
            FormatSupport::Unsupported(Some(nearest)) => assert_eq!(nearest, float),
            other => panic!("unexpected {other:?}"),
        }

        xapo.initialize(&[]).unwrap();
        xapo.lock_for_process(&stereo_lock(), &stereo_lock()).unwrap();
        assert!(gain.state.is_locked());

        let parameters = xapo.query_interface::<XapoParameters>().unwrap();
        parameters.set_parameters(&0.5f32.to_le_bytes()).unwrap();
        let mut current = [0u8; 4];
        parameters.get_parameters(&mut current).unwrap();
        assert_eq!(f32::from_le_bytes(current), 0.5);

        let mut input = vec![1.0f32, -1.0, 0.5, -0.5];
        let mut output = vec![0.0f32; 4];
        let inputs = [ProcessBuffer::new(input.as_mut_ptr().cast(), BufferFlags::Valid, 2)];
        let mut outputs = [ProcessBuffer::new(output.as_mut_ptr().cast(), BufferFlags::Silent, 0)];
        xapo.process(&inputs, &mut outputs, true).unwrap();
        assert_eq!(output, vec![0.5, -0.5, 0.25, -0.25]);
        assert_eq!(outputs[0].valid_frame_count, 2);
        assert_eq!(outputs[0].flags, BufferFlags::Valid);

        assert_eq!(xapo.calc_input_frames(480).unwrap(), 480);
        assert_eq!(xapo.calc_output_frames(256).unwrap(), 256);
        xapo.reset().unwrap();
        assert_eq!(gain.resets.load(Ordering::Acquire), 1);

        xapo.unlock_for_process().unwrap();
        assert!(!gain.state.is_locked());

        drop(parameters);
        drop(xapo);
        assert_eq!(shadow.ref_count(), 1);
    }

    #[test]
    fn test_process_thunk_does_not_allocate() {
        let gain = Arc::new(Gain::new());
        gain.set_parameters(&0.5f32.to_le_bytes());
        let shadow = bind(gain.clone()).unwrap();
        // SAFETY: to_raw hands over a fresh reference.
        let xapo = unsafe { Xapo::from_raw(shadow.to_raw().unwrap()) }.unwrap();
        xapo.lock_for_process(&stereo_lock(), &stereo_lock()).unwrap();

        let mut input = vec![1.0f32; 128];
        let mut output = vec![0.0f32; 128];
        let inputs = [ProcessBuffer::new(input.as_mut_ptr().cast(), BufferFlags::Valid, 64).to_native()];
        let mut outputs = [ProcessBuffer::new(output.as_mut_ptr().cast(), BufferFlags::Silent, 0).to_native()];
        let (vtbl, this) = xapo.vtbl().unwrap();

        let allocations = allocations_during(|| {
            for _ in 0..100 {
                // SAFETY: both descriptor arrays and their sample buffers outlive the call.
                unsafe { (vtbl.process)(this, 1, inputs.as_ptr(), 1, outputs.as_mut_ptr(), RawBool::TRUE) };
            }
        });
        assert_eq!(allocations, 0);

        let written = ProcessBuffer::from_native(&outputs[0]);
        assert_eq!(written.flags, BufferFlags::Valid);
        assert_eq!(written.valid_frame_count, 64);
        assert!(output.iter().all(|&sample| sample == 0.5));
        drop(input);
    }

    #[test]
    fn test_process_outside_lock_is_skipped() {
        let gain = Arc::new(Gain::new());
        let shadow = bind(gain.clone()).unwrap();
        // SAFETY: to_raw hands over a fresh reference.
        let xapo = unsafe { Xapo::from_raw(shadow.to_raw().unwrap()) }.unwrap();

        let mut input = vec![1.0f32; 4];
        let mut output = vec![0.0f32; 4];
        let inputs = [ProcessBuffer::new(input.as_mut_ptr().cast(), BufferFlags::Valid, 2)];
        let mut outputs = [ProcessBuffer::new(output.as_mut_ptr().cast(), BufferFlags::Silent, 0)];
        xapo.process(&inputs, &mut outputs, true).unwrap();
        assert_eq!(outputs[0].valid_frame_count, 0);

        xapo.lock_for_process(&stereo_lock(), &stereo_lock()).unwrap();
        xapo.process(&inputs, &mut outputs, true).unwrap();
        assert_eq!(outputs[0].valid_frame_count, 2);
        assert_eq!(output, vec![1.0; 4]);

        // More buffers than were locked.
        let mut two = [outputs[0], outputs[0]];
        two[0].valid_frame_count = 0;
        xapo.process(&inputs, &mut two, true).unwrap();
        assert_eq!(two[0].valid_frame_count, 0);

        xapo.unlock_for_process().unwrap();
        outputs[0].valid_frame_count = 0;
        xapo.process(&inputs, &mut outputs, true).unwrap();
        assert_eq!(outputs[0].valid_frame_count, 0);
    }

    #[test]
    fn test_lock_parameters_marshal() {
        let mut arena = ScratchArena::new();
        let parameters = LockParameters::new(WaveFormat::ieee_float(44_100, 6).unwrap(), 480);
        let mut native = LockParametersNative::default();
        parameters.to_native(&mut native, &mut arena).unwrap();
        assert_eq!({ native.max_frame_count }, 480);
        // SAFETY: format points into the live arena.
        let back = unsafe { LockParameters::read_native(&native) }.unwrap();
        assert_eq!(back, parameters);

        let empty = LockParametersNative::default();
        // SAFETY: a null format is rejected without dereferencing.
        assert_eq!(unsafe { LockParameters::read_native(&empty) }, Err(Error::NullPointer));
    }

    #[test]
    fn test_effect_without_parameters() {
        let shadow = bind(Arc::new(Gain::new())).unwrap();
        // SAFETY: to_raw hands over a fresh reference.
        let xapo = unsafe { Xapo::from_raw(shadow.to_raw().unwrap()) }.unwrap();
        assert!(xapo.query_interface_or_none::<XapoParameters>().unwrap().is_none());
    }

    #[test]
    fn test_detached_effect_is_stale() {
        let shadow = bind(Arc::new(Gain::new())).unwrap();
        // SAFETY: to_raw hands over a fresh reference.
        let xapo = unsafe { Xapo::from_raw(shadow.to_raw().unwrap()) }.unwrap();
        shadow.detach();

        assert_eq!(
            xapo.initialize(&[1, 2, 3]),
            Err(Error::Native(HResult::RPC_E_DISCONNECTED))
        );
        assert_eq!(xapo.calc_output_frames(99).unwrap(), 99);
        assert!(xapo.reset().is_ok());
    }
}
