//! # sharpcom-xaudio2
//!
//! XAudio2 bindings built on `sharpcom-core`.
//!
//! - [`xapo`]: Rust audio effects exposed as native `IXAPO` /
//!   `IXAPOParameters` objects, and wrappers for native effects
//! - [`x3daudio`]: layout-exact listener/emitter/DSP mirrors and the
//!   `X3DAudioCalculate` call
//! - [`reverb`]: native reverb parameters and the I3DL2 conversion
//! - [`wave_format`]: `WAVEFORMATEX` marshalling
//!
//! Native entry points are never linked directly. Effects are handed to
//! XAudio2 as COM pointers, and X3DAudio is driven through the function
//! pointers the caller resolves from the runtime DLL.

use std::sync::Once;

use sharpcom_core::{register_descriptors, HResult, ResultDescriptor};

pub mod reverb;
pub mod wave_format;
pub mod x3daudio;
pub mod xapo;

pub use reverb::{ReverbI3DL2Parameters, ReverbParameters};
pub use wave_format::{WaveFormat, WaveFormatEx};
pub use x3daudio::{
    CalculateFlags, Cone, CurvePoint, DistanceCurve, DspSettings, Emitter, Listener, Vector3,
    X3DAudio, X3DAudioApi,
};
pub use xapo::{
    AudioProcessor, BufferFlags, FormatSupport, LockParameters, ParameterProvider, ProcessBuffer,
    RegistrationProperties, Xapo, XapoFlags, XapoParameters, XapoState,
};

/// The API is not in a valid state for the call.
pub const XAUDIO2_E_INVALID_CALL: HResult = HResult::from_u32(0x8896_0001);
/// The XMA hardware suffered an unrecoverable error.
pub const XAUDIO2_E_XMA_DECODER_ERROR: HResult = HResult::from_u32(0x8896_0002);
/// An effect failed to instantiate.
pub const XAUDIO2_E_XAPO_CREATION_FAILED: HResult = HResult::from_u32(0x8896_0003);
/// An audio device became unusable.
pub const XAUDIO2_E_DEVICE_INVALIDATED: HResult = HResult::from_u32(0x8896_0004);
/// The requested audio format is not supported by the effect.
pub const XAPO_E_FORMAT_UNSUPPORTED: HResult = HResult::from_u32(0x8897_0001);

const DESCRIPTORS: &[ResultDescriptor] = &[
    ResultDescriptor::new(
        XAUDIO2_E_INVALID_CALL,
        "XAudio2",
        "XAUDIO2_E_INVALID_CALL",
        "Returned by XAudio2 for certain API usage errors (invalid calls and so on) that are hard to avoid completely and should be handled by a title at runtime",
    ),
    ResultDescriptor::new(
        XAUDIO2_E_XMA_DECODER_ERROR,
        "XAudio2",
        "XAUDIO2_E_XMA_DECODER_ERROR",
        "The Xbox 360 XMA hardware suffered an unrecoverable error",
    ),
    ResultDescriptor::new(
        XAUDIO2_E_XAPO_CREATION_FAILED,
        "XAudio2",
        "XAUDIO2_E_XAPO_CREATION_FAILED",
        "An effect failed to instantiate",
    ),
    ResultDescriptor::new(
        XAUDIO2_E_DEVICE_INVALIDATED,
        "XAudio2",
        "XAUDIO2_E_DEVICE_INVALIDATED",
        "An audio device became unusable through being unplugged or some other event",
    ),
    ResultDescriptor::new(
        XAPO_E_FORMAT_UNSUPPORTED,
        "XAPO",
        "XAPO_E_FORMAT_UNSUPPORTED",
        "The requested audio format is unsupported",
    ),
];

/// Register the XAudio2 and XAPO result descriptors. Runs once per process.
pub fn register_result_descriptors() {
    static REGISTERED: Once = Once::new();
    REGISTERED.call_once(|| register_descriptors(DESCRIPTORS));
}
