//! # sharpcom
//!
//! COM interop for Rust.
//!
//! sharpcom wraps native COM interfaces in reference-counted Rust types and
//! exposes Rust objects to native code as COM callbacks, with layout-exact
//! marshalling in between.
//!
//! ## Architecture
//!
//! ```text
//! Your code
//!     ↓                         ↑
//! Interface wrappers       ComCallback impls (AudioProcessor, ViewportEventHandler)
//!     ↓                         ↑
//! ComObject  ──  Marshal  ──  Shadow
//!     ↓                         ↑
//! native COM vtables ───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sharpcom::prelude::*;
//!
//! struct Gain { state: XapoState }
//!
//! impl AudioProcessor for Gain {
//!     fn registration_properties(&self) -> RegistrationProperties {
//!         RegistrationProperties::new(CLSID_GAIN, "Gain")
//!     }
//!     fn lock_for_process(&self, inputs: &[LockParameters], outputs: &[LockParameters]) -> Result<()> {
//!         self.state.lock(&self.registration_properties(), inputs, outputs)
//!     }
//!     fn unlock_for_process(&self) { self.state.unlock() }
//!     fn process(&self, inputs: &[ProcessBuffer], outputs: &mut [ProcessBuffer], enabled: bool) {
//!         // Your DSP here
//!     }
//! }
//!
//! // Hand the effect to XAudio2
//! let shadow = xapo::bind(Arc::new(Gain { state: XapoState::default() }))?;
//! let effect = shadow.to_raw()?;
//! ```

// Re-export sub-crates
pub use sharpcom_core as core;

#[cfg(feature = "xaudio2")]
pub use sharpcom_xaudio2 as xaudio2;

#[cfg(feature = "manipulation")]
pub use sharpcom_manipulation as manipulation;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sharpcom::prelude::*;
/// ```
pub mod prelude {
    // Core traits and types
    pub use sharpcom_core::{
        // ABI identifiers and status codes
        Guid, HResult, ResultDescriptor,
        // Error types
        Error, Result,
        // Native object wrappers
        ComObject, Interface, Unknown,
        // Callback shadows
        ComCallback, InterfaceEntry, Shadow, ShadowState,
        // Marshalling and native memory
        Marshal, NativeBuffer, ScratchArena,
        // Leak tracking
        LeakReport, ObjectReference, ObjectTracker, TrackingScope,
        // Runtime configuration
        Configuration,
    };
    pub use sharpcom_core::com_interface;

    // XAudio2 (only when feature enabled)
    #[cfg(feature = "xaudio2")]
    pub use sharpcom_xaudio2::{
        // Effects
        xapo, AudioProcessor, BufferFlags, FormatSupport, LockParameters, ParameterProvider,
        ProcessBuffer, RegistrationProperties, Xapo, XapoFlags, XapoParameters, XapoState,
        // Formats
        WaveFormat,
        // 3D audio
        CalculateFlags, Cone, CurvePoint, DistanceCurve, DspSettings, Emitter, Listener, Vector3,
        X3DAudio, X3DAudioApi,
        // Reverb
        ReverbI3DL2Parameters, ReverbParameters,
    };

    // DirectManipulation (only when feature enabled)
    #[cfg(feature = "manipulation")]
    pub use sharpcom_manipulation::{
        Content, ContentTransform, EventHandler, InputMode, ManipulationConfiguration, MotionTypes,
        Rect, Tag, Viewport, ViewportEventHandler, ViewportOptions, ViewportStatus,
    };
}
