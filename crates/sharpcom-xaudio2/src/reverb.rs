//! Reverb effect parameters.
//!
//! [`ReverbParameters`] is the native `XAUDIO2FX_REVERB_PARAMETERS` block
//! sent through `IXAPOParameters`. [`ReverbI3DL2Parameters`] is the
//! environmental (I3DL2) description the presets are written in; convert
//! with [`ReverbParameters::from_i3dl2`].

use std::mem::size_of;

use serde::{Deserialize, Serialize};
use sharpcom_core::marshal::RawBool;
use sharpcom_core::{Error, Result};

use crate::xapo::XapoParameters;

pub const MIN_FRAMERATE: u32 = 20_000;
pub const MAX_FRAMERATE: u32 = 48_000;

pub const MAX_REFLECTIONS_DELAY: u32 = 300;
pub const MAX_REVERB_DELAY: u8 = 85;
pub const MAX_REAR_DELAY: u8 = 5;
pub const MAX_7POINT1_REAR_DELAY: u8 = 20;
pub const MAX_POSITION: u8 = 30;
pub const MAX_DIFFUSION: u8 = 15;
pub const MAX_LOW_EQ_GAIN: u8 = 12;
pub const MAX_LOW_EQ_CUTOFF: u8 = 9;
pub const MAX_HIGH_EQ_GAIN: u8 = 8;
pub const MAX_HIGH_EQ_CUTOFF: u8 = 14;

pub const DEFAULT_REAR_DELAY: u8 = 5;
pub const DEFAULT_7POINT1_REAR_DELAY: u8 = 20;
pub const DEFAULT_7POINT1_SIDE_DELAY: u8 = 5;
pub const DEFAULT_POSITION: u8 = 6;
pub const DEFAULT_POSITION_MATRIX: u8 = 27;
pub const DEFAULT_ROOM_SIZE: f32 = 100.0;
pub const DEFAULT_LOW_EQ_CUTOFF: u8 = 4;
pub const DEFAULT_HIGH_EQ_CUTOFF: u8 = 4;

/// `XAUDIO2FX_REVERB_PARAMETERS`
#[repr(C, packed(1))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParameters {
    /// Percent of output that is reverb, 0 to 100.
    pub wet_dry_mix: f32,
    /// Milliseconds, 0 to 300.
    pub reflections_delay: u32,
    /// Milliseconds, 0 to 85.
    pub reverb_delay: u8,
    pub rear_delay: u8,
    pub side_delay: u8,
    pub position_left: u8,
    pub position_right: u8,
    pub position_matrix_left: u8,
    pub position_matrix_right: u8,
    pub early_diffusion: u8,
    pub late_diffusion: u8,
    pub low_eq_gain: u8,
    pub low_eq_cutoff: u8,
    pub high_eq_gain: u8,
    pub high_eq_cutoff: u8,
    /// Hz, 20 to 20000.
    pub room_filter_freq: f32,
    /// dB, -100 to 0.
    pub room_filter_main: f32,
    pub room_filter_hf: f32,
    /// dB, -100 to 20.
    pub reflections_gain: f32,
    pub reverb_gain: f32,
    /// Seconds, at least 0.1.
    pub decay_time: f32,
    /// Percent, 0 to 100.
    pub density: f32,
    /// Feet, 1 to 100.
    pub room_size: f32,
    pub disable_late_field: RawBool,
}

impl Default for ReverbParameters {
    fn default() -> Self {
        Self {
            wet_dry_mix: 100.0,
            reflections_delay: 5,
            reverb_delay: 5,
            rear_delay: DEFAULT_REAR_DELAY,
            side_delay: DEFAULT_7POINT1_SIDE_DELAY,
            position_left: DEFAULT_POSITION,
            position_right: DEFAULT_POSITION,
            position_matrix_left: DEFAULT_POSITION_MATRIX,
            position_matrix_right: DEFAULT_POSITION_MATRIX,
            early_diffusion: 8,
            late_diffusion: 8,
            low_eq_gain: 8,
            low_eq_cutoff: DEFAULT_LOW_EQ_CUTOFF,
            high_eq_gain: 8,
            high_eq_cutoff: DEFAULT_HIGH_EQ_CUTOFF,
            room_filter_freq: 5000.0,
            room_filter_main: 0.0,
            room_filter_hf: 0.0,
            reflections_gain: 0.0,
            reverb_gain: 0.0,
            decay_time: 1.0,
            density: 100.0,
            room_size: DEFAULT_ROOM_SIZE,
            disable_late_field: RawBool::FALSE,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidArgument(format!("{name} = {value} is outside {min}..={max}")));
    }
    Ok(())
}

impl ReverbParameters {
    /// Reject values the native effect would refuse.
    pub fn validate(&self) -> Result<()> {
        let p = *self;
        check_range("wet_dry_mix", p.wet_dry_mix, 0.0, 100.0)?;
        check_range("reflections_delay", p.reflections_delay, 0, MAX_REFLECTIONS_DELAY)?;
        check_range("reverb_delay", p.reverb_delay, 0, MAX_REVERB_DELAY)?;
        check_range("rear_delay", p.rear_delay, 0, MAX_7POINT1_REAR_DELAY)?;
        check_range("side_delay", p.side_delay, 0, MAX_REAR_DELAY)?;
        for (name, value) in [
            ("position_left", p.position_left),
            ("position_right", p.position_right),
            ("position_matrix_left", p.position_matrix_left),
            ("position_matrix_right", p.position_matrix_right),
        ] {
            check_range(name, value, 0, MAX_POSITION)?;
        }
        check_range("early_diffusion", p.early_diffusion, 0, MAX_DIFFUSION)?;
        check_range("late_diffusion", p.late_diffusion, 0, MAX_DIFFUSION)?;
        check_range("low_eq_gain", p.low_eq_gain, 0, MAX_LOW_EQ_GAIN)?;
        check_range("low_eq_cutoff", p.low_eq_cutoff, 0, MAX_LOW_EQ_CUTOFF)?;
        check_range("high_eq_gain", p.high_eq_gain, 0, MAX_HIGH_EQ_GAIN)?;
        check_range("high_eq_cutoff", p.high_eq_cutoff, 0, MAX_HIGH_EQ_CUTOFF)?;
        check_range("room_filter_freq", p.room_filter_freq, 20.0, 20_000.0)?;
        check_range("room_filter_main", p.room_filter_main, -100.0, 0.0)?;
        check_range("room_filter_hf", p.room_filter_hf, -100.0, 0.0)?;
        check_range("reflections_gain", p.reflections_gain, -100.0, 20.0)?;
        check_range("reverb_gain", p.reverb_gain, -100.0, 20.0)?;
        check_range("decay_time", p.decay_time, 0.1, f32::MAX)?;
        check_range("density", p.density, 0.0, 100.0)?;
        check_range("room_size", p.room_size, 1.0, 100.0)?;
        Ok(())
    }

    /// The native byte image.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: packed plain-old-data, every byte is initialized.
        unsafe { std::slice::from_raw_parts((self as *const Self).cast::<u8>(), size_of::<Self>()) }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != size_of::<Self>() {
            return Err(Error::InvalidArgument(format!(
                "reverb parameters are {} bytes, got {}",
                size_of::<Self>(),
                bytes.len()
            )));
        }
        // SAFETY: length checked; every bit pattern is a valid value.
        Ok(unsafe { bytes.as_ptr().cast::<Self>().read_unaligned() })
    }

    /// Convert an I3DL2 description, `ReverbConvertI3DL2ToNative`.
    ///
    /// `seven_dot_one` selects the rear delay used by the 7.1 reverb.
    pub fn from_i3dl2(i3dl2: &ReverbI3DL2Parameters, seven_dot_one: bool) -> Self {
        let mut native = Self {
            rear_delay: if seven_dot_one {
                DEFAULT_7POINT1_REAR_DELAY
            } else {
                DEFAULT_REAR_DELAY
            },
            side_delay: DEFAULT_7POINT1_SIDE_DELAY,
            position_left: DEFAULT_POSITION,
            position_right: DEFAULT_POSITION,
            position_matrix_left: DEFAULT_POSITION_MATRIX,
            position_matrix_right: DEFAULT_POSITION_MATRIX,
            room_size: DEFAULT_ROOM_SIZE,
            low_eq_cutoff: 4,
            high_eq_cutoff: 6,
            room_filter_main: i3dl2.room as f32 / 100.0,
            room_filter_hf: i3dl2.room_hf as f32 / 100.0,
            ..Self::default()
        };

        let ratio = i3dl2.decay_hf_ratio;
        if ratio >= 1.0 {
            let index = ((-4.0 * f64::from(ratio).log10()) as i32).max(-8);
            native.low_eq_gain = if index < 0 { (index + 8) as u8 } else { 8 };
            native.high_eq_gain = 8;
            native.decay_time = i3dl2.decay_time * ratio;
        } else {
            let index = ((4.0 * f64::from(ratio).log10()) as i32).max(-8);
            native.low_eq_gain = 8;
            native.high_eq_gain = if index < 0 { (index + 8) as u8 } else { 8 };
            native.decay_time = i3dl2.decay_time;
        }

        let reflections_delay = i3dl2.reflections_delay * 1000.0;
        native.reflections_delay = if reflections_delay >= MAX_REFLECTIONS_DELAY as f32 {
            MAX_REFLECTIONS_DELAY - 1
        } else if reflections_delay <= 1.0 {
            1
        } else {
            reflections_delay as u32
        };

        let reverb_delay = i3dl2.reverb_delay * 1000.0;
        native.reverb_delay = if reverb_delay >= f32::from(MAX_REVERB_DELAY) {
            MAX_REVERB_DELAY - 1
        } else {
            reverb_delay as u8
        };

        native.reflections_gain = i3dl2.reflections as f32 / 100.0;
        native.reverb_gain = i3dl2.reverb as f32 / 100.0;
        native.early_diffusion = (15.0 * i3dl2.diffusion / 100.0) as u8;
        native.late_diffusion = native.early_diffusion;
        native.density = i3dl2.density;
        native.room_filter_freq = i3dl2.hf_reference;
        native.wet_dry_mix = i3dl2.wet_dry_mix;
        native.disable_late_field = RawBool::FALSE;
        native
    }
}

/// `XAUDIO2FX_REVERB_I3DL2_PARAMETERS`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbI3DL2Parameters {
    pub wet_dry_mix: f32,
    /// Millibels.
    pub room: i32,
    pub room_hf: i32,
    pub room_rolloff_factor: f32,
    /// Seconds.
    pub decay_time: f32,
    pub decay_hf_ratio: f32,
    pub reflections: i32,
    /// Seconds.
    pub reflections_delay: f32,
    pub reverb: i32,
    /// Seconds.
    pub reverb_delay: f32,
    /// Percent.
    pub diffusion: f32,
    /// Percent.
    pub density: f32,
    /// Hz.
    pub hf_reference: f32,
}

macro_rules! i3dl2_presets {
    ($($name:ident = $label:literal {
        $wet:expr, $room:expr, $room_hf:expr, $rolloff:expr, $decay:expr, $decay_hf:expr,
        $refl:expr, $refl_delay:expr, $reverb:expr, $reverb_delay:expr,
        $diffusion:expr, $density:expr, $hf_ref:expr
    };)*) => {
        impl ReverbI3DL2Parameters {
            $(
                pub const $name: ReverbI3DL2Parameters = ReverbI3DL2Parameters {
                    wet_dry_mix: $wet,
                    room: $room,
                    room_hf: $room_hf,
                    room_rolloff_factor: $rolloff,
                    decay_time: $decay,
                    decay_hf_ratio: $decay_hf,
                    reflections: $refl,
                    reflections_delay: $refl_delay,
                    reverb: $reverb,
                    reverb_delay: $reverb_delay,
                    diffusion: $diffusion,
                    density: $density,
                    hf_reference: $hf_ref,
                };
            )*

            /// Every preset with its name.
            pub const PRESETS: &'static [(&'static str, ReverbI3DL2Parameters)] = &[
                $(($label, ReverbI3DL2Parameters::$name),)*
            ];
        }
    };
}

i3dl2_presets! {
    DEFAULT = "default" { 100.0, -10000, 0, 0.0, 1.00, 0.50, -10000, 0.020, -10000, 0.040, 100.0, 100.0, 5000.0 };
    GENERIC = "generic" { 100.0, -1000, -100, 0.0, 1.49, 0.83, -2602, 0.007, 200, 0.011, 100.0, 100.0, 5000.0 };
    PADDED_CELL = "padded_cell" { 100.0, -1000, -6000, 0.0, 0.17, 0.10, -1204, 0.001, 207, 0.002, 100.0, 100.0, 5000.0 };
    ROOM = "room" { 100.0, -1000, -454, 0.0, 0.40, 0.83, -1646, 0.002, 53, 0.003, 100.0, 100.0, 5000.0 };
    BATHROOM = "bathroom" { 100.0, -1000, -1200, 0.0, 1.49, 0.54, -370, 0.007, 1030, 0.011, 100.0, 60.0, 5000.0 };
    LIVING_ROOM = "living_room" { 100.0, -1000, -6000, 0.0, 0.50, 0.10, -1376, 0.003, -1104, 0.004, 100.0, 100.0, 5000.0 };
    STONE_ROOM = "stone_room" { 100.0, -1000, -300, 0.0, 2.31, 0.64, -711, 0.012, 83, 0.017, 100.0, 100.0, 5000.0 };
    AUDITORIUM = "auditorium" { 100.0, -1000, -476, 0.0, 4.32, 0.59, -789, 0.020, -289, 0.030, 100.0, 100.0, 5000.0 };
    CONCERT_HALL = "concert_hall" { 100.0, -1000, -500, 0.0, 3.92, 0.70, -1230, 0.020, -2, 0.029, 100.0, 100.0, 5000.0 };
    CAVE = "cave" { 100.0, -1000, 0, 0.0, 2.91, 1.30, -602, 0.015, -302, 0.022, 100.0, 100.0, 5000.0 };
    ARENA = "arena" { 100.0, -1000, -698, 0.0, 7.24, 0.33, -1166, 0.020, 16, 0.030, 100.0, 100.0, 5000.0 };
    HANGAR = "hangar" { 100.0, -1000, -1000, 0.0, 10.05, 0.23, -602, 0.020, 198, 0.030, 100.0, 100.0, 5000.0 };
    CARPETED_HALLWAY = "carpeted_hallway" { 100.0, -1000, -4000, 0.0, 0.30, 0.10, -1831, 0.002, -1630, 0.030, 100.0, 100.0, 5000.0 };
    HALLWAY = "hallway" { 100.0, -1000, -300, 0.0, 1.49, 0.59, -1219, 0.007, 441, 0.011, 100.0, 100.0, 5000.0 };
    STONE_CORRIDOR = "stone_corridor" { 100.0, -1000, -237, 0.0, 2.70, 0.79, -1214, 0.013, 395, 0.020, 100.0, 100.0, 5000.0 };
    ALLEY = "alley" { 100.0, -1000, -270, 0.0, 1.49, 0.86, -1204, 0.007, -4, 0.011, 100.0, 100.0, 5000.0 };
    FOREST = "forest" { 100.0, -1000, -3300, 0.0, 1.49, 0.54, -2560, 0.162, -613, 0.088, 79.0, 100.0, 5000.0 };
    CITY = "city" { 100.0, -1000, -800, 0.0, 1.49, 0.67, -2273, 0.007, -2217, 0.011, 50.0, 100.0, 5000.0 };
    MOUNTAINS = "mountains" { 100.0, -1000, -2500, 0.0, 1.49, 0.21, -2780, 0.300, -2014, 0.100, 27.0, 100.0, 5000.0 };
    QUARRY = "quarry" { 100.0, -1000, -1000, 0.0, 1.49, 0.83, -10000, 0.061, 500, 0.025, 100.0, 100.0, 5000.0 };
    PLAIN = "plain" { 100.0, -1000, -2000, 0.0, 1.49, 0.50, -2466, 0.179, -2514, 0.100, 21.0, 100.0, 5000.0 };
    PARKING_LOT = "parking_lot" { 100.0, -1000, 0, 0.0, 1.65, 1.50, -1363, 0.008, -1153, 0.012, 100.0, 100.0, 5000.0 };
    SEWER_PIPE = "sewer_pipe" { 100.0, -1000, -1000, 0.0, 2.81, 0.14, 429, 0.014, 648, 0.021, 80.0, 60.0, 5000.0 };
    UNDERWATER = "underwater" { 100.0, -1000, -4000, 0.0, 1.49, 0.10, -449, 0.007, 1700, 0.011, 100.0, 100.0, 5000.0 };
    SMALL_ROOM = "small_room" { 100.0, -1000, -600, 0.0, 1.10, 0.83, -400, 0.005, 500, 0.010, 100.0, 100.0, 5000.0 };
    MEDIUM_ROOM = "medium_room" { 100.0, -1000, -600, 0.0, 1.30, 0.83, -1000, 0.010, -200, 0.020, 100.0, 100.0, 5000.0 };
    LARGE_ROOM = "large_room" { 100.0, -1000, -600, 0.0, 1.50, 0.83, -1600, 0.020, -1000, 0.040, 100.0, 100.0, 5000.0 };
    MEDIUM_HALL = "medium_hall" { 100.0, -1000, -600, 0.0, 1.80, 0.70, -1300, 0.015, -800, 0.030, 100.0, 100.0, 5000.0 };
    LARGE_HALL = "large_hall" { 100.0, -1000, -600, 0.0, 1.80, 0.70, -2000, 0.030, -1400, 0.060, 100.0, 100.0, 5000.0 };
    PLATE = "plate" { 100.0, -1000, -200, 0.0, 1.30, 0.90, 0, 0.002, 0, 0.010, 100.0, 75.0, 5000.0 };
}

impl ReverbI3DL2Parameters {
    /// Look up a preset by its snake_case name.
    pub fn preset(name: &str) -> Option<Self> {
        Self::PRESETS
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(name))
            .map(|(_, preset)| *preset)
    }
}

impl XapoParameters {
    /// Validate and send reverb parameters to a native reverb effect.
    pub fn set_reverb_parameters(&self, parameters: &ReverbParameters) -> Result<()> {
        parameters.validate()?;
        self.set_parameters(parameters.as_bytes())
    }

    pub fn reverb_parameters(&self) -> Result<ReverbParameters> {
        let mut bytes = [0u8; size_of::<ReverbParameters>()];
        self.get_parameters(&mut bytes)?;
        ReverbParameters::from_bytes(&bytes)
    }
}
