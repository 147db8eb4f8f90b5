//! `WAVEFORMATEX` marshalling.
//!
//! The native header is 18 bytes, packed, followed by `cbSize` bytes of
//! format-specific data (the `WAVEFORMATEXTENSIBLE` tail, ADPCM coefficients
//! and so on). [`WaveFormat`] keeps the header fields plus the tail as an
//! owned byte vector.

use std::ffi::c_void;
use std::mem::size_of;

use serde::{Deserialize, Serialize};
use sharpcom_core::memory::{alloc_task_memory, free_task_memory};
use sharpcom_core::{Error, HResult, Result, ScratchArena};

/// `WAVE_FORMAT_PCM`
pub const WAVE_FORMAT_PCM: u16 = 0x0001;
/// `WAVE_FORMAT_ADPCM`
pub const WAVE_FORMAT_ADPCM: u16 = 0x0002;
/// `WAVE_FORMAT_IEEE_FLOAT`
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
/// `WAVE_FORMAT_EXTENSIBLE`
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Native `WAVEFORMATEX` header.
#[repr(C, packed(1))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaveFormatEx {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub cb_size: u16,
}

/// An audio format: the `WAVEFORMATEX` fields plus any extra format bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Bytes following the header; `cbSize` is their length.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<u8>,
}

impl WaveFormat {
    /// Integer PCM.
    ///
    /// Fails when `block_align` or the byte rate do not fit their native
    /// fields.
    pub fn pcm(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Result<Self> {
        Self::interleaved(WAVE_FORMAT_PCM, sample_rate, bits_per_sample, channels)
    }

    /// 32-bit float, the only format built-in XAPOs accept.
    pub fn ieee_float(sample_rate: u32, channels: u16) -> Result<Self> {
        Self::interleaved(WAVE_FORMAT_IEEE_FLOAT, sample_rate, 32, channels)
    }

    fn interleaved(format_tag: u16, sample_rate: u32, bits_per_sample: u16, channels: u16) -> Result<Self> {
        let block_align = channels
            .checked_mul(bits_per_sample / 8)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{channels} channels of {bits_per_sample} bits overflow nBlockAlign"
                ))
            })?;
        let avg_bytes_per_sec = sample_rate
            .checked_mul(u32::from(block_align))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{sample_rate} Hz at {block_align} bytes per frame overflows nAvgBytesPerSec"
                ))
            })?;
        Ok(Self {
            format_tag,
            channels,
            sample_rate,
            avg_bytes_per_sec,
            block_align,
            bits_per_sample,
            extra: Vec::new(),
        })
    }

    pub fn is_ieee_float(&self) -> bool {
        self.format_tag == WAVE_FORMAT_IEEE_FLOAT
    }

    /// Total native size: header plus extra bytes.
    pub fn native_size(&self) -> usize {
        size_of::<WaveFormatEx>() + self.extra.len()
    }

    /// The native header for this format.
    pub fn header(&self) -> Result<WaveFormatEx> {
        let cb_size = u16::try_from(self.extra.len()).map_err(|_| {
            Error::InvalidArgument(format!("{} extra format bytes exceed cbSize", self.extra.len()))
        })?;
        Ok(WaveFormatEx {
            format_tag: self.format_tag,
            channels: self.channels,
            samples_per_sec: self.sample_rate,
            avg_bytes_per_sec: self.avg_bytes_per_sec,
            block_align: self.block_align,
            bits_per_sample: self.bits_per_sample,
            cb_size,
        })
    }

    /// Read a format from native memory, including `cbSize` extra bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a complete `WAVEFORMATEX` followed by
    /// `cbSize` readable bytes.
    pub unsafe fn from_raw(ptr: *const WaveFormatEx) -> Result<Self> {
        if ptr.is_null() {
            return Err(Error::NullPointer);
        }
        // SAFETY: ptr points to a header; read_unaligned copes with packing.
        let header = unsafe { ptr.read_unaligned() };
        let extra = if header.cb_size == 0 {
            Vec::new()
        } else {
            // SAFETY: the caller guarantees cbSize bytes follow the header.
            unsafe {
                let tail = ptr.cast::<u8>().add(size_of::<WaveFormatEx>());
                std::slice::from_raw_parts(tail, header.cb_size as usize).to_vec()
            }
        };
        Ok(Self {
            format_tag: header.format_tag,
            channels: header.channels,
            sample_rate: header.samples_per_sec,
            avg_bytes_per_sec: header.avg_bytes_per_sec,
            block_align: header.block_align,
            bits_per_sample: header.bits_per_sample,
            extra,
        })
    }

    fn write_to(&self, block: *mut u8) -> Result<()> {
        let header = self.header()?;
        // SAFETY: block holds native_size() bytes.
        unsafe {
            block.cast::<WaveFormatEx>().write_unaligned(header);
            if !self.extra.is_empty() {
                std::ptr::copy_nonoverlapping(
                    self.extra.as_ptr(),
                    block.add(size_of::<WaveFormatEx>()),
                    self.extra.len(),
                );
            }
        }
        Ok(())
    }

    /// Copy into `arena` for the duration of one native call.
    pub fn to_arena(&self, arena: &mut ScratchArena) -> Result<*const WaveFormatEx> {
        let block = arena.alloc_bytes(self.native_size(), 1)?;
        self.write_to(block)?;
        Ok(block.cast_const().cast())
    }

    /// Copy into task memory, for out parameters the caller frees.
    pub fn to_task_memory(&self) -> Result<*mut WaveFormatEx> {
        let block = alloc_task_memory(self.native_size()).cast::<u8>();
        if block.is_null() {
            return Err(Error::Native(HResult::E_OUTOFMEMORY));
        }
        if let Err(err) = self.write_to(block) {
            // SAFETY: block came from alloc_task_memory and was not handed out.
            unsafe { free_task_memory(block.cast::<c_void>()) };
            return Err(err);
        }
        Ok(block.cast())
    }
}
