//! HRESULT status codes and their descriptors.
//!
//! Every native call in the wrapped APIs reports its outcome as an `HRESULT`:
//! a signed 32-bit integer where negative values are failures. [`HResult`]
//! is the ABI-transparent wrapper used in vtable signatures, and
//! [`ResultDescriptor`] attaches a module, symbolic name and description to a
//! code for error messages.
//!
//! API crates register their own codes with [`register_descriptors`] the
//! first time they are used, so `Display` for an error can name
//! `XAPO_E_FORMAT_UNSUPPORTED` rather than print a bare number.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use crate::error::{Error, Result};

/// Native `HRESULT`, layout-compatible with `i32`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const S_FALSE: HResult = HResult(1);
    pub const E_NOTIMPL: HResult = HResult::from_u32(0x8000_4001);
    pub const E_NOINTERFACE: HResult = HResult::from_u32(0x8000_4002);
    pub const E_POINTER: HResult = HResult::from_u32(0x8000_4003);
    pub const E_ABORT: HResult = HResult::from_u32(0x8000_4004);
    pub const E_FAIL: HResult = HResult::from_u32(0x8000_4005);
    pub const E_UNEXPECTED: HResult = HResult::from_u32(0x8000_FFFF);
    pub const E_ACCESSDENIED: HResult = HResult::from_u32(0x8007_0005);
    pub const E_HANDLE: HResult = HResult::from_u32(0x8007_0006);
    pub const E_OUTOFMEMORY: HResult = HResult::from_u32(0x8007_000E);
    pub const E_INVALIDARG: HResult = HResult::from_u32(0x8007_0057);
    /// The object invoked has disconnected from its clients.
    ///
    /// Returned by shadow thunks once the callback has been detached.
    pub const RPC_E_DISCONNECTED: HResult = HResult::from_u32(0x8001_0108);

    /// Create an `HResult` from its unsigned bit pattern (`0x8000_4005`).
    pub const fn from_u32(code: u32) -> Self {
        Self(code as i32)
    }

    /// The raw signed code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// The raw code as an unsigned bit pattern.
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// `SUCCEEDED(hr)`.
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// `FAILED(hr)`.
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// The facility field (bits 16..29).
    pub const fn facility(self) -> u16 {
        ((self.as_u32() >> 16) & 0x1FFF) as u16
    }

    /// Convert into a `Result`, keeping success codes such as `S_FALSE` as `Ok`.
    #[inline]
    pub fn ok(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Native(self))
        }
    }

    /// Look up the registered descriptor for this code.
    pub fn descriptor(self) -> Option<ResultDescriptor> {
        ResultDescriptor::find(self)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor() {
            Some(descriptor) => write!(f, "{descriptor}"),
            None => write!(f, "HRESULT: [0x{:08X}], Unknown", self.as_u32()),
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult(0x{:08X})", self.as_u32())
    }
}

impl From<i32> for HResult {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

// =========================================================================
// ResultDescriptor
// =========================================================================

/// Metadata attached to a known result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultDescriptor {
    /// The code described.
    pub result: HResult,
    /// Module that defines the code (`"General"`, `"XAudio2"`, ...).
    pub module: &'static str,
    /// Symbolic name from the native headers (`"E_NOINTERFACE"`).
    pub api_code: &'static str,
    /// Human-readable description.
    pub description: &'static str,
}

impl ResultDescriptor {
    pub const fn new(
        result: HResult,
        module: &'static str,
        api_code: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            result,
            module,
            api_code,
            description,
        }
    }

    /// Find the descriptor registered for `result`.
    pub fn find(result: HResult) -> Option<ResultDescriptor> {
        let table = descriptor_table().read().ok()?;
        table.get(&result.0).copied()
    }
}

impl fmt::Display for ResultDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HRESULT: [0x{:08X}], Module: [{}], ApiCode: [{}], Message: {}",
            self.result.as_u32(),
            self.module,
            self.api_code,
            self.description
        )
    }
}

/// Descriptors for the generic COM codes, registered on first lookup.
const GENERAL_DESCRIPTORS: &[ResultDescriptor] = &[
    ResultDescriptor::new(HResult::S_OK, "General", "S_OK", "The operation completed successfully"),
    ResultDescriptor::new(HResult::S_FALSE, "General", "S_FALSE", "The operation completed with a false result"),
    ResultDescriptor::new(HResult::E_NOTIMPL, "General", "E_NOTIMPL", "Not implemented"),
    ResultDescriptor::new(HResult::E_NOINTERFACE, "General", "E_NOINTERFACE", "No such interface supported"),
    ResultDescriptor::new(HResult::E_POINTER, "General", "E_POINTER", "Invalid pointer"),
    ResultDescriptor::new(HResult::E_ABORT, "General", "E_ABORT", "Operation aborted"),
    ResultDescriptor::new(HResult::E_FAIL, "General", "E_FAIL", "Unspecified error"),
    ResultDescriptor::new(HResult::E_UNEXPECTED, "General", "E_UNEXPECTED", "Catastrophic failure"),
    ResultDescriptor::new(HResult::E_ACCESSDENIED, "General", "E_ACCESSDENIED", "General access denied error"),
    ResultDescriptor::new(HResult::E_HANDLE, "General", "E_HANDLE", "Invalid handle"),
    ResultDescriptor::new(HResult::E_OUTOFMEMORY, "General", "E_OUTOFMEMORY", "Out of memory"),
    ResultDescriptor::new(HResult::E_INVALIDARG, "General", "E_INVALIDARG", "Invalid arguments"),
    ResultDescriptor::new(
        HResult::RPC_E_DISCONNECTED,
        "General",
        "RPC_E_DISCONNECTED",
        "The object invoked has disconnected from its clients",
    ),
];

fn descriptor_table() -> &'static RwLock<HashMap<i32, ResultDescriptor>> {
    static TABLE: OnceLock<RwLock<HashMap<i32, ResultDescriptor>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let table = GENERAL_DESCRIPTORS
            .iter()
            .map(|descriptor| (descriptor.result.0, *descriptor))
            .collect();
        RwLock::new(table)
    })
}

/// Register module-specific descriptors.
///
/// Later registrations for the same code replace earlier ones. Safe to call
/// repeatedly with the same table.
pub fn register_descriptors(descriptors: &[ResultDescriptor]) {
    match descriptor_table().write() {
        Ok(mut table) => {
            for descriptor in descriptors {
                table.insert(descriptor.result.0, *descriptor);
            }
        }
        Err(_) => log::warn!("result descriptor table is poisoned; registration skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hresult_layout() {
        assert_eq!(std::mem::size_of::<HResult>(), 4);
        assert_eq!(std::mem::align_of::<HResult>(), 4);
    }

    #[test]
    fn test_success_and_failure() {
        assert!(HResult::S_OK.is_success());
        assert!(HResult::S_FALSE.is_success());
        assert!(HResult::E_FAIL.is_failure());
        assert_eq!(HResult::E_FAIL.code(), -2147467259);
        assert!(HResult::S_FALSE.ok().is_ok());
        assert_eq!(
            HResult::E_POINTER.ok(),
            Err(Error::Native(HResult::E_POINTER))
        );
    }

    #[test]
    fn test_facility() {
        assert_eq!(HResult::E_INVALIDARG.facility(), 7);
        assert_eq!(HResult::E_FAIL.facility(), 0);
    }

    #[test]
    fn test_general_descriptor_lookup() {
        let descriptor = HResult::E_NOINTERFACE.descriptor().unwrap();
        assert_eq!(descriptor.api_code, "E_NOINTERFACE");
        assert_eq!(descriptor.module, "General");
        assert!(HResult::E_NOINTERFACE.to_string().contains("0x80004002"));
    }

    #[test]
    fn test_register_descriptors() {
        const CUSTOM: HResult = HResult::from_u32(0x8BAD_0001);
        assert!(CUSTOM.descriptor().is_none());
        assert!(CUSTOM.to_string().contains("Unknown"));

        register_descriptors(&[ResultDescriptor::new(
            CUSTOM,
            "Test",
            "TEST_E_CUSTOM",
            "Custom failure",
        )]);

        let descriptor = CUSTOM.descriptor().unwrap();
        assert_eq!(descriptor.api_code, "TEST_E_CUSTOM");
        assert!(CUSTOM.to_string().contains("TEST_E_CUSTOM"));
    }
}
