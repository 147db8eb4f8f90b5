//! Error types for interop operations.

use crate::guid::Guid;
use crate::result::HResult;

/// Errors surfaced by wrappers, shadows and marshallers.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A native call returned a failure `HRESULT`.
    Native(HResult),
    /// `QueryInterface` reported that the object does not implement `iid`.
    NoInterface {
        iid: Guid,
        interface: &'static str,
    },
    /// A native pointer that must not be null was null.
    NullPointer,
    /// The wrapper was already disposed.
    Disposed,
    /// The callback behind a shadow has been detached.
    StaleShadow,
    /// A value could not be marshalled to or from its native layout.
    InvalidArgument(String),
    /// Configuration or report (de)serialization failed.
    Serialization(String),
}

impl Error {
    /// The `HRESULT` reported to native code for this error.
    pub fn to_hresult(&self) -> HResult {
        match self {
            Self::Native(hr) => *hr,
            Self::NoInterface { .. } => HResult::E_NOINTERFACE,
            Self::NullPointer => HResult::E_POINTER,
            Self::Disposed => HResult::E_HANDLE,
            Self::StaleShadow => HResult::RPC_E_DISCONNECTED,
            Self::InvalidArgument(_) => HResult::E_INVALIDARG,
            Self::Serialization(_) => HResult::E_FAIL,
        }
    }

    /// True for the recoverable "no such interface" outcome of a capability query.
    pub fn is_no_interface(&self) -> bool {
        matches!(self, Self::NoInterface { .. })
            || matches!(self, Self::Native(hr) if *hr == HResult::E_NOINTERFACE)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(hr) => write!(f, "native call failed: {hr}"),
            Self::NoInterface { iid, interface } => {
                write!(f, "no such interface: {interface} {iid:?}")
            }
            Self::NullPointer => write!(f, "unexpected null pointer"),
            Self::Disposed => write!(f, "object already disposed"),
            Self::StaleShadow => write!(f, "callback shadow has been detached"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<HResult> for Error {
    fn from(hr: HResult) -> Self {
        Self::Native(hr)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for interop operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hresult() {
        assert_eq!(Error::NullPointer.to_hresult(), HResult::E_POINTER);
        assert_eq!(
            Error::Native(HResult::E_ABORT).to_hresult(),
            HResult::E_ABORT
        );
        assert_eq!(
            Error::StaleShadow.to_hresult(),
            HResult::RPC_E_DISCONNECTED
        );
        assert_eq!(
            Error::InvalidArgument("count".into()).to_hresult(),
            HResult::E_INVALIDARG
        );
    }

    #[test]
    fn test_is_no_interface() {
        let err = Error::NoInterface {
            iid: Guid::ZERO,
            interface: "IUnknown",
        };
        assert!(err.is_no_interface());
        assert!(Error::Native(HResult::E_NOINTERFACE).is_no_interface());
        assert!(!Error::Native(HResult::E_FAIL).is_no_interface());
    }

    #[test]
    fn test_display() {
        let msg = Error::Native(HResult::E_OUTOFMEMORY).to_string();
        assert!(msg.contains("E_OUTOFMEMORY"));
        assert_eq!(Error::Disposed.to_string(), "object already disposed");
    }
}
