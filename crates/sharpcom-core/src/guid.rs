//! Interface and class identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sharpcom_utils::{parse_guid, try_parse_guid};

use crate::error::Error;

/// A 128-bit globally unique identifier in the native `GUID` layout.
///
/// Used for interface identifiers (IIDs) and class identifiers (CLSIDs).
/// The field order matches `GUID` from `guiddef.h`, so a `*const Guid` can be
/// handed to native code as a `REFIID`.
///
/// # Example
///
/// ```
/// use sharpcom_core::Guid;
///
/// const IID_IXAPO: Guid = Guid::parse("A410B984-9839-4819-A0BE-2856AE6B3ADB");
/// assert_eq!(IID_IXAPO.to_string(), "A410B984-9839-4819-A0BE-2856AE6B3ADB");
/// ```
///
/// Serializes as the same registry-format string.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// The all-zero GUID (`GUID_NULL`).
    pub const ZERO: Guid = Guid::from_values(0, 0, 0, [0; 8]);

    /// Create a GUID from its native parts.
    pub const fn from_values(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Parse a registry-format string (`"XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX"`).
    ///
    /// Braces are accepted. Usable in `const` items, where a malformed string
    /// fails the build.
    pub const fn parse(s: &str) -> Self {
        let (data1, data2, data3, data4) = parse_guid(s);
        Self::from_values(data1, data2, data3, data4)
    }

    /// Build a GUID from its 128-bit big-endian value.
    pub const fn from_u128(value: u128) -> Self {
        let bytes = value.to_be_bytes();
        Self {
            data1: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_be_bytes([bytes[4], bytes[5]]),
            data3: u16::from_be_bytes([bytes[6], bytes[7]]),
            data4: [
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ],
        }
    }

    /// The 128-bit big-endian value of this GUID.
    pub const fn to_u128(&self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (data1, data2, data3, data4) =
            try_parse_guid(s).ok_or_else(|| Error::InvalidArgument(format!("malformed GUID {s:?}")))?;
        Ok(Self::from_values(data1, data2, data3, data4))
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{self}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_layout() {
        assert_eq!(std::mem::size_of::<Guid>(), 16);
        assert_eq!(std::mem::align_of::<Guid>(), 4);
        assert_eq!(std::mem::offset_of!(Guid, data4), 8);
    }

    #[test]
    fn test_display_round_trip() {
        let text = "26D95C66-80F2-499A-AD54-5AE7F01C6D98";
        let guid = Guid::parse(text);
        assert_eq!(guid.to_string(), text);
        assert_eq!(Guid::parse(&guid.to_string()), guid);
    }

    #[test]
    fn test_u128_conversion() {
        let guid = Guid::parse("00000000-0000-0000-C000-000000000046");
        assert_eq!(guid.to_u128(), 0x0000_0000_0000_0000_C000_0000_0000_0046);
        assert_eq!(Guid::from_u128(guid.to_u128()), guid);
    }

    #[test]
    fn test_serde_as_string() {
        let guid = Guid::parse("A410B984-9839-4819-A0BE-2856AE6B3ADB");
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, "\"A410B984-9839-4819-A0BE-2856AE6B3ADB\"");
        assert_eq!(serde_json::from_str::<Guid>(&json).unwrap(), guid);

        let braced: Guid = serde_json::from_str("\"{a410b984-9839-4819-a0be-2856ae6b3adb}\"").unwrap();
        assert_eq!(braced, guid);
        assert!(serde_json::from_str::<Guid>("\"not-a-guid\"").is_err());
        assert!(serde_json::from_str::<Guid>("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_from_str_rejects_malformed() {
        assert!(matches!("A410B984".parse::<Guid>(), Err(Error::InvalidArgument(_))));
        assert_eq!("00000000-0000-0000-C000-000000000046".parse::<Guid>().unwrap().to_u128(), 0xC000_0000_0000_0046);
    }

    #[test]
    fn test_debug_has_braces() {
        assert_eq!(
            format!("{:?}", Guid::ZERO),
            "{00000000-0000-0000-0000-000000000000}"
        );
    }
}
