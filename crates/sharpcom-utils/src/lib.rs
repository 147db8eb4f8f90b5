//! Internal utilities for the sharpcom COM interop layer.
//!
//! Zero-dependency helpers shared by the binding crates:
//!
//! - [`parse_guid`]: compile-time parsing of registry-format GUID strings
//! - [`copy_str_to_wide`] / [`wide_to_string`]: fixed-size UTF-16 buffers as
//!   found in native structs (`WCHAR name[256]`)

/// Fields of a GUID in its native split form: `Data1`, `Data2`, `Data3`, `Data4`.
pub type GuidParts = (u32, u16, u16, [u8; 8]);

const fn hex_to_u8(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        b'a'..=b'f' => c - b'a' + 10,
        _ => panic!("Invalid hex character in GUID"),
    }
}

/// Parse `count` hex digits starting at `start`, skipping dashes.
///
/// Returns the value and the index just past the last digit consumed.
const fn parse_hex(bytes: &[u8], start: usize, count: usize) -> (u64, usize) {
    let mut result: u64 = 0;
    let mut i = start;
    let mut hex_count = 0;
    while hex_count < count {
        let c = bytes[i];
        if c != b'-' {
            result = (result << 4) | (hex_to_u8(c) as u64);
            hex_count += 1;
        }
        i += 1;
    }
    (result, i)
}

/// Parse a GUID string in registry format into its native parts.
///
/// Accepts `"XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX"`, optionally wrapped in
/// braces. Intended for `const` contexts; an invalid string fails the build.
///
/// # Panics
///
/// Panics (at compile time when used in a `const`) if the string has the
/// wrong length or contains a non-hex character.
pub const fn parse_guid(guid: &str) -> GuidParts {
    let bytes = guid.as_bytes();
    let start = if bytes.len() == 38 && bytes[0] == b'{' && bytes[37] == b'}' {
        1
    } else if bytes.len() == 36 {
        0
    } else {
        panic!("GUID string must be 36 characters (38 with braces)")
    };

    let (data1, next) = parse_hex(bytes, start, 8);
    let (data2, next) = parse_hex(bytes, next, 4);
    let (data3, next) = parse_hex(bytes, next, 4);

    let mut data4 = [0u8; 8];
    let mut cursor = next;
    let mut i = 0;
    while i < 8 {
        let (byte, after) = parse_hex(bytes, cursor, 2);
        data4[i] = byte as u8;
        cursor = after;
        i += 1;
    }

    (data1 as u32, data2 as u16, data3 as u16, data4)
}

/// Parse a registry-format GUID string at runtime.
///
/// Same format as [`parse_guid`], but malformed input yields `None`.
pub fn try_parse_guid(guid: &str) -> Option<GuidParts> {
    let inner = guid
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(guid);
    let bytes = inner.as_bytes();
    if bytes.len() != 36 {
        return None;
    }
    let mut value: u128 = 0;
    for (i, &c) in bytes.iter().enumerate() {
        if matches!(i, 8 | 13 | 18 | 23) {
            if c != b'-' {
                return None;
            }
            continue;
        }
        let digit = char::from(c).to_digit(16)?;
        value = (value << 4) | u128::from(digit);
    }
    Some((
        (value >> 96) as u32,
        (value >> 80) as u16,
        (value >> 64) as u16,
        (value as u64).to_be_bytes(),
    ))
}

/// Copy a Rust string into a fixed-size UTF-16 array, null terminated.
///
/// Truncates at a character boundary when the string does not fit, so a
/// surrogate pair is never split. Returns the number of code units written,
/// excluding the terminator.
pub fn copy_str_to_wide(s: &str, dest: &mut [u16]) -> usize {
    if dest.is_empty() {
        return 0;
    }
    let capacity = dest.len() - 1;
    let mut written = 0;
    for unit in s.encode_utf16().take(capacity) {
        dest[written] = unit;
        written += 1;
    }
    if written > 0 && (0xD800..=0xDBFF).contains(&dest[written - 1]) {
        written -= 1;
    }
    for slot in &mut dest[written..] {
        *slot = 0;
    }
    written
}

/// Read a null-terminated UTF-16 array into a `String`.
///
/// Stops at the first null or the end of the array. Invalid surrogates are
/// replaced with U+FFFD.
pub fn wide_to_string(src: &[u16]) -> String {
    let len = src.iter().position(|&c| c == 0).unwrap_or(src.len());
    String::from_utf16_lossy(&src[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guid() {
        const PARTS: GuidParts = parse_guid("A410B984-9839-4819-A0BE-2856AE6B3ADB");
        assert_eq!(PARTS.0, 0xA410_B984);
        assert_eq!(PARTS.1, 0x9839);
        assert_eq!(PARTS.2, 0x4819);
        assert_eq!(PARTS.3, [0xA0, 0xBE, 0x28, 0x56, 0xAE, 0x6B, 0x3A, 0xDB]);
    }

    #[test]
    fn test_parse_guid_braces_lowercase() {
        let parts = parse_guid("{00000000-0000-0000-c000-000000000046}");
        assert_eq!(parts.0, 0);
        assert_eq!(parts.3, [0xC0, 0, 0, 0, 0, 0, 0, 0x46]);
    }

    #[test]
    #[should_panic]
    fn test_parse_guid_bad_length() {
        parse_guid("A410B984-9839");
    }

    #[test]
    fn test_copy_str_to_wide() {
        let mut dest = [0xFFFFu16; 8];
        let written = copy_str_to_wide("Echo", &mut dest);
        assert_eq!(written, 4);
        assert_eq!(wide_to_string(&dest), "Echo");
        assert_eq!(dest[4..], [0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_str_to_wide_truncation() {
        let mut dest = [0u16; 4];
        let written = copy_str_to_wide("Reverb", &mut dest);
        assert_eq!(written, 3);
        assert_eq!(dest[3], 0); // Null terminator
        assert_eq!(wide_to_string(&dest), "Rev");
    }

    #[test]
    fn test_copy_str_to_wide_keeps_surrogate_pairs() {
        // "ab" then U+1F3B5, a surrogate pair, with room for three units.
        let mut dest = [0xFFFFu16; 4];
        let written = copy_str_to_wide("ab\u{1F3B5}", &mut dest);
        assert_eq!(written, 2);
        assert_eq!(dest, [u16::from(b'a'), u16::from(b'b'), 0, 0]);
        assert_eq!(wide_to_string(&dest), "ab");

        let mut roomy = [0u16; 5];
        assert_eq!(copy_str_to_wide("ab\u{1F3B5}", &mut roomy), 4);
        assert_eq!(wide_to_string(&roomy), "ab\u{1F3B5}");

        let mut tiny = [0xFFFFu16; 2];
        assert_eq!(copy_str_to_wide("\u{1F3B5}", &mut tiny), 0);
        assert_eq!(tiny, [0, 0]);
    }

    #[test]
    fn test_try_parse_guid() {
        assert_eq!(
            try_parse_guid("A410B984-9839-4819-A0BE-2856AE6B3ADB"),
            Some(parse_guid("A410B984-9839-4819-A0BE-2856AE6B3ADB"))
        );
        assert_eq!(
            try_parse_guid("{00000000-0000-0000-c000-000000000046}"),
            Some((0, 0, 0, [0xC0, 0, 0, 0, 0, 0, 0, 0x46]))
        );
        assert_eq!(try_parse_guid("A410B984-9839"), None);
        assert_eq!(try_parse_guid("A410B984-9839-4819-A0BE-2856AE6B3ADG"), None);
        assert_eq!(try_parse_guid("A410B984+9839-4819-A0BE-2856AE6B3ADB"), None);
        assert_eq!(try_parse_guid("{A410B984-9839-4819-A0BE-2856AE6B3ADB"), None);
    }

    #[test]
    fn test_wide_to_string_unterminated() {
        let src: Vec<u16> = "abc".encode_utf16().collect();
        assert_eq!(wide_to_string(&src), "abc");
    }
}
