//! Conversion between characteristic payloads and displayable text.
//!
//! Reads and notifications are shown as text when the payload is plain
//! printable ASCII and as a hex dump otherwise. Writes only take text: the
//! hex dump is a display format, and [`encode_text`] never tries to decode
//! it back into bytes. Callers that want to send raw bytes parse them
//! explicitly with [`parse_hex`].

use crate::error::{ParseError, ParseResult};

/// Whether `c` is in the printable ASCII range (space through tilde).
fn is_printable_ascii(c: char) -> bool {
    ('\x20'..='\x7e').contains(&c)
}

/// Render a characteristic payload for display.
///
/// The bytes are decoded as UTF-8. If every decoded character is printable
/// ASCII the text is returned as-is; otherwise the original bytes are
/// returned as space-separated, zero-padded, lowercase hex.
///
/// # Examples
///
/// ```
/// use gattscope_types::value::format_value;
///
/// assert_eq!(format_value(b"Hello"), "Hello");
/// assert_eq!(format_value(&[0x00, 0x1f, 0xab]), "00 1f ab");
/// ```
pub fn format_value(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.chars().all(is_printable_ascii) {
        text.into_owned()
    } else {
        to_hex(bytes)
    }
}

/// Format bytes as space-separated lowercase hex pairs.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Encode text for transmission to a characteristic.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Parse hex input such as `"01 ff 2a"`, `"01ff2a"` or `"0x01,0xff"`.
///
/// Whitespace, commas and colons separate bytes; each byte may carry an
/// optional `0x` prefix. Without separators the digits are read in pairs.
pub fn parse_hex(input: &str) -> ParseResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut offset = 0;

    for token in input.split(|c: char| c.is_whitespace() || c == ',' || c == ':') {
        let position = offset;
        offset += token.len() + 1;
        if token.is_empty() {
            continue;
        }

        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);

        if digits.is_empty() {
            return Err(ParseError::InvalidHex {
                position,
                message: format!("'{}' has no digits", token),
            });
        }
        if digits.len() % 2 != 0 {
            return Err(ParseError::InvalidHex {
                position,
                message: format!("'{}' has an odd number of digits", token),
            });
        }

        for (i, pair) in digits.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(pair).unwrap_or_default();
            let byte = u8::from_str_radix(pair, 16).map_err(|_| ParseError::InvalidHex {
                position: position + i * 2,
                message: format!("'{}' is not a hex byte", pair),
            })?;
            bytes.push(byte);
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_printable_text_passes_through() {
        assert_eq!(format_value(b"Hello, world!"), "Hello, world!");
        assert_eq!(format_value(b" ~"), " ~");
    }

    #[test]
    fn test_empty_payload_is_empty_text() {
        assert_eq!(format_value(&[]), "");
    }

    #[test]
    fn test_nul_byte_falls_back_to_hex() {
        assert_eq!(format_value(&[0x00]), "00");
        assert_eq!(format_value(&[0x00, b'A', b'B']), "00 41 42");
    }

    #[test]
    fn test_control_and_high_bytes_fall_back_to_hex() {
        assert_eq!(format_value(b"line\n"), "6c 69 6e 65 0a");
        assert_eq!(format_value(&[0x7f]), "7f");
        assert_eq!(format_value(&[0xff, 0xfe]), "ff fe");
    }

    #[test]
    fn test_non_ascii_utf8_falls_back_to_hex() {
        // "é" is valid UTF-8 but not printable ASCII.
        assert_eq!(format_value("é".as_bytes()), "c3 a9");
    }

    #[test]
    fn test_encode_text() {
        assert_eq!(encode_text("AT+RST"), b"AT+RST".to_vec());
        assert!(encode_text("").is_empty());
    }

    #[test]
    fn test_hex_output_is_not_decoded_on_write() {
        // Writing the displayed hex sends the characters, not the bytes.
        let shown = format_value(&[0x00, 0x01]);
        assert_eq!(encode_text(&shown), b"00 01".to_vec());
    }

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(parse_hex("01 ff 2a").unwrap(), vec![0x01, 0xff, 0x2a]);
        assert_eq!(parse_hex("01ff2a").unwrap(), vec![0x01, 0xff, 0x2a]);
        assert_eq!(parse_hex("0x01,0xFF").unwrap(), vec![0x01, 0xff]);
        assert_eq!(parse_hex("de:ad:be:ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_errors() {
        assert!(matches!(
            parse_hex("abc"),
            Err(ParseError::InvalidHex { position: 0, .. })
        ));
        assert!(matches!(
            parse_hex("00 zz"),
            Err(ParseError::InvalidHex { position: 3, .. })
        ));
        assert!(matches!(
            parse_hex("0x"),
            Err(ParseError::InvalidHex { position: 0, .. })
        ));
        assert!(matches!(
            parse_hex("01 0X 02"),
            Err(ParseError::InvalidHex { position: 3, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_printable_ascii_round_trips(text in "[ -~]{0,64}") {
            let bytes = encode_text(&text);
            let shown = format_value(&bytes);
            prop_assert_eq!(&shown, &text);
            prop_assert_eq!(encode_text(&shown), bytes);
        }

        #[test]
        fn prop_hex_dump_has_one_pair_per_byte(
            mut bytes in proptest::collection::vec(any::<u8>(), 1..32),
        ) {
            bytes[0] = 0x00;
            let shown = format_value(&bytes);
            prop_assert!(shown.starts_with("00"));
            prop_assert_eq!(shown.split(' ').count(), bytes.len());
            prop_assert_eq!(parse_hex(&shown).unwrap(), bytes);
        }
    }
}
