use chardetng::EncodingDetector;
use encoding_rs::UTF_8;

/// Decode device bytes to text without ever failing.
///
/// micro:bit firmware sends UTF-8, so well-formed input passes straight
/// through. Anything else is run past a charset detector and decoded with
/// invalid-byte substitution.
pub fn decode_text(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true).decode(bytes).0.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        assert_eq!(decode_text("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(decode_text(b""), "");
    }

    #[test]
    fn invalid_bytes_never_fail() {
        let out = decode_text(&[b'h', 0xFF, b'i']);
        assert!(!out.is_empty());
    }
}
