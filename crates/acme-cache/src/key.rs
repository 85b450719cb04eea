//! Cache key encoding
//!
//! Cache keys handed to us by a certificate manager are free-form strings
//! (`example.com`, `example.com+rsa`, `acme_account+key`, ...). Kubernetes only
//! accepts Secret data keys matching `[-._a-zA-Z0-9]+`, which must not be `.`
//! or `..` and must not start with `..`.
//!
//! # Encoding
//!
//! - `-`, `.`, `a-z`, `A-Z` and `0-9` are copied unchanged
//! - every other byte of the UTF-8 key (including `_` itself) becomes `_XX`,
//!   where `XX` is the byte in upper-case hex
//! - a `.` in the first position is escaped as `_2E`
//! - the empty key is encoded as a lone `_`
//!
//! `_` only ever appears as an escape introducer, so [`decode_key`] can undo
//! the transform exactly. Having an inverse is what makes [`encode_key`]
//! injective: two distinct keys can never share a token.

/// Escape introducer. Never emitted on its own except for the empty key.
const ESCAPE: u8 = b'_';

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Token used for the empty key
const EMPTY_TOKEN: &str = "_";

/// Returns true for bytes that may appear unescaped in a token
fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.'
}

/// Encode a cache key into a token that is a legal Secret data key.
pub fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return EMPTY_TOKEN.to_string();
    }

    let mut token = String::with_capacity(key.len());
    for (i, &byte) in key.as_bytes().iter().enumerate() {
        if is_plain(byte) && !(i == 0 && byte == b'.') {
            token.push(char::from(byte));
        } else {
            token.push(char::from(ESCAPE));
            token.push(char::from(HEX[usize::from(byte >> 4)]));
            token.push(char::from(HEX[usize::from(byte & 0x0f)]));
        }
    }
    token
}

/// Decode a token produced by [`encode_key`] back into the original key.
///
/// Returns `None` for strings that [`encode_key`] can never produce.
pub fn decode_key(token: &str) -> Option<String> {
    if token == EMPTY_TOKEN {
        return Some(String::new());
    }
    if token.is_empty() {
        return None;
    }

    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == ESCAPE {
            let hi = bytes.get(i + 1).copied().and_then(hex_value)?;
            let lo = bytes.get(i + 2).copied().and_then(hex_value)?;
            let decoded = (hi << 4) | lo;
            // Canonical form only: plain bytes are never escaped, except a leading dot
            if is_plain(decoded) && !(i == 0 && decoded == b'.') {
                return None;
            }
            out.push(decoded);
            i += 3;
        } else if is_plain(byte) && !(i == 0 && byte == b'.') {
            out.push(byte);
            i += 1;
        } else {
            return None;
        }
    }

    String::from_utf8(out).ok()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Secret data key rules enforced by the Kubernetes API server
    fn is_valid_secret_key(token: &str) -> bool {
        !token.is_empty()
            && token != "."
            && token != ".."
            && !token.starts_with("..")
            && token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_')
    }

    #[test]
    fn test_domain_passes_through() {
        assert_eq!(encode_key("example.com"), "example.com");
        assert_eq!(encode_key("www-1.example.com"), "www-1.example.com");
    }

    #[test]
    fn test_special_characters_escaped() {
        assert_eq!(encode_key("example.com+rsa"), "example.com_2Brsa");
        assert_eq!(encode_key("acme_account+key"), "acme_5Faccount_2Bkey");
        assert_eq!(encode_key("a/b"), "a_2Fb");
    }

    #[test]
    fn test_underscore_does_not_collide_with_escape() {
        // "+" and a literal "_2B" must not share a token
        assert_ne!(encode_key("a+b"), encode_key("a_2Bb"));
        assert_eq!(encode_key("a_2Bb"), "a_5F2Bb");
    }

    #[test]
    fn test_reserved_tokens_avoided() {
        assert_eq!(encode_key(""), "_");
        assert_eq!(encode_key("."), "_2E");
        assert_eq!(encode_key(".."), "_2E.");
        assert_eq!(encode_key("..hidden"), "_2E.hidden");
        for key in ["", ".", "..", "..hidden", ".x"] {
            assert!(is_valid_secret_key(&encode_key(key)), "key {key:?}");
        }
    }

    #[test]
    fn test_multibyte_key() {
        let token = encode_key("bücher.de");
        assert_eq!(token, "b_C3_BCcher.de");
        assert_eq!(decode_key(&token).as_deref(), Some("bücher.de"));
    }

    #[test]
    fn test_decode_rejects_non_canonical() {
        assert_eq!(decode_key(""), None);
        assert_eq!(decode_key("_41"), None); // 'A' is never escaped
        assert_eq!(decode_key("a_2"), None);
        assert_eq!(decode_key("a_zz"), None);
        assert_eq!(decode_key("a+b"), None);
        assert_eq!(decode_key(".a"), None);
    }

    proptest! {
        #[test]
        fn prop_round_trip(key in any::<String>()) {
            let token = encode_key(&key);
            prop_assert_eq!(decode_key(&token), Some(key));
        }

        #[test]
        fn prop_token_is_valid_secret_key(key in any::<String>()) {
            prop_assert!(is_valid_secret_key(&encode_key(&key)));
        }

        #[test]
        fn prop_injective(a in any::<String>(), b in any::<String>()) {
            prop_assume!(a != b);
            prop_assert_ne!(encode_key(&a), encode_key(&b));
        }

        #[test]
        fn prop_stable(key in "[a-z0-9.+_-]{0,64}") {
            prop_assert_eq!(encode_key(&key), encode_key(&key));
        }
    }
}
