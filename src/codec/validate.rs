//! Field validators shared by the object kinds.
//!
//! These deliberately return `bool` (not rich errors): callers collapse
//! every failed check into the generic `DecryptionFailed`.

/// Hex string of exactly `bytes` bytes (2·bytes lowercase/uppercase hex chars).
pub fn is_hex_exact(s: &str, bytes: usize) -> bool {
    s.len() == bytes * 2 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Non-empty even-length hex string of at least `min_bytes` bytes.
pub fn is_hex_at_least(s: &str, min_bytes: usize) -> bool {
    s.len() >= min_bytes * 2 && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Self-certifying pointer name: `k` prefix plus base36 digits.
pub fn is_pointer_name(s: &str) -> bool {
    s.len() > 1
        && s.len() <= 128
        && s.starts_with('k')
        && s.chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
}

/// Content identifier as the pinning layer produces it: base32/base58
/// alphanumerics, bounded length.
pub fn is_cid(s: &str) -> bool {
    !s.is_empty() && s.len() <= 256 && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Opaque object id: non-empty hex, bounded length.
pub fn is_object_id(s: &str) -> bool {
    !s.is_empty() && s.len() <= 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Free text within a maximum length (character count, not bytes).
pub fn is_text_max(s: &str, max_chars: usize) -> bool {
    s.chars().count() <= max_chars
}

/// ECIES envelope for a 32-byte plaintext: 129 bytes, 258 hex chars.
pub const WRAPPED_KEY_32_HEX_LEN: usize = 258;

/// ECIES envelope for a 64-byte plaintext: 161 bytes, 322 hex chars.
pub const WRAPPED_KEY_64_HEX_LEN: usize = 322;

/// ECIES-wrapped 32-byte key in hex.
pub fn is_wrapped_key_32(s: &str) -> bool {
    s.len() == WRAPPED_KEY_32_HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// ECIES-wrapped signing key in hex. Accepts the 32-byte seed form and the
/// 64-byte expanded form some writers produce.
pub fn is_wrapped_signing_key(s: &str) -> bool {
    (s.len() == WRAPPED_KEY_32_HEX_LEN || s.len() == WRAPPED_KEY_64_HEX_LEN)
        && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_exact() {
        assert!(is_hex_exact(&"ab".repeat(32), 32));
        assert!(is_hex_exact(&"AB".repeat(32), 32));
        assert!(!is_hex_exact(&"ab".repeat(31), 32));
        assert!(!is_hex_exact(&"zz".repeat(32), 32));
    }

    #[test]
    fn test_pointer_name() {
        assert!(is_pointer_name("k51qzi5uqu5dkkciu33khkzbcmxtyhn376i1e83tya8kuy7z9euedzyr5nhoew"));
        assert!(!is_pointer_name("bafyabc"));
        assert!(!is_pointer_name("k"));
        assert!(!is_pointer_name("k51UPPER"));
    }

    #[test]
    fn test_cid() {
        assert!(is_cid("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi"));
        assert!(is_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        assert!(!is_cid(""));
        assert!(!is_cid("has spaces"));
    }

    #[test]
    fn test_wrapped_key_lengths() {
        assert!(is_wrapped_key_32(&"a".repeat(258)));
        assert!(!is_wrapped_key_32(&"a".repeat(256)));
        assert!(is_wrapped_signing_key(&"a".repeat(258)));
        assert!(is_wrapped_signing_key(&"b".repeat(322)));
        assert!(!is_wrapped_signing_key(&"b".repeat(320)));
    }

    #[test]
    fn test_text_max_counts_chars() {
        assert!(is_text_max("héllo wörld", 11));
        assert!(!is_text_max("twelve chars!", 12));
    }
}
