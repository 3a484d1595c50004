//! Envelope fingerprinting

/// Produce a deterministic hexadecimal fingerprint over envelope fields.
///
/// Each field is length-prefixed (4-byte big-endian) before hashing so that
/// field boundaries can never collide between concatenations.
pub fn envelope_fingerprint<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = blake3::Hasher::new();
    for chunk in fields {
        hasher.update(&(chunk.len() as u32).to_be_bytes());
        hasher.update(chunk);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = envelope_fingerprint([b"stage-a".as_slice(), b"PostAnnouncement", b"payload"]);
        let b = envelope_fingerprint([b"stage-a".as_slice(), b"PostAnnouncement", b"payload"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_on_any_field() {
        let base = envelope_fingerprint([b"stage-a".as_slice(), b"PostAnnouncement", b"payload"]);
        let sender = envelope_fingerprint([b"stage-b".as_slice(), b"PostAnnouncement", b"payload"]);
        let payload = envelope_fingerprint([b"stage-a".as_slice(), b"PostAnnouncement", b"other"]);
        assert_ne!(base, sender);
        assert_ne!(base, payload);
    }

    #[test]
    fn test_length_prefix_prevents_boundary_collisions() {
        // "ab" + "c" must not fingerprint like "a" + "bc"
        let left = envelope_fingerprint([b"ab".as_slice(), b"c"]);
        let right = envelope_fingerprint([b"a".as_slice(), b"bc"]);
        assert_ne!(left, right);
    }
}
