//! Ed25519 signing and verification

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::{CryptoError, CryptoResult};

/// Parse a hex-encoded 32-byte Ed25519 public key
pub fn verifying_key_from_hex(hex_key: &str, label: &str) -> CryptoResult<VerifyingKey> {
    let raw = hex::decode(hex_key).map_err(|_| CryptoError::InvalidHex("public key"))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(label.to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidKey(label.to_string()))
}

/// Parse a hex-encoded 32-byte Ed25519 private key seed
pub fn signing_key_from_hex(hex_key: &str, label: &str) -> CryptoResult<SigningKey> {
    let raw = hex::decode(hex_key).map_err(|_| CryptoError::InvalidHex("private key"))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(label.to_string()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Verify a detached Ed25519 signature over `payload`
pub fn verify_signature(
    payload: &[u8],
    signature: &[u8],
    verify_key: &VerifyingKey,
) -> CryptoResult<()> {
    let bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureLength(signature.len()))?;
    let signature = Signature::from_bytes(&bytes);
    verify_key
        .verify(payload, &signature)
        .map_err(|_| CryptoError::BadSignature)
}

/// Produce a detached Ed25519 signature over `payload`
pub fn sign_payload(payload: &[u8], signing_key: &SigningKey) -> Vec<u8> {
    signing_key.sign(payload).to_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_verify() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let payload = b"federated payload";
        let signature = sign_payload(payload, &signing_key);
        assert!(verify_signature(payload, &signature, &signing_key.verifying_key()).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let signature = sign_payload(b"original", &signing_key);
        assert!(matches!(
            verify_signature(b"tampered", &signature, &signing_key.verifying_key()),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let signature = sign_payload(b"payload", &signer);
        assert!(verify_signature(b"payload", &signature, &other.verifying_key()).is_err());
    }

    #[test]
    fn test_truncated_signature_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        assert!(matches!(
            verify_signature(b"payload", &[0u8; 10], &signing_key.verifying_key()),
            Err(CryptoError::InvalidSignatureLength(10))
        ));
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let hex_pub = hex::encode(signing_key.verifying_key().to_bytes());
        let parsed = verifying_key_from_hex(&hex_pub, "test").unwrap();
        assert_eq!(parsed, signing_key.verifying_key());
        assert!(verifying_key_from_hex("not-hex", "test").is_err());
        assert!(verifying_key_from_hex("aabb", "test").is_err());
    }
}
