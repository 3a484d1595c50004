//! Trust store
//!
//! In-memory map from instance id to Ed25519 verify key. Reads dominate;
//! writes happen only while dispatching `InstanceJoinRequest` (add) and
//! `BlacklistUpdate` (remove).

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;

use crate::signature::verifying_key_from_hex;
use crate::{CryptoError, CryptoResult};

/// Mapping of instance ids to Ed25519 verify keys
#[derive(Debug, Default)]
pub struct TrustStore {
    keys: RwLock<BTreeMap<String, VerifyingKey>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from hex-encoded public keys, failing on the first
    /// invalid entry
    pub fn from_hex_mapping(mapping: &BTreeMap<String, String>) -> CryptoResult<Self> {
        let mut keys = BTreeMap::new();
        for (instance_id, hex_key) in mapping {
            let key = verifying_key_from_hex(hex_key, instance_id)?;
            keys.insert(instance_id.clone(), key);
        }
        Ok(Self {
            keys: RwLock::new(keys),
        })
    }

    pub fn get(&self, instance_id: &str) -> CryptoResult<VerifyingKey> {
        self.keys
            .read()
            .get(instance_id)
            .copied()
            .ok_or_else(|| CryptoError::UnknownInstance(instance_id.to_string()))
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.keys.read().contains_key(instance_id)
    }

    pub fn add(&self, instance_id: &str, key: VerifyingKey) {
        self.keys.write().insert(instance_id.to_string(), key);
    }

    /// Add a peer from raw 32-byte public key material
    pub fn add_from_bytes(&self, instance_id: &str, key_bytes: &[u8]) -> CryptoResult<()> {
        let bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(instance_id.to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidKey(instance_id.to_string()))?;
        self.add(instance_id, key);
        Ok(())
    }

    pub fn remove(&self, instance_id: &str) -> bool {
        self.keys.write().remove(instance_id).is_some()
    }

    /// Hex-encoded view of every trusted peer, for the peers endpoint
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.keys
            .read()
            .iter()
            .map(|(id, key)| (id.clone(), hex::encode(key.to_bytes())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn test_key() -> VerifyingKey {
        SigningKey::generate(&mut OsRng).verifying_key()
    }

    #[test]
    fn test_get_unknown_instance() {
        let store = TrustStore::new();
        assert!(matches!(
            store.get("stage-z"),
            Err(CryptoError::UnknownInstance(_))
        ));
    }

    #[test]
    fn test_add_then_get() {
        let store = TrustStore::new();
        let key = test_key();
        store.add("stage-a", key);
        assert_eq!(store.get("stage-a").unwrap(), key);
        assert!(store.contains("stage-a"));
    }

    #[test]
    fn test_remove_revokes_trust() {
        let store = TrustStore::new();
        store.add("stage-a", test_key());
        assert!(store.remove("stage-a"));
        assert!(!store.contains("stage-a"));
        assert!(!store.remove("stage-a"));
    }

    #[test]
    fn test_from_hex_mapping_rejects_bad_keys() {
        let mut mapping = BTreeMap::new();
        mapping.insert("stage-a".to_string(), "zz".to_string());
        assert!(TrustStore::from_hex_mapping(&mapping).is_err());
    }

    #[test]
    fn test_snapshot_is_hex() {
        let store = TrustStore::new();
        let key = test_key();
        store.add("stage-a", key);
        let snapshot = store.snapshot();
        assert_eq!(snapshot["stage-a"], hex::encode(key.to_bytes()));
    }
}
