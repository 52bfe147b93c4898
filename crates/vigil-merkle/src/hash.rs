//! Content hashes and per-component blinding.
//!
//! Every identifier in the subsystem is a 32-byte sha256 output. Two
//! sentinel values are reserved: `ZERO` pads Merkle leaf layers, `ALL_ONES`
//! stands in for absent component groups in the top-level tree.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 32-byte content-addressed identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecureHash(pub [u8; 32]);

impl SecureHash {
    /// All-zero sentinel, used to pad Merkle leaf layers.
    pub const ZERO: SecureHash = SecureHash([0u8; 32]);

    /// All-ones sentinel, the placeholder root of an absent component group.
    pub const ALL_ONES: SecureHash = SecureHash([0xffu8; 32]);

    /// Hash arbitrary bytes.
    pub fn hash(bytes: &[u8]) -> SecureHash {
        SecureHash(Sha256::digest(bytes).into())
    }

    /// Hash the concatenation of two node hashes.
    pub fn combine(left: &SecureHash, right: &SecureHash) -> SecureHash {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        SecureHash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight-byte prefix is enough to tell hashes apart in logs
        write!(f, "{}..", hex::encode(&self.0[..8]))
    }
}

impl FromStr for SecureHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(SecureHash(arr))
    }
}

/// Per-transaction random value blinding all component hashes.
///
/// Disclosing one component of a salted transaction leaks nothing about the
/// undisclosed components, because each leaf is hashed together with a nonce
/// derived from this salt and the component position.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySalt(pub [u8; 32]);

impl PrivacySalt {
    pub fn random() -> PrivacySalt {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        PrivacySalt(bytes)
    }
}

impl fmt::Debug for PrivacySalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivacySalt(..)")
    }
}

/// Blinding nonce for the component at `(group_index, internal_index)`.
///
/// `H(salt || le32(group_index) || le32(internal_index))`
pub fn component_nonce(salt: &PrivacySalt, group_index: u32, internal_index: u32) -> SecureHash {
    let mut hasher = Sha256::new();
    hasher.update(salt.0);
    hasher.update(group_index.to_le_bytes());
    hasher.update(internal_index.to_le_bytes());
    SecureHash(hasher.finalize().into())
}

/// Merkle leaf for a component: `H(nonce || component_bytes)`.
///
/// Binds the component value to its position and the transaction salt.
pub fn component_leaf_hash(nonce: &SecureHash, component_bytes: &[u8]) -> SecureHash {
    let mut hasher = Sha256::new();
    hasher.update(nonce.0);
    hasher.update(component_bytes);
    SecureHash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_distinct() {
        assert_ne!(SecureHash::ZERO, SecureHash::ALL_ONES);
        assert_ne!(SecureHash::hash(b""), SecureHash::ZERO);
    }

    #[test]
    fn test_combine_order_sensitive() {
        let a = SecureHash::hash(b"a");
        let b = SecureHash::hash(b"b");
        assert_ne!(SecureHash::combine(&a, &b), SecureHash::combine(&b, &a));
    }

    #[test]
    fn test_hex_round_trip() {
        let h = SecureHash::hash(b"round trip");
        let parsed: SecureHash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_nonce_position_dependent() {
        let salt = PrivacySalt([7u8; 32]);
        let n00 = component_nonce(&salt, 0, 0);
        let n01 = component_nonce(&salt, 0, 1);
        let n10 = component_nonce(&salt, 1, 0);
        assert_ne!(n00, n01);
        assert_ne!(n00, n10);
        assert_ne!(n01, n10);
    }

    #[test]
    fn test_nonce_salt_dependent() {
        let s1 = PrivacySalt([1u8; 32]);
        let s2 = PrivacySalt([2u8; 32]);
        assert_ne!(component_nonce(&s1, 0, 0), component_nonce(&s2, 0, 0));
    }

    #[test]
    fn test_leaf_hash_binds_nonce_and_bytes() {
        let salt = PrivacySalt([3u8; 32]);
        let nonce = component_nonce(&salt, 2, 4);
        let other = component_nonce(&salt, 2, 5);
        assert_ne!(
            component_leaf_hash(&nonce, b"payload"),
            component_leaf_hash(&other, b"payload")
        );
        assert_ne!(
            component_leaf_hash(&nonce, b"payload"),
            component_leaf_hash(&nonce, b"payloae")
        );
    }
}
