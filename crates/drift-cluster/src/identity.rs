//! Deterministic key derivation from the cluster's long-term identity.
//!
//! Every node holds the same long-term [`IdentityKey`]. A node's signing key
//! is `HKDF-SHA256(ikm = identity, salt = node id, info = "sync")` used as an
//! ed25519 seed, so any node can recompute any other node's public key from
//! its [`NodeId`] alone. Followers use this to learn the bootstrapper's log
//! root key without contacting it.

use std::fmt;
use std::str::FromStr;

use drift_types::NodeId;
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ClusterError;

/// Purpose tag mixed into every key derived for the sync log.
pub const SYNC_PURPOSE: &[u8] = b"sync";

/// Long-term private identity. Never transmitted.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKey([u8; 32]);

impl IdentityKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, for persisting to disk.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for IdentityKey {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ClusterError::KeyDerivation(format!("identity key: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ClusterError::KeyDerivation(format!("identity key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityKey(<redacted>)")
    }
}

/// Derive an ed25519 signing key from `identity`, salted with `context`
/// and bound to `purpose`.
pub fn derive(
    identity: &IdentityKey,
    context: &[u8],
    purpose: &[u8],
) -> Result<SigningKey, ClusterError> {
    let hkdf = Hkdf::<Sha256>::new(Some(context), identity.as_bytes());
    let mut seed = [0u8; 32];
    hkdf.expand(purpose, &mut seed)
        .map_err(|e| ClusterError::KeyDerivation(e.to_string()))?;
    let key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    Ok(key)
}

/// This process's identity: node ID, long-term key and derived sync key.
pub struct NodeIdentity {
    node_id: NodeId,
    identity: IdentityKey,
    signing_key: SigningKey,
}

impl NodeIdentity {
    /// Derive the node's sync key. Fails only if HKDF fails, which is fatal
    /// for startup.
    pub fn new(node_id: NodeId, identity: IdentityKey) -> Result<Self, ClusterError> {
        let signing_key = derive(&identity, node_id.as_bytes(), SYNC_PURPOSE)?;
        Ok(Self {
            node_id,
            identity,
            signing_key,
        })
    }

    /// This node's ID.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// This node's derived signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// This node's derived public key.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Recompute another node's public sync key from its ID.
    pub fn peer_public_key(&self, peer: &NodeId) -> Result<VerifyingKey, ClusterError> {
        Ok(derive(&self.identity, peer.as_bytes(), SYNC_PURPOSE)?.verifying_key())
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id)
            .field("public_key", &hex::encode(self.public_key().as_bytes()))
            .finish_non_exhaustive()
    }
}
