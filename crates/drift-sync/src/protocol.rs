//! Sync protocols: how an object source names and addresses content.

use std::sync::Arc;

use drift_store::StorageProtocol;
use drift_types::ContentHash;
use tracing::warn;

use crate::error::SyncError;

/// A pluggable object source the pipeline can import from.
pub trait SyncProtocol: Send + Sync {
    /// Protocol name. Log identifiers of this protocol start with it.
    fn name(&self) -> &str;

    /// Name under which an object with `hash` is staged.
    fn encode_file_name(&self, hash: &ContentHash) -> String;

    /// Whether `identifier` belongs to this protocol.
    fn valid_identifier(&self, identifier: &str) -> bool;

    /// Content hash encoded in `identifier`.
    fn hash_from_identifier(&self, identifier: &str) -> Result<ContentHash, SyncError>;

    /// Canonical identifier of `hash`, as log entries are keyed.
    fn identifier(&self, hash: &ContentHash) -> String;

    /// Destination protocol verified objects are uploaded under.
    fn storage_protocol(&self) -> Arc<dyn StorageProtocol>;
}

/// Storage protocol that names objects by their hex content hash.
#[derive(Debug, Clone)]
pub struct HashStorage {
    name: String,
}

impl HashStorage {
    /// Create a storage protocol whose bucket is `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StorageProtocol for HashStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode_file_name(&self, hash: &ContentHash) -> String {
        hash.to_hex()
    }
}

/// Sync protocol with identifiers of the form `<name>:<hex hash>`.
pub struct HashProtocol {
    name: String,
    prefix: String,
    storage: Arc<HashStorage>,
}

impl HashProtocol {
    /// Create a protocol called `name` uploading under `storage`.
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            prefix: format!("{name}:"),
            name,
            storage: Arc::new(HashStorage::new(storage)),
        }
    }
}

impl SyncProtocol for HashProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode_file_name(&self, hash: &ContentHash) -> String {
        format!("{}-{hash}", self.name)
    }

    fn valid_identifier(&self, identifier: &str) -> bool {
        identifier
            .strip_prefix(&self.prefix)
            .is_some_and(|hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
    }

    fn hash_from_identifier(&self, identifier: &str) -> Result<ContentHash, SyncError> {
        identifier
            .strip_prefix(&self.prefix)
            .ok_or(SyncError::InvalidObject)?
            .parse()
            .map_err(|_| SyncError::InvalidObject)
    }

    fn identifier(&self, hash: &ContentHash) -> String {
        format!("{}{hash}", self.prefix)
    }

    fn storage_protocol(&self) -> Arc<dyn StorageProtocol> {
        self.storage.clone()
    }
}

/// Ordered set of sync protocols.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    protocols: Vec<Arc<dyn SyncProtocol>>,
}

impl ProtocolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a protocol. Earlier registrations win when identifiers or
    /// storage protocols overlap.
    pub fn register(&mut self, protocol: Arc<dyn SyncProtocol>) {
        let storage = protocol.storage_protocol();
        if let Some(owner) = self.for_storage(storage.name()) {
            warn!(
                protocol = protocol.name(),
                storage = storage.name(),
                owner = owner.name(),
                "storage protocol already used, uploads under it republish as the first protocol"
            );
        }
        self.protocols.push(protocol);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, protocol: Arc<dyn SyncProtocol>) -> Self {
        self.register(protocol);
        self
    }

    /// First protocol accepting `identifier`.
    pub fn for_identifier(&self, identifier: &str) -> Option<&Arc<dyn SyncProtocol>> {
        self.protocols
            .iter()
            .find(|p| p.valid_identifier(identifier))
    }

    /// Protocol registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn SyncProtocol>> {
        self.protocols.iter().find(|p| p.name() == name)
    }

    /// Protocol uploading under the storage protocol `storage`.
    ///
    /// Each storage protocol should back a single sync protocol. When several
    /// share one, the first registered is returned.
    pub fn for_storage(&self, storage: &str) -> Option<&Arc<dyn SyncProtocol>> {
        self.protocols
            .iter()
            .find(|p| p.storage_protocol().name() == storage)
    }

    /// Registered protocol names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.protocols.iter().map(|p| p.name()).collect()
    }

    /// Number of registered protocols.
    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    /// Whether no protocol is registered.
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_grammar() {
        let proto = HashProtocol::new("proto1", "store1");
        let hash = ContentHash::from_data(b"hello");
        let id = proto.identifier(&hash);

        assert!(proto.valid_identifier(&id));
        assert_eq!(proto.hash_from_identifier(&id).unwrap(), hash);
        assert!(!proto.valid_identifier("proto2:abcd"));
        assert!(!proto.valid_identifier("proto1:"));
        assert!(!proto.valid_identifier("proto1:xyz"));
    }

    #[test]
    fn test_short_hash_is_valid_but_undecodable() {
        let proto = HashProtocol::new("proto1", "store1");
        assert!(proto.valid_identifier("proto1:deadbeef"));
        assert!(matches!(
            proto.hash_from_identifier("proto1:deadbeef"),
            Err(SyncError::InvalidObject)
        ));
    }

    #[test]
    fn test_registry_lookup_order() {
        let registry = ProtocolRegistry::new()
            .with(Arc::new(HashProtocol::new("a", "store-a")))
            .with(Arc::new(HashProtocol::new("b", "store-b")));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.for_identifier("b:00").unwrap().name(), "b");
        assert!(registry.for_identifier("c:00").is_none());
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert_eq!(registry.for_storage("store-b").unwrap().name(), "b");
        assert!(registry.for_storage("store-c").is_none());
    }

    #[test]
    fn test_shared_storage_resolves_to_first_registered() {
        let registry = ProtocolRegistry::new()
            .with(Arc::new(HashProtocol::new("a", "shared")))
            .with(Arc::new(HashProtocol::new("b", "shared")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.for_storage("shared").unwrap().name(), "a");
        assert_eq!(registry.get("b").unwrap().storage_protocol().name(), "shared");
    }

    #[test]
    fn test_identifier_is_lower_case() {
        let proto = HashProtocol::new("proto1", "store1");
        let hash = ContentHash::from_data(b"hello");
        let upper = format!("proto1:{}", hash.to_hex().to_uppercase());

        assert!(proto.valid_identifier(&upper));
        let parsed = proto.hash_from_identifier(&upper).unwrap();
        assert_eq!(parsed, hash);
        assert_eq!(proto.identifier(&parsed), format!("proto1:{}", hash.to_hex()));
    }
}
