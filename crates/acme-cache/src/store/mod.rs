//! Secret store implementations.
//!
//! A [`SecretStore`] is the remote side of the cache: CRUD on one namespaced
//! Secret holding a token -> bytes mapping. The cache never keeps a copy of
//! the Secret between calls, so whatever the store returns is authoritative.

mod kubernetes;
mod memory;

pub use kubernetes::KubernetesSecretStore;
pub use memory::{MemorySecretStore, StoreOp};

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;

/// Secret type used for cache containers
pub const OPAQUE_SECRET_TYPE: &str = "Opaque";

/// A namespaced Secret holding cached blobs keyed by encoded cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// Namespace the Secret lives in
    pub namespace: String,
    /// Secret name
    pub name: String,
    /// Token -> blob mapping
    pub data: BTreeMap<String, Vec<u8>>,
    /// Version the store handed out with this object, sent back on update
    pub resource_version: Option<String>,
    /// Secret type (`Opaque` for everything we create)
    pub secret_type: String,
}

impl Secret {
    /// An empty `Opaque` secret, ready to be created
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            data: BTreeMap::new(),
            resource_version: None,
            secret_type: OPAQUE_SECRET_TYPE.to_string(),
        }
    }

    /// Add an entry (builder style)
    pub fn with_entry(mut self, token: impl Into<String>, blob: impl Into<Vec<u8>>) -> Self {
        self.data.insert(token.into(), blob.into());
        self
    }
}

/// Options passed along with a Secret deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Seconds the API server waits before finalizing the deletion
    pub grace_period_seconds: u64,
    /// Whether dependents should be orphaned rather than deleted
    pub orphan_dependents: bool,
}

/// Remote container client.
///
/// Implementations must be cheap to share: the cache hands an
/// `Arc<dyn SecretStore>` to a background task for every operation.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the current Secret, or [`StoreError::NotFound`].
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Create `secret`, or fail with [`StoreError::AlreadyExists`].
    async fn create(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace the stored mapping with `secret.data`.
    async fn update(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Delete the Secret.
    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), StoreError>;
}
