//! In-memory secret store with resource versions and fault injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{DeleteOptions, Secret, SecretStore};
use crate::error::StoreError;

/// Store operations, used for fault injection and the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
}

type FailureFn = Box<dyn Fn() -> StoreError + Send + Sync>;

/// In-memory [`SecretStore`].
///
/// Behaves like the API server for the calls the cache makes: updates with a
/// stale `resource_version` are rejected with [`StoreError::Conflict`], and
/// missing secrets produce [`StoreError::NotFound`]. Failures and latency can
/// be injected per operation.
#[derive(Default)]
pub struct MemorySecretStore {
    /// Secrets indexed by (namespace, name).
    secrets: Mutex<HashMap<(String, String), Secret>>,
    /// Monotonic resource version counter.
    version: AtomicU64,
    /// Injected failures, returned until cleared.
    failures: Mutex<HashMap<StoreOp, FailureFn>>,
    /// Injected latency per operation.
    latency: Mutex<HashMap<StoreOp, Duration>>,
    /// Every operation issued, in order.
    log: Mutex<Vec<StoreOp>>,
    /// Options of the most recent delete.
    last_delete: Mutex<Option<DeleteOptions>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret, bypassing the operation log.
    pub fn insert(&self, mut secret: Secret) {
        secret.resource_version = Some(self.next_version());
        self.secrets
            .lock()
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    /// Snapshot of a stored secret.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make every call of `op` fail with the error built by `failure`.
    pub fn fail<F>(&self, op: StoreOp, failure: F)
    where
        F: Fn() -> StoreError + Send + Sync + 'static,
    {
        self.failures.lock().insert(op, Box::new(failure));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Delay every call of `op` by `delay` before it takes effect.
    pub fn set_latency(&self, op: StoreOp, delay: Duration) {
        self.latency.lock().insert(op, delay);
    }

    /// Operations issued so far.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.log.lock().clone()
    }

    /// Options passed to the most recent delete.
    pub fn last_delete_options(&self) -> Option<DeleteOptions> {
        *self.last_delete.lock()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Log the call, apply injected latency, then return any injected failure.
    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        self.log.lock().push(op);

        let delay = self.latency.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.failures.lock().get(&op) {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.enter(StoreOp::Get).await?;
        trace!(namespace = %namespace, secret = %name, "memory store get");

        self.secret(namespace, name).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn create(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.enter(StoreOp::Create).await?;

        let key = (secret.namespace.clone(), secret.name.clone());
        let mut secrets = self.secrets.lock();
        if secrets.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: secret.namespace.clone(),
                name: secret.name.clone(),
            });
        }

        let mut created = secret.clone();
        created.resource_version = Some(self.next_version());
        secrets.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.enter(StoreOp::Update).await?;

        let key = (secret.namespace.clone(), secret.name.clone());
        let mut secrets = self.secrets.lock();
        let Some(current) = secrets.get(&key) else {
            return Err(StoreError::NotFound {
                namespace: secret.namespace.clone(),
                name: secret.name.clone(),
            });
        };

        if let Some(expected) = &secret.resource_version {
            if current.resource_version.as_ref() != Some(expected) {
                return Err(StoreError::Conflict {
                    name: secret.name.clone(),
                    message: "the object has been modified; please apply your changes to the latest version and try again".to_string(),
                });
            }
        }

        let mut updated = secret.clone();
        updated.resource_version = Some(self.next_version());
        secrets.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::Delete).await?;
        *self.last_delete.lock() = Some(*options);

        self.secrets
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let store = MemorySecretStore::new();

        let created = store
            .create(&Secret::new("default", "acme").with_entry("a", "1"))
            .await
            .unwrap();
        assert!(created.resource_version.is_some());

        let mut fetched = store.get("default", "acme").await.unwrap();
        assert_eq!(fetched.data.get("a").map(Vec::as_slice), Some(&b"1"[..]));

        fetched.data.insert("b".to_string(), b"2".to_vec());
        store.update(&fetched).await.unwrap();
        assert_eq!(store.secret("default", "acme").unwrap().data.len(), 2);

        let options = DeleteOptions {
            grace_period_seconds: 3,
            orphan_dependents: false,
        };
        store.delete("default", "acme", &options).await.unwrap();
        assert!(store.secret("default", "acme").is_none());
        assert_eq!(store.last_delete_options(), Some(options));

        assert_eq!(
            store.operations(),
            vec![StoreOp::Create, StoreOp::Get, StoreOp::Update, StoreOp::Delete]
        );
    }

    #[tokio::test]
    async fn test_not_found_and_already_exists() {
        let store = MemorySecretStore::new();

        let err = store.get("default", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), r#"secrets "missing" not found"#);

        store.insert(Secret::new("default", "acme"));
        let err = store.create(&Secret::new("default", "acme")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemorySecretStore::new();
        store.insert(Secret::new("default", "acme"));

        let first = store.get("default", "acme").await.unwrap();
        let second = store.get("default", "acme").await.unwrap();

        store.update(&first.with_entry("a", "1")).await.unwrap();
        let err = store.update(&second.with_entry("b", "2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemorySecretStore::new();
        store.insert(Secret::new("default", "acme"));
        store.fail(StoreOp::Get, || StoreError::Forbidden("not authorized".to_string()));

        let err = store.get("default", "acme").await.unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        store.clear_failures();
        assert!(store.get("default", "acme").await.is_ok());
    }
}
