//! Kubernetes Secret backed certificate cache
//!
//! [`KubernetesCache`] implements [`Cache`] on top of a single Secret. Every
//! cache key is one data entry in that Secret, stored under the token produced
//! by [`encode_key`].
//!
//! # Operation Flow
//!
//! Each call reads the Secret fresh; nothing is cached locally.
//!
//! - `get` collapses every store failure into [`CacheError::Miss`]
//! - `put` creates the Secret when it is missing, then writes it back
//! - `delete` propagates store failures unchanged and removes the whole
//!   Secret once its last entry is gone
//!
//! # Cancellation
//!
//! The store calls run on a spawned task while the caller waits on whichever
//! finishes first: that task or the [`Context`]. When the context wins, its
//! error is returned right away and the task keeps running in the background.
//! The task checks the context before every write and skips the write once the
//! context has fired, but a write already in flight is not aborted.
//!
//! Read-modify-write is not atomic here. Concurrent writers to the same Secret
//! race at Secret granularity unless the API server rejects the stale
//! `resourceVersion`, in which case the conflict is returned, not retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use crate::config::CacheConfig;
use crate::context::Context;
use crate::error::{CacheError, CacheResult, ConfigError};
use crate::key::encode_key;
use crate::store::{DeleteOptions, KubernetesSecretStore, Secret, SecretStore};

/// Certificate cache used by an ACME certificate manager.
///
/// Blobs are opaque: certificate chains, private keys, account data.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Load the blob stored under `key`, or [`CacheError::Miss`].
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous value.
    async fn put(&self, ctx: &Context, key: &str, data: &[u8]) -> CacheResult<()>;

    /// Remove `key`.
    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()>;
}

/// [`Cache`] stored in one namespaced Kubernetes Secret.
#[derive(Clone)]
pub struct KubernetesCache {
    namespace: String,
    secret_name: String,
    store: Arc<dyn SecretStore>,
    delete_grace_period: Duration,
}

impl std::fmt::Debug for KubernetesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesCache")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .field("delete_grace_period", &self.delete_grace_period)
            .finish_non_exhaustive()
    }
}

impl KubernetesCache {
    /// Create a cache over `store`.
    ///
    /// # Arguments
    ///
    /// * `namespace` - Namespace holding the secret
    /// * `secret_name` - Secret holding every cached entry
    /// * `store` - Secret store client
    /// * `delete_grace_period` - Grace period used when the emptied secret is
    ///   deleted (whole seconds are sent)
    pub fn new(
        namespace: impl Into<String>,
        secret_name: impl Into<String>,
        store: Arc<dyn SecretStore>,
        delete_grace_period: Duration,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: secret_name.into(),
            store,
            delete_grace_period,
        }
    }

    /// Build a cache talking to the cluster described by `config`.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ConfigError> {
        config.check()?;
        let connection = config.connect()?;
        let namespace = config.resolve_namespace(Some(&connection));
        let store = KubernetesSecretStore::new(
            &connection,
            Duration::from_secs(config.request_timeout_secs),
        )?;

        info!(
            namespace = %namespace,
            secret = %config.secret_name,
            server = %connection.server,
            "Initialized Kubernetes ACME cache"
        );

        Ok(Self::new(
            namespace,
            config.secret_name.clone(),
            Arc::new(store),
            Duration::from_secs(config.delete_grace_period_secs),
        ))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    /// Run `work` on a background task and wait for it or for `ctx`,
    /// whichever finishes first. The task is detached, not aborted, if `ctx`
    /// fires first.
    async fn race<T, F>(&self, ctx: &Context, op: &'static str, work: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: Future<Output = CacheResult<T>> + Send + 'static,
    {
        if let Some(err) = ctx.err() {
            debug!(op, error = %err, "Context already done, skipping cache operation");
            return Err(err.into());
        }

        let mut worker = tokio::spawn(work);
        tokio::select! {
            biased;
            err = ctx.done() => {
                warn!(
                    op,
                    namespace = %self.namespace,
                    secret = %self.secret_name,
                    error = %err,
                    "Cache operation abandoned, remote call continues in background"
                );
                Err(err.into())
            }
            joined = &mut worker => match joined {
                Ok(result) => result,
                Err(e) => Err(CacheError::Worker(e.to_string())),
            },
        }
    }
}

#[async_trait]
impl Cache for KubernetesCache {
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        let token = encode_key(key);
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        let name = self.secret_name.clone();

        self.race(ctx, "get", async move {
            let secret = match store.get(&namespace, &name).await {
                Ok(secret) => secret,
                Err(e) => {
                    if e.is_not_found() {
                        trace!(namespace = %namespace, secret = %name, "Cache secret does not exist");
                    } else {
                        warn!(
                            namespace = %namespace,
                            secret = %name,
                            error = %e,
                            "Failed to fetch cache secret, treating as cache miss"
                        );
                    }
                    return Err(CacheError::Miss);
                }
            };

            match secret.data.get(&token) {
                Some(blob) => {
                    trace!(token = %token, bytes = blob.len(), "Cache hit");
                    Ok(blob.clone())
                }
                None => {
                    trace!(token = %token, "Cache miss");
                    Err(CacheError::Miss)
                }
            }
        })
        .await
    }

    async fn put(&self, ctx: &Context, key: &str, data: &[u8]) -> CacheResult<()> {
        let token = encode_key(key);
        let data = data.to_vec();
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        let name = self.secret_name.clone();
        let worker_ctx = ctx.clone();

        self.race(ctx, "put", async move {
            let mut secret = match store.get(&namespace, &name).await {
                Ok(secret) => secret,
                Err(e) if e.is_not_found() => {
                    info!(namespace = %namespace, secret = %name, "Creating cache secret");
                    store.create(&Secret::new(&namespace, &name)).await?
                }
                Err(e) => return Err(e.into()),
            };

            secret.data.insert(token.clone(), data);

            // Never write once the caller has given up
            if let Some(err) = worker_ctx.err() {
                debug!(token = %token, error = %err, "Context done, not storing entry");
                return Err(err.into());
            }

            store.update(&secret).await?;
            debug!(token = %token, entries = secret.data.len(), "Stored cache entry");
            Ok(())
        })
        .await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        let token = encode_key(key);
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        let name = self.secret_name.clone();
        let options = DeleteOptions {
            grace_period_seconds: self.delete_grace_period.as_secs(),
            orphan_dependents: false,
        };
        let worker_ctx = ctx.clone();

        self.race(ctx, "delete", async move {
            let mut secret = store.get(&namespace, &name).await?;

            if secret.data.remove(&token).is_none() {
                trace!(token = %token, "Entry to delete not present");
            }

            if let Some(err) = worker_ctx.err() {
                debug!(token = %token, error = %err, "Context done, not deleting entry");
                return Err(err.into());
            }

            if secret.data.is_empty() {
                store.delete(&namespace, &name, &options).await?;
                info!(
                    namespace = %namespace,
                    secret = %name,
                    grace_period_seconds = options.grace_period_seconds,
                    "Deleted empty cache secret"
                );
            } else {
                store.update(&secret).await?;
                debug!(token = %token, entries = secret.data.len(), "Removed cache entry");
            }
            Ok(())
        })
        .await
    }
}
