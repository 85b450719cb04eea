//! Sentinel ACME Cache
//!
//! Keeps ACME certificates and account keys in a Kubernetes Secret so a
//! certificate manager does not have to re-issue certificates every time the
//! process restarts.
//!
//! # Architecture
//!
//! - [`encode_key`] - Maps cache keys to legal Secret data keys
//! - [`SecretStore`] - Remote CRUD on the Secret ([`KubernetesSecretStore`], [`MemorySecretStore`])
//! - [`KubernetesCache`] - The [`Cache`] implementation: get / put / delete
//! - [`AcmeStore`] - Typed access to account credentials and certificates
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sentinel_acme_cache::{Cache, CacheConfig, Context, KubernetesCache};
//!
//! let cache = KubernetesCache::from_config(&CacheConfig::default())?;
//! let ctx = Context::with_timeout(Duration::from_secs(10));
//!
//! cache.put(&ctx, "example.com", cert_bytes).await?;
//! let cert = cache.get(&ctx, "example.com").await?;
//! ```

pub mod acme;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod key;
pub mod kubeconfig;
pub mod store;

pub use acme::{AcmeStore, CertificateMeta, StoredCertificate};
pub use cache::{Cache, KubernetesCache};
pub use config::{CacheConfig, ConnectionMode};
pub use context::Context;
pub use error::{CacheError, CacheResult, ConfigError, ContextError, StorageError, StoreError};
pub use key::{decode_key, encode_key};
pub use store::{DeleteOptions, KubernetesSecretStore, MemorySecretStore, Secret, SecretStore};
