//! Cache configuration
//!
//! # Example
//!
//! ```toml
//! namespace = "ingress"
//! secret-name = "acme.secret"
//! delete-grace-period-secs = 1
//! request-timeout-secs = 10
//!
//! [connection]
//! mode = "kubeconfig"
//! path = "~/.kube/config"
//! context = "prod"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;
use crate::kubeconfig::{self, ClusterConnection, Kubeconfig};

/// Secret name used when none is configured
pub const DEFAULT_SECRET_NAME: &str = "acme.secret";

/// Namespace used when nothing else names one
pub const DEFAULT_NAMESPACE: &str = "default";

/// How to reach the Kubernetes API server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// In-cluster service account, falling back to the default kubeconfig
    #[default]
    Auto,
    /// In-cluster service account only
    InCluster,
    /// Kubeconfig file (default location when `path` is unset)
    Kubeconfig {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        context: Option<String>,
    },
}

/// Configuration for a [`KubernetesCache`](crate::KubernetesCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Namespace holding the secret. Discovered when unset.
    #[serde(default)]
    #[validate(custom(function = "validate_dns_label"))]
    pub namespace: Option<String>,

    /// Name of the secret holding the cache
    #[serde(default = "default_secret_name")]
    #[validate(custom(function = "validate_dns_subdomain"))]
    pub secret_name: String,

    /// Grace period applied when the emptied secret is deleted
    #[serde(default = "default_grace_period")]
    pub delete_grace_period_secs: u64,

    /// Timeout for each request to the API server
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub connection: ConnectionMode,
}

fn default_secret_name() -> String {
    DEFAULT_SECRET_NAME.to_string()
}

fn default_grace_period() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            secret_name: default_secret_name(),
            delete_grace_period_secs: default_grace_period(),
            request_timeout_secs: default_request_timeout(),
            connection: ConnectionMode::default(),
        }
    }
}

impl CacheConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig =
            toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Run validation, flattening errors into a [`ConfigError`]
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Resolve the API server connection for this configuration
    pub fn connect(&self) -> Result<ClusterConnection, ConfigError> {
        let connection = match &self.connection {
            ConnectionMode::InCluster => ClusterConnection::in_cluster()?,
            ConnectionMode::Kubeconfig { path, context } => {
                load_kubeconfig(path.as_deref())?.resolve(context.as_deref())?
            }
            ConnectionMode::Auto => match ClusterConnection::in_cluster() {
                Ok(connection) => connection,
                Err(e) => {
                    debug!(error = %e, "In-cluster config not available, trying default kubeconfig");
                    Kubeconfig::from_default_location()?.resolve(None)?
                }
            },
        };
        Ok(connection)
    }

    /// Namespace to use: explicit setting, then the connection's namespace
    /// (service account or kubeconfig context), then `default`.
    pub fn resolve_namespace(&self, connection: Option<&ClusterConnection>) -> String {
        self.namespace
            .clone()
            .or_else(|| connection.and_then(|c| c.namespace.clone()))
            .or_else(kubeconfig::service_account_namespace)
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}

fn load_kubeconfig(path: Option<&Path>) -> Result<Kubeconfig, ConfigError> {
    let config = match path {
        Some(path) => Kubeconfig::from_file(path)?,
        None => Kubeconfig::from_default_location()?,
    };
    Ok(config)
}

/// Boolean environment flag: unset uses `default`, and only `false`,
/// `FALSE`, `False` and `0` count as false.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_flag(&value),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(value, "false" | "FALSE" | "False" | "0")
}

/// RFC 1123 label: namespaces
fn validate_dns_label(value: &str) -> Result<(), ValidationError> {
    if value.len() > 63 || !is_dns_label(value) {
        return Err(ValidationError::new("dns_label"));
    }
    Ok(())
}

/// RFC 1123 subdomain: secret names
fn validate_dns_subdomain(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > 253 || !value.split('.').all(is_dns_label) {
        return Err(ValidationError::new("dns_subdomain"));
    }
    Ok(())
}

fn is_dns_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::from_toml_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.secret_name, "acme.secret");
        assert_eq!(config.delete_grace_period_secs, 1);
        assert_eq!(config.connection, ConnectionMode::Auto);
    }

    #[test]
    fn test_parse_kubeconfig_mode() {
        let config = CacheConfig::from_toml_str(
            r#"
namespace = "ingress"
secret-name = "certs.example.com"
delete-grace-period-secs = 0

[connection]
mode = "kubeconfig"
path = "/tmp/kubeconfig"
context = "prod"
"#,
        )
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("ingress"));
        assert_eq!(config.delete_grace_period_secs, 0);
        assert_eq!(
            config.connection,
            ConnectionMode::Kubeconfig {
                path: Some(PathBuf::from("/tmp/kubeconfig")),
                context: Some("prod".to_string()),
            }
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        for toml in [
            r#"secret-name = "Bad_Name""#,
            r#"secret-name = """#,
            r#"secret-name = "trailing-.dot""#,
            r#"namespace = "has.dot""#,
            r#"request-timeout-secs = 0"#,
        ] {
            let err = CacheConfig::from_toml_str(toml).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{toml}");
        }
    }

    #[test]
    fn test_resolve_namespace_precedence() {
        let connection = ClusterConnection {
            server: "https://127.0.0.1:6443".to_string(),
            ca_cert: None,
            auth: crate::kubeconfig::KubeAuth::None,
            namespace: Some("from-context".to_string()),
            insecure_skip_tls_verify: false,
        };

        let config = CacheConfig {
            namespace: Some("explicit".to_string()),
            ..CacheConfig::default()
        };
        assert_eq!(config.resolve_namespace(Some(&connection)), "explicit");

        let config = CacheConfig::default();
        assert_eq!(config.resolve_namespace(Some(&connection)), "from-context");
    }

    #[test]
    fn test_parse_flag() {
        for value in ["false", "FALSE", "False", "0"] {
            assert!(!parse_flag(value), "{value}");
        }
        for value in ["true", "1", "yes", "", "no"] {
            assert!(parse_flag(value), "{value}");
        }
    }
}
