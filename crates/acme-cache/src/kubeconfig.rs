//! Kubernetes API connection settings
//!
//! Resolves where the API server is and how to authenticate against it, from
//! either the in-cluster service account or a kubeconfig file.
//!
//! # Supported Authentication Methods
//!
//! - **Token**: bearer token, inline or from `token-file`
//! - **Client Certificate**: mTLS with client cert/key, inline or from files

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::KubeconfigError;

/// Service account mount inside a pod
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Kubeconfig file structure (only the parts we use)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// Current context name
    pub current_context: Option<String>,
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate data (base64 encoded)
    pub certificate_authority_data: Option<String>,
    /// Path to CA certificate file
    pub certificate_authority: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserConfig {
    pub token: Option<String>,
    pub token_file: Option<String>,
    pub client_certificate_data: Option<String>,
    pub client_certificate: Option<String>,
    pub client_key_data: Option<String>,
    pub client_key: Option<String>,
}

/// How requests to the API server are authenticated
#[derive(Clone)]
pub enum KubeAuth {
    /// Bearer token
    Token(String),
    /// Client certificate and key, PEM encoded
    ClientCert { cert: Vec<u8>, key: Vec<u8> },
    None,
}

impl std::fmt::Debug for KubeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KubeAuth::Token(_) => f.write_str("Token(<redacted>)"),
            KubeAuth::ClientCert { .. } => f.write_str("ClientCert(<redacted>)"),
            KubeAuth::None => f.write_str("None"),
        }
    }
}

/// Everything needed to talk to one API server
#[derive(Debug, Clone)]
pub struct ClusterConnection {
    /// API server URL
    pub server: String,
    /// CA certificate (PEM)
    pub ca_cert: Option<Vec<u8>>,
    pub auth: KubeAuth,
    /// Namespace from the kubeconfig context or service account
    pub namespace: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

impl Kubeconfig {
    /// Load a kubeconfig file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KubeconfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading kubeconfig");

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from `$KUBECONFIG` (first entry) or `~/.kube/config`
    pub fn from_default_location() -> Result<Self, KubeconfigError> {
        Self::from_file(default_kubeconfig_path())
    }

    /// Parse kubeconfig YAML
    pub fn parse(content: &str) -> Result<Self, KubeconfigError> {
        let config: Kubeconfig = serde_yaml::from_str(content)?;
        trace!(
            clusters = config.clusters.len(),
            contexts = config.contexts.len(),
            users = config.users.len(),
            "Parsed kubeconfig"
        );
        Ok(config)
    }

    /// Resolve `context`, or the current context when `None`
    pub fn resolve(&self, context: Option<&str>) -> Result<ClusterConnection, KubeconfigError> {
        let context_name = match context {
            Some(name) => name.to_string(),
            None => self
                .current_context
                .clone()
                .ok_or(KubeconfigError::NoCurrentContext)?,
        };

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| KubeconfigError::ContextNotFound(context_name.clone()))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| KubeconfigError::ClusterNotFound(context.cluster.clone()))?;
        let user = self
            .users
            .iter()
            .find(|u| u.name == context.user)
            .map(|u| &u.user)
            .ok_or_else(|| KubeconfigError::UserNotFound(context.user.clone()))?;

        debug!(
            context = %context_name,
            cluster = %context.cluster,
            server = %cluster.server,
            "Resolved kubeconfig context"
        );

        Ok(ClusterConnection {
            server: cluster.server.clone(),
            ca_cert: inline_or_file(
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
            )?,
            auth: resolve_auth(user)?,
            namespace: context.namespace.clone(),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        })
    }
}

impl ClusterConnection {
    /// Connection from the pod's service account
    ///
    /// Requires `KUBERNETES_SERVICE_HOST` and the token mounted under
    /// [`SERVICE_ACCOUNT_DIR`].
    pub fn in_cluster() -> Result<Self, KubeconfigError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            KubeconfigError::NotInCluster("KUBERNETES_SERVICE_HOST not set".to_string())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        Self::from_service_account(&host, &port, Path::new(SERVICE_ACCOUNT_DIR))
    }

    /// Connection from a service account directory (`token`, `ca.crt`, `namespace`)
    pub fn from_service_account(
        host: &str,
        port: &str,
        dir: &Path,
    ) -> Result<Self, KubeconfigError> {
        let token = std::fs::read_to_string(dir.join("token")).map_err(|e| {
            KubeconfigError::NotInCluster(format!("failed to read service account token: {e}"))
        })?;
        let ca_cert = std::fs::read(dir.join("ca.crt")).ok();
        if ca_cert.is_none() {
            warn!("Service account CA certificate not found, using system roots");
        }

        // IPv6 service hosts need brackets
        let server = if host.contains(':') {
            format!("https://[{host}]:{port}")
        } else {
            format!("https://{host}:{port}")
        };

        Ok(Self {
            server,
            ca_cert,
            auth: KubeAuth::Token(token.trim().to_string()),
            namespace: read_namespace_file(&dir.join("namespace")),
            insecure_skip_tls_verify: false,
        })
    }
}

/// Namespace of the running pod, if mounted
pub fn service_account_namespace() -> Option<String> {
    read_namespace_file(&Path::new(SERVICE_ACCOUNT_DIR).join("namespace"))
}

fn read_namespace_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let namespace = content.trim();
    (!namespace.is_empty()).then(|| namespace.to_string())
}

fn default_kubeconfig_path() -> PathBuf {
    if let Some(first) = std::env::var_os("KUBECONFIG")
        .as_ref()
        .and_then(|paths| std::env::split_paths(paths).find(|p| !p.as_os_str().is_empty()))
    {
        return first;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    PathBuf::from(home).join(".kube").join("config")
}

fn resolve_auth(user: &UserConfig) -> Result<KubeAuth, KubeconfigError> {
    if let Some(token) = &user.token {
        return Ok(KubeAuth::Token(token.clone()));
    }

    if let Some(token_file) = &user.token_file {
        let token = std::fs::read_to_string(expand_path(token_file))?;
        return Ok(KubeAuth::Token(token.trim().to_string()));
    }

    let cert = inline_or_file(
        user.client_certificate_data.as_deref(),
        user.client_certificate.as_deref(),
    )?;
    let key = inline_or_file(user.client_key_data.as_deref(), user.client_key.as_deref())?;
    if let (Some(cert), Some(key)) = (cert, key) {
        return Ok(KubeAuth::ClientCert { cert, key });
    }

    warn!("No authentication method found in kubeconfig user");
    Ok(KubeAuth::None)
}

/// Base64 inline data wins over a file path
fn inline_or_file(data: Option<&str>, path: Option<&str>) -> Result<Option<Vec<u8>>, KubeconfigError> {
    if let Some(data) = data {
        return Ok(Some(BASE64.decode(data)?));
    }
    if let Some(path) = path {
        return Ok(Some(std::fs::read(expand_path(path))?));
    }
    Ok(None)
}

fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CERT_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: kind-acme
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
    server: https://127.0.0.1:6443
  name: kind-acme
contexts:
- context:
    cluster: kind-acme
    user: kind-acme
    namespace: certs
  name: kind-acme
- context:
    cluster: kind-acme
    user: missing-user
  name: broken
users:
- name: kind-acme
  user:
    client-certificate-data: Y2VydA==
    client-key-data: a2V5
"#;

    #[test]
    fn test_resolve_current_context() {
        let config = Kubeconfig::parse(CERT_KUBECONFIG).unwrap();
        let conn = config.resolve(None).unwrap();

        assert_eq!(conn.server, "https://127.0.0.1:6443");
        assert_eq!(conn.ca_cert.as_deref(), Some(&b"-----BEGIN CERTIFICATE-----"[..]));
        assert_eq!(conn.namespace.as_deref(), Some("certs"));
        match conn.auth {
            KubeAuth::ClientCert { cert, key } => {
                assert_eq!(cert, b"cert");
                assert_eq!(key, b"key");
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn test_resolve_errors() {
        let config = Kubeconfig::parse(CERT_KUBECONFIG).unwrap();
        assert!(matches!(
            config.resolve(Some("nope")),
            Err(KubeconfigError::ContextNotFound(_))
        ));
        assert!(matches!(
            config.resolve(Some("broken")),
            Err(KubeconfigError::UserNotFound(_))
        ));

        let empty = Kubeconfig::parse("clusters: []\n").unwrap();
        assert!(matches!(
            empty.resolve(None),
            Err(KubeconfigError::NoCurrentContext)
        ));
    }

    #[test]
    fn test_token_file_auth() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "secret-token\n").unwrap();

        let yaml = format!(
            r#"
current-context: c
clusters:
- name: c
  cluster:
    server: https://api.example.com
    insecure-skip-tls-verify: true
contexts:
- name: c
  context:
    cluster: c
    user: u
users:
- name: u
  user:
    token-file: {}
"#,
            token_path.display()
        );
        let conn = Kubeconfig::parse(&yaml).unwrap().resolve(None).unwrap();
        assert!(conn.insecure_skip_tls_verify);
        assert!(conn.namespace.is_none());
        assert!(matches!(conn.auth, KubeAuth::Token(ref t) if t == "secret-token"));
    }

    #[test]
    fn test_service_account() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("token"), "sa-token\n").unwrap();
        std::fs::write(dir.path().join("namespace"), "  web \n").unwrap();

        let conn = ClusterConnection::from_service_account("10.0.0.1", "443", dir.path()).unwrap();
        assert_eq!(conn.server, "https://10.0.0.1:443");
        assert_eq!(conn.namespace.as_deref(), Some("web"));
        assert!(conn.ca_cert.is_none());
        assert!(matches!(conn.auth, KubeAuth::Token(ref t) if t == "sa-token"));

        let conn = ClusterConnection::from_service_account("fd00::1", "6443", dir.path()).unwrap();
        assert_eq!(conn.server, "https://[fd00::1]:6443");
    }

    #[test]
    fn test_service_account_missing_token() {
        let dir = TempDir::new().unwrap();
        let err = ClusterConnection::from_service_account("10.0.0.1", "443", dir.path()).unwrap_err();
        assert!(matches!(err, KubeconfigError::NotInCluster(_)));
    }

    #[test]
    fn test_empty_namespace_file_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("namespace");
        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(read_namespace_file(&path), None);
        assert_eq!(read_namespace_file(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_auth_debug_redacts() {
        let auth = KubeAuth::Token("hunter2".to_string());
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
