//! Secret store backed by the Kubernetes REST API
//!
//! Talks to `/api/v1/namespaces/{namespace}/secrets/{name}` directly with
//! `reqwest`. Secret data values travel base64 encoded, as the API requires.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace};

use super::{DeleteOptions, Secret, SecretStore, OPAQUE_SECRET_TYPE};
use crate::error::{ConfigError, StoreError};
use crate::kubeconfig::{ClusterConnection, KubeAuth};

/// Kubernetes API wire types
mod k8s_types {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SecretObject {
        #[serde(default)]
        pub api_version: Option<String>,
        #[serde(default)]
        pub kind: Option<String>,
        pub metadata: ObjectMeta,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub data: Option<BTreeMap<String, String>>,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        pub secret_type: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ObjectMeta {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub namespace: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub resource_version: Option<String>,
    }

    /// `Status` object returned with API errors
    #[derive(Debug, Default, Deserialize)]
    pub struct Status {
        pub message: Option<String>,
        pub reason: Option<String>,
    }
}

use k8s_types::{ObjectMeta, SecretObject, Status};

/// [`SecretStore`] that stores Secrets in a Kubernetes cluster.
#[derive(Debug, Clone)]
pub struct KubernetesSecretStore {
    client: reqwest::Client,
    server: String,
    auth: KubeAuth,
}

impl KubernetesSecretStore {
    /// Build a store for `connection` with a per-request `timeout`.
    pub fn new(connection: &ClusterConnection, timeout: Duration) -> Result<Self, ConfigError> {
        let builder = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(connection.insecure_skip_tls_verify);

        let builder = match &connection.ca_cert {
            Some(ca) => {
                let cert = reqwest::Certificate::from_pem(ca).map_err(|e| {
                    ConfigError::HttpClient(format!("failed to parse CA certificate: {e}"))
                })?;
                builder.add_root_certificate(cert)
            }
            None => builder,
        };

        let builder = match &connection.auth {
            KubeAuth::ClientCert { cert, key } => {
                let mut identity_pem = cert.clone();
                identity_pem.push(b'\n');
                identity_pem.extend_from_slice(key);
                let identity = reqwest::Identity::from_pem(&identity_pem).map_err(|e| {
                    ConfigError::HttpClient(format!("failed to create client identity: {e}"))
                })?;
                builder.identity(identity)
            }
            _ => builder,
        };

        let client = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        debug!(server = %connection.server, "Created Kubernetes secret store");

        Ok(Self {
            client,
            server: connection.server.trim_end_matches('/').to_string(),
            auth: connection.auth.clone(),
        })
    }

    fn collection_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/secrets", self.server, namespace)
    }

    fn object_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_url(namespace), name)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth {
            KubeAuth::Token(token) => request.bearer_auth(token),
            _ => request,
        }
    }

    /// Send a request and turn non-success statuses into [`StoreError`]s
    async fn send(
        &self,
        request: RequestBuilder,
        namespace: &str,
        name: &str,
    ) -> Result<Response, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let details: Status = serde_json::from_str(&body).unwrap_or_default();
        let message = details.message.unwrap_or(body);

        trace!(status = %status, namespace = %namespace, secret = %name, "Kubernetes API error");

        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            StatusCode::CONFLICT if details.reason.as_deref() == Some("AlreadyExists") => {
                StoreError::AlreadyExists {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            }
            StatusCode::CONFLICT => StoreError::Conflict {
                name: name.to_string(),
                message,
            },
            StatusCode::UNAUTHORIZED => StoreError::Unauthorized(message),
            StatusCode::FORBIDDEN => StoreError::Forbidden(message),
            other => StoreError::Api {
                status: other.as_u16(),
                message,
            },
        })
    }

    async fn read_secret(response: Response, namespace: &str) -> Result<Secret, StoreError> {
        let object: SecretObject = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        from_object(object, namespace)
    }
}

fn to_object(secret: &Secret) -> SecretObject {
    let data = secret
        .data
        .iter()
        .map(|(token, blob)| (token.clone(), BASE64.encode(blob)))
        .collect();

    SecretObject {
        api_version: Some("v1".to_string()),
        kind: Some("Secret".to_string()),
        metadata: ObjectMeta {
            name: secret.name.clone(),
            namespace: Some(secret.namespace.clone()),
            resource_version: secret.resource_version.clone(),
        },
        data: Some(data),
        secret_type: Some(secret.secret_type.clone()),
    }
}

fn from_object(object: SecretObject, namespace: &str) -> Result<Secret, StoreError> {
    let mut data = BTreeMap::new();
    for (token, encoded) in object.data.unwrap_or_default() {
        let blob = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| StoreError::Decode(format!("data key {token}: {e}")))?;
        data.insert(token, blob);
    }

    Ok(Secret {
        namespace: object
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string()),
        name: object.metadata.name,
        data,
        resource_version: object.metadata.resource_version,
        secret_type: object
            .secret_type
            .unwrap_or_else(|| OPAQUE_SECRET_TYPE.to_string()),
    })
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        debug!(namespace = %namespace, secret = %name, "Fetching secret");
        let request = self.request(Method::GET, &self.object_url(namespace, name));
        let response = self.send(request, namespace, name).await?;
        Self::read_secret(response, namespace).await
    }

    async fn create(&self, secret: &Secret) -> Result<Secret, StoreError> {
        debug!(namespace = %secret.namespace, secret = %secret.name, "Creating secret");
        let request = self
            .request(Method::POST, &self.collection_url(&secret.namespace))
            .json(&to_object(secret));
        let response = self.send(request, &secret.namespace, &secret.name).await?;
        Self::read_secret(response, &secret.namespace).await
    }

    async fn update(&self, secret: &Secret) -> Result<Secret, StoreError> {
        debug!(
            namespace = %secret.namespace,
            secret = %secret.name,
            entries = secret.data.len(),
            "Updating secret"
        );
        let request = self
            .request(Method::PUT, &self.object_url(&secret.namespace, &secret.name))
            .json(&to_object(secret));
        let response = self.send(request, &secret.namespace, &secret.name).await?;
        Self::read_secret(response, &secret.namespace).await
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), StoreError> {
        debug!(
            namespace = %namespace,
            secret = %name,
            grace_period_seconds = options.grace_period_seconds,
            "Deleting secret"
        );
        let body = json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "gracePeriodSeconds": options.grace_period_seconds,
            "orphanDependents": options.orphan_dependents,
        });
        let request = self
            .request(Method::DELETE, &self.object_url(namespace, name))
            .json(&body);
        self.send(request, namespace, name).await?;
        Ok(())
    }
}
