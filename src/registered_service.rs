//! Registered-service metadata consumed by the ticket and token layers.
//!
//! Only lookups live here; managing the service registry itself is
//! someone else's job. [`InMemoryServicesManager`] loads a JSON array of
//! services once at startup.
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn default_signing_alg() -> String {
    "RS256".to_string()
}

fn default_true() -> bool {
    true
}

/// OpenID Connect relying-party settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcSettings {
    pub client_id: String,
    /// Claims this client may receive. Empty means the server-wide list.
    #[serde(default)]
    pub supported_claims: Vec<String>,
    #[serde(default = "default_signing_alg")]
    pub id_token_signing_alg: String,
    #[serde(default = "default_true")]
    pub sign_id_token: bool,
    /// RSA public key (SPKI PEM). When set, ID tokens are encrypted to it.
    #[serde(default)]
    pub id_token_encryption_key_pem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegisteredServiceKind {
    Cas,
    #[serde(rename = "oauth")]
    OAuth {
        client_id: String,
    },
    Oidc(OidcSettings),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    pub id: i64,
    pub name: String,
    /// Service URL. A request matches when it equals this value, ignoring
    /// any query string on the request.
    pub service_id: String,
    #[serde(flatten)]
    pub kind: RegisteredServiceKind,
}

impl RegisteredService {
    pub fn matches(&self, service: &str) -> bool {
        if service == self.service_id {
            return true;
        }
        service
            .split_once('?')
            .is_some_and(|(base, _)| base == self.service_id)
    }

    pub fn client_id(&self) -> Option<&str> {
        match &self.kind {
            RegisteredServiceKind::Cas => None,
            RegisteredServiceKind::OAuth { client_id } => Some(client_id),
            RegisteredServiceKind::Oidc(s) => Some(&s.client_id),
        }
    }

    pub fn oidc(&self) -> Option<&OidcSettings> {
        match &self.kind {
            RegisteredServiceKind::Oidc(s) => Some(s),
            _ => None,
        }
    }
}

/// Lookup of registered services.
pub trait ServicesManager: Send + Sync {
    fn find_service_by(&self, service: &str) -> Option<Arc<RegisteredService>>;

    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<RegisteredService>>;
}

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("failed to read services file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse services file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// First match wins, in definition order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServicesManager {
    services: Vec<Arc<RegisteredService>>,
}

impl InMemoryServicesManager {
    pub fn new(services: Vec<RegisteredService>) -> Self {
        Self {
            services: services.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ServicesError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let services: Vec<RegisteredService> = serde_json::from_str(&raw)?;
        debug!(
            path = %path.as_ref().display(),
            count = services.len(),
            "registered services loaded"
        );
        Ok(Self::new(services))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServicesManager for InMemoryServicesManager {
    fn find_service_by(&self, service: &str) -> Option<Arc<RegisteredService>> {
        self.services.iter().find(|s| s.matches(service)).cloned()
    }

    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<RegisteredService>> {
        self.services
            .iter()
            .find(|s| s.client_id() == Some(client_id))
            .cloned()
    }
}
