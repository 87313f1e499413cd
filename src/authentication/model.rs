use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authentication::transaction::AuthenticationTransaction;

/// Multi-valued attribute map. Ordered so encoded tickets are deterministic.
pub type Attributes = BTreeMap<String, Vec<Value>>;

/// Attribute holding the names of the handlers that authenticated the principal.
pub const SUCCESSFUL_AUTHENTICATION_HANDLERS: &str = "successfulAuthenticationHandlers";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }
}

/// Completed authentication record produced by the authentication subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    #[serde(default)]
    pub attributes: Attributes,
    pub authentication_date: DateTime<Utc>,
    #[serde(default)]
    pub successes: Vec<String>,
}

impl Authentication {
    pub fn new(principal: Principal, authentication_date: DateTime<Utc>) -> Self {
        Self {
            principal,
            attributes: Attributes::new(),
            authentication_date,
            successes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    /// Record a successful handler; it is mirrored into the
    /// `successfulAuthenticationHandlers` attribute.
    pub fn with_success(mut self, handler: impl Into<String>) -> Self {
        let handler = handler.into();
        self.attributes
            .entry(SUCCESSFUL_AUTHENTICATION_HANDLERS.to_string())
            .or_default()
            .push(Value::String(handler.clone()));
        self.successes.push(handler);
        self
    }

    pub fn first_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).and_then(|v| v.first())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("authentication failed: {0}")]
pub struct AuthenticationError(pub String);

/// The authentication subsystem: verifies credentials and returns the result.
///
/// Credential verification strategies live outside this crate; the core only
/// consumes the [`Authentication`] produced here.
#[async_trait]
pub trait AuthenticationManager: Send + Sync {
    async fn authenticate(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<Authentication, AuthenticationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successes_are_mirrored_into_attributes() {
        let auth = Authentication::new(Principal::new("casuser"), Utc::now())
            .with_success("AcceptUsersAuthenticationHandler")
            .with_success("X509AuthenticationHandler");

        assert_eq!(auth.successes.len(), 2);
        assert_eq!(
            auth.attributes[SUCCESSFUL_AUTHENTICATION_HANDLERS],
            vec![
                Value::from("AcceptUsersAuthenticationHandler"),
                Value::from("X509AuthenticationHandler")
            ]
        );
        assert_eq!(
            auth.first_attribute(SUCCESSFUL_AUTHENTICATION_HANDLERS),
            Some(&Value::from("AcceptUsersAuthenticationHandler"))
        );
    }
}
