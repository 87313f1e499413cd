use std::sync::Arc;

use thiserror::Error;

use crate::authentication::credential::{Credential, CredentialType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("invalid authentication transaction: at least one credential is required")]
    InvalidTransaction,
}

/// Immutable, ordered, non-empty set of credentials submitted together.
#[derive(Debug, Clone)]
pub struct AuthenticationTransaction {
    service: Option<String>,
    credentials: Vec<Arc<dyn Credential>>,
}

impl AuthenticationTransaction {
    /// Build a transaction with no target service.
    ///
    /// Fails with [`TransactionError::InvalidTransaction`] when `credentials` is empty.
    pub fn of<I>(credentials: I) -> Result<Self, TransactionError>
    where
        I: IntoIterator<Item = Arc<dyn Credential>>,
    {
        Self::for_service(None, credentials)
    }

    pub fn for_service<I>(service: Option<String>, credentials: I) -> Result<Self, TransactionError>
    where
        I: IntoIterator<Item = Arc<dyn Credential>>,
    {
        let credentials: Vec<_> = credentials.into_iter().collect();
        if credentials.is_empty() {
            return Err(TransactionError::InvalidTransaction);
        }
        Ok(Self {
            service,
            credentials,
        })
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn credentials(&self) -> &[Arc<dyn Credential>] {
        &self.credentials
    }

    pub fn primary_credential(&self) -> &Arc<dyn Credential> {
        // Non-empty by construction.
        &self.credentials[0]
    }

    /// True iff at least one credential is `expected` or a subtype of it.
    pub fn has_credential_of_type(&self, expected: &CredentialType) -> bool {
        self.credentials.iter().any(|c| c.is_of_type(expected))
    }

    /// First credential assignable to `expected`.
    pub fn credential_of_type(&self, expected: &CredentialType) -> Option<&Arc<dyn Credential>> {
        self.credentials.iter().find(|c| c.is_of_type(expected))
    }
}
