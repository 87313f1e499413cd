/*
 * Responsibility
 * - Error type of the public facade
 * - Every layer error converts into it with `?`
 * - Typed variants stay matchable; nothing is flattened into strings
 */
use thiserror::Error;

use crate::authentication::{AuthenticationError, TransactionError};
use crate::config::ConfigError;
use crate::registered_service::ServicesError;
use crate::registry::RegistryError;
use crate::registry::invalidation::InvalidationError;
use crate::registry::store::StoreError;
use crate::ticket::TicketIdError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum CasError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("service {0} is not authorized to use single sign-on")]
    UnauthorizedService(String),

    #[error("ticket {ticket_id} was not issued to service {service}")]
    UnrecognizableService { ticket_id: String, service: String },

    #[error("proxy callback credential required for ticket {0}")]
    MissingProxyCallback(String),

    #[error("ticket id generation failed: {0}")]
    TicketId(#[from] TicketIdError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invalidation(#[from] InvalidationError),

    #[error(transparent)]
    Services(#[from] ServicesError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CasError {
    /// Not found or expired, at whatever layer it surfaced.
    pub fn is_not_found(&self) -> bool {
        match self {
            CasError::Registry(e) => e.is_not_found(),
            CasError::Token(TokenError::Registry(e)) => e.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_counts_as_not_found_through_every_layer() {
        let e: CasError = RegistryError::TicketExpired("ST-1".into()).into();
        assert!(e.is_not_found());

        let e: CasError = TokenError::from(RegistryError::TicketNotFound("AT-1".into())).into();
        assert!(e.is_not_found());

        let e: CasError = RegistryError::DuplicateTicket("ST-1".into()).into();
        assert!(!e.is_not_found());
    }
}
