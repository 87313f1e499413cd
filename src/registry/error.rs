/*
 * Responsibility
 * - What the registry reports to its callers
 * - Backing-store failures collapse into RegistryUnavailable; the cause stays
 *   reachable through `source()`
 */
use thiserror::Error;

use crate::registry::store::StoreError;
use crate::ticket::TicketType;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("ticket {0} already exists")]
    DuplicateTicket(String),

    #[error("ticket {0} not found")]
    TicketNotFound(String),

    #[error("ticket {0} is expired")]
    TicketExpired(String),

    #[error("ticket {id} is a {actual} ticket, expected {expected}")]
    InvalidTicketType {
        id: String,
        expected: TicketType,
        actual: TicketType,
    },

    #[error("ticket {0} is part of a cyclic or too deep ticket chain")]
    CyclicProxyChain(String),

    #[error("ticket registry unavailable")]
    RegistryUnavailable(#[from] StoreError),
}

impl RegistryError {
    /// Expired tickets are reported as absent to most callers.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::TicketNotFound(_) | RegistryError::TicketExpired(_)
        )
    }
}
