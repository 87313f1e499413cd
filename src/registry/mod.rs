//! Ticket registry: the single place tickets are created, read, mutated and
//! removed.
//!
//! [`DefaultTicketRegistry`] applies the registry rules over any
//! [`store::TicketStore`]; [`CachingTicketRegistry`] layers a local
//! read-through cache over any registry.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ticket::{Ticket, TicketType};

pub mod caching;
pub mod cleaner;
pub mod codec;
pub mod default;
pub mod error;
pub mod invalidation;
pub mod locks;
pub mod store;

pub use caching::{CachingTicketRegistry, TicketCacheConfig};
pub use codec::{JsonTicketCodec, TicketCodec};
pub use default::DefaultTicketRegistry;
pub use error::{RegistryError, RegistryResult};

/// Cascading deletes give up past this many levels.
pub const MAX_CASCADE_DEPTH: usize = 32;

pub type TicketPredicate<'a> = &'a (dyn Fn(&Ticket) -> bool + Send + Sync);

/// In-place change applied by [`TicketRegistry::modify_ticket`].
pub type TicketChange<'a> = &'a (dyn Fn(&mut Ticket) + Send + Sync);

/// Whether `ticket` and every ticket above it are present in `tickets` and
/// unexpired at `now`.
pub(crate) fn is_live_in(
    ticket: &Ticket,
    tickets: &HashMap<String, Ticket>,
    now: DateTime<Utc>,
) -> bool {
    if ticket.is_expired(now) {
        return false;
    }
    let mut next = ticket.parent_id();
    for _ in 0..MAX_CASCADE_DEPTH {
        let Some(id) = next else {
            return true;
        };
        match tickets.get(id) {
            Some(parent) if !parent.is_expired(now) => next = parent.parent_id(),
            _ => return false,
        }
    }
    next.is_none()
}

#[async_trait]
pub trait TicketRegistry: Send + Sync + 'static {
    /// Fails with `DuplicateTicket` when the id is taken.
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()>;

    /// Live ticket of the expected type (or a subtype). A ticket whose
    /// granting chain has a missing or expired ticket in it is expired too.
    async fn get_ticket(&self, id: &str, expected: TicketType) -> RegistryResult<Ticket>;

    /// Live ticket of any type.
    async fn find_ticket(&self, id: &str) -> RegistryResult<Ticket>;

    /// Stored version of a ticket, expired or not. No side effects.
    async fn peek_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>>;

    /// Replace a stored ticket. Granting maps are merged with the stored
    /// version, so concurrent appends all survive. Returns what was stored.
    async fn update_ticket(&self, ticket: Ticket) -> RegistryResult<Ticket>;

    /// Apply `change` to the live stored ticket while holding its lock, then
    /// store the result. When the change uses the ticket up, it is removed
    /// instead and only this caller sees the final copy.
    async fn modify_ticket(
        &self,
        id: &str,
        expected: TicketType,
        change: TicketChange<'_>,
    ) -> RegistryResult<Ticket>;

    /// Delete a ticket and everything issued from it. Returns the ids removed;
    /// an unknown id removes nothing.
    async fn delete_ticket_cascade(&self, id: &str) -> RegistryResult<Vec<String>>;

    /// Like [`delete_ticket_cascade`](Self::delete_ticket_cascade), counting.
    async fn delete_ticket(&self, id: &str) -> RegistryResult<usize> {
        Ok(self.delete_ticket_cascade(id).await?.len())
    }

    async fn delete_all(&self) -> RegistryResult<u64>;

    /// Snapshot of every live ticket.
    async fn get_tickets(&self) -> RegistryResult<Vec<Ticket>>;

    async fn get_tickets_matching(
        &self,
        predicate: TicketPredicate<'_>,
    ) -> RegistryResult<Vec<Ticket>> {
        Ok(self
            .get_tickets()
            .await?
            .into_iter()
            .filter(|t| predicate(t))
            .collect())
    }

    /// Live ticket-granting tickets (not counting proxy-granting ones).
    async fn session_count(&self) -> RegistryResult<usize> {
        Ok(self
            .get_tickets_matching(&|t| t.ticket_type() == TicketType::TicketGranting)
            .await?
            .len())
    }

    /// Live service and proxy tickets.
    async fn service_ticket_count(&self) -> RegistryResult<usize> {
        Ok(self
            .get_tickets_matching(&|t| t.ticket_type().is_assignable_to(TicketType::Service))
            .await?
            .len())
    }

    /// Remove expired tickets and their descendants. Returns the ids removed.
    async fn clean_expired(&self) -> RegistryResult<Vec<String>>;
}
