use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::registry::codec::{JsonTicketCodec, TicketCodec};
use crate::registry::locks::KeyedLocks;
use crate::registry::store::{StoreError, TicketRecord, TicketStore};
use crate::registry::{
    MAX_CASCADE_DEPTH, RegistryError, RegistryResult, TicketChange, TicketPredicate,
    TicketRegistry, is_live_in,
};
use crate::ticket::{Clock, Ticket, TicketType};

/// Registry over a backing [`TicketStore`].
///
/// - Reads take no lock; expiration is evaluated on every read against the
///   injected clock, for the ticket and for each ticket above it.
/// - Writes to one id are serialized through [`KeyedLocks`].
/// - Cascading deletes lock one ticket at a time, never a whole subtree.
pub struct DefaultTicketRegistry<S: TicketStore> {
    store: Arc<S>,
    codec: Arc<dyn TicketCodec>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl<S: TicketStore> Clone for DefaultTicketRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            clock: Arc::clone(&self.clock),
            locks: self.locks.clone(),
        }
    }
}

impl<S: TicketStore> std::fmt::Debug for DefaultTicketRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTicketRegistry")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

impl<S: TicketStore> DefaultTicketRegistry<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self::with_codec(store, Arc::new(JsonTicketCodec), clock)
    }

    pub fn with_codec(store: S, codec: Arc<dyn TicketCodec>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(store),
            codec,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn unavailable(&self, op: &'static str, id: &str, e: StoreError) -> RegistryError {
        error!(
            backend = self.store.backend_name(),
            op,
            ticket_id = %id,
            error = %e,
            "ticket store operation failed"
        );
        RegistryError::RegistryUnavailable(e)
    }

    fn record(&self, ticket: &Ticket) -> RegistryResult<TicketRecord> {
        let body = self
            .codec
            .encode(ticket)
            .map_err(|e| self.unavailable("encode", &ticket.id, e))?;
        Ok(TicketRecord {
            id: ticket.id.clone(),
            ticket_type: ticket.ticket_type(),
            body,
            ttl: ticket
                .expiration_policy
                .store_ttl_hint()
                .and_then(|d| d.to_std().ok()),
        })
    }

    /// Stored ticket, expired or not.
    async fn read(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        let body = self
            .store
            .get(id)
            .await
            .map_err(|e| self.unavailable("get", id, e))?;
        body.map(|b| self.codec.decode(&b))
            .transpose()
            .map_err(|e| self.unavailable("decode", id, e))
    }

    async fn read_live(&self, id: &str) -> RegistryResult<Ticket> {
        let ticket = self
            .read(id)
            .await?
            .ok_or_else(|| RegistryError::TicketNotFound(id.to_string()))?;

        if !self.is_live(&ticket, self.clock.now()).await? {
            return Err(self.expired(id).await);
        }
        Ok(ticket)
    }

    /// Not expired, and neither is anything it was granted from.
    async fn is_live(&self, ticket: &Ticket, now: DateTime<Utc>) -> RegistryResult<bool> {
        if ticket.is_expired(now) {
            debug!(ticket_id = %ticket.id, "ticket expired on read");
            return Ok(false);
        }

        let mut next = ticket.parent_id().map(str::to_string);
        let mut depth = 0;
        while let Some(parent_id) = next {
            depth += 1;
            if depth > MAX_CASCADE_DEPTH {
                warn!(ticket_id = %ticket.id, depth, "granting chain too deep");
                return Err(RegistryError::CyclicProxyChain(ticket.id.clone()));
            }
            match self.read(&parent_id).await? {
                Some(parent) if !parent.is_expired(now) => {
                    next = parent.parent_id().map(str::to_string);
                }
                _ => {
                    debug!(
                        ticket_id = %ticket.id,
                        ancestor = %parent_id,
                        "ticket outlived the ticket that granted it"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Best-effort removal; the ticket is reported expired either way.
    async fn expired(&self, id: &str) -> RegistryError {
        if let Err(e) = self.cascade(id).await {
            warn!(ticket_id = %id, error = %e, "failed to remove expired ticket");
        }
        RegistryError::TicketExpired(id.to_string())
    }

    /// Post-order walk: children are removed before their parent so a
    /// failure never leaves descendants without a parent to find them from.
    async fn cascade(&self, root: &str) -> RegistryResult<Vec<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut deleted = Vec::new();
        // (id, depth, children already queued)
        let mut stack: Vec<(String, usize, bool)> = vec![(root.to_string(), 0, false)];

        while let Some((id, depth, expanded)) = stack.pop() {
            if expanded {
                let _guard = self.locks.lock(&id).await;
                // Children linked since the first visit still go first.
                let late: Vec<String> = match self.read(&id).await? {
                    Some(ticket) => ticket
                        .children()
                        .into_iter()
                        .filter(|c| !visited.contains(c))
                        .collect(),
                    None => Vec::new(),
                };
                if !late.is_empty() {
                    debug!(ticket_id = %id, late = late.len(), "tickets linked during delete");
                    stack.push((id, depth, true));
                    for child in late {
                        stack.push((child, depth + 1, false));
                    }
                    continue;
                }

                let n = self
                    .store
                    .delete(&id)
                    .await
                    .map_err(|e| self.unavailable("delete", &id, e))?;
                if n > 0 {
                    deleted.push(id);
                }
                continue;
            }

            if depth > MAX_CASCADE_DEPTH {
                warn!(ticket_id = %root, depth, "ticket chain too deep");
                return Err(RegistryError::CyclicProxyChain(root.to_string()));
            }
            if !visited.insert(id.clone()) {
                warn!(ticket_id = %id, root = %root, "ticket reached twice while deleting");
                return Err(RegistryError::CyclicProxyChain(id));
            }

            let children = {
                let _guard = self.locks.lock(&id).await;
                match self.read(&id).await? {
                    Some(ticket) => ticket.children(),
                    // Already gone (or never existed): nothing to do.
                    None => continue,
                }
            };

            stack.push((id, depth, true));
            for child in children {
                stack.push((child, depth + 1, false));
            }
        }

        Ok(deleted)
    }

    async fn decode_all(&self) -> RegistryResult<HashMap<String, Ticket>> {
        let bodies = self
            .store
            .scan()
            .await
            .map_err(|e| self.unavailable("scan", "*", e))?;
        bodies
            .iter()
            .map(|b| self.codec.decode(b).map(|t| (t.id.clone(), t)))
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| self.unavailable("decode", "*", e))
    }

    /// Stored tickets split into (live, expired ids).
    async fn partition(&self) -> RegistryResult<(Vec<Ticket>, Vec<String>)> {
        let now = self.clock.now();
        let all = self.decode_all().await?;
        let mut live = Vec::new();
        let mut expired = Vec::new();
        for ticket in all.values() {
            if is_live_in(ticket, &all, now) {
                live.push(ticket.clone());
            } else {
                expired.push(ticket.id.clone());
            }
        }
        Ok((live, expired))
    }
}

#[async_trait]
impl<S: TicketStore> TicketRegistry for DefaultTicketRegistry<S> {
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        let record = self.record(&ticket)?;
        let inserted = self
            .store
            .insert_if_absent(&record)
            .await
            .map_err(|e| self.unavailable("insert", &ticket.id, e))?;

        if !inserted {
            debug!(ticket_id = %ticket.id, "duplicate ticket id");
            return Err(RegistryError::DuplicateTicket(ticket.id));
        }

        debug!(
            ticket_id = %ticket.id,
            ticket_type = %record.ticket_type,
            "ticket added"
        );
        Ok(())
    }

    async fn get_ticket(&self, id: &str, expected: TicketType) -> RegistryResult<Ticket> {
        let ticket = self.read_live(id).await?;
        let actual = ticket.ticket_type();
        if !actual.is_assignable_to(expected) {
            return Err(RegistryError::InvalidTicketType {
                id: id.to_string(),
                expected,
                actual,
            });
        }
        Ok(ticket)
    }

    async fn find_ticket(&self, id: &str) -> RegistryResult<Ticket> {
        self.read_live(id).await
    }

    async fn peek_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        self.read(id).await
    }

    async fn update_ticket(&self, ticket: Ticket) -> RegistryResult<Ticket> {
        let _guard = self.locks.lock(&ticket.id).await;

        let stored = self
            .read(&ticket.id)
            .await?
            .ok_or_else(|| RegistryError::TicketNotFound(ticket.id.clone()))?;
        // Removal happens on the next read, outside this lock.
        if stored.is_expired(self.clock.now()) {
            return Err(RegistryError::TicketExpired(ticket.id));
        }

        let mut merged = ticket;
        merged.merge_stored(&stored);

        let record = self.record(&merged)?;
        let replaced = self
            .store
            .replace(&record)
            .await
            .map_err(|e| self.unavailable("replace", &merged.id, e))?;
        if !replaced {
            return Err(RegistryError::TicketNotFound(merged.id));
        }

        debug!(ticket_id = %merged.id, use_count = merged.use_count, "ticket updated");
        Ok(merged)
    }

    async fn modify_ticket(
        &self,
        id: &str,
        expected: TicketType,
        change: TicketChange<'_>,
    ) -> RegistryResult<Ticket> {
        let now = self.clock.now();

        // None: expired before the change.
        let outcome = {
            let _guard = self.locks.lock(id).await;
            let mut ticket = self
                .read(id)
                .await?
                .ok_or_else(|| RegistryError::TicketNotFound(id.to_string()))?;

            if !self.is_live(&ticket, now).await? {
                None
            } else {
                let actual = ticket.ticket_type();
                if !actual.is_assignable_to(expected) {
                    return Err(RegistryError::InvalidTicketType {
                        id: id.to_string(),
                        expected,
                        actual,
                    });
                }

                change(&mut ticket);
                let used_up = ticket.is_expired(now);
                if used_up {
                    let n = self
                        .store
                        .delete(id)
                        .await
                        .map_err(|e| self.unavailable("delete", id, e))?;
                    if n == 0 {
                        return Err(RegistryError::TicketNotFound(id.to_string()));
                    }
                } else {
                    let record = self.record(&ticket)?;
                    let replaced = self
                        .store
                        .replace(&record)
                        .await
                        .map_err(|e| self.unavailable("replace", id, e))?;
                    if !replaced {
                        return Err(RegistryError::TicketNotFound(id.to_string()));
                    }
                }
                Some((ticket, used_up))
            }
        };

        let Some((ticket, used_up)) = outcome else {
            return Err(self.expired(id).await);
        };

        if used_up {
            for child in ticket.children() {
                if let Err(e) = self.cascade(&child).await {
                    warn!(
                        ticket_id = %child,
                        error = %e,
                        "failed to remove ticket of a used-up parent"
                    );
                }
            }
            debug!(ticket_id = %id, use_count = ticket.use_count, "ticket used up");
        } else {
            debug!(ticket_id = %id, use_count = ticket.use_count, "ticket modified");
        }
        Ok(ticket)
    }

    async fn delete_ticket_cascade(&self, id: &str) -> RegistryResult<Vec<String>> {
        let deleted = self.cascade(id).await?;
        debug!(ticket_id = %id, removed = deleted.len(), "ticket deleted");
        Ok(deleted)
    }

    async fn delete_all(&self) -> RegistryResult<u64> {
        let n = self
            .store
            .clear()
            .await
            .map_err(|e| self.unavailable("clear", "*", e))?;
        debug!(removed = n, "all tickets deleted");
        Ok(n)
    }

    async fn get_tickets(&self) -> RegistryResult<Vec<Ticket>> {
        Ok(self.partition().await?.0)
    }

    async fn get_tickets_matching(
        &self,
        predicate: TicketPredicate<'_>,
    ) -> RegistryResult<Vec<Ticket>> {
        let (live, _) = self.partition().await?;
        Ok(live.into_iter().filter(|t| predicate(t)).collect())
    }

    async fn clean_expired(&self) -> RegistryResult<Vec<String>> {
        let (_, expired) = self.partition().await?;

        let mut removed = Vec::new();
        for id in &expired {
            match self.cascade(id).await {
                Ok(ids) => removed.extend(ids),
                Err(e) => warn!(ticket_id = %id, error = %e, "failed to clean expired ticket"),
            }
        }

        let purged = self
            .store
            .purge_expired()
            .await
            .map_err(|e| self.unavailable("purge", "*", e))?;

        debug!(removed = removed.len(), purged, "expired tickets cleaned");
        Ok(removed)
    }
}
