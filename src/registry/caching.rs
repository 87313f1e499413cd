//! Read-through cache in front of any [`TicketRegistry`].
//!
//! - Miss: take the per-id lock, re-check, load from the inner registry,
//!   populate. Expired tickets are never cached.
//! - Hit: re-evaluate expiration, of the ticket and of the tickets above
//!   it; an expired hit is evicted and reported expired.
//! - Write: take the per-id lock, invalidate, write through, invalidate again,
//!   then broadcast the ids to other nodes.
//!
//! Holding the same per-id lock on both paths means a slow miss can never
//! re-insert a version older than a write that finished before it.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use moka::future::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::registry::invalidation::{
    InvalidationBus, InvalidationError, InvalidationEvent, InvalidationScope,
};
use crate::registry::locks::KeyedLocks;
use crate::registry::{
    MAX_CASCADE_DEPTH, RegistryError, RegistryResult, TicketChange, TicketPredicate,
    TicketRegistry,
};
use crate::ticket::{Clock, Ticket, TicketType};

const DEFAULT_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct TicketCacheConfig {
    pub max_entries: u64,
    /// Upper bound on how long an entry may live without being re-read.
    pub time_to_live: Duration,
}

impl Default for TicketCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            time_to_live: DEFAULT_TTL,
        }
    }
}

pub struct CachingTicketRegistry<R: TicketRegistry> {
    inner: Arc<R>,
    cache: Cache<String, Arc<Ticket>>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    bus: Option<Arc<dyn InvalidationBus>>,
    node_id: Uuid,
}

impl<R: TicketRegistry> std::fmt::Debug for CachingTicketRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingTicketRegistry")
            .field("node_id", &self.node_id)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl<R: TicketRegistry> CachingTicketRegistry<R> {
    pub fn new(inner: R, clock: Arc<dyn Clock>, config: TicketCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries.max(1))
            .time_to_live(config.time_to_live)
            .build();
        Self {
            inner: Arc::new(inner),
            cache,
            clock,
            locks: KeyedLocks::new(),
            bus: None,
            node_id: Uuid::new_v4(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Whether `id` currently has a cache entry.
    pub async fn is_cached(&self, id: &str) -> bool {
        self.cache.get(id).await.is_some()
    }

    /// Apply invalidations published by other nodes until the bus closes.
    pub async fn listen(&self) -> Result<JoinHandle<()>, InvalidationError> {
        let Some(bus) = &self.bus else {
            return Ok(tokio::spawn(async {}));
        };
        let mut events = bus.subscribe().await?;
        let cache = self.cache.clone();
        let node_id = self.node_id;

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.origin == node_id {
                    continue;
                }
                match event.scope {
                    InvalidationScope::Tickets(ids) => {
                        trace!(count = ids.len(), origin = %event.origin, "remote invalidation");
                        for id in ids {
                            cache.invalidate(&id).await;
                        }
                    }
                    InvalidationScope::All => {
                        debug!(origin = %event.origin, "remote cache flush");
                        cache.invalidate_all();
                    }
                }
            }
        }))
    }

    async fn broadcast(&self, scope: InvalidationScope) {
        let Some(bus) = &self.bus else {
            return;
        };
        let event = InvalidationEvent {
            origin: self.node_id,
            scope,
        };
        // Other nodes fall back to their entry TTL.
        if let Err(e) = bus.publish(event).await {
            warn!(error = %e, "failed to publish cache invalidation");
        }
    }

    /// Invalidate under each id's lock so in-flight misses cannot re-populate.
    async fn invalidate_ids(&self, ids: &[String]) {
        for id in ids {
            let _guard = self.locks.lock(id).await;
            self.cache.invalidate(id).await;
        }
    }

    async fn expired(&self, id: &str) -> RegistryError {
        self.cache.invalidate(id).await;
        if let Err(e) = self.delete_ticket_cascade(id).await {
            warn!(ticket_id = %id, error = %e, "failed to remove expired ticket");
        }
        RegistryError::TicketExpired(id.to_string())
    }

    /// Cached copy, or the stored one.
    async fn lookup(&self, id: &str) -> RegistryResult<Option<Arc<Ticket>>> {
        if let Some(hit) = self.cache.get(id).await {
            return Ok(Some(hit));
        }
        Ok(self.inner.peek_ticket(id).await?.map(Arc::new))
    }

    /// First ticket above `ticket` that is missing or expired.
    async fn dead_ancestor(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> RegistryResult<Option<String>> {
        let mut next = ticket.parent_id().map(str::to_string);
        let mut depth = 0;
        while let Some(parent_id) = next {
            depth += 1;
            if depth > MAX_CASCADE_DEPTH {
                return Err(RegistryError::CyclicProxyChain(ticket.id.clone()));
            }
            match self.lookup(&parent_id).await? {
                Some(parent) if !parent.is_expired(now) => {
                    next = parent.parent_id().map(str::to_string);
                }
                _ => return Ok(Some(parent_id)),
            }
        }
        Ok(None)
    }

    async fn load(&self, id: &str) -> RegistryResult<Ticket> {
        let now = self.clock.now();
        let ticket = self.load_unchecked(id, now).await?;

        if let Some(ancestor) = self.dead_ancestor(&ticket, now).await? {
            debug!(
                ticket_id = %id,
                ancestor = %ancestor,
                "cached ticket outlived the ticket that granted it"
            );
            return Err(self.expired(id).await);
        }
        Ok(Ticket::clone(&ticket))
    }

    /// The ticket itself, checked against its own policy only.
    async fn load_unchecked(&self, id: &str, now: DateTime<Utc>) -> RegistryResult<Arc<Ticket>> {
        if let Some(hit) = self.cache.get(id).await {
            if hit.is_expired(now) {
                return Err(self.expired(id).await);
            }
            trace!(ticket_id = %id, "ticket cache hit");
            return Ok(hit);
        }

        let loaded = {
            let _guard = self.locks.lock(id).await;
            // Someone may have populated while we waited.
            if let Some(hit) = self.cache.get(id).await {
                Some(hit)
            } else {
                match self.inner.peek_ticket(id).await? {
                    None => return Err(RegistryError::TicketNotFound(id.to_string())),
                    Some(t) if t.is_expired(now) => None,
                    Some(t) => {
                        let t = Arc::new(t);
                        self.cache.insert(id.to_string(), Arc::clone(&t)).await;
                        trace!(ticket_id = %id, "ticket cache populated");
                        Some(t)
                    }
                }
            }
        };

        match loaded {
            Some(t) if !t.is_expired(now) => Ok(t),
            _ => Err(self.expired(id).await),
        }
    }
}

#[async_trait]
impl<R: TicketRegistry> TicketRegistry for CachingTicketRegistry<R> {
    async fn add_ticket(&self, ticket: Ticket) -> RegistryResult<()> {
        // Ids are unique, so there is nothing cached to invalidate.
        self.inner.add_ticket(ticket).await
    }

    async fn get_ticket(&self, id: &str, expected: TicketType) -> RegistryResult<Ticket> {
        let ticket = self.load(id).await?;
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
        self.load(id).await
    }

    async fn peek_ticket(&self, id: &str) -> RegistryResult<Option<Ticket>> {
        self.inner.peek_ticket(id).await
    }

    async fn update_ticket(&self, ticket: Ticket) -> RegistryResult<Ticket> {
        let id = ticket.id.clone();
        let result = {
            let _guard = self.locks.lock(&id).await;
            self.cache.invalidate(&id).await;
            let result = self.inner.update_ticket(ticket).await;
            self.cache.invalidate(&id).await;
            result
        };
        self.broadcast(InvalidationScope::Tickets(vec![id])).await;
        result
    }

    async fn modify_ticket(
        &self,
        id: &str,
        expected: TicketType,
        change: TicketChange<'_>,
    ) -> RegistryResult<Ticket> {
        let now = self.clock.now();
        let result = {
            let _guard = self.locks.lock(id).await;
            self.cache.invalidate(id).await;
            let result = self.inner.modify_ticket(id, expected, change).await;
            self.cache.invalidate(id).await;
            result
        };

        let mut touched = vec![id.to_string()];
        if let Ok(ticket) = &result
            && ticket.is_expired(now)
        {
            // Used up: the inner registry removed what it granted as well.
            let children = ticket.children();
            self.invalidate_ids(&children).await;
            touched.extend(children);
        }
        self.broadcast(InvalidationScope::Tickets(touched)).await;
        result
    }

    async fn delete_ticket_cascade(&self, id: &str) -> RegistryResult<Vec<String>> {
        let root = [id.to_string()];
        self.invalidate_ids(&root).await;

        let result = self.inner.delete_ticket_cascade(id).await;

        let mut touched = root.to_vec();
        if let Ok(ids) = &result {
            touched.extend(ids.iter().filter(|d| d.as_str() != id).cloned());
        }
        self.invalidate_ids(&touched).await;
        self.broadcast(InvalidationScope::Tickets(touched)).await;

        result
    }

    async fn delete_all(&self) -> RegistryResult<u64> {
        let result = self.inner.delete_all().await;
        self.cache.invalidate_all();
        self.broadcast(InvalidationScope::All).await;
        result
    }

    async fn get_tickets(&self) -> RegistryResult<Vec<Ticket>> {
        // Bulk reads bypass the cache.
        self.inner.get_tickets().await
    }

    async fn get_tickets_matching(
        &self,
        predicate: TicketPredicate<'_>,
    ) -> RegistryResult<Vec<Ticket>> {
        self.inner.get_tickets_matching(predicate).await
    }

    async fn clean_expired(&self) -> RegistryResult<Vec<String>> {
        let removed = self.inner.clean_expired().await?;
        if !removed.is_empty() {
            self.invalidate_ids(&removed).await;
            self.broadcast(InvalidationScope::Tickets(removed.clone()))
                .await;
        }
        Ok(removed)
    }
}
