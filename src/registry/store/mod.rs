//! Backing stores for the default registry.
//!
//! A store only moves encoded tickets around. It knows nothing about
//! expiration, types or parent/child links; the registry owns those rules.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ticket::TicketType;

pub mod memory;
pub mod postgres;
pub mod redis;

pub use self::memory::MemoryTicketStore;
pub use self::postgres::PgTicketStore;
pub use self::redis::RedisTicketStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-layer errors (transport/command/serialization).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command error: {0}")]
    Command(String),
    #[error("db error")]
    Db(#[from] sqlx::Error),
    #[error("ticket codec error: {0}")]
    Codec(String),
}

/// One encoded ticket as handed to a store.
#[derive(Debug, Clone)]
pub struct TicketRecord {
    pub id: String,
    pub ticket_type: TicketType,
    pub body: Vec<u8>,
    /// Physical lifetime hint. Stores with native expiry may drop the record
    /// after it; others ignore it.
    pub ttl: Option<Duration>,
}

/// Raw ticket storage.
///
/// Implementations must be cheap to share (typically `Arc<...>` inside).
#[async_trait]
pub trait TicketStore: Send + Sync + 'static {
    // Returns the backend name (for logging).
    fn backend_name(&self) -> &'static str;

    // Returns:
    // - `Ok(true)`  if the record was stored
    // - `Ok(false)` if the id already exists
    async fn insert_if_absent(&self, record: &TicketRecord) -> StoreResult<bool>;

    // Overwrite an existing record. `Ok(false)` if the id is absent.
    async fn replace(&self, record: &TicketRecord) -> StoreResult<bool>;

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>>;

    // Returns number of deleted records (0 or 1).
    async fn delete(&self, id: &str) -> StoreResult<u64>;

    // Every stored body, in no particular order.
    async fn scan(&self) -> StoreResult<Vec<Vec<u8>>>;

    // Drop records past their lifetime hint. Stores with native expiry
    // have nothing to do.
    async fn purge_expired(&self) -> StoreResult<u64> {
        Ok(0)
    }

    // Returns number of deleted records.
    async fn clear(&self) -> StoreResult<u64>;
}
