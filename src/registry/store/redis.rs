use async_trait::async_trait;

use crate::registry::store::{StoreError, StoreResult, TicketRecord, TicketStore};

const KEY_PREFIX: &str = "cas:ticket:";
const SCAN_COUNT: u64 = 500;

/// Redis/Valkey-backed ticket store.
///
/// Tickets live under `cas:ticket:<id>`. Lifetime hints become `PX` so the
/// server drops tickets that can no longer be valid.
#[derive(Clone)]
pub struct RedisTicketStore {
    manager: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTicketStore").finish_non_exhaustive()
    }
}

impl RedisTicketStore {
    // Create a store from a URL like `redis://localhost:6379`
    pub async fn new(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { manager })
    }

    pub fn from_manager(manager: redis::aio::ConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    /// `SET key value <mode> [PX ms]`; returns true when the server said OK.
    async fn set_with_mode(&self, record: &TicketRecord, mode: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::key(&record.id)).arg(&record.body).arg(mode);
        if let Some(ttl) = record.ttl {
            // PX expects a positive integer. Clamp to at least 1 ms.
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }

        let resp: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(resp.is_some())
    }

    async fn scan_keys(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{KEY_PREFIX}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Command(e.to_string()))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl TicketStore for RedisTicketStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn insert_if_absent(&self, record: &TicketRecord) -> StoreResult<bool> {
        // OK if set, Nil if the key already exists.
        self.set_with_mode(record, "NX").await
    }

    async fn replace(&self, record: &TicketRecord) -> StoreResult<bool> {
        // OK if replaced, Nil if the key is gone.
        self.set_with_mode(record, "XX").await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();

        let resp: Option<Vec<u8>> = redis::cmd("GET")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(resp)
    }

    async fn delete(&self, id: &str) -> StoreResult<u64> {
        let mut conn = self.manager.clone();

        let n: u64 = redis::cmd("DEL")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(n)
    }

    async fn scan(&self) -> StoreResult<Vec<Vec<u8>>> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.manager.clone();
        let mut bodies = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(SCAN_COUNT as usize) {
            // Keys can expire between SCAN and MGET.
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Command(e.to_string()))?;
            bodies.extend(values.into_iter().flatten());
        }

        Ok(bodies)
    }

    async fn clear(&self) -> StoreResult<u64> {
        let keys = self.scan_keys().await?;
        let mut conn = self.manager.clone();
        let mut n = 0;
        for chunk in keys.chunks(SCAN_COUNT as usize) {
            let deleted: u64 = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Command(e.to_string()))?;
            n += deleted;
        }
        Ok(n)
    }
}
