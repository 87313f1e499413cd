use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::registry::store::{StoreResult, TicketRecord, TicketStore};

/// In-process store. Lifetime hints are ignored; the registry filters
/// expired tickets on read and the cleaner removes them.
#[derive(Clone, Debug, Default)]
pub struct MemoryTicketStore {
    records: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert_if_absent(&self, record: &TicketRecord) -> StoreResult<bool> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.body.clone());
                Ok(true)
            }
        }
    }

    async fn replace(&self, record: &TicketRecord) -> StoreResult<bool> {
        match self.records.get_mut(&record.id) {
            Some(mut body) => {
                *body = record.body.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.records.get(id).map(|b| b.value().clone()))
    }

    async fn delete(&self, id: &str) -> StoreResult<u64> {
        Ok(self.records.remove(id).map_or(0, |_| 1))
    }

    async fn scan(&self) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.records.iter().map(|e| e.value().clone()).collect())
    }

    async fn clear(&self) -> StoreResult<u64> {
        // Remove key by key so concurrent inserts are not counted.
        let keys: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        let mut n = 0;
        for k in keys {
            if self.records.remove(&k).is_some() {
                n += 1;
            }
        }
        Ok(n)
    }
}
