//! Cache invalidation broadcast between registry nodes.
//!
//! Every node publishes the ids it changed; every other node drops them from
//! its local cache. Events carry the publishing node's id so a node can skip
//! its own events.
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("invalidation bus connection error: {0}")]
    Connection(String),
    #[error("invalidation publish failed: {0}")]
    Publish(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "ids", rename_all = "snake_case")]
pub enum InvalidationScope {
    Tickets(Vec<String>),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub origin: Uuid,
    pub scope: InvalidationScope,
}

#[async_trait]
pub trait InvalidationBus: Send + Sync + 'static {
    async fn publish(&self, event: InvalidationEvent) -> Result<(), InvalidationError>;

    /// Stream of events from every node, including this one.
    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationEvent>, InvalidationError>;
}

/// In-process bus; nodes sharing one instance see each other's events.
#[derive(Clone, Debug)]
pub struct LocalInvalidationBus {
    tx: broadcast::Sender<InvalidationEvent>,
}

impl LocalInvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalInvalidationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationBus for LocalInvalidationBus {
    async fn publish(&self, event: InvalidationEvent) -> Result<(), InvalidationError> {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationEvent>, InvalidationError> {
        let rx = self.tx.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                // Missed events: the only safe answer is to drop everything.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "invalidation listener lagged");
                    let flush = InvalidationEvent {
                        origin: Uuid::nil(),
                        scope: InvalidationScope::All,
                    };
                    Some((flush, rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }
}

/// Redis PUBLISH/SUBSCRIBE bus.
#[derive(Clone)]
pub struct RedisInvalidationBus {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
    channel: String,
}

impl std::fmt::Debug for RedisInvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisInvalidationBus")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl RedisInvalidationBus {
    pub const DEFAULT_CHANNEL: &'static str = "cas:ticket:invalidations";

    pub async fn new(url: &str, channel: impl Into<String>) -> Result<Self, InvalidationError> {
        let client =
            redis::Client::open(url).map_err(|e| InvalidationError::Connection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| InvalidationError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            manager,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    async fn publish(&self, event: InvalidationEvent) -> Result<(), InvalidationError> {
        let payload =
            serde_json::to_string(&event).map_err(|e| InvalidationError::Publish(e.to_string()))?;
        let mut conn = self.manager.clone();

        // PUBLISH returns the number of receivers.
        let _: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| InvalidationError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, InvalidationEvent>, InvalidationError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| InvalidationError::Connection(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| InvalidationError::Connection(e.to_string()))?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "unreadable invalidation message");
                    return None;
                }
            };
            match serde_json::from_str::<InvalidationEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "malformed invalidation event");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
