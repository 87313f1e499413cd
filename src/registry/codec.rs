use crate::registry::store::{StoreError, StoreResult};
use crate::ticket::Ticket;

/// Turns tickets into store bodies and back.
pub trait TicketCodec: Send + Sync + 'static {
    fn encode(&self, ticket: &Ticket) -> StoreResult<Vec<u8>>;
    fn decode(&self, body: &[u8]) -> StoreResult<Ticket>;
}

/// JSON documents. Field names are stable; unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTicketCodec;

impl TicketCodec for JsonTicketCodec {
    fn encode(&self, ticket: &Ticket) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(ticket).map_err(|e| StoreError::Codec(e.to_string()))
    }

    fn decode(&self, body: &[u8]) -> StoreResult<Ticket> {
        serde_json::from_slice(body).map_err(|e| StoreError::Codec(e.to_string()))
    }
}
