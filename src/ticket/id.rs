/*
 * Responsibility
 * - Ticket id generation: <PREFIX>-<counter>-<random>[-<suffix>]
 * - The counter is sqids-encoded so ids from one node stay short and distinct
 * - The random part carries the entropy; ids must not be guessable
 */
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sqids::{Error as SqidsError, Sqids};

use crate::ticket::model::TicketType;

/// Bytes of entropy in every ticket id.
pub const RANDOM_BYTES: usize = 32;

#[derive(Debug)]
pub enum TicketIdError {
    Sqids(SqidsError),
    Random(getrandom::Error),
    InvalidSuffix,
}

impl fmt::Display for TicketIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketIdError::Sqids(e) => write!(f, "ticket id counter encoding failed: {}", e),
            TicketIdError::Random(e) => write!(f, "ticket id entropy unavailable: {}", e),
            TicketIdError::InvalidSuffix => {
                write!(f, "ticket id suffix must be alphanumeric, '.' or '_'")
            }
        }
    }
}

impl std::error::Error for TicketIdError {}

impl From<SqidsError> for TicketIdError {
    fn from(e: SqidsError) -> Self {
        TicketIdError::Sqids(e)
    }
}

/// Generates unique ticket ids, one counter shared by every ticket type.
#[derive(Debug)]
pub struct TicketIdGenerator {
    sqids: Sqids,
    counter: AtomicU64,
    suffix: Option<String>,
}

impl TicketIdGenerator {
    /// `suffix` identifies the issuing node (e.g. a host name) and is appended
    /// verbatim; it may not contain '-'.
    pub fn new(suffix: Option<String>) -> Result<Self, TicketIdError> {
        if let Some(s) = &suffix
            && (s.is_empty()
                || !s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_'))
        {
            return Err(TicketIdError::InvalidSuffix);
        }

        let sqids = Sqids::builder().min_length(4).build()?;

        Ok(Self {
            sqids,
            counter: AtomicU64::new(1),
            suffix,
        })
    }

    pub fn new_ticket_id(&self, ticket_type: TicketType) -> Result<String, TicketIdError> {
        self.new_id_with_prefix(ticket_type.prefix())
    }

    pub fn new_id_with_prefix(&self, prefix: &str) -> Result<String, TicketIdError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let counter = self.sqids.encode(&[n])?;

        let mut bytes = [0u8; RANDOM_BYTES];
        getrandom::fill(&mut bytes).map_err(TicketIdError::Random)?;
        let random = URL_SAFE_NO_PAD.encode(bytes);

        Ok(match &self.suffix {
            Some(suffix) => format!("{prefix}-{counter}-{random}-{suffix}"),
            None => format!("{prefix}-{counter}-{random}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_carry_prefix_and_suffix() {
        let ids = TicketIdGenerator::new(Some("node1".to_string())).unwrap();
        let id = ids.new_ticket_id(TicketType::TicketGranting).unwrap();
        assert!(id.starts_with("TGT-"));
        assert!(id.ends_with("-node1"));

        let st = ids.new_ticket_id(TicketType::Service).unwrap();
        assert!(st.starts_with("ST-"));
    }

    #[test]
    fn ids_are_unique() {
        let ids = TicketIdGenerator::new(None).unwrap();
        let seen: HashSet<_> = (0..500)
            .map(|_| ids.new_ticket_id(TicketType::Service).unwrap())
            .collect();
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn suffix_with_separator_is_rejected() {
        assert!(matches!(
            TicketIdGenerator::new(Some("a-b".to_string())),
            Err(TicketIdError::InvalidSuffix)
        ));
    }
}
