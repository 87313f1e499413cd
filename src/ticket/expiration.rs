//! Expiration policies.
//!
//! Policies are data, not behavior objects: they travel inside the encoded
//! ticket so every node evaluates the same rule. Evaluation is lazy and
//! happens against the registry clock at read time.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Usage facts a policy is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketUsage {
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub use_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    NeverExpires,
    AlwaysExpires,
    /// Fixed lifetime from creation.
    HardTimeout { time_to_live_seconds: i64 },
    /// Sliding lifetime from the last use.
    Timeout { time_to_kill_seconds: i64 },
    /// Expires after `number_of_uses` uses, or when idle longer than the TTL.
    MultiTimeUseOrTimeout {
        time_to_live_seconds: i64,
        number_of_uses: u32,
    },
    /// Hard cap from creation plus sliding idle timeout.
    TicketGranting {
        max_time_to_live_seconds: i64,
        time_to_kill_seconds: i64,
    },
}

impl ExpirationPolicy {
    pub fn is_expired(&self, usage: &TicketUsage, now: DateTime<Utc>) -> bool {
        match *self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::HardTimeout {
                time_to_live_seconds,
            } => now >= usage.created_at + Duration::seconds(time_to_live_seconds),
            Self::Timeout {
                time_to_kill_seconds,
            } => now >= usage.last_used_at + Duration::seconds(time_to_kill_seconds),
            Self::MultiTimeUseOrTimeout {
                time_to_live_seconds,
                number_of_uses,
            } => {
                usage.use_count >= number_of_uses
                    || now >= usage.last_used_at + Duration::seconds(time_to_live_seconds)
            }
            Self::TicketGranting {
                max_time_to_live_seconds,
                time_to_kill_seconds,
            } => {
                now >= usage.created_at + Duration::seconds(max_time_to_live_seconds)
                    || now >= usage.last_used_at + Duration::seconds(time_to_kill_seconds)
            }
        }
    }

    /// Upper bound on how long a ticket written now can stay valid without
    /// another write. Stores with native expiry use it as a physical TTL.
    pub fn store_ttl_hint(&self) -> Option<Duration> {
        match *self {
            Self::NeverExpires => None,
            Self::AlwaysExpires => Some(Duration::zero()),
            Self::HardTimeout {
                time_to_live_seconds,
            } => Some(Duration::seconds(time_to_live_seconds)),
            Self::Timeout {
                time_to_kill_seconds,
            } => Some(Duration::seconds(time_to_kill_seconds)),
            Self::MultiTimeUseOrTimeout {
                time_to_live_seconds,
                ..
            } => Some(Duration::seconds(time_to_live_seconds)),
            Self::TicketGranting {
                max_time_to_live_seconds,
                time_to_kill_seconds,
            } => Some(Duration::seconds(
                max_time_to_live_seconds.min(time_to_kill_seconds),
            )),
        }
    }
}
