pub mod clock;
pub mod expiration;
pub mod id;
pub mod model;

pub use clock::{Clock, ManualClock, SystemClock};
pub use expiration::{ExpirationPolicy, TicketUsage};
pub use id::{TicketIdError, TicketIdGenerator};
pub use model::{
    AccessTokenState, GrantingState, ProxyGrantingState, ServiceTicketState, Ticket, TicketKind,
    TicketType,
};
