//! Ticket and token issuance core of a single-sign-on server.
//!
//! The crate owns the lifecycle of security tickets (ticket-granting,
//! service, proxy-granting, proxy and OAuth access tokens) and the OIDC
//! ID-token pipeline built on top of them. Web flows, attribute repositories
//! and service-registry persistence are consumed through narrow traits.
//!
//! ```text
//! credentials ─▶ AuthenticationTransaction ─▶ AuthenticationManager
//!                                                   │
//!                                                   ▼
//!                     CentralAuthenticationService (facade)
//!                      │                 │                │
//!                      ▼                 ▼                ▼
//!               TicketRegistry     ServicesManager   IdTokenGenerator
//!        (caching ▸ default ▸ store)                       │
//!                                                          ▼
//!                                           IdTokenSigningAndEncryptionService
//! ```

#![deny(unsafe_code)]

pub mod app;
pub mod authentication;
pub mod config;
pub mod error;
pub mod facade;
pub mod registered_service;
pub mod registry;
pub mod state;
pub mod ticket;
pub mod token;

pub use error::CasError;
pub use facade::CentralAuthenticationService;
