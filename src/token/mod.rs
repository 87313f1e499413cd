//! OpenID Connect ID-token issuance.
//!
//! ```text
//! access token ──► generator ──► claims pipeline ──► signer (JWS, optional JWE)
//!                     │
//!                     └── services manager (service must be OIDC)
//! ```
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::registry::RegistryError;

pub mod claims;
pub mod generator;
pub mod hash;
pub mod signing;

pub use claims::{ClaimsContext, assemble_claims};
pub use generator::{IdTokenGenerator, IdTokenSettings};
pub use hash::access_token_hash;
pub use signing::{IdTokenSigningAndEncryptionService, JwtIdTokenSigner};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("service {0} is not an OpenID Connect service")]
    UnsupportedServiceType(String),

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedSigningAlgorithm(String),

    #[error("unsupported response type: {0}")]
    InvalidResponseType(String),

    #[error("id token signing failed: {0}")]
    Signing(String),

    #[error("id token encryption failed: {0}")]
    Encryption(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// OAuth `response_type` of the request the ID token answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Code,
    Token,
    /// `id_token` alone.
    IdToken,
    IdTokenToken,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
            ResponseType::IdToken => "id_token",
            ResponseType::IdTokenToken => "id_token token",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Space-separated values are unordered.
        let mut parts: Vec<&str> = s.split_whitespace().collect();
        parts.sort_unstable();
        match parts.as_slice() {
            ["code"] => Ok(ResponseType::Code),
            ["token"] => Ok(ResponseType::Token),
            ["id_token"] => Ok(ResponseType::IdToken),
            ["id_token", "token"] => Ok(ResponseType::IdTokenToken),
            _ => Err(TokenError::InvalidResponseType(s.to_string())),
        }
    }
}
