//! Static accept-list authentication, for standalone deployments and demos.
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::authentication::credential::{ABSTRACT_PASSWORD, HTTP_BASED_SERVICE};
use crate::authentication::{
    Authentication, AuthenticationError, AuthenticationManager, AuthenticationTransaction,
    Principal,
};

pub const ACCEPT_USERS_HANDLER: &str = "AcceptUsersAuthenticationHandler";
pub const PROXY_CALLBACK_HANDLER: &str = "HttpBasedServiceCredentialsAuthenticationHandler";

/// Accepts password credentials listed in a fixed user table, and proxy
/// callback credentials whose URL is https.
#[derive(Clone, Default)]
pub struct AcceptUsersAuthenticationManager {
    users: HashMap<String, String>,
}

impl fmt::Debug for AcceptUsersAuthenticationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print passwords
        f.debug_struct("AcceptUsersAuthenticationManager")
            .field("users", &self.users.len())
            .finish()
    }
}

impl AcceptUsersAuthenticationManager {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Parse `user::password` pairs separated by commas.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut users = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (user, password) = pair.split_once("::")?;
            if user.is_empty() {
                return None;
            }
            users.insert(user.to_string(), password.to_string());
        }
        Some(Self { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl AuthenticationManager for AcceptUsersAuthenticationManager {
    async fn authenticate(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<Authentication, AuthenticationError> {
        let mut principal: Option<String> = None;
        let mut successes = Vec::new();

        for credential in transaction.credentials() {
            if credential.is_of_type(&ABSTRACT_PASSWORD) {
                let (Some(user), Some(password)) = (credential.id(), credential.secret()) else {
                    continue;
                };
                if self.users.get(user).map(String::as_str) != Some(password) {
                    return Err(AuthenticationError(format!("bad credentials for {user}")));
                }
                principal.get_or_insert_with(|| user.to_string());
                successes.push(ACCEPT_USERS_HANDLER);
            } else if credential.is_of_type(&HTTP_BASED_SERVICE) {
                let Some(callback) = credential.id() else {
                    continue;
                };
                let url = Url::parse(callback)
                    .map_err(|_| AuthenticationError(format!("invalid callback url {callback}")))?;
                if url.scheme() != "https" {
                    return Err(AuthenticationError(format!(
                        "callback url {callback} is not https"
                    )));
                }
                principal.get_or_insert_with(|| callback.to_string());
                successes.push(PROXY_CALLBACK_HANDLER);
            }
        }

        let Some(principal) = principal else {
            return Err(AuthenticationError(
                "no supported credential in transaction".to_string(),
            ));
        };

        let mut authentication = Authentication::new(Principal::new(principal), Utc::now());
        for handler in successes {
            authentication = authentication.with_success(handler);
        }
        if let Some(service) = transaction.service() {
            authentication = authentication.with_attribute("service", vec![Value::from(service)]);
        }
        Ok(authentication)
    }
}
