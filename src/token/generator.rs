use std::sync::Arc;

use tracing::{debug, trace};

use crate::registered_service::{RegisteredService, ServicesManager};
use crate::registry::{RegistryError, TicketRegistry};
use crate::ticket::{Clock, Ticket, TicketKind, TicketType};
use crate::token::claims::{ClaimsContext, assemble_claims};
use crate::token::signing::IdTokenSigningAndEncryptionService;
use crate::token::{ResponseType, TokenError};

/// OAuth callback path under the server prefix; tickets issued to it identify
/// the authorization-code exchange.
pub const CALLBACK_AUTHORIZE_PATH: &str = "/oauth2.0/callbackAuthorize";

#[derive(Debug, Clone)]
pub struct IdTokenSettings {
    pub issuer: String,
    pub server_prefix: String,
    pub skew_seconds: i64,
    pub lifetime_seconds: i64,
    /// Claims released when a service does not list its own.
    pub supported_claims: Vec<String>,
    pub authn_context_attribute: String,
}

impl IdTokenSettings {
    pub fn callback_authorize_url(&self) -> String {
        format!(
            "{}{}",
            self.server_prefix.trim_end_matches('/'),
            CALLBACK_AUTHORIZE_PATH
        )
    }
}

pub struct IdTokenGenerator {
    settings: IdTokenSettings,
    registry: Arc<dyn TicketRegistry>,
    services: Arc<dyn ServicesManager>,
    signer: Arc<dyn IdTokenSigningAndEncryptionService>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IdTokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenGenerator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl IdTokenGenerator {
    pub fn new(
        settings: IdTokenSettings,
        registry: Arc<dyn TicketRegistry>,
        services: Arc<dyn ServicesManager>,
        signer: Arc<dyn IdTokenSigningAndEncryptionService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            registry,
            services,
            signer,
            clock,
        }
    }

    pub fn settings(&self) -> &IdTokenSettings {
        &self.settings
    }

    /// Build, sign and (optionally) encrypt the ID token for `access_token`.
    pub async fn generate(
        &self,
        access_token: &Ticket,
        service: &RegisteredService,
        response_type: ResponseType,
    ) -> Result<String, TokenError> {
        let oidc = service
            .oidc()
            .ok_or_else(|| TokenError::UnsupportedServiceType(service.service_id.clone()))?;

        let TicketKind::AccessToken(at) = &access_token.kind else {
            return Err(RegistryError::InvalidTicketType {
                id: access_token.id.clone(),
                expected: TicketType::AccessToken,
                actual: access_token.ticket_type(),
            }
            .into());
        };

        let jwt_id = self.jwt_id(&at.ticket_granting_ticket_id).await?;
        let signing_alg = self.signer.signing_algorithm(service);
        let allowed_claims = if oidc.supported_claims.is_empty() {
            &self.settings.supported_claims
        } else {
            &oidc.supported_claims
        };

        let ctx = ClaimsContext {
            issuer: &self.settings.issuer,
            client_id: &oidc.client_id,
            service_id: &service.service_id,
            jwt_id: &jwt_id,
            access_token_id: &access_token.id,
            authentication: &at.authentication,
            now: self.clock.now(),
            skew_seconds: self.settings.skew_seconds,
            lifetime_seconds: self.settings.lifetime_seconds,
            response_type,
            signing_alg: &signing_alg,
            allowed_claims,
            authn_context_attribute: &self.settings.authn_context_attribute,
        };
        let claims = assemble_claims(&ctx)?;

        debug!(
            access_token_id = %access_token.id,
            client_id = %oidc.client_id,
            alg = %signing_alg,
            response_type = %response_type,
            "issuing id token"
        );
        self.signer.encode(&claims, service)
    }

    /// Id of the ticket the granting ticket issued to this server's OAuth
    /// callback, or the granting ticket's own id.
    async fn jwt_id(&self, tgt_id: &str) -> Result<String, TokenError> {
        let tgt = match self
            .registry
            .get_ticket(tgt_id, TicketType::TicketGranting)
            .await
        {
            Ok(t) => t,
            Err(e) if e.is_not_found() => {
                trace!(ticket_id = %tgt_id, "granting ticket gone; using its id as jti");
                return Ok(tgt_id.to_string());
            }
            Err(e) => return Err(e.into()),
        };

        let callback = self.settings.callback_authorize_url();
        let Some(granting) = tgt.granting_state() else {
            return Ok(tgt.id);
        };

        let found = granting
            .services
            .iter()
            .chain(granting.proxy_granting_tickets.iter())
            .find(|(_, service)| {
                self.services
                    .find_service_by(service)
                    .is_some_and(|s| s.service_id == callback)
            })
            .map(|(ticket_id, _)| ticket_id.clone());

        match found {
            Some(id) => Ok(id),
            None => {
                trace!(callback = %callback, "no ticket issued to the oauth callback");
                Ok(tgt.id)
            }
        }
    }
}
