/*
 * Responsibility
 * - The operations callers use: issue, validate, proxy, revoke, ID tokens
 * - Orchestrates registry + services manager + authentication + token generator
 * - Child tickets are written before the parent mapping; a failed parent
 *   update removes the child again
 * - Uses and links are applied under the ticket's registry lock
 */
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::authentication::credential::HTTP_BASED_SERVICE;
use crate::authentication::{Authentication, AuthenticationManager, AuthenticationTransaction};
use crate::error::CasError;
use crate::registered_service::{RegisteredService, ServicesManager};
use crate::registry::{RegistryError, TicketChange, TicketRegistry};
use crate::ticket::{
    AccessTokenState, Clock, ExpirationPolicy, GrantingState, ProxyGrantingState,
    ServiceTicketState, Ticket, TicketIdGenerator, TicketKind, TicketType,
};
use crate::token::{IdTokenGenerator, ResponseType};

/// Expiration policy per ticket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketPolicies {
    pub ticket_granting: ExpirationPolicy,
    pub proxy_granting: ExpirationPolicy,
    pub service: ExpirationPolicy,
    pub proxy: ExpirationPolicy,
    pub access_token: ExpirationPolicy,
}

impl Default for TicketPolicies {
    fn default() -> Self {
        Self {
            ticket_granting: ExpirationPolicy::TicketGranting {
                max_time_to_live_seconds: 28_800,
                time_to_kill_seconds: 7_200,
            },
            proxy_granting: ExpirationPolicy::TicketGranting {
                max_time_to_live_seconds: 28_800,
                time_to_kill_seconds: 7_200,
            },
            service: ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_live_seconds: 10,
                number_of_uses: 1,
            },
            proxy: ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_live_seconds: 10,
                number_of_uses: 1,
            },
            access_token: ExpirationPolicy::TicketGranting {
                max_time_to_live_seconds: 28_800,
                time_to_kill_seconds: 7_200,
            },
        }
    }
}

/// Registry client facade.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct CentralAuthenticationService {
    registry: Arc<dyn TicketRegistry>,
    services: Arc<dyn ServicesManager>,
    authentication_manager: Arc<dyn AuthenticationManager>,
    token_generator: Arc<IdTokenGenerator>,
    ids: Arc<TicketIdGenerator>,
    policies: TicketPolicies,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CentralAuthenticationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralAuthenticationService")
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl CentralAuthenticationService {
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        services: Arc<dyn ServicesManager>,
        authentication_manager: Arc<dyn AuthenticationManager>,
        token_generator: Arc<IdTokenGenerator>,
        ids: Arc<TicketIdGenerator>,
        policies: TicketPolicies,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            services,
            authentication_manager,
            token_generator,
            ids,
            policies,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    /// Start a single sign-on session for an authentication.
    pub async fn issue_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<String, CasError> {
        let id = self.ids.new_ticket_id(TicketType::TicketGranting)?;
        let principal = authentication.principal.id.clone();
        let ticket = Ticket::new(
            id.clone(),
            TicketKind::TicketGranting(GrantingState::new(authentication)),
            self.policies.ticket_granting,
            self.clock.now(),
        );

        self.registry.add_ticket(ticket).await?;

        info!(ticket_id = %id, principal = %principal, "ticket-granting ticket issued");
        Ok(id)
    }

    /// Authenticate a credential set, then start a session for it.
    pub async fn create_ticket_granting_ticket(
        &self,
        transaction: &AuthenticationTransaction,
    ) -> Result<String, CasError> {
        let authentication = self.authentication_manager.authenticate(transaction).await?;
        self.issue_ticket_granting_ticket(authentication).await
    }

    pub async fn issue_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: &str,
    ) -> Result<String, CasError> {
        self.registered(service)?;
        self.grant(
            ticket_granting_ticket_id,
            TicketType::TicketGranting,
            service,
        )
        .await
    }

    pub async fn issue_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &str,
    ) -> Result<String, CasError> {
        self.registered(service)?;
        self.grant(proxy_granting_ticket_id, TicketType::ProxyGranting, service)
            .await
    }

    /// Consume a service (or proxy) ticket and return the authentication it
    /// stands for. The ticket is consumed even when the service does not match.
    pub async fn validate_service_ticket(
        &self,
        service_ticket_id: &str,
        service: &str,
    ) -> Result<Authentication, CasError> {
        self.registered(service)?;

        let ticket = self.spend(service_ticket_id).await?;

        let Some(state) = ticket.service_state() else {
            return Err(RegistryError::TicketNotFound(service_ticket_id.to_string()).into());
        };
        if state.service != service {
            warn!(
                ticket_id = %service_ticket_id,
                issued_to = %state.service,
                presented = %service,
                "service ticket presented by another service"
            );
            return Err(CasError::UnrecognizableService {
                ticket_id: service_ticket_id.to_string(),
                service: service.to_string(),
            });
        }

        let granting = self
            .registry
            .get_ticket(&state.granting_ticket_id, TicketType::TicketGranting)
            .await?;
        let authentication = granting
            .authentication()
            .cloned()
            .ok_or_else(|| RegistryError::TicketNotFound(state.granting_ticket_id.clone()))?;

        debug!(ticket_id = %service_ticket_id, service = %service, "service ticket validated");
        Ok(authentication)
    }

    /// Issue a proxy-granting ticket to the callback presented in
    /// `transaction`, on the strength of a live service or proxy ticket.
    pub async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        transaction: &AuthenticationTransaction,
    ) -> Result<String, CasError> {
        let callback = transaction
            .credential_of_type(&HTTP_BASED_SERVICE)
            .and_then(|c| c.id().map(str::to_string))
            .ok_or_else(|| CasError::MissingProxyCallback(service_ticket_id.to_string()))?;
        self.registered(&callback)?;

        // Verifies the callback; the principal still comes from the session.
        self.authentication_manager.authenticate(transaction).await?;

        // The ticket is spent here exactly as a validation would spend it.
        let service_ticket = self.spend(service_ticket_id).await?;
        let Some(st) = service_ticket.service_state() else {
            return Err(RegistryError::TicketNotFound(service_ticket_id.to_string()).into());
        };

        let parent = self
            .registry
            .get_ticket(&st.granting_ticket_id, TicketType::TicketGranting)
            .await?;
        let (root_id, mut chain, authentication) = match &parent.kind {
            TicketKind::TicketGranting(g) => {
                (parent.id.clone(), Vec::new(), g.authentication.clone())
            }
            TicketKind::ProxyGranting(p) => (
                p.ticket_granting_ticket_id.clone(),
                p.proxy_chain.clone(),
                p.granting.authentication.clone(),
            ),
            _ => {
                return Err(RegistryError::InvalidTicketType {
                    id: parent.id.clone(),
                    expected: TicketType::TicketGranting,
                    actual: parent.ticket_type(),
                }
                .into());
            }
        };
        chain.insert(0, st.service.clone());

        let id = self.ids.new_ticket_id(TicketType::ProxyGranting)?;
        let pgt = Ticket::new(
            id.clone(),
            TicketKind::ProxyGranting(ProxyGrantingState {
                granting: GrantingState::new(authentication),
                ticket_granting_ticket_id: root_id,
                granting_ticket_id: parent.id.clone(),
                proxied_by: st.service.clone(),
                proxy_chain: chain,
            }),
            self.policies.proxy_granting,
            self.clock.now(),
        );
        self.registry.add_ticket(pgt).await?;

        self.link_or_rollback(&parent.id, TicketType::TicketGranting, &id, &|t: &mut Ticket| {
            if let Some(g) = t.granting_state_mut() {
                g.proxy_granting_tickets
                    .insert(id.clone(), st.service.clone());
            }
        })
        .await?;

        info!(ticket_id = %id, callback = %callback, "proxy-granting ticket issued");
        Ok(id)
    }

    /// Issue an OAuth access token for a registered client.
    pub async fn issue_access_token(
        &self,
        ticket_granting_ticket_id: &str,
        client_id: &str,
        scopes: impl IntoIterator<Item = String>,
    ) -> Result<String, CasError> {
        let registered = self
            .services
            .find_by_client_id(client_id)
            .ok_or_else(|| CasError::UnauthorizedService(client_id.to_string()))?;

        let tgt = self
            .registry
            .get_ticket(ticket_granting_ticket_id, TicketType::TicketGranting)
            .await?;
        let authentication = tgt
            .authentication()
            .cloned()
            .ok_or_else(|| RegistryError::TicketNotFound(tgt.id.clone()))?;

        let id = self.ids.new_ticket_id(TicketType::AccessToken)?;
        let scopes: BTreeSet<String> = scopes.into_iter().collect();
        let now = self.clock.now();
        let token = Ticket::new(
            id.clone(),
            TicketKind::AccessToken(AccessTokenState {
                authentication,
                ticket_granting_ticket_id: tgt.id.clone(),
                client_id: client_id.to_string(),
                service: registered.service_id.clone(),
                scopes,
            }),
            self.policies.access_token,
            now,
        );
        self.registry.add_ticket(token).await?;

        self.link_or_rollback(&tgt.id, TicketType::TicketGranting, &id, &|t: &mut Ticket| {
            t.record_use(now);
            if let Some(g) = t.granting_state_mut() {
                g.descendant_tickets.insert(id.clone());
            }
        })
        .await?;

        debug!(ticket_id = %id, client_id = %client_id, "access token issued");
        Ok(id)
    }

    /// Signed (and possibly encrypted) OIDC ID token for an access token.
    pub async fn generate_identity_token(
        &self,
        access_token_id: &str,
        service: &str,
        response_type: ResponseType,
    ) -> Result<String, CasError> {
        let access_token = self
            .registry
            .get_ticket(access_token_id, TicketType::AccessToken)
            .await?;
        let registered = self.registered(service)?;

        if let TicketKind::AccessToken(at) = &access_token.kind
            && registered.client_id().is_some_and(|c| c != at.client_id)
        {
            return Err(CasError::UnrecognizableService {
                ticket_id: access_token_id.to_string(),
                service: service.to_string(),
            });
        }

        Ok(self
            .token_generator
            .generate(&access_token, &registered, response_type)
            .await?)
    }

    /// Delete a ticket and everything issued from it. Unknown ids remove
    /// nothing.
    pub async fn revoke(&self, ticket_id: &str) -> Result<usize, CasError> {
        let removed = self.registry.delete_ticket(ticket_id).await?;
        info!(ticket_id = %ticket_id, removed, "ticket revoked");
        Ok(removed)
    }

    fn registered(&self, service: &str) -> Result<Arc<RegisteredService>, CasError> {
        self.services.find_service_by(service).ok_or_else(|| {
            warn!(service = %service, "service is not registered");
            CasError::UnauthorizedService(service.to_string())
        })
    }

    /// Issue a service ticket (from a TGT) or a proxy ticket (from a PGT).
    async fn grant(
        &self,
        granting_ticket_id: &str,
        expected: TicketType,
        service: &str,
    ) -> Result<String, CasError> {
        let granting = self
            .registry
            .get_ticket(granting_ticket_id, expected)
            .await?;
        if granting.ticket_type() != expected {
            return Err(RegistryError::InvalidTicketType {
                id: granting_ticket_id.to_string(),
                expected,
                actual: granting.ticket_type(),
            }
            .into());
        }

        let (ticket_type, policy) = match expected {
            TicketType::ProxyGranting => (TicketType::Proxy, self.policies.proxy),
            _ => (TicketType::Service, self.policies.service),
        };
        let id = self.ids.new_ticket_id(ticket_type)?;
        let state = ServiceTicketState {
            granting_ticket_id: granting.id.clone(),
            service: service.to_string(),
            from_new_login: granting.use_count == 0,
        };
        let kind = match ticket_type {
            TicketType::Proxy => TicketKind::Proxy(state),
            _ => TicketKind::Service(state),
        };
        let now = self.clock.now();
        self.registry
            .add_ticket(Ticket::new(id.clone(), kind, policy, now))
            .await?;

        self.link_or_rollback(granting_ticket_id, expected, &id, &|t: &mut Ticket| {
            t.record_use(now);
            if let Some(g) = t.granting_state_mut() {
                g.services.insert(id.clone(), service.to_string());
            }
        })
        .await?;

        debug!(
            ticket_id = %id,
            granted_by = %granting_ticket_id,
            service = %service,
            "service ticket issued"
        );
        Ok(id)
    }

    /// Count one use of a service or proxy ticket. Each allowed use goes to
    /// exactly one caller; the last one removes the ticket.
    async fn spend(&self, service_ticket_id: &str) -> Result<Ticket, CasError> {
        let now = self.clock.now();
        Ok(self
            .registry
            .modify_ticket(service_ticket_id, TicketType::Service, &|t: &mut Ticket| {
                t.record_use(now)
            })
            .await?)
    }

    /// Record the child on its parent, or remove the child.
    async fn link_or_rollback(
        &self,
        parent_id: &str,
        expected: TicketType,
        child_id: &str,
        link: TicketChange<'_>,
    ) -> Result<(), CasError> {
        if let Err(e) = self.registry.modify_ticket(parent_id, expected, link).await {
            if let Err(rollback) = self.registry.delete_ticket(child_id).await {
                error!(
                    ticket_id = %child_id,
                    parent_id = %parent_id,
                    error = %rollback,
                    "failed to roll back orphaned ticket"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }
}
