//! Shared fixtures and the registry conformance suite.
//!
//! Each `pub async fn` in the conformance section checks one part of the
//! [`TicketRegistry`] contract against a fresh registry; the integration
//! test files call them once per registry flavor.

#![allow(dead_code, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use cas_ticket_core::CentralAuthenticationService;
use cas_ticket_core::authentication::{
    AcceptUsersAuthenticationManager, Authentication, Principal,
};
use cas_ticket_core::facade::TicketPolicies;
use cas_ticket_core::registered_service::{
    InMemoryServicesManager, OidcSettings, RegisteredService, RegisteredServiceKind,
};
use cas_ticket_core::registry::store::MemoryTicketStore;
use cas_ticket_core::registry::{
    CachingTicketRegistry, DefaultTicketRegistry, RegistryError, TicketCacheConfig,
    TicketRegistry,
};
use cas_ticket_core::ticket::{
    AccessTokenState, Clock, ExpirationPolicy, GrantingState, ManualClock, ProxyGrantingState,
    ServiceTicketState, Ticket, TicketIdGenerator, TicketKind, TicketType,
};
use cas_ticket_core::token::{
    IdTokenGenerator, IdTokenSettings, IdTokenSigningAndEncryptionService, JwtIdTokenSigner,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

pub const SERVER_PREFIX: &str = "https://sso.example.org/cas";
pub const ISSUER: &str = "https://sso.example.org/cas/oidc";
pub const APP: &str = "https://app.example.org";
pub const PROXY_CALLBACK: &str = "https://proxy.example.org/pgtCallback";
pub const BACKEND: &str = "https://backend.example.org";
pub const RP: &str = "https://rp.example.org/cb";
pub const RP_CLIENT_ID: &str = "client-1";
pub const CALLBACK_AUTHORIZE: &str = "https://sso.example.org/cas/oauth2.0/callbackAuthorize";

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/id_token_signing.pem");
pub const SIGNING_PUBLIC_KEY_PEM: &str = include_str!("../fixtures/id_token_signing.pub.pem");

pub type MemoryRegistry = DefaultTicketRegistry<MemoryTicketStore>;

pub fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start()))
}

pub fn memory_registry(clock: Arc<ManualClock>) -> MemoryRegistry {
    DefaultTicketRegistry::new(MemoryTicketStore::new(), clock)
}

pub fn caching_registry(clock: Arc<ManualClock>) -> CachingTicketRegistry<MemoryRegistry> {
    CachingTicketRegistry::new(
        memory_registry(clock.clone()),
        clock,
        TicketCacheConfig::default(),
    )
}

pub fn authentication(principal: &str) -> Authentication {
    Authentication::new(
        Principal::new(principal)
            .with_attribute("email", vec![json!("casuser@example.org")])
            .with_attribute("department", vec![json!("IT")]),
        start(),
    )
    .with_success("AcceptUsersAuthenticationHandler")
    .with_attribute("authnContextClass", vec![json!("mfa-duo")])
}

pub fn tgt_policy() -> ExpirationPolicy {
    ExpirationPolicy::TicketGranting {
        max_time_to_live_seconds: 28_800,
        time_to_kill_seconds: 7_200,
    }
}

pub fn st_policy() -> ExpirationPolicy {
    ExpirationPolicy::MultiTimeUseOrTimeout {
        time_to_live_seconds: 10,
        number_of_uses: 1,
    }
}

pub fn tgt(id: &str, now: DateTime<Utc>) -> Ticket {
    Ticket::new(
        id,
        TicketKind::TicketGranting(GrantingState::new(authentication("casuser"))),
        tgt_policy(),
        now,
    )
}

pub fn st(id: &str, granting_ticket_id: &str, service: &str, now: DateTime<Utc>) -> Ticket {
    Ticket::new(
        id,
        TicketKind::Service(ServiceTicketState {
            granting_ticket_id: granting_ticket_id.to_string(),
            service: service.to_string(),
            from_new_login: false,
        }),
        st_policy(),
        now,
    )
}

pub fn pgt(id: &str, tgt_id: &str, now: DateTime<Utc>) -> Ticket {
    Ticket::new(
        id,
        TicketKind::ProxyGranting(ProxyGrantingState {
            granting: GrantingState::new(authentication("casuser")),
            ticket_granting_ticket_id: tgt_id.to_string(),
            granting_ticket_id: tgt_id.to_string(),
            proxied_by: PROXY_CALLBACK.to_string(),
            proxy_chain: vec![APP.to_string()],
        }),
        tgt_policy(),
        now,
    )
}

pub fn access_token(id: &str, tgt_id: &str, now: DateTime<Utc>) -> Ticket {
    Ticket::new(
        id,
        TicketKind::AccessToken(AccessTokenState {
            authentication: authentication("casuser"),
            ticket_granting_ticket_id: tgt_id.to_string(),
            client_id: RP_CLIENT_ID.to_string(),
            service: RP.to_string(),
            scopes: Default::default(),
        }),
        ExpirationPolicy::NeverExpires,
        now,
    )
}

pub fn registered_services() -> Vec<RegisteredService> {
    vec![
        RegisteredService {
            id: 1,
            name: "app".into(),
            service_id: APP.into(),
            kind: RegisteredServiceKind::Cas,
        },
        RegisteredService {
            id: 2,
            name: "proxy".into(),
            service_id: PROXY_CALLBACK.into(),
            kind: RegisteredServiceKind::Cas,
        },
        RegisteredService {
            id: 3,
            name: "backend".into(),
            service_id: BACKEND.into(),
            kind: RegisteredServiceKind::Cas,
        },
        RegisteredService {
            id: 4,
            name: "oauth callback".into(),
            service_id: CALLBACK_AUTHORIZE.into(),
            kind: RegisteredServiceKind::Cas,
        },
        RegisteredService {
            id: 5,
            name: "relying party".into(),
            service_id: RP.into(),
            kind: RegisteredServiceKind::Oidc(OidcSettings {
                client_id: RP_CLIENT_ID.into(),
                supported_claims: vec!["email".into()],
                id_token_signing_alg: "RS256".into(),
                sign_id_token: true,
                id_token_encryption_key_pem: None,
            }),
        },
    ]
}

pub fn id_token_settings() -> IdTokenSettings {
    IdTokenSettings {
        issuer: ISSUER.into(),
        server_prefix: SERVER_PREFIX.into(),
        skew_seconds: 5,
        lifetime_seconds: 600,
        supported_claims: vec!["sub".into(), "email".into(), "name".into()],
        authn_context_attribute: "authnContextClass".into(),
    }
}

pub fn signer() -> Arc<dyn IdTokenSigningAndEncryptionService> {
    Arc::new(
        JwtIdTokenSigner::new(SIGNING_KEY_PEM, Some("test-key".into()), "RS256")
            .expect("fixture key parses"),
    )
}

/// Facade over `registry` with the fixture services and an accept-list of
/// `casuser::Mellon`.
pub fn cas_with(
    registry: Arc<dyn TicketRegistry>,
    services: Vec<RegisteredService>,
    clock: Arc<dyn Clock>,
) -> CentralAuthenticationService {
    cas_with_policies(registry, services, TicketPolicies::default(), clock)
}

pub fn cas_with_policies(
    registry: Arc<dyn TicketRegistry>,
    services: Vec<RegisteredService>,
    policies: TicketPolicies,
    clock: Arc<dyn Clock>,
) -> CentralAuthenticationService {
    let services = Arc::new(InMemoryServicesManager::new(services));
    let generator = Arc::new(IdTokenGenerator::new(
        id_token_settings(),
        registry.clone(),
        services.clone(),
        signer(),
        clock.clone(),
    ));
    let authentication = Arc::new(
        AcceptUsersAuthenticationManager::parse("casuser::Mellon").expect("valid accept list"),
    );
    CentralAuthenticationService::new(
        registry,
        services,
        authentication,
        generator,
        Arc::new(TicketIdGenerator::new(None).expect("no suffix")),
        policies,
        clock,
    )
}

pub fn cas(registry: Arc<dyn TicketRegistry>, clock: Arc<dyn Clock>) -> CentralAuthenticationService {
    cas_with(registry, registered_services(), clock)
}

// ============================================================================
// Conformance
// ============================================================================

/// A ticket added is returned unchanged by `get_ticket`.
pub async fn add_then_get_round_trips<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let ticket = tgt("TGT-1", clock.now());
    registry.add_ticket(ticket.clone()).await.expect("add");

    let got = registry
        .get_ticket("TGT-1", TicketType::TicketGranting)
        .await
        .expect("get");
    assert_eq!(got, ticket);
    assert_eq!(registry.find_ticket("TGT-1").await.expect("find"), ticket);
}

/// Adding an id twice fails and keeps the first ticket.
pub async fn duplicate_add_is_rejected<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    registry.add_ticket(tgt("TGT-1", clock.now())).await.expect("add");
    let err = registry
        .add_ticket(st("TGT-1", "TGT-0", APP, clock.now()))
        .await
        .expect_err("duplicate id");
    assert!(matches!(err, RegistryError::DuplicateTicket(ref id) if id == "TGT-1"));

    let kept = registry.find_ticket("TGT-1").await.expect("find");
    assert_eq!(kept.ticket_type(), TicketType::TicketGranting);
}

/// Unknown ids are reported as not found.
pub async fn missing_ticket_is_not_found<R: TicketRegistry>(registry: &R) {
    let err = registry
        .get_ticket("ST-404", TicketType::Service)
        .await
        .expect_err("missing");
    assert!(matches!(err, RegistryError::TicketNotFound(_)));
    assert!(registry.peek_ticket("ST-404").await.expect("peek").is_none());
}

/// Subtypes satisfy their base type; unrelated types do not.
pub async fn ticket_type_is_checked<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    registry.add_ticket(tgt("TGT-1", clock.now())).await.expect("add tgt");
    registry.add_ticket(pgt("PGT-1", "TGT-1", clock.now())).await.expect("add pgt");

    registry
        .get_ticket("PGT-1", TicketType::TicketGranting)
        .await
        .expect("a proxy-granting ticket is a ticket-granting ticket");

    let err = registry
        .get_ticket("TGT-1", TicketType::Service)
        .await
        .expect_err("wrong type");
    assert!(matches!(
        err,
        RegistryError::InvalidTicketType {
            expected: TicketType::Service,
            actual: TicketType::TicketGranting,
            ..
        }
    ));
}

/// Deleting an unknown id succeeds and removes nothing.
pub async fn delete_missing_is_a_no_op<R: TicketRegistry>(registry: &R) {
    assert_eq!(registry.delete_ticket("TGT-404").await.expect("delete"), 0);
}

/// Deleting a session removes it, its N service tickets and its M
/// proxy-granting tickets, and nothing else.
pub async fn cascade_removes_exactly_the_descendants<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    const N: usize = 3;
    const M: usize = 2;
    let now = clock.now();

    let mut root = tgt("TGT-1", now);
    let g = root.granting_state_mut().expect("granting");
    for i in 0..N {
        g.services.insert(format!("ST-{i}"), APP.into());
    }
    for i in 0..M {
        g.proxy_granting_tickets
            .insert(format!("PGT-{i}"), PROXY_CALLBACK.into());
    }
    registry.add_ticket(root).await.expect("add root");
    for i in 0..N {
        registry
            .add_ticket(st(&format!("ST-{i}"), "TGT-1", APP, now))
            .await
            .expect("add st");
    }
    for i in 0..M {
        registry
            .add_ticket(pgt(&format!("PGT-{i}"), "TGT-1", now))
            .await
            .expect("add pgt");
    }
    registry.add_ticket(tgt("TGT-2", now)).await.expect("add other");
    registry
        .add_ticket(st("ST-other", "TGT-2", APP, now))
        .await
        .expect("add other st");

    assert_eq!(registry.delete_ticket("TGT-1").await.expect("delete"), 1 + N + M);

    for i in 0..N {
        assert!(registry.find_ticket(&format!("ST-{i}")).await.is_err());
    }
    for i in 0..M {
        assert!(registry.find_ticket(&format!("PGT-{i}")).await.is_err());
    }
    registry.find_ticket("TGT-2").await.expect("unrelated session kept");
    registry.find_ticket("ST-other").await.expect("unrelated ticket kept");
}

/// Deletion reaches through proxy-granting tickets to what they issued.
pub async fn cascade_follows_proxy_chains<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let now = clock.now();
    let mut root = tgt("TGT-1", now);
    root.granting_state_mut()
        .expect("granting")
        .proxy_granting_tickets
        .insert("PGT-1".into(), PROXY_CALLBACK.into());
    let mut proxy = pgt("PGT-1", "TGT-1", now);
    proxy
        .granting_state_mut()
        .expect("granting")
        .services
        .insert("PT-1".into(), BACKEND.into());
    let pt = Ticket::new(
        "PT-1",
        TicketKind::Proxy(ServiceTicketState {
            granting_ticket_id: "PGT-1".into(),
            service: BACKEND.into(),
            from_new_login: false,
        }),
        st_policy(),
        now,
    );

    registry.add_ticket(root).await.expect("add");
    registry.add_ticket(proxy).await.expect("add");
    registry.add_ticket(pt).await.expect("add");

    let mut removed = registry.delete_ticket_cascade("TGT-1").await.expect("delete");
    removed.sort();
    assert_eq!(removed, vec!["PGT-1", "PT-1", "TGT-1"]);
}

/// A ticket reachable from itself stops the delete instead of looping.
pub async fn cyclic_chain_is_detected<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let now = clock.now();
    let mut root = tgt("TGT-1", now);
    root.granting_state_mut()
        .expect("granting")
        .proxy_granting_tickets
        .insert("PGT-1".into(), PROXY_CALLBACK.into());
    let mut proxy = pgt("PGT-1", "TGT-1", now);
    proxy
        .granting_state_mut()
        .expect("granting")
        .proxy_granting_tickets
        .insert("TGT-1".into(), APP.into());
    registry.add_ticket(root).await.expect("add");
    registry.add_ticket(proxy).await.expect("add");

    let err = registry
        .delete_ticket_cascade("TGT-1")
        .await
        .expect_err("cycle");
    assert!(matches!(err, RegistryError::CyclicProxyChain(_)));
}

/// Once a ticket's policy says it is expired, no read returns it, even
/// when an earlier read may have cached it.
pub async fn expired_ticket_is_never_returned<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    registry.add_ticket(tgt("TGT-1", clock.now())).await.expect("add");
    registry
        .add_ticket(st("ST-1", "TGT-1", APP, clock.now()))
        .await
        .expect("add");
    registry
        .get_ticket("ST-1", TicketType::Service)
        .await
        .expect("live read");

    clock.advance(Duration::seconds(10));

    let err = registry
        .get_ticket("ST-1", TicketType::Service)
        .await
        .expect_err("expired");
    assert!(err.is_not_found(), "expired must read as gone: {err:?}");

    let err = registry.find_ticket("ST-1").await.expect_err("still expired");
    assert!(err.is_not_found());
    let left: Vec<String> = registry
        .get_tickets()
        .await
        .expect("list")
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(left, vec!["TGT-1"]);
}

/// A ticket is only live while every ticket above it is: a missing or
/// expired session takes its proxy chain and tokens down with it, even
/// before the session itself is read.
pub async fn ticket_dies_with_its_granting_chain<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let now = clock.now();
    registry.add_ticket(tgt("TGT-1", now)).await.expect("add");
    let mut proxy = pgt("PGT-1", "TGT-1", now);
    proxy.expiration_policy = ExpirationPolicy::NeverExpires;
    registry.add_ticket(proxy).await.expect("add");
    registry
        .add_ticket(access_token("AT-1", "TGT-1", now))
        .await
        .expect("add");
    registry
        .add_ticket(access_token("AT-orphan", "TGT-404", now))
        .await
        .expect("add");

    registry.find_ticket("PGT-1").await.expect("live chain");
    registry.find_ticket("AT-1").await.expect("live chain");
    let err = registry.find_ticket("AT-orphan").await.expect_err("no session");
    assert!(matches!(err, RegistryError::TicketExpired(ref id) if id == "AT-orphan"));

    clock.advance(Duration::seconds(7_200));
    assert!(registry.get_tickets().await.expect("list").is_empty());
    for id in ["PGT-1", "AT-1"] {
        let err = registry.find_ticket(id).await.expect_err("session expired");
        assert!(matches!(err, RegistryError::TicketExpired(_)), "{id}: {err:?}");
    }
}

/// Each change to a ticket sees the one before it; the change that uses
/// the ticket up removes it.
pub async fn modify_counts_every_use<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let now = clock.now();
    registry.add_ticket(tgt("TGT-1", now)).await.expect("add");
    let mut ticket = st("ST-1", "TGT-1", APP, now);
    ticket.expiration_policy = ExpirationPolicy::MultiTimeUseOrTimeout {
        time_to_live_seconds: 10,
        number_of_uses: 3,
    };
    registry.add_ticket(ticket).await.expect("add");

    let use_once = |t: &mut Ticket| t.record_use(now);
    for expected in 1..=2 {
        let used = registry
            .modify_ticket("ST-1", TicketType::Service, &use_once)
            .await
            .expect("use");
        assert_eq!(used.use_count, expected);
        let stored = registry.find_ticket("ST-1").await.expect("still live");
        assert_eq!(stored.use_count, expected);
    }

    let last = registry
        .modify_ticket("ST-1", TicketType::Service, &use_once)
        .await
        .expect("last use");
    assert_eq!(last.use_count, 3);
    assert!(registry.peek_ticket("ST-1").await.expect("peek").is_none());

    let err = registry
        .modify_ticket("ST-1", TicketType::Service, &use_once)
        .await
        .expect_err("used up");
    assert!(matches!(err, RegistryError::TicketNotFound(_)));
}

/// `modify_ticket` checks the type and refuses expired tickets.
pub async fn modify_refuses_wrong_type_and_expired<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let now = clock.now();
    registry.add_ticket(tgt("TGT-1", now)).await.expect("add");
    let noop = |_: &mut Ticket| {};

    let err = registry
        .modify_ticket("TGT-1", TicketType::Service, &noop)
        .await
        .expect_err("wrong type");
    assert!(matches!(err, RegistryError::InvalidTicketType { .. }));

    clock.advance(Duration::seconds(7_200));
    let err = registry
        .modify_ticket("TGT-1", TicketType::TicketGranting, &noop)
        .await
        .expect_err("expired");
    assert!(matches!(err, RegistryError::TicketExpired(_)));
    assert!(registry.peek_ticket("TGT-1").await.expect("peek").is_none());
}

/// Expiring a session on read also removes what it issued.
pub async fn expired_parent_takes_children_along<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let now = clock.now();
    let mut root = tgt("TGT-1", now);
    root.granting_state_mut()
        .expect("granting")
        .descendant_tickets
        .insert("AT-1".into());
    registry.add_ticket(root).await.expect("add");
    registry
        .add_ticket(access_token("AT-1", "TGT-1", now))
        .await
        .expect("add");

    clock.advance(Duration::seconds(7_200));

    assert!(registry.find_ticket("TGT-1").await.is_err());
    assert!(registry.peek_ticket("AT-1").await.expect("peek").is_none());
}

/// Writers appending to the same parent from stale copies both survive.
pub async fn update_merges_concurrent_appends<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    registry.add_ticket(tgt("TGT-1", clock.now())).await.expect("add");
    let base = registry.find_ticket("TGT-1").await.expect("find");

    let mut first = base.clone();
    first
        .granting_state_mut()
        .expect("granting")
        .services
        .insert("ST-1".into(), APP.into());
    let mut second = base;
    second
        .granting_state_mut()
        .expect("granting")
        .services
        .insert("ST-2".into(), BACKEND.into());

    registry.update_ticket(first).await.expect("first update");
    let merged = registry.update_ticket(second).await.expect("second update");

    let services = &merged.granting_state().expect("granting").services;
    assert!(services.contains_key("ST-1"));
    assert!(services.contains_key("ST-2"));

    let stored = registry.find_ticket("TGT-1").await.expect("find");
    assert_eq!(stored, merged);
}

/// Updating a ticket that is not stored fails.
pub async fn update_missing_is_not_found<R: TicketRegistry>(registry: &R, clock: &ManualClock) {
    let err = registry
        .update_ticket(tgt("TGT-404", clock.now()))
        .await
        .expect_err("missing");
    assert!(matches!(err, RegistryError::TicketNotFound(_)));
}

/// Bulk reads and counters only see live tickets.
pub async fn counts_cover_live_tickets_only<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let now = clock.now();
    registry.add_ticket(tgt("TGT-1", now)).await.expect("add");
    registry.add_ticket(tgt("TGT-2", now)).await.expect("add");
    registry.add_ticket(pgt("PGT-1", "TGT-1", now)).await.expect("add");
    registry.add_ticket(st("ST-1", "TGT-1", APP, now)).await.expect("add");

    assert_eq!(registry.session_count().await.expect("sessions"), 2);
    assert_eq!(registry.service_ticket_count().await.expect("sts"), 1);
    assert_eq!(registry.get_tickets().await.expect("all").len(), 4);

    let matching = registry
        .get_tickets_matching(&|t: &Ticket| t.ticket_type() == TicketType::ProxyGranting)
        .await
        .expect("matching");
    assert_eq!(matching.len(), 1);

    clock.advance(Duration::seconds(10));
    assert_eq!(registry.service_ticket_count().await.expect("sts"), 0);
}

/// `clean_expired` removes expired tickets and their descendants, and
/// reports every id it removed.
pub async fn clean_expired_sweeps_descendants<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    let now = clock.now();
    let mut root = tgt("TGT-1", now);
    root.granting_state_mut()
        .expect("granting")
        .descendant_tickets
        .insert("AT-1".into());
    registry.add_ticket(root).await.expect("add");
    registry
        .add_ticket(access_token("AT-1", "TGT-1", now))
        .await
        .expect("add");
    let mut lasting = tgt("TGT-2", now);
    lasting.expiration_policy = ExpirationPolicy::NeverExpires;
    registry.add_ticket(lasting).await.expect("add");
    registry
        .add_ticket(access_token("AT-2", "TGT-2", now))
        .await
        .expect("add");

    assert!(registry.clean_expired().await.expect("clean").is_empty());

    clock.advance(Duration::seconds(7_200));
    let mut removed = registry.clean_expired().await.expect("clean");
    removed.sort();
    assert_eq!(removed, vec!["AT-1", "TGT-1"]);
    registry.find_ticket("AT-2").await.expect("token of a lasting session kept");
}

/// `delete_all` empties the registry.
pub async fn delete_all_empties_the_registry<R: TicketRegistry>(
    registry: &R,
    clock: &ManualClock,
) {
    registry.add_ticket(tgt("TGT-1", clock.now())).await.expect("add");
    registry.add_ticket(tgt("TGT-2", clock.now())).await.expect("add");
    registry.find_ticket("TGT-1").await.expect("warm");

    assert_eq!(registry.delete_all().await.expect("delete all"), 2);
    assert!(registry.find_ticket("TGT-1").await.is_err());
    assert!(registry.get_tickets().await.expect("all").is_empty());
}
