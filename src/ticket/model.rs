//! Ticket data model.
//!
//! Every ticket shares one header (id, timestamps, usage counter, expiration
//! policy) and carries a variant payload in [`TicketKind`]. Parent/child links
//! are stored as ids only; the registry resolves them.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authentication::Authentication;
use crate::ticket::expiration::{ExpirationPolicy, TicketUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    TicketGranting,
    ProxyGranting,
    Service,
    Proxy,
    AccessToken,
}

impl TicketType {
    pub fn prefix(&self) -> &'static str {
        match self {
            TicketType::TicketGranting => "TGT",
            TicketType::ProxyGranting => "PGT",
            TicketType::Service => "ST",
            TicketType::Proxy => "PT",
            TicketType::AccessToken => "AT",
        }
    }

    /// A proxy-granting ticket is a ticket-granting ticket; a proxy ticket is
    /// a service ticket.
    pub fn is_assignable_to(&self, expected: TicketType) -> bool {
        *self == expected
            || matches!(
                (self, expected),
                (TicketType::ProxyGranting, TicketType::TicketGranting)
                    | (TicketType::Proxy, TicketType::Service)
            )
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// State shared by tickets that can grant other tickets.
///
/// The maps are append-only for the lifetime of the ticket; see
/// [`Ticket::merge_stored`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantingState {
    pub authentication: Authentication,
    /// Service / proxy ticket id -> service id.
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    /// Proxy-granting ticket id -> service id it was granted for.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeMap<String, String>,
    /// Other dependent ticket ids (access tokens).
    #[serde(default)]
    pub descendant_tickets: BTreeSet<String>,
}

impl GrantingState {
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            descendant_tickets: BTreeSet::new(),
        }
    }

    fn absorb(&mut self, stored: &GrantingState) {
        for (k, v) in &stored.services {
            self.services.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &stored.proxy_granting_tickets {
            self.proxy_granting_tickets
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        self.descendant_tickets
            .extend(stored.descendant_tickets.iter().cloned());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyGrantingState {
    pub granting: GrantingState,
    /// The ticket-granting ticket at the root of this proxy chain.
    pub ticket_granting_ticket_id: String,
    /// Ticket this PGT was linked under: the root session, or the PGT that
    /// issued the proxy ticket it was obtained with.
    pub granting_ticket_id: String,
    /// Callback/service the PGT was issued to.
    pub proxied_by: String,
    /// Services this PGT was obtained through, nearest first.
    #[serde(default)]
    pub proxy_chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicketState {
    /// Ticket-granting or proxy-granting ticket that issued this ticket.
    pub granting_ticket_id: String,
    pub service: String,
    #[serde(default)]
    pub from_new_login: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenState {
    pub authentication: Authentication,
    pub ticket_granting_ticket_id: String,
    pub client_id: String,
    pub service: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "snake_case")]
pub enum TicketKind {
    TicketGranting(GrantingState),
    ProxyGranting(ProxyGrantingState),
    Service(ServiceTicketState),
    Proxy(ServiceTicketState),
    AccessToken(AccessTokenState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub previous_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub use_count: u32,
    /// Explicit expiry mark; wins over the policy.
    #[serde(default)]
    pub expired: bool,
    pub expiration_policy: ExpirationPolicy,
    pub kind: TicketKind,
}

impl Ticket {
    pub fn new(
        id: impl Into<String>,
        kind: TicketKind,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            last_used_at: now,
            previous_used_at: None,
            use_count: 0,
            expired: false,
            expiration_policy,
            kind,
        }
    }

    pub fn ticket_type(&self) -> TicketType {
        match &self.kind {
            TicketKind::TicketGranting(_) => TicketType::TicketGranting,
            TicketKind::ProxyGranting(_) => TicketType::ProxyGranting,
            TicketKind::Service(_) => TicketType::Service,
            TicketKind::Proxy(_) => TicketType::Proxy,
            TicketKind::AccessToken(_) => TicketType::AccessToken,
        }
    }

    pub fn usage(&self) -> TicketUsage {
        TicketUsage {
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            use_count: self.use_count,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired(&self.usage(), now)
    }

    pub fn mark_expired(&mut self) {
        self.expired = true;
    }

    /// Record one use of the ticket.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_used_at = Some(self.last_used_at);
        self.last_used_at = now;
        self.use_count = self.use_count.saturating_add(1);
    }

    pub fn granting_state(&self) -> Option<&GrantingState> {
        match &self.kind {
            TicketKind::TicketGranting(g) => Some(g),
            TicketKind::ProxyGranting(p) => Some(&p.granting),
            _ => None,
        }
    }

    pub fn granting_state_mut(&mut self) -> Option<&mut GrantingState> {
        match &mut self.kind {
            TicketKind::TicketGranting(g) => Some(g),
            TicketKind::ProxyGranting(p) => Some(&mut p.granting),
            _ => None,
        }
    }

    pub fn service_state(&self) -> Option<&ServiceTicketState> {
        match &self.kind {
            TicketKind::Service(s) | TicketKind::Proxy(s) => Some(s),
            _ => None,
        }
    }

    /// Authentication carried directly by this ticket. Service and proxy
    /// tickets carry none; resolve their granting ticket instead.
    pub fn authentication(&self) -> Option<&Authentication> {
        match &self.kind {
            TicketKind::TicketGranting(g) => Some(&g.authentication),
            TicketKind::ProxyGranting(p) => Some(&p.granting.authentication),
            TicketKind::AccessToken(a) => Some(&a.authentication),
            TicketKind::Service(_) | TicketKind::Proxy(_) => None,
        }
    }

    /// Id of the ticket this one was issued from. The ticket is only live
    /// while that one is.
    pub fn parent_id(&self) -> Option<&str> {
        match &self.kind {
            TicketKind::TicketGranting(_) => None,
            TicketKind::ProxyGranting(p) => Some(&p.granting_ticket_id),
            TicketKind::Service(s) | TicketKind::Proxy(s) => Some(&s.granting_ticket_id),
            TicketKind::AccessToken(a) => Some(&a.ticket_granting_ticket_id),
        }
    }

    /// Ids removed together with this ticket when it is deleted.
    pub fn children(&self) -> Vec<String> {
        let Some(g) = self.granting_state() else {
            return Vec::new();
        };
        g.services
            .keys()
            .chain(g.proxy_granting_tickets.keys())
            .chain(g.descendant_tickets.iter())
            .cloned()
            .collect()
    }

    /// Fold the currently stored version into this incoming one.
    ///
    /// Concurrent writers each read, append, and write back; merging the
    /// append-only maps keeps every append. Usage only moves forward.
    pub fn merge_stored(&mut self, stored: &Ticket) {
        if let (Some(mine), Some(theirs)) = (self.granting_state_mut(), stored.granting_state()) {
            mine.absorb(theirs);
        }
        self.use_count = self.use_count.max(stored.use_count);
        if stored.last_used_at > self.last_used_at {
            self.last_used_at = stored.last_used_at;
        }
        self.previous_used_at = self.previous_used_at.max(stored.previous_used_at);
        self.expired |= stored.expired;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::authentication::Principal;

    fn tgt(id: &str) -> Ticket {
        let auth = Authentication::new(Principal::new("casuser"), Utc::now());
        Ticket::new(
            id,
            TicketKind::TicketGranting(GrantingState::new(auth)),
            ExpirationPolicy::NeverExpires,
            Utc::now(),
        )
    }

    #[test]
    fn proxy_types_are_assignable_to_their_bases() {
        assert!(TicketType::ProxyGranting.is_assignable_to(TicketType::TicketGranting));
        assert!(TicketType::Proxy.is_assignable_to(TicketType::Service));
        assert!(!TicketType::TicketGranting.is_assignable_to(TicketType::ProxyGranting));
        assert!(!TicketType::Service.is_assignable_to(TicketType::TicketGranting));
    }

    #[test]
    fn children_cover_every_mapping() {
        let mut t = tgt("TGT-1");
        let g = t.granting_state_mut().unwrap();
        g.services.insert("ST-1".into(), "https://a".into());
        g.proxy_granting_tickets
            .insert("PGT-1".into(), "https://b".into());
        g.descendant_tickets.insert("AT-1".into());

        let mut children = t.children();
        children.sort();
        assert_eq!(children, vec!["AT-1", "PGT-1", "ST-1"]);
    }

    #[test]
    fn merge_keeps_concurrent_appends() {
        let base = tgt("TGT-1");

        let mut first = base.clone();
        first
            .granting_state_mut()
            .unwrap()
            .services
            .insert("ST-1".into(), "https://a".into());
        first.record_use(Utc::now());

        let mut second = base.clone();
        second
            .granting_state_mut()
            .unwrap()
            .services
            .insert("ST-2".into(), "https://b".into());
        second.record_use(Utc::now());

        second.merge_stored(&first);
        let services = &second.granting_state().unwrap().services;
        assert!(services.contains_key("ST-1"));
        assert!(services.contains_key("ST-2"));
        assert_eq!(second.use_count, 1);
    }

    #[test]
    fn explicit_mark_wins_over_policy() {
        let mut t = tgt("TGT-1");
        assert!(!t.is_expired(Utc::now() + Duration::days(1)));
        t.mark_expired();
        assert!(t.is_expired(Utc::now()));
    }

    #[test]
    fn record_use_tracks_previous() {
        let mut t = tgt("TGT-1");
        let created = t.created_at;
        let later = created + Duration::seconds(5);
        t.record_use(later);
        assert_eq!(t.previous_used_at, Some(created));
        assert_eq!(t.last_used_at, later);
        assert_eq!(t.use_count, 1);
    }
}
