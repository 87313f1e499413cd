//! ID-token claim assembly.
//!
//! Each step adds one group of claims to the accumulating map. Steps run in a
//! fixed order and later steps never overwrite earlier ones, except that
//! allowed principal attributes are written as released.
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::authentication::Authentication;
use crate::authentication::model::SUCCESSFUL_AUTHENTICATION_HANDLERS;
use crate::token::hash::access_token_hash;
use crate::token::{ResponseType, TokenError};

pub type Claims = Map<String, Value>;

type ClaimStep = fn(&ClaimsContext<'_>, &mut Claims) -> Result<(), TokenError>;

/// Ordered claim-assembly steps.
const PIPELINE: [(&str, ClaimStep); 7] = [
    ("identifiers", identifiers),
    ("temporal", temporal),
    ("authentication_context", authentication_context),
    ("client", client),
    ("access_token_hash", at_hash),
    ("principal_attributes", principal_attributes),
    ("preferred_username", preferred_username),
];

/// Everything the claim steps read.
#[derive(Debug)]
pub struct ClaimsContext<'a> {
    pub issuer: &'a str,
    pub client_id: &'a str,
    pub service_id: &'a str,
    pub jwt_id: &'a str,
    pub access_token_id: &'a str,
    pub authentication: &'a Authentication,
    pub now: DateTime<Utc>,
    pub skew_seconds: i64,
    pub lifetime_seconds: i64,
    pub response_type: ResponseType,
    pub signing_alg: &'a str,
    /// Attribute names that may be released as claims.
    pub allowed_claims: &'a [String],
    /// Authentication attribute carrying the `acr` value.
    pub authn_context_attribute: &'a str,
}

pub fn assemble_claims(ctx: &ClaimsContext<'_>) -> Result<Claims, TokenError> {
    let mut claims = Claims::new();
    for (name, step) in PIPELINE {
        step(ctx, &mut claims)?;
        trace!(step = name, claims = claims.len(), "claim step applied");
    }
    Ok(claims)
}

fn identifiers(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    claims.insert("iss".into(), ctx.issuer.into());
    claims.insert("aud".into(), ctx.client_id.into());
    claims.insert(
        "sub".into(),
        ctx.authentication.principal.id.as_str().into(),
    );
    claims.insert("jti".into(), ctx.jwt_id.into());
    Ok(())
}

fn temporal(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    let iat = ctx.now.timestamp();
    let nbf = (ctx.now - Duration::seconds(ctx.skew_seconds)).timestamp();
    let exp = (ctx.now + Duration::seconds(ctx.lifetime_seconds)).timestamp();
    claims.insert("iat".into(), iat.into());
    claims.insert("nbf".into(), nbf.into());
    claims.insert("exp".into(), exp.into());
    Ok(())
}

fn authentication_context(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    let attrs = &ctx.authentication.attributes;

    if let Some(acr) = attrs
        .get(ctx.authn_context_attribute)
        .and_then(|v| v.first())
    {
        claims.insert("acr".into(), as_string(acr).into());
    }

    if let Some(handlers) = attrs.get(SUCCESSFUL_AUTHENTICATION_HANDLERS)
        && !handlers.is_empty()
    {
        let amr: Vec<Value> = handlers.iter().map(|h| as_string(h).into()).collect();
        claims.insert("amr".into(), Value::Array(amr));
    }
    Ok(())
}

fn client(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    claims.insert("client_id".into(), ctx.client_id.into());
    for name in ["state", "nonce"] {
        if let Some(v) = ctx.authentication.first_attribute(name) {
            claims.insert(name.into(), v.clone());
        }
    }
    Ok(())
}

fn at_hash(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    let hash = access_token_hash(ctx.access_token_id, ctx.signing_alg)?;
    trace!(response_type = %ctx.response_type, "access token hash added");
    claims.insert("at_hash".into(), hash.into());
    Ok(())
}

fn principal_attributes(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    for (name, values) in &ctx.authentication.principal.attributes {
        if !ctx.allowed_claims.iter().any(|c| c == name) {
            warn!(
                claim = %name,
                service = %ctx.service_id,
                "claim is not a supported claim; skipping"
            );
            continue;
        }
        match values.as_slice() {
            [] => {}
            [single] => {
                claims.insert(name.clone(), single.clone());
            }
            many => {
                claims.insert(name.clone(), Value::Array(many.to_vec()));
            }
        }
    }
    Ok(())
}

fn preferred_username(ctx: &ClaimsContext<'_>, claims: &mut Claims) -> Result<(), TokenError> {
    claims
        .entry("preferred_username")
        .or_insert_with(|| ctx.authentication.principal.id.as_str().into());
    Ok(())
}

fn as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
