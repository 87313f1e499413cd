/*
 * Responsibility
 * - Read settings from the environment (.env honored)
 * - Validate them; a bad value fails startup instead of falling back
 * - Hand ready-made policy/settings structs to the app wiring
 */
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::authentication::AcceptUsersAuthenticationManager;
use crate::facade::TicketPolicies;
use crate::registry::TicketCacheConfig;
use crate::ticket::ExpirationPolicy;
use crate::token::IdTokenSettings;

const DEFAULT_OIDC_CLAIMS: &str = "sub,name,preferred_username,family_name,given_name,\
middle_name,nickname,profile,picture,website,email,email_verified,locale,zoneinfo,updated_at";

// Upper bound for every `*_SECONDS` key: ten years.
const MAX_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<String>) -> Result<Self, ConfigError> {
        let Some(raw) = raw else {
            return Ok(Self::Development);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::Invalid("APP_ENV")),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    Memory,
    Redis,
    Postgres,
}

impl FromStr for RegistryBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "redis" | "valkey" => Ok(Self::Redis),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(()),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub server_prefix: String,

    pub oidc_issuer: String,
    pub oidc_skew_seconds: i64,
    pub oidc_claims: Vec<String>,
    pub oidc_id_token_ttl_seconds: i64,
    pub oidc_signing_alg: String,
    // Server RSA private key for ID tokens. Absent only when tokens are unsigned.
    pub oidc_signing_key_pem: Option<String>,
    pub oidc_signing_key_id: Option<String>,
    pub authn_context_attribute: String,

    // Ticket lifetimes (seconds)
    pub tgt_max_ttl_seconds: i64,
    pub tgt_ttk_seconds: i64,
    pub st_ttl_seconds: i64,
    pub st_number_of_uses: u32,
    pub pt_ttl_seconds: i64,
    pub at_max_ttl_seconds: i64,
    pub at_ttk_seconds: i64,

    pub ticket_registry: RegistryBackend,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub ticket_cache_enabled: bool,
    pub ticket_cache_max_entries: u64,
    pub ticket_cache_ttl_seconds: u64,
    // 0 disables the cleaner.
    pub ticket_cleaner_interval_seconds: u64,

    pub services_file: Option<PathBuf>,
    pub ticket_id_suffix: Option<String>,
    // `user::password` pairs for the built-in accept-list authentication.
    pub accept_users: AcceptUsersAuthenticationManager,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print key material or credentials in URLs
        f.debug_struct("Config")
            .field("app_env", &self.app_env)
            .field("server_prefix", &self.server_prefix)
            .field("oidc_issuer", &self.oidc_issuer)
            .field("oidc_signing_alg", &self.oidc_signing_alg)
            .field("ticket_registry", &self.ticket_registry)
            .field("ticket_cache_enabled", &self.ticket_cache_enabled)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app_env = AppEnv::parse(get("APP_ENV"))?;

        let server_prefix = get("CAS_SERVER_PREFIX").ok_or(ConfigError::Missing("CAS_SERVER_PREFIX"))?;
        Url::parse(&server_prefix).map_err(|_| ConfigError::Invalid("CAS_SERVER_PREFIX"))?;
        let server_prefix = server_prefix.trim_end_matches('/').to_string();

        let oidc_issuer = get("OIDC_ISSUER").unwrap_or_else(|| format!("{server_prefix}/oidc"));
        Url::parse(&oidc_issuer).map_err(|_| ConfigError::Invalid("OIDC_ISSUER"))?;

        let oidc_claims = get("OIDC_CLAIMS")
            .unwrap_or_else(|| DEFAULT_OIDC_CLAIMS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let oidc_signing_alg = get("OIDC_SIGNING_ALG").unwrap_or_else(|| "RS256".to_string());
        if !matches!(
            oidc_signing_alg.to_ascii_uppercase().as_str(),
            "RS256" | "RS384" | "RS512" | "NONE"
        ) {
            return Err(ConfigError::Invalid("OIDC_SIGNING_ALG"));
        }
        let oidc_signing_key_pem = get("OIDC_SIGNING_KEY_PEM").map(|v| v.replace("\\n", "\n"));
        if oidc_signing_key_pem.is_none() && !oidc_signing_alg.eq_ignore_ascii_case("none") {
            return Err(ConfigError::Missing("OIDC_SIGNING_KEY_PEM"));
        }

        let ticket_registry = match get("TICKET_REGISTRY") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("TICKET_REGISTRY"))?,
            None => RegistryBackend::Memory,
        };
        let redis_url = get("REDIS_URL");
        let database_url = get("DATABASE_URL");
        match ticket_registry {
            RegistryBackend::Redis if redis_url.is_none() => {
                return Err(ConfigError::Missing("REDIS_URL"));
            }
            RegistryBackend::Postgres if database_url.is_none() => {
                return Err(ConfigError::Missing("DATABASE_URL"));
            }
            _ => {}
        }

        let st_number_of_uses: u32 = parse_or(&get, "ST_NUMBER_OF_USES", 1)?;
        if st_number_of_uses == 0 {
            return Err(ConfigError::Invalid("ST_NUMBER_OF_USES"));
        }

        let accept_users = match get("ACCEPT_USERS") {
            Some(raw) => AcceptUsersAuthenticationManager::parse(&raw)
                .ok_or(ConfigError::Invalid("ACCEPT_USERS"))?,
            None => AcceptUsersAuthenticationManager::default(),
        };

        Ok(Self {
            app_env,
            server_prefix,
            oidc_issuer,
            oidc_skew_seconds: parse_seconds(&get, "OIDC_SKEW_SECONDS", 300, 0)?,
            oidc_claims,
            oidc_id_token_ttl_seconds: parse_seconds(&get, "OIDC_ID_TOKEN_TTL_SECONDS", 600, 1)?,
            oidc_signing_alg,
            oidc_signing_key_pem,
            oidc_signing_key_id: get("OIDC_SIGNING_KEY_ID"),
            authn_context_attribute: get("AUTHN_CONTEXT_ATTRIBUTE")
                .unwrap_or_else(|| "authnContextClass".to_string()),
            tgt_max_ttl_seconds: parse_seconds(&get, "TGT_MAX_TTL_SECONDS", 28_800, 1)?, // 8 h
            tgt_ttk_seconds: parse_seconds(&get, "TGT_TTK_SECONDS", 7_200, 1)?, // 2 h
            st_ttl_seconds: parse_seconds(&get, "ST_TTL_SECONDS", 10, 1)?,
            st_number_of_uses,
            pt_ttl_seconds: parse_seconds(&get, "PT_TTL_SECONDS", 10, 1)?,
            at_max_ttl_seconds: parse_seconds(&get, "AT_MAX_TTL_SECONDS", 28_800, 1)?,
            at_ttk_seconds: parse_seconds(&get, "AT_TTK_SECONDS", 7_200, 1)?,
            ticket_registry,
            redis_url,
            database_url,
            ticket_cache_enabled: parse_or(&get, "TICKET_CACHE_ENABLED", false)?,
            ticket_cache_max_entries: parse_or(&get, "TICKET_CACHE_MAX_ENTRIES", 10_000)?,
            ticket_cache_ttl_seconds: parse_seconds(&get, "TICKET_CACHE_TTL_SECONDS", 60, 1)?
                .unsigned_abs(),
            ticket_cleaner_interval_seconds: parse_seconds(
                &get,
                "TICKET_CLEANER_INTERVAL_SECONDS",
                60,
                0,
            )?
            .unsigned_abs(),
            services_file: get("SERVICES_FILE").map(PathBuf::from),
            ticket_id_suffix: get("TICKET_ID_SUFFIX"),
            accept_users,
        })
    }

    pub fn ticket_policies(&self) -> TicketPolicies {
        let granting = ExpirationPolicy::TicketGranting {
            max_time_to_live_seconds: self.tgt_max_ttl_seconds,
            time_to_kill_seconds: self.tgt_ttk_seconds,
        };
        TicketPolicies {
            ticket_granting: granting,
            proxy_granting: granting,
            service: ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_live_seconds: self.st_ttl_seconds,
                number_of_uses: self.st_number_of_uses,
            },
            proxy: ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_live_seconds: self.pt_ttl_seconds,
                number_of_uses: 1,
            },
            access_token: ExpirationPolicy::TicketGranting {
                max_time_to_live_seconds: self.at_max_ttl_seconds,
                time_to_kill_seconds: self.at_ttk_seconds,
            },
        }
    }

    pub fn id_token_settings(&self) -> IdTokenSettings {
        IdTokenSettings {
            issuer: self.oidc_issuer.clone(),
            server_prefix: self.server_prefix.clone(),
            skew_seconds: self.oidc_skew_seconds,
            lifetime_seconds: self.oidc_id_token_ttl_seconds,
            supported_claims: self.oidc_claims.clone(),
            authn_context_attribute: self.authn_context_attribute.clone(),
        }
    }

    pub fn ticket_cache(&self) -> TicketCacheConfig {
        TicketCacheConfig {
            max_entries: self.ticket_cache_max_entries,
            time_to_live: Duration::from_secs(self.ticket_cache_ttl_seconds),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Seconds within `min..=MAX_SECONDS`.
fn parse_seconds<G>(get: &G, key: &'static str, default: i64, min: i64) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let seconds: i64 = parse_or(get, key, default)?;
    if (min..=MAX_SECONDS).contains(&seconds) {
        Ok(seconds)
    } else {
        Err(ConfigError::Invalid(key))
    }
}
