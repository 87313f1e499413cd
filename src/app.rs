/*
 * Responsibility
 * - Tracing + panic hook
 * - Config -> ticket store -> registry (optionally cached) -> facade
 * - Background tasks (cleaner, invalidation listener) until Ctrl-C
 */
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ConfigError, RegistryBackend};
use crate::facade::CentralAuthenticationService;
use crate::registered_service::InMemoryServicesManager;
use crate::registry::cleaner::spawn_cleaner;
use crate::registry::invalidation::{
    InvalidationBus, LocalInvalidationBus, RedisInvalidationBus,
};
use crate::registry::store::{MemoryTicketStore, PgTicketStore, RedisTicketStore};
use crate::registry::{CachingTicketRegistry, DefaultTicketRegistry, TicketRegistry};
use crate::state::AppState;
use crate::ticket::{Clock, SystemClock, TicketIdGenerator};
use crate::token::{IdTokenGenerator, IdTokenSigningAndEncryptionService, JwtIdTokenSigner};

fn init_tracing() {
    // RUST_LOG wins, e.g. RUST_LOG=info,cas_ticket_core=debug
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        tracing::error!(?info, "panic");

        // Development: crash loudly. Production: default hook, keep running.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        app_env = ?config.app_env,
        registry = ?config.ticket_registry,
        cache = config.ticket_cache_enabled,
        "starting ticket core"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (registry, listener) = build_registry(&config, clock.clone()).await?;
    let state = build_state(&config, registry, clock)?;

    let cleaner = (config.ticket_cleaner_interval_seconds > 0).then(|| {
        spawn_cleaner(
            state.registry.clone(),
            Duration::from_secs(config.ticket_cleaner_interval_seconds),
        )
    });

    tracing::info!(server_prefix = %config.server_prefix, "ticket core ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    if let Some(cleaner) = cleaner {
        cleaner.stop().await;
    }
    if let Some(listener) = listener {
        listener.abort();
    }
    Ok(())
}

fn build_state(
    config: &Config,
    registry: Arc<dyn TicketRegistry>,
    clock: Arc<dyn Clock>,
) -> Result<AppState> {
    let services = match &config.services_file {
        Some(path) => InMemoryServicesManager::from_json_file(path)?,
        None => {
            tracing::warn!("SERVICES_FILE not set; no service is authorized");
            InMemoryServicesManager::default()
        }
    };
    let services = Arc::new(services);

    if config.accept_users.is_empty() {
        tracing::warn!("ACCEPT_USERS not set; password authentication rejects everyone");
    }
    let authentication_manager = Arc::new(config.accept_users.clone());

    // Signs ID tokens with the server RSA key; "none" runs without key material.
    let signer: Arc<dyn IdTokenSigningAndEncryptionService> = match &config.oidc_signing_key_pem {
        Some(pem) => Arc::new(JwtIdTokenSigner::new(
            pem,
            config.oidc_signing_key_id.clone(),
            config.oidc_signing_alg.clone(),
        )?),
        None => Arc::new(JwtIdTokenSigner::unsigned()),
    };

    let token_generator = Arc::new(IdTokenGenerator::new(
        config.id_token_settings(),
        registry.clone(),
        services.clone(),
        signer,
        clock.clone(),
    ));
    let ids = Arc::new(TicketIdGenerator::new(config.ticket_id_suffix.clone())?);

    let cas = CentralAuthenticationService::new(
        registry,
        services,
        authentication_manager,
        token_generator,
        ids,
        config.ticket_policies(),
        clock,
    );
    Ok(AppState::new(cas))
}

async fn build_registry(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn TicketRegistry>, Option<JoinHandle<()>>)> {
    match config.ticket_registry {
        RegistryBackend::Memory => {
            let registry = DefaultTicketRegistry::new(MemoryTicketStore::new(), clock.clone());
            with_cache(config, registry, clock, None).await
        }
        RegistryBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or(ConfigError::Missing("REDIS_URL"))?;
            let store = RedisTicketStore::new(url).await?;
            store.ping().await?;
            let bus = redis_bus(config).await?;
            let registry = DefaultTicketRegistry::new(store, clock.clone());
            with_cache(config, registry, clock, bus).await
        }
        RegistryBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let pool = sqlx::PgPool::connect(url).await?;
            let store = PgTicketStore::new(pool);
            store.ensure_schema().await?;
            let bus = redis_bus(config).await?;
            let registry = DefaultTicketRegistry::new(store, clock.clone());
            with_cache(config, registry, clock, bus).await
        }
    }
}

// Cross-node cache invalidation rides on Redis whenever it is configured.
async fn redis_bus(config: &Config) -> Result<Option<Arc<dyn InvalidationBus>>> {
    match (&config.redis_url, config.ticket_cache_enabled) {
        (Some(url), true) => {
            let bus = RedisInvalidationBus::new(url, RedisInvalidationBus::DEFAULT_CHANNEL).await?;
            Ok(Some(Arc::new(bus)))
        }
        _ => Ok(None),
    }
}

async fn with_cache<R: TicketRegistry>(
    config: &Config,
    registry: R,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<dyn InvalidationBus>>,
) -> Result<(Arc<dyn TicketRegistry>, Option<JoinHandle<()>>)> {
    if !config.ticket_cache_enabled {
        return Ok((Arc::new(registry), None));
    }

    let bus = bus.unwrap_or_else(|| Arc::new(LocalInvalidationBus::default()));
    let cached = CachingTicketRegistry::new(registry, clock, config.ticket_cache()).with_bus(bus);
    let listener = cached.listen().await?;
    Ok((Arc::new(cached), Some(listener)))
}
