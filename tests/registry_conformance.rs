//! Registry conformance suite.
//!
//! Always runs against the plain registry over the in-memory store and
//! against the caching layer wrapped around it. The Redis and Postgres
//! stores join in when `REDIS_URL` / `DATABASE_URL` point at a scratch
//! server; their tickets are wiped before every check.

#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::sync::{Arc, LazyLock};

use cas_ticket_core::registry::store::{PgTicketStore, RedisTicketStore};
use cas_ticket_core::registry::{CachingTicketRegistry, DefaultTicketRegistry, TicketRegistry};
use cas_ticket_core::ticket::ManualClock;
use common::MemoryRegistry;
use tokio::sync::{Mutex, MutexGuard};

/// Checks against an external server share its keyspace, so they take
/// turns.
static EXTERNAL: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

struct Backend<R> {
    registry: R,
    _exclusive: Option<MutexGuard<'static, ()>>,
}

impl<R: TicketRegistry> Backend<R> {
    fn local(registry: R) -> Self {
        Self {
            registry,
            _exclusive: None,
        }
    }

    async fn external(registry: R, exclusive: MutexGuard<'static, ()>) -> Self {
        registry.delete_all().await.expect("wipe tickets");
        Self {
            registry,
            _exclusive: Some(exclusive),
        }
    }
}

async fn memory(clock: Arc<ManualClock>) -> Option<Backend<MemoryRegistry>> {
    Some(Backend::local(common::memory_registry(clock)))
}

async fn caching(
    clock: Arc<ManualClock>,
) -> Option<Backend<CachingTicketRegistry<MemoryRegistry>>> {
    Some(Backend::local(common::caching_registry(clock)))
}

async fn redis(
    clock: Arc<ManualClock>,
) -> Option<Backend<DefaultTicketRegistry<RedisTicketStore>>> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("REDIS_URL not set; skipping");
        return None;
    };
    let exclusive = EXTERNAL.lock().await;
    let store = RedisTicketStore::new(&url).await.expect("connect to redis");
    Some(Backend::external(DefaultTicketRegistry::new(store, clock), exclusive).await)
}

async fn postgres(
    clock: Arc<ManualClock>,
) -> Option<Backend<DefaultTicketRegistry<PgTicketStore>>> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    let exclusive = EXTERNAL.lock().await;
    let pool = sqlx::PgPool::connect(&url).await.expect("connect to postgres");
    let store = PgTicketStore::new(pool);
    store.ensure_schema().await.expect("schema");
    Some(Backend::external(DefaultTicketRegistry::new(store, clock), exclusive).await)
}

macro_rules! conformance {
    ($flavor:ident, $build:path) => {
        mod $flavor {
            use super::common;

            #[tokio::test]
            async fn add_then_get_round_trips() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::add_then_get_round_trips(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn duplicate_add_is_rejected() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::duplicate_add_is_rejected(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn missing_ticket_is_not_found() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::missing_ticket_is_not_found(&backend.registry).await;
            }

            #[tokio::test]
            async fn ticket_type_is_checked() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::ticket_type_is_checked(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_missing_is_a_no_op() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::delete_missing_is_a_no_op(&backend.registry).await;
            }

            #[tokio::test]
            async fn cascade_removes_exactly_the_descendants() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::cascade_removes_exactly_the_descendants(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn cascade_follows_proxy_chains() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::cascade_follows_proxy_chains(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn cyclic_chain_is_detected() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::cyclic_chain_is_detected(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn expired_ticket_is_never_returned() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::expired_ticket_is_never_returned(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn expired_parent_takes_children_along() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::expired_parent_takes_children_along(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn ticket_dies_with_its_granting_chain() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::ticket_dies_with_its_granting_chain(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn update_merges_concurrent_appends() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::update_merges_concurrent_appends(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn update_missing_is_not_found() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::update_missing_is_not_found(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn modify_counts_every_use() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::modify_counts_every_use(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn modify_refuses_wrong_type_and_expired() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::modify_refuses_wrong_type_and_expired(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn counts_cover_live_tickets_only() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::counts_cover_live_tickets_only(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn clean_expired_sweeps_descendants() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::clean_expired_sweeps_descendants(&backend.registry, &clock).await;
            }

            #[tokio::test]
            async fn delete_all_empties_the_registry() {
                let clock = common::manual_clock();
                let Some(backend) = $build(clock.clone()).await else {
                    return;
                };
                common::delete_all_empties_the_registry(&backend.registry, &clock).await;
            }
        }
    };
}

conformance!(memory, super::memory);
conformance!(caching, super::caching);
conformance!(redis, super::redis);
conformance!(postgres, super::postgres);
