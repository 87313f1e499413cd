use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use crate::registry::store::{StoreResult, TicketRecord, TicketStore};

const SCHEMA: &str = include_str!("../../../migrations/0001_tickets.sql");

/// Postgres-backed ticket store: one row per ticket, the encoded ticket kept
/// as an opaque document.
///
/// Schema (see `migrations/0001_tickets.sql`):
///   - tickets.id (text, primary key)
///   - tickets.ticket_type (text)
///   - tickets.body (bytea)
///   - tickets.expires_at (timestamptz, nullable) // from the lifetime hint
///   - tickets.updated_at (timestamptz)
///
/// Rows past `expires_at` are treated as gone.
#[derive(Clone, Debug)]
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table when it does not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn expires_at(record: &TicketRecord) -> Option<DateTime<Utc>> {
        record
            .ttl
            .and_then(|ttl| ChronoDuration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl)
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_if_absent(&self, record: &TicketRecord) -> StoreResult<bool> {
        // A row past its lifetime does not block a new ticket with the same id.
        let done = sqlx::query(
            r#"
            INSERT INTO tickets (id, ticket_type, body, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET ticket_type = EXCLUDED.ticket_type,
                body = EXCLUDED.body,
                expires_at = EXCLUDED.expires_at,
                updated_at = now()
            WHERE tickets.expires_at IS NOT NULL
                AND tickets.expires_at <= now()
            "#,
        )
        .bind(&record.id)
        .bind(record.ticket_type.prefix())
        .bind(&record.body)
        .bind(Self::expires_at(record))
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn replace(&self, record: &TicketRecord) -> StoreResult<bool> {
        let done = sqlx::query(
            r#"
            UPDATE tickets
            SET body = $2,
                expires_at = $3,
                updated_at = now()
            WHERE id = $1
                AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(&record.id)
        .bind(&record.body)
        .bind(Self::expires_at(record))
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let body = sqlx::query_scalar::<_, Vec<u8>>(
            r#"
            SELECT body
            FROM tickets
            WHERE id = $1
                AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(body)
    }

    async fn delete(&self, id: &str) -> StoreResult<u64> {
        let done = sqlx::query(
            r#"
            DELETE FROM tickets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn scan(&self) -> StoreResult<Vec<Vec<u8>>> {
        let bodies = sqlx::query_scalar::<_, Vec<u8>>(
            r#"
            SELECT body
            FROM tickets
            WHERE expires_at IS NULL OR expires_at > now()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(bodies)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let done = sqlx::query(
            r#"
            DELETE FROM tickets
            WHERE expires_at IS NOT NULL
                AND expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn clear(&self) -> StoreResult<u64> {
        let done = sqlx::query("DELETE FROM tickets")
            .execute(&self.pool)
            .await?;

        Ok(done.rows_affected())
    }
}
