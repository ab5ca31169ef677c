//! Postgres-backed ledger store.
//!
//! Persists account streams in a single `ledger_events` table. The database
//! enforces the same contract as the in-memory store:
//!
//! | Constraint | Violation maps to |
//! |------------|-------------------|
//! | `PRIMARY KEY (event_id)` | `DuplicateKey` |
//! | `UNIQUE (account_id, sequence_number)` | `Concurrency` (lost compare-and-swap) |
//! | `UNIQUE (unique_key)` | `DuplicateKey` (e.g. second refund of a purchase) |
//!
//! Other SQLx failures map to `Backend`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use heartbank_core::{AccountId, ExpectedVersion};

use super::r#trait::{LedgerStore, LedgerStoreError, StoredEvent, UncommittedEvent};

/// Table definition applied by `ensure_schema()`.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_events (
    event_id        UUID PRIMARY KEY,
    account_id      UUID NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT NOT NULL,
    event_version   INTEGER NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    unique_key      TEXT UNIQUE,
    payload         JSONB NOT NULL,
    recorded_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT ledger_events_stream_position UNIQUE (account_id, sequence_number)
);
"#;

const STREAM_POSITION_CONSTRAINT: &str = "ledger_events_stream_position";

/// Postgres-backed append-only ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `DATABASE_URL`.
    pub async fn connect_from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let pool = PgPool::connect(&url)
            .await
            .with_context(|| "failed to connect to ledger database".to_string())?;
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> Result<(), LedgerStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, events), fields(event_count = events.len()), err)]
    pub async fn append_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let account_id = events[0].account_id;
        if let Some(idx) = events.iter().position(|e| e.account_id != account_id) {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "batch contains multiple account_ids (index {idx})"
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM ledger_events WHERE account_id = $1",
        )
        .bind(*account_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("stream_version", e))?;
        let current = current as u64;

        if !expected_version.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO ledger_events (
                    event_id, account_id, sequence_number, event_type,
                    event_version, occurred_at, unique_key, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(*account_id.as_uuid())
            .bind(next as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.unique_key)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(next, e))?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                account_id,
                sequence_number: next,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn load_account_stream(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, account_id, sequence_number, event_type,
                   event_version, occurred_at, payload
            FROM ledger_events
            WHERE account_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(*account_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_event_by_id(
        &self,
        event_id: Uuid,
    ) -> Result<Option<StoredEvent>, LedgerStoreError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, account_id, sequence_number, event_type,
                   event_version, occurred_at, payload
            FROM ledger_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_event", e))?;

        row.as_ref().map(stored_event_from_row).transpose()
    }

    /// Run an async store operation from the synchronous `LedgerStore` API.
    ///
    /// Requires a multi-threaded Tokio runtime.
    fn block_on<F, T>(&self, fut: F) -> Result<T, LedgerStoreError>
    where
        F: std::future::Future<Output = Result<T, LedgerStoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            LedgerStoreError::Backend("PostgresLedgerStore requires a Tokio runtime".to_string())
        })?;
        tokio::task::block_in_place(|| handle.block_on(fut))
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        self.block_on(self.append_events(events, expected_version))
    }

    fn load_stream(&self, account_id: AccountId) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        self.block_on(self.load_account_stream(account_id))
    }

    fn load_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, LedgerStoreError> {
        self.block_on(self.load_event_by_id(event_id))
    }
}

fn stored_event_from_row(row: &PgRow) -> Result<StoredEvent, LedgerStoreError> {
    let decode = |e: sqlx::Error| LedgerStoreError::Backend(format!("failed to decode event row: {e}"));

    let sequence_number: i64 = row.try_get("sequence_number").map_err(decode)?;
    let event_version: i32 = row.try_get("event_version").map_err(decode)?;
    let account_id: Uuid = row.try_get("account_id").map_err(decode)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(decode)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(decode)?,
        account_id: AccountId::from_uuid(account_id),
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(decode)?,
        event_version: event_version as u32,
        occurred_at,
        payload: row.try_get("payload").map_err(decode)?,
    })
}

fn map_insert_error(sequence_number: u64, err: sqlx::Error) -> LedgerStoreError {
    let Some(db) = err.as_database_error() else {
        return map_sqlx_error("insert_event", err);
    };
    if db.code().as_deref() != Some("23505") {
        return map_sqlx_error("insert_event", err);
    }
    match db.constraint() {
        Some(STREAM_POSITION_CONSTRAINT) => LedgerStoreError::Concurrency(format!(
            "concurrent append detected: sequence_number {sequence_number} already exists"
        )),
        Some(constraint) => LedgerStoreError::DuplicateKey(constraint.to_string()),
        None => LedgerStoreError::DuplicateKey(db.message().to_string()),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    LedgerStoreError::Backend(format!("{operation}: {err}"))
}
