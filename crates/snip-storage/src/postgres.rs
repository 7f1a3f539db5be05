use crate::{DEFAULT_HEALTHCHECK_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};
use async_trait::async_trait;
use jiff::Timestamp;
use snip_core::error::{Result, StorageError};
use snip_core::{
    with_deadline, BatchCreated, CreateOutcome, NewUrl, ReadRepository, Repository, ShortCode,
    UrlRecord,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

const BACKEND: &str = "postgres";

const SHORT_CODE_CONSTRAINT: &str = "short_urls_short_code_key";
const ORIGINAL_URL_CONSTRAINT: &str = "short_urls_original_url_key";

const SCHEMA: &str = include_str!("../ddl/postgres/short_urls.sql");

/// PostgreSQL implementation of the repository contract.
///
/// Uniqueness of both the short code and the original URL is enforced by
/// table constraints. Soft deletion clears `active`; rows are never removed.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
    operation_timeout: Duration,
    healthcheck_timeout: Duration,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            healthcheck_timeout: DEFAULT_HEALTHCHECK_TIMEOUT,
        }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(DEFAULT_OPERATION_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        info!(max_connections, "connected to postgres");
        Ok(Self::new(pool))
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_healthcheck_timeout(mut self, timeout: Duration) -> Self {
        self.healthcheck_timeout = timeout;
        self
    }

    /// Creates the `short_urls` table and its indexes if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("applied short_urls schema");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn existing_code(&self, original_url: &str) -> Result<Option<ShortCode>> {
        let row = sqlx::query("SELECT short_code FROM short_urls WHERE original_url = $1")
            .bind(original_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|row| short_code_from_row(&row)).transpose()
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    db_err.constraint()
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn short_code_from_row(row: &PgRow) -> Result<ShortCode> {
    let code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    Ok(ShortCode::new_unchecked(code))
}

fn record_from_row(row: &PgRow) -> Result<UrlRecord> {
    let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;

    Ok(UrlRecord {
        id: u64::try_from(id)
            .map_err(|_| StorageError::InvalidData(format!("negative record id {id}")))?,
        short_code: short_code_from_row(row)?,
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_id: row.try_get("owner_id").map_err(map_sqlx_error)?,
        active: row.try_get("active").map_err(map_sqlx_error)?,
        created_at: Timestamp::from_microsecond(created_at).map_err(|e| {
            StorageError::InvalidData(format!("invalid created_at timestamp '{created_at}': {e}"))
        })?,
    })
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewUrl,
    owner_id: &str,
    created_at: i64,
) -> Result<ShortCode> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO short_urls (short_code, original_url, owner_id, active, created_at)
        VALUES ($1, $2, $3, TRUE, $4)
        ON CONFLICT (original_url) DO NOTHING
        RETURNING short_code
        "#,
    )
    .bind(entry.short_code.as_str())
    .bind(&entry.original_url)
    .bind(owner_id)
    .bind(created_at)
    .fetch_optional(&mut **tx)
    .await;

    match inserted {
        Ok(Some(row)) => short_code_from_row(&row),
        Ok(None) => {
            let row = sqlx::query("SELECT short_code FROM short_urls WHERE original_url = $1")
                .bind(&entry.original_url)
                .fetch_one(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;
            short_code_from_row(&row)
        }
        Err(err) if violated_constraint(&err) == Some(SHORT_CODE_CONSTRAINT) => {
            Err(StorageError::CodeTaken(entry.short_code.to_string()))
        }
        Err(err) => Err(map_sqlx_error(err)),
    }
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        with_deadline("get", self.operation_timeout, async {
            let row = sqlx::query(
                r#"
                SELECT id, short_code, original_url, owner_id, active, created_at
                FROM short_urls
                WHERE short_code = $1
                "#,
            )
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            row.map(|row| record_from_row(&row)).transpose()
        })
        .await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        with_deadline("list_by_owner", self.operation_timeout, async {
            let rows = sqlx::query(
                r#"
                SELECT id, short_code, original_url, owner_id, active, created_at
                FROM short_urls
                WHERE owner_id = $1
                ORDER BY id
                "#,
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(record_from_row).collect()
        })
        .await
    }

    async fn healthcheck(&self) -> Result<()> {
        with_deadline("healthcheck", self.healthcheck_timeout, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert(
        &self,
        original_url: &str,
        code: &ShortCode,
        owner_id: &str,
    ) -> Result<CreateOutcome> {
        with_deadline("insert", self.operation_timeout, async {
            let result = sqlx::query(
                r#"
                INSERT INTO short_urls (short_code, original_url, owner_id, active, created_at)
                VALUES ($1, $2, $3, TRUE, $4)
                "#,
            )
            .bind(code.as_str())
            .bind(original_url)
            .bind(owner_id)
            .bind(Timestamp::now().as_microsecond())
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(CreateOutcome::Created(code.clone())),
                Err(err) => match violated_constraint(&err).map(str::to_owned).as_deref() {
                    Some(ORIGINAL_URL_CONSTRAINT) => {
                        let existing = self.existing_code(original_url).await?.ok_or_else(|| {
                            StorageError::InvalidData(format!(
                                "url conflict reported but no row found for {original_url}"
                            ))
                        })?;
                        debug!(code = %existing, "url already shortened");
                        Ok(CreateOutcome::Existing(existing))
                    }
                    Some(SHORT_CODE_CONSTRAINT) => Err(StorageError::CodeTaken(code.to_string())),
                    _ => Err(map_sqlx_error(err)),
                },
            }
        })
        .await
    }

    async fn insert_batch(
        &self,
        entries: Vec<NewUrl>,
        owner_id: &str,
    ) -> Result<Vec<BatchCreated>> {
        with_deadline("insert_batch", self.operation_timeout, async {
            let created_at = Timestamp::now().as_microsecond();
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            let mut results = Vec::with_capacity(entries.len());

            // Dropping `tx` on an error path rolls the transaction back.
            for entry in entries {
                let short_code = insert_entry(&mut tx, &entry, owner_id, created_at).await?;
                results.push(BatchCreated {
                    correlation_id: entry.correlation_id,
                    short_code,
                });
            }

            tx.commit().await.map_err(map_sqlx_error)?;
            Ok(results)
        })
        .await
    }

    async fn deactivate_batch(&self, codes: &[ShortCode], owner_id: &str) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let codes: Vec<String> = codes.iter().map(ShortCode::to_string).collect();
        with_deadline("deactivate_batch", self.operation_timeout, async {
            let result = sqlx::query(
                r#"
                UPDATE short_urls
                SET active = FALSE
                WHERE short_code = ANY($1)
                  AND owner_id = $2
                  AND active
                "#,
            )
            .bind(&codes)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(result.rows_affected())
        })
        .await
    }
}
