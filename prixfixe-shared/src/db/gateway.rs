/// SQL execution primitives
///
/// Every statement the queriers run goes through one of these functions. They
/// accept anything that implements [`sqlx::Executor`] for Postgres, so the same
/// call works against the pool or against an open transaction
/// (`&mut *tx`). Each call runs in its own span and turns driver failures into
/// a [`DatabaseError`] kind:
///
/// | Primitive | Output | Zero rows |
/// |---|---|---|
/// | [`get_one_row`] | `PgRow` | `NoRows` |
/// | [`for_each_row`] / [`read_rows`] | streamed rows | empty |
/// | [`count`] | `u64` | `NoRows` |
/// | [`exists`] | `bool` | `false` |
/// | [`write`] | `()` | `NoRows` |
///
/// SQL text is logged at `trace` level.

use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Execute, Executor, Postgres, Row, Transaction};
use tracing::{error, instrument, trace, warn};

use crate::error::{DatabaseError, Result};

/// A parameterised statement ready to run
pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn log_sql(description: &'static str, query: &PgQuery<'_>) {
    trace!(query = description, sql = query.sql(), "executing statement");
}

fn driver_failure(description: &'static str, err: sqlx::Error) -> DatabaseError {
    error!(query = description, error = %err, "statement failed");
    DatabaseError::unavailable(description, err)
}

/// Fetches exactly one row
///
/// # Errors
///
/// `NoRows` if the statement returned nothing, `Unavailable` for driver failures.
#[instrument(level = "debug", skip_all, fields(query = description))]
pub async fn get_one_row<'e, 'c: 'e, 'q: 'e, E>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
) -> Result<PgRow>
where
    E: 'e + Executor<'c, Database = Postgres>,
{
    log_sql(description, &query);

    query
        .fetch_optional(executor)
        .await
        .map_err(|e| driver_failure(description, e))?
        .ok_or(DatabaseError::NoRows)
}

/// Streams rows one at a time into `visit`
///
/// Rows are never buffered. A failure while advancing the stream, including
/// the deferred error surfaced when the cursor closes, becomes `RowError`.
#[instrument(level = "debug", skip_all, fields(query = description))]
pub async fn for_each_row<'e, 'c: 'e, 'q: 'e, E, F>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
    mut visit: F,
) -> Result<()>
where
    E: 'e + Executor<'c, Database = Postgres>,
    F: FnMut(&PgRow) -> Result<()>,
{
    log_sql(description, &query);

    let mut rows = query.fetch(executor);
    while let Some(row) = rows.try_next().await.map_err(|e| {
        error!(query = description, error = %e, "row iteration failed");
        DatabaseError::row(description, e)
    })? {
        visit(&row)?;
    }

    Ok(())
}

/// Reads every row, scanning each with `scan`
pub async fn read_rows<'e, 'c: 'e, 'q: 'e, E, T>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
    scan: fn(&PgRow) -> Result<T>,
) -> Result<Vec<T>>
where
    E: 'e + Executor<'c, Database = Postgres>,
{
    let mut out = Vec::new();
    for_each_row(executor, description, query, |row| {
        out.push(scan(row)?);
        Ok(())
    })
    .await?;
    Ok(out)
}

/// Runs a `SELECT COUNT(...)` and returns the first column
#[instrument(level = "debug", skip_all, fields(query = description))]
pub async fn count<'e, 'c: 'e, 'q: 'e, E>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
) -> Result<u64>
where
    E: 'e + Executor<'c, Database = Postgres>,
{
    log_sql(description, &query);

    let row = query
        .fetch_optional(executor)
        .await
        .map_err(|e| driver_failure(description, e))?
        .ok_or(DatabaseError::NoRows)?;

    let value: i64 = row
        .try_get(0)
        .map_err(|e| DatabaseError::scan(description, e))?;

    Ok(value.max(0) as u64)
}

/// Runs a `SELECT EXISTS (...)`; no row at all counts as `false`
#[instrument(level = "debug", skip_all, fields(query = description))]
pub async fn exists<'e, 'c: 'e, 'q: 'e, E>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
) -> Result<bool>
where
    E: 'e + Executor<'c, Database = Postgres>,
{
    log_sql(description, &query);

    let row = query
        .fetch_optional(executor)
        .await
        .map_err(|e| driver_failure(description, e))?;

    match row {
        None => Ok(false),
        Some(row) => row
            .try_get::<bool, _>(0)
            .map_err(|e| DatabaseError::scan(description, e)),
    }
}

/// Runs an INSERT/UPDATE/DELETE that must touch at least one row
///
/// # Errors
///
/// `NoRows` when nothing matched. Driver errors are returned as
/// `Unavailable`; callers that need to inspect the SQLSTATE use
/// [`write_raw`].
pub async fn write<'e, 'c: 'e, 'q: 'e, E>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
) -> Result<()>
where
    E: 'e + Executor<'c, Database = Postgres>,
{
    match write_raw(executor, description, query).await {
        Ok(0) => Err(DatabaseError::NoRows),
        Ok(_) => Ok(()),
        Err(e) => Err(driver_failure(description, e)),
    }
}

/// Runs a statement and returns the affected row count untouched
#[instrument(level = "debug", skip_all, fields(query = description))]
pub async fn write_raw<'e, 'c: 'e, 'q: 'e, E>(
    executor: E,
    description: &'static str,
    query: PgQuery<'q>,
) -> std::result::Result<u64, sqlx::Error>
where
    E: 'e + Executor<'c, Database = Postgres>,
{
    log_sql(description, &query);
    Ok(query.execute(executor).await?.rows_affected())
}

/// Opens a transaction on the pool
pub async fn begin(pool: &PgPool, description: &'static str) -> Result<Transaction<'static, Postgres>> {
    pool.begin()
        .await
        .map_err(|e| driver_failure(description, e))
}

/// Commits, reporting failure as `Unavailable`
pub async fn commit(tx: Transaction<'static, Postgres>, description: &'static str) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| driver_failure(description, e))
}

/// Rolls back after a failed step
///
/// A rollback failure is logged; the step's error is what the caller returns.
pub async fn rollback(tx: Transaction<'static, Postgres>, description: &'static str) {
    warn!(query = description, "rolling back transaction");
    if let Err(e) = tx.rollback().await {
        error!(query = description, error = %e, "rollback failed");
    }
}

/// Commits on `Ok`, rolls back on `Err`, and passes the outcome through
pub async fn finish<T>(
    tx: Transaction<'static, Postgres>,
    description: &'static str,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            commit(tx, description).await?;
            Ok(value)
        }
        Err(e) => {
            rollback(tx, description).await;
            Err(e)
        }
    }
}
