use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    error::Error,
    item::{ChannelClass, DeadLetter, Payload, QueueItem, QueueStats},
};

pub async fn insert_item(
    db: &mut SqliteConnection,
    channel: ChannelClass,
    recipient: &str,
    payload: &Payload,
    max_attempts: i64,
    now: DateTime<Utc>,
) -> Result<i64, Error> {
    let id = sqlx::query_scalar(
        "
        INSERT INTO queue_items
            (channel, recipient, subject, body, alt_text, attempts, max_attempts, created_at)
        VALUES ($1, $2, $3, $4, $5, 0, $6, $7)
        RETURNING id
        ",
    )
    .bind(channel)
    .bind(recipient)
    .bind(&payload.subject)
    .bind(&payload.body)
    .bind(&payload.alt_text)
    .bind(max_attempts)
    .bind(now)
    .fetch_one(db)
    .await?;

    Ok(id)
}

pub async fn fetch_item(
    db: &mut SqliteConnection,
    id: i64,
) -> Result<Option<QueueItem>, Error> {
    Ok(
        sqlx::query_as("SELECT * FROM queue_items WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?,
    )
}

/// Atomically claim up to `batch` due items, oldest first.
///
/// Due means live (neither terminal timestamp set), past any backoff wait,
/// and not already claimed within the visibility window (`claim_cutoff` is
/// now minus the claim timeout). Marking `claimed_at` in the same statement
/// that selects keeps overlapping processor invocations from claiming the
/// same row.
pub async fn claim_due(
    db: &mut SqliteConnection,
    now: DateTime<Utc>,
    claim_cutoff: DateTime<Utc>,
    batch: u32,
) -> Result<Vec<QueueItem>, Error> {
    let mut items: Vec<QueueItem> = sqlx::query_as(
        "
        UPDATE queue_items SET claimed_at = $1
        WHERE id IN (
            SELECT id FROM queue_items
            WHERE sent_at IS NULL AND failed_at IS NULL
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
              AND (claimed_at IS NULL OR claimed_at <= $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
        )
        RETURNING *
        ",
    )
    .bind(now)
    .bind(claim_cutoff)
    .bind(batch as i64)
    .fetch_all(db)
    .await?;

    // RETURNING row order is unspecified in SQLite.
    items.sort_by_key(|item| (item.created_at, item.id));

    Ok(items)
}

/// Record a successful delivery. Conditioned on the row still being live so
/// a terminal item can never be re-marked.
pub async fn mark_sent(
    db: &mut SqliteConnection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    sqlx::query(
        "
        UPDATE queue_items
        SET sent_at = $2, attempts = attempts + 1, claimed_at = NULL
        WHERE id = $1 AND sent_at IS NULL AND failed_at IS NULL
        ",
    )
    .bind(id)
    .bind(now)
    .execute(db)
    .await?;

    Ok(())
}

/// Record a failed attempt that still has budget left and schedule the next
/// one.
pub async fn reschedule(
    db: &mut SqliteConnection,
    id: i64,
    next_retry_at: DateTime<Utc>,
    last_error: &str,
) -> Result<(), Error> {
    sqlx::query(
        "
        UPDATE queue_items
        SET attempts = attempts + 1, next_retry_at = $2, last_error = $3, claimed_at = NULL
        WHERE id = $1 AND sent_at IS NULL AND failed_at IS NULL
        ",
    )
    .bind(id)
    .bind(next_retry_at)
    .bind(last_error)
    .execute(db)
    .await?;

    Ok(())
}

/// Record the final failed attempt. The row becomes terminal.
pub async fn mark_failed(
    db: &mut SqliteConnection,
    id: i64,
    now: DateTime<Utc>,
    last_error: &str,
) -> Result<(), Error> {
    sqlx::query(
        "
        UPDATE queue_items
        SET attempts = attempts + 1, failed_at = $2, last_error = $3, claimed_at = NULL
        WHERE id = $1 AND sent_at IS NULL AND failed_at IS NULL
        ",
    )
    .bind(id)
    .bind(now)
    .bind(last_error)
    .execute(db)
    .await?;

    Ok(())
}

/// Snapshot a permanently failed item. Inserting twice for the same item is
/// a no-op, the first snapshot wins.
pub async fn insert_dead_letter(
    db: &mut SqliteConnection,
    item: &QueueItem,
    attempts: i64,
    failed_at: DateTime<Utc>,
    last_error: &str,
) -> Result<(), Error> {
    sqlx::query(
        "
        INSERT INTO dead_letters
            (item_id, channel, recipient, subject, body, alt_text,
             attempts, created_at, failed_at, last_error)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (item_id) DO NOTHING
        ",
    )
    .bind(item.id)
    .bind(item.channel)
    .bind(&item.recipient)
    .bind(&item.payload.subject)
    .bind(&item.payload.body)
    .bind(&item.payload.alt_text)
    .bind(attempts)
    .bind(item.created_at)
    .bind(failed_at)
    .bind(last_error)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn list_dead_letters(
    db: &mut SqliteConnection,
    limit: u32,
) -> Result<Vec<DeadLetter>, Error> {
    Ok(sqlx::query_as(
        "SELECT * FROM dead_letters ORDER BY failed_at DESC, id DESC LIMIT $1",
    )
    .bind(limit as i64)
    .fetch_all(db)
    .await?)
}

/// Aggregate counters in one pass. `pending` and `processing` partition the
/// live rows on whether their backoff wait has elapsed; the daily counters
/// are bounded by the caller-supplied day window.
pub async fn stats(
    db: &mut SqliteConnection,
    now: DateTime<Utc>,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> Result<QueueStats, Error> {
    Ok(sqlx::query_as(
        "
        SELECT
            COUNT(*) FILTER (
                WHERE sent_at IS NULL AND failed_at IS NULL
                  AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ) AS pending,
            COUNT(*) FILTER (
                WHERE sent_at IS NULL AND failed_at IS NULL
                  AND next_retry_at > $1
            ) AS processing,
            COUNT(*) FILTER (
                WHERE sent_at >= $2 AND sent_at < $3
            ) AS sent_today,
            COUNT(*) FILTER (
                WHERE failed_at >= $2 AND failed_at < $3
            ) AS failed_today
        FROM queue_items
        ",
    )
    .bind(now)
    .bind(day_start)
    .bind(day_end)
    .fetch_one(db)
    .await?)
}
