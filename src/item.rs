use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery class of a queued notification. Fixed at creation, drives the
/// retry schedule.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    sqlx::Type,
    strum::Display,
    strum::EnumString,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelClass {
    Critical,
    Normal,
}

/// Opaque message content. The queue never interprets these fields, they are
/// handed to the transport as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payload {
    pub subject: String,
    pub body: String,
    pub alt_text: Option<String>,
}

impl Payload {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            alt_text: None,
        }
    }
}

/// One row of the delivery queue.
///
/// Lifecycle: live (both terminal timestamps null) until an attempt either
/// succeeds (`sent_at`) or exhausts the budget (`failed_at`). Terminal rows
/// are never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub channel: ChannelClass,
    pub recipient: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub payload: Payload,
    pub attempts: i64,
    pub max_attempts: i64,
    pub created_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Whether this row has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.sent_at.is_some() || self.failed_at.is_some()
    }
}

/// Immutable snapshot of a permanently failed item. Written once, never
/// updated by the system. `notes` is free-form operator space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: i64,
    pub item_id: i64,
    pub channel: ChannelClass,
    pub recipient: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub payload: Payload,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub notes: Option<String>,
}

/// Point-in-time queue counters. `pending` and `processing` partition the
/// live rows; the daily counters cover the current UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub sent_today: i64,
    pub failed_today: i64,
}

/// Outcome counts for one processor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub processed: u64,
    pub sent: u64,
    pub failed: u64,
}
