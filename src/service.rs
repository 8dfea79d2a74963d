use std::{sync::Arc, time::Duration};

use chrono::{NaiveTime, Utc};
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
    SqlitePoolOptions,
};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::time::MissedTickBehavior;

use crate::{
    backoff,
    config::Config,
    error::Error,
    item::{ChannelClass, DeadLetter, Payload, ProcessReport, QueueItem, QueueStats},
    store,
    transport::DeliveryTransport,
};

#[derive(Clone)]
pub struct Service {
    db: SqlitePool,
    config: Config,
    transport: Arc<dyn DeliveryTransport>,
}

impl Service {
    pub async fn connect(transport: Arc<dyn DeliveryTransport>) -> eyre::Result<Self> {
        Self::connect_with(Config::default(), transport).await
    }

    pub async fn connect_with(
        config: Config,
        transport: Arc<dyn DeliveryTransport>,
    ) -> eyre::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(config.db_path())
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Normal)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            db: pool,
            config,
            transport,
        })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queue a notification for asynchronous delivery.
    ///
    /// Returns the new item's id. No delivery attempt happens here; the item
    /// becomes eligible for the next processor pass immediately.
    pub async fn try_enqueue(
        &self,
        channel: ChannelClass,
        recipient: &str,
        payload: Payload,
    ) -> Result<i64, Error> {
        if recipient.trim().is_empty() {
            return Err(Error::invalid_parameter("recipient must not be empty"));
        }

        let mut conn = self.db.acquire().await?;

        let id = store::insert_item(
            &mut conn,
            channel,
            recipient,
            &payload,
            self.config.max_attempts() as i64,
            Utc::now(),
        )
        .await?;

        tracing::info!(id, %channel, recipient, "enqueued notification");

        Ok(id)
    }

    /// Best-effort variant of [`Service::try_enqueue`]: a failed store write
    /// is logged and reported as `None` so notification delivery never takes
    /// down the caller's own transaction.
    pub async fn enqueue(
        &self,
        channel: ChannelClass,
        recipient: &str,
        payload: Payload,
    ) -> Option<i64> {
        match self.try_enqueue(channel, recipient, payload).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(%err, %channel, recipient, "enqueue failed");
                None
            }
        }
    }

    /// Deliver synchronously, retrying in-process with short fixed delays.
    ///
    /// Returns `true` on the first successful attempt. When every in-process
    /// try fails the item falls back onto the durable queue as a critical
    /// item and the caller gets `false`; transport errors never propagate.
    pub async fn send_critical(&self, recipient: &str, payload: Payload) -> bool {
        for attempt in 1..=backoff::IMMEDIATE_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(backoff::IMMEDIATE_RETRY_DELAYS[attempt - 2]).await;
            }

            match self.attempt(recipient, &payload).await {
                Ok(()) => {
                    tracing::info!(recipient, attempt, "immediate delivery succeeded");
                    return true;
                }
                Err(error) => {
                    tracing::warn!(
                        recipient,
                        attempt,
                        error = %error,
                        "immediate delivery attempt failed"
                    );
                }
            }
        }

        if self
            .enqueue(ChannelClass::Critical, recipient, payload)
            .await
            .is_none()
        {
            tracing::error!(
                recipient,
                "fallback enqueue after failed immediate delivery did not persist"
            );
        }

        false
    }

    /// One processor pass: claim a batch of due items oldest-first and
    /// attempt each one exactly once.
    ///
    /// Per-item store failures are logged and skipped rather than aborting
    /// the batch; an item whose outcome could not be recorded has not
    /// advanced and will be claimed again once its claim expires.
    pub async fn process_queue(&self) -> Result<ProcessReport, Error> {
        let now = Utc::now();
        let claim_cutoff = now - self.config.claim_timeout();

        let mut conn = self.db.acquire().await?;

        let items = store::claim_due(&mut conn, now, claim_cutoff, self.config.batch_size()).await?;

        let mut report = ProcessReport {
            processed: items.len() as u64,
            ..Default::default()
        };

        for item in items {
            match self.attempt(&item.recipient, &item.payload).await {
                Ok(()) => {
                    report.sent += 1;

                    if let Err(err) = store::mark_sent(&mut conn, item.id, Utc::now()).await {
                        tracing::error!(
                            item = item.id,
                            %err,
                            "delivered but could not record success; item may be retried"
                        );
                    }
                }
                Err(error) => {
                    report.failed += 1;

                    let attempts = item.attempts + 1;

                    if attempts >= item.max_attempts {
                        self.finalize_failure(&mut conn, &item, attempts, &error).await;
                    } else {
                        let delay = backoff::delay_for(item.channel, attempts);
                        let next_retry_at =
                            Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);

                        tracing::warn!(
                            item = item.id,
                            attempts,
                            error = %error,
                            retry_in = delay.as_secs(),
                            "delivery attempt failed, rescheduled"
                        );

                        if let Err(err) =
                            store::reschedule(&mut conn, item.id, next_retry_at, &error).await
                        {
                            tracing::error!(item = item.id, %err, "could not record reschedule");
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Fetch a single queue item by id.
    pub async fn item(&self, id: i64) -> Result<Option<QueueItem>, Error> {
        let mut conn = self.db.acquire().await?;

        store::fetch_item(&mut conn, id).await
    }

    /// Current queue counters, computed from the store at call time.
    pub async fn stats(&self) -> Result<QueueStats, Error> {
        let now = Utc::now();
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + chrono::Duration::days(1);

        let mut conn = self.db.acquire().await?;

        store::stats(&mut conn, now, day_start, day_end).await
    }

    /// Most recent dead letters, newest first.
    pub async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>, Error> {
        let mut conn = self.db.acquire().await?;

        store::list_dead_letters(&mut conn, limit).await
    }

    /// Run [`Service::process_queue`] on a fixed cadence until the task is
    /// aborted. Each tick is stateless, so external scheduler invocations
    /// may coexist with this loop.
    pub fn spawn_interval_processor(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let service = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                match service.process_queue().await {
                    Ok(report) if report.processed > 0 => {
                        tracing::info!(
                            processed = report.processed,
                            sent = report.sent,
                            failed = report.failed,
                            "processed queue batch"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(%err, "queue processing pass failed"),
                }
            }
        })
    }

    /// One transport call bounded by the configured timeout. The error is
    /// flattened to the diagnostic string stored in `last_error`.
    async fn attempt(&self, recipient: &str, payload: &Payload) -> Result<(), String> {
        let deadline = self.config.delivery_timeout();

        match tokio::time::timeout(deadline, self.transport.deliver(recipient, payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "delivery timed out after {}s",
                deadline.as_secs()
            )),
        }
    }

    async fn finalize_failure(
        &self,
        conn: &mut SqliteConnection,
        item: &QueueItem,
        attempts: i64,
        error: &str,
    ) {
        let failed_at = Utc::now();

        tracing::warn!(
            item = item.id,
            attempts,
            error,
            "attempt budget exhausted, dead-lettering"
        );

        if let Err(err) = store::mark_failed(conn, item.id, failed_at, error).await {
            tracing::error!(item = item.id, %err, "could not record permanent failure");
            return;
        }

        // Best effort: the failed_at write above is authoritative, a missing
        // dead letter only loses the operator-facing snapshot.
        if let Err(err) = store::insert_dead_letter(conn, item, attempts, failed_at, error).await {
            tracing::error!(item = item.id, %err, "could not write dead letter record");
        }
    }
}
