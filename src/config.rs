use std::time::Duration;

use serde::Deserialize;

#[derive(Clone, Default, Deserialize)]
pub struct Config {
    pub db_path: Option<String>,
    pub host: Option<String>,
    pub batch_size: Option<u32>,
    pub max_attempts: Option<u32>,
    pub delivery_timeout_secs: Option<u64>,
    pub claim_timeout_secs: Option<u64>,
    pub process_interval_secs: Option<u64>,
    pub smtp_relay: Option<String>,
    pub smtp_from: Option<String>,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("RELAYQ_").from_env::<Self>()?)
    }

    pub fn db_path(&self) -> &str {
        self.db_path
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("relayq.db")
    }

    pub fn host(&self) -> &str {
        self.host
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("127.0.0.1:8080")
    }

    /// Upper bound on items claimed per processor pass.
    pub fn batch_size(&self) -> u32 {
        self.batch_size.unwrap_or(50)
    }

    /// Attempt budget stamped onto new items at enqueue time.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    /// Bound on a single transport call.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.unwrap_or(30))
    }

    /// Age after which an unfinished claim becomes visible again.
    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_secs.unwrap_or(300) as i64)
    }

    /// Interval for the built-in processor loop. None leaves processing to
    /// an external scheduler hitting the process endpoint.
    pub fn process_interval(&self) -> Option<Duration> {
        self.process_interval_secs.map(Duration::from_secs)
    }
}
