use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use super::{DeliveryTransport, TransportError};
use crate::item::Payload;

/// Records deliveries instead of performing them. Outcomes can be scripted
/// ahead of time, which makes this the transport for tests and for
/// development boots without an SMTP relay configured.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    failures: VecDeque<String>,
    delivered: Vec<Delivery>,
    attempts: u64,
    delay: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipient: String,
    pub payload: Payload,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the next `n` calls to fail with `message`. Calls with nothing
    /// scripted succeed.
    pub fn fail_times(&self, n: usize, message: &str) {
        let mut state = self.state();
        for _ in 0..n {
            state.failures.push_back(message.to_owned());
        }
    }

    /// Make every call sleep for `delay` before resolving.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Number of delivery calls made so far, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.state().attempts
    }

    /// Successful deliveries in call order.
    pub fn delivered(&self) -> Vec<Delivery> {
        self.state().delivered.clone()
    }
}

#[async_trait]
impl DeliveryTransport for MemoryTransport {
    async fn deliver(&self, recipient: &str, payload: &Payload) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state();
            state.attempts += 1;
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(message) = state.failures.pop_front() {
            return Err(TransportError::Unavailable { message });
        }

        tracing::debug!(recipient, subject = %payload.subject, "memory transport delivered");

        state.delivered.push(Delivery {
            recipient: recipient.to_owned(),
            payload: payload.clone(),
        });

        Ok(())
    }
}
