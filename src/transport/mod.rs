//! Delivery transport abstraction.
//!
//! The queue owns every retry decision; a transport makes exactly one
//! delivery attempt per call and reports the outcome. Implementations must
//! not retry internally.

use async_trait::async_trait;
use snafu::Snafu;

use crate::item::Payload;

pub mod memory;
pub mod smtp;

/// Why a single delivery attempt failed. The queue treats both variants the
/// same way (count the attempt, reschedule or dead-letter); the split only
/// shows up in `last_error` diagnostics.
#[derive(Debug, Snafu)]
pub enum TransportError {
    /// The remote end accepted the connection and refused the message.
    #[snafu(display("delivery rejected: {message}"))]
    Rejected { message: String },

    /// The transport could not complete the call at all.
    #[snafu(display("transport unavailable: {message}"))]
    Unavailable { message: String },
}

/// A single-shot delivery primitive.
///
/// `deliver` hands one payload to the outside world. Returning `Ok` means
/// the transport accepted responsibility for the message; any error means
/// the attempt failed and the queue decides what happens next.
#[async_trait]
pub trait DeliveryTransport: Send + Sync + 'static {
    async fn deliver(&self, recipient: &str, payload: &Payload) -> Result<(), TransportError>;
}
