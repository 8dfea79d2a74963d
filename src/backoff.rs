use std::time::Duration;

use crate::item::ChannelClass;

/// Retry schedule per channel class, indexed by the attempt number just
/// completed (1-based). Lookup tables rather than a formula so each class
/// can be retuned independently.
const CRITICAL_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
];

const NORMAL_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(120 * 60),
];

/// Total in-process tries for the immediate-send path before falling back
/// to the queue.
pub const IMMEDIATE_ATTEMPTS: usize = 3;

/// In-process delays for the immediate-send path. `IMMEDIATE_RETRY_DELAYS[i]`
/// is slept before attempt `i + 2`; the first attempt runs without delay.
pub const IMMEDIATE_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

/// Delay to wait after a failed attempt before the item becomes due again.
///
/// `attempts` is the count after the failed attempt was recorded, so the
/// first failure looks up the first table entry. Past the end of the table
/// the last entry is reused.
pub fn delay_for(channel: ChannelClass, attempts: i64) -> Duration {
    let schedule = match channel {
        ChannelClass::Critical => &CRITICAL_SCHEDULE,
        ChannelClass::Normal => &NORMAL_SCHEDULE,
    };

    let idx = attempts.max(1) as usize - 1;
    schedule[idx.min(schedule.len() - 1)]
}
