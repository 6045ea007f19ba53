//! Pacing governor for externally visible actions.
//!
//! - **Delays**: every action waits a random interval in `[min, max]`
//! - **Quotas**: per-kind daily maximums, reset at local midnight
//! - **Breaker**: a ban signal pauses all actions for a cooldown window

mod breaker;
mod config;
mod counter;
mod governor;

use chrono::{DateTime, Duration, Local, TimeZone, Utc};

pub use breaker::{Admission, BreakerState, CircuitBreaker};
pub use config::PacingConfig;
pub use counter::{ActionCountStore, ActionKind, DailyActionCounter};
pub use governor::{PacingError, PacingGovernor, PacingStatus, Permit};

/// The next local midnight after `now`, when daily quotas reset.
pub fn next_quota_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    let tomorrow = local.date_naive().succ_opt().unwrap_or(local.date_naive());
    let midnight = tomorrow.and_time(chrono::NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::days(1))
}
