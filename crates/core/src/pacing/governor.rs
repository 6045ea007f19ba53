//! The pacing governor: randomized delays, daily quotas and the ban breaker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::breaker::{Admission, BreakerState, CircuitBreaker};
use super::{ActionCountStore, ActionKind, DailyActionCounter, PacingConfig};
use crate::metrics;
use crate::notify::{Notification, NotificationHandle};
use crate::retry::{Classify, FailureClass};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacingError {
    #[error("daily quota for {kind} exhausted ({limit} per day)")]
    QuotaExceeded { kind: ActionKind, limit: u32 },
}

impl Classify for PacingError {
    fn failure_class(&self) -> FailureClass {
        FailureClass::Permanent
    }
}

/// Snapshot of governor state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PacingStatus {
    pub breaker: BreakerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    pub breaker_trips: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<DateTime<Utc>>,
    pub day: NaiveDate,
    pub counts: BTreeMap<ActionKind, u32>,
    pub daily_limits: BTreeMap<ActionKind, u32>,
}

type DaySource = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

struct PacingState {
    breaker: CircuitBreaker,
    last_action_at: Option<DateTime<Utc>>,
}

/// Gatekeeper for every externally visible action.
///
/// One instance is shared by all workers and actors. All mutation of the
/// breaker and the daily counters goes through this type.
pub struct PacingGovernor {
    config: PacingConfig,
    counter: DailyActionCounter,
    state: Mutex<PacingState>,
    changed: Notify,
    notifier: Option<NotificationHandle>,
    today: DaySource,
}

impl PacingGovernor {
    pub fn new(config: PacingConfig) -> Self {
        let cooldown = Duration::from_secs(config.ban_cooldown_secs);
        Self {
            config,
            counter: DailyActionCounter::new(),
            state: Mutex::new(PacingState {
                breaker: CircuitBreaker::new(cooldown),
                last_action_at: None,
            }),
            changed: Notify::new(),
            notifier: None,
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Persist daily counters so quotas survive a restart.
    pub fn with_count_store(mut self, store: Arc<dyn ActionCountStore>) -> Self {
        self.counter = DailyActionCounter::new().with_store(store);
        self
    }

    pub fn with_notifier(mut self, notifier: NotificationHandle) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override the calendar used for quota days.
    pub fn with_day_source(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        (self.today)()
    }

    /// Wait until `kind` may be performed.
    ///
    /// Quota-bounded kinds reserve their slot first and fail immediately once
    /// the daily limit is reached. Otherwise the caller sleeps for a random
    /// delay in `[min, max]` and then waits for the breaker to admit it.
    pub async fn permit(&self, kind: ActionKind) -> Result<Permit<'_>, PacingError> {
        let quota_day = self.reserve_quota(kind)?;

        let delay = self.random_delay();
        metrics::PACING_DELAY
            .with_label_values(&[kind.as_str()])
            .observe(delay.as_secs_f64());
        debug!(kind = kind.as_str(), delay_ms = delay.as_millis() as u64, "Pacing delay");
        tokio::time::sleep(delay).await;

        let probe = self.wait_for_breaker(kind).await;

        self.state.lock().unwrap().last_action_at = Some(Utc::now());

        Ok(Permit {
            governor: self,
            kind,
            delay,
            probe,
            quota_day,
            settled: false,
        })
    }

    /// Returns the day the slot was charged to, if `kind` is quota-bounded.
    fn reserve_quota(&self, kind: ActionKind) -> Result<Option<NaiveDate>, PacingError> {
        let Some(limit) = self.config.limit_for(kind) else {
            return Ok(None);
        };

        let day = self.today();
        match self.counter.try_acquire(kind, day, limit) {
            Ok(count) => {
                if count == limit {
                    info!(kind = kind.as_str(), limit, "Daily quota reached");
                    self.push(Notification::QuotaExhausted {
                        kind: kind.as_str().to_string(),
                        limit,
                    });
                }
                Ok(Some(day))
            }
            Err(_) => {
                metrics::QUOTA_REJECTIONS
                    .with_label_values(&[kind.as_str()])
                    .inc();
                Err(PacingError::QuotaExceeded { kind, limit })
            }
        }
    }

    fn refund_quota(&self, kind: ActionKind, day: Option<NaiveDate>) {
        if let Some(day) = day {
            debug!(kind = kind.as_str(), "Action not performed, quota slot returned");
            self.counter.release(kind, day);
        }
    }

    fn random_delay(&self) -> Duration {
        let min = self.config.min_delay_ms;
        let max = self.config.max_delay_ms.max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Block until the breaker admits an action. Returns whether the caller
    /// holds the HalfOpen probe.
    async fn wait_for_breaker(&self, kind: ActionKind) -> bool {
        loop {
            // Registered before the lock is released so no wakeup is missed.
            let notified = self.changed.notified();
            let admission = self.state.lock().unwrap().breaker.admit(Instant::now());

            match admission {
                Admission::Proceed { probe } => {
                    if probe {
                        info!(kind = kind.as_str(), "Breaker half-open, sending probe action");
                    }
                    return probe;
                }
                Admission::Wait(Some(until)) => {
                    debug!(kind = kind.as_str(), "Breaker open, waiting for cooldown");
                    tokio::select! {
                        _ = tokio::time::sleep_until(until) => {}
                        _ = notified => {}
                    }
                }
                Admission::Wait(None) => notified.await,
            }
        }
    }

    /// Trip the breaker. Emits one alert per opening.
    pub fn report_ban(&self) {
        let newly_opened = self.state.lock().unwrap().breaker.record_ban(Instant::now());
        if newly_opened {
            metrics::BREAKER_TRIPS.inc();
            warn!(
                cooldown_secs = self.config.ban_cooldown_secs,
                "Ban signal detected, pausing all actions"
            );
            self.push(Notification::BanDetected {
                cooldown_secs: self.config.ban_cooldown_secs,
            });
        }
        self.changed.notify_waiters();
    }

    fn report_success(&self, probe: bool) {
        if !probe {
            return;
        }
        self.state.lock().unwrap().breaker.record_success(true);
        info!("Probe action succeeded, breaker closed");
        self.changed.notify_waiters();
    }

    fn release_probe(&self, probe: bool) {
        if !probe {
            return;
        }
        self.state.lock().unwrap().breaker.release_probe(true);
        self.changed.notify_waiters();
    }

    /// True while actions are being held back by the breaker.
    pub fn is_paused(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.breaker.state(Instant::now()) != BreakerState::Closed
    }

    pub fn status(&self) -> PacingStatus {
        let day = self.today();
        let counts = self.counter.snapshot(day);
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        PacingStatus {
            breaker: state.breaker.state(now),
            cooldown_remaining_secs: state.breaker.cooldown_remaining(now).map(|d| d.as_secs()),
            breaker_trips: state.breaker.trips(),
            last_action_at: state.last_action_at,
            day,
            counts,
            daily_limits: self.config.daily_limits.clone(),
        }
    }

    fn push(&self, notification: Notification) {
        if let Some(ref notifier) = self.notifier {
            notifier.try_emit(notification);
        }
    }
}

/// Permission to perform one action.
///
/// Report the outcome with [`Permit::record`] (or [`Permit::succeeded`] /
/// [`Permit::ban_detected`]) so a HalfOpen probe can close or re-open the
/// breaker. Dropping an unreported probe frees the probe slot; a dropped
/// permit keeps its quota slot since the action may have gone through.
pub struct Permit<'a> {
    governor: &'a PacingGovernor,
    kind: ActionKind,
    delay: Duration,
    probe: bool,
    quota_day: Option<NaiveDate>,
    settled: bool,
}

impl Permit<'_> {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// The randomized delay that was applied.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.governor.report_success(self.probe);
    }

    /// The site refused us; the action did not happen.
    pub fn ban_detected(mut self) {
        self.settled = true;
        self.governor.refund_quota(self.kind, self.quota_day);
        self.governor.report_ban();
    }

    /// Report the result of the action.
    ///
    /// Success and permanent failures prove we are not blocked and keep the
    /// quota slot. A ban signal trips the breaker. Transient failures are
    /// inconclusive for the breaker and return the quota slot, so a retried
    /// action is only charged once.
    pub fn record<T, E: Classify>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.succeeded(),
            Err(e) => match e.failure_class() {
                FailureClass::BanDetected => self.ban_detected(),
                FailureClass::Permanent => self.succeeded(),
                FailureClass::Transient => {
                    self.governor.refund_quota(self.kind, self.quota_day);
                    drop(self)
                }
            },
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.governor.release_probe(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_ms: u64, max_ms: u64) -> PacingConfig {
        PacingConfig {
            min_delay_ms: min_ms,
            max_delay_ms: max_ms,
            ban_cooldown_secs: 60,
            daily_limits: BTreeMap::from([(ActionKind::Bid, 3)]),
        }
    }

    fn fixed_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_within_bounds() {
        let governor = PacingGovernor::new(config(1_000, 5_000));
        for _ in 0..20 {
            let start = Instant::now();
            let permit = governor.permit(ActionKind::Discovery).await.unwrap();
            let waited = start.elapsed();
            assert!(permit.delay() >= Duration::from_millis(1_000));
            assert!(permit.delay() <= Duration::from_millis(5_000));
            assert!(waited >= permit.delay());
            permit.succeeded();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_fails_fast() {
        let governor = PacingGovernor::new(config(10, 10)).with_day_source(fixed_day);
        for _ in 0..3 {
            governor.permit(ActionKind::Bid).await.unwrap().succeeded();
        }

        let start = Instant::now();
        let err = governor.permit(ActionKind::Bid).await.err().unwrap();
        assert_eq!(
            err,
            PacingError::QuotaExceeded {
                kind: ActionKind::Bid,
                limit: 3
            }
        );
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Unbounded kinds are unaffected.
        assert!(governor.permit(ActionKind::ChatSend).await.is_ok());
        assert_eq!(governor.status().counts.get(&ActionKind::Bid), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_blocks_until_cooldown() {
        let governor = Arc::new(PacingGovernor::new(config(0, 0)));
        governor.report_ban();
        assert!(governor.is_paused());

        let start = Instant::now();
        let permit = governor.permit(ActionKind::Discovery).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(permit.is_probe());
        permit.succeeded();

        assert!(!governor.is_paused());
        let next = governor.permit(ActionKind::Discovery).await.unwrap();
        assert!(!next.is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_for_full_cooldown() {
        let governor = PacingGovernor::new(config(0, 0));
        governor.report_ban();

        tokio::time::advance(Duration::from_secs(60)).await;
        let probe = governor.permit(ActionKind::Bid).await.unwrap();
        assert!(probe.is_probe());
        let probe_failed_at = Instant::now();
        probe.ban_detected();

        let status = governor.status();
        assert_eq!(status.breaker, BreakerState::Open);
        assert_eq!(status.cooldown_remaining_secs, Some(60));
        assert_eq!(status.breaker_trips, 2);

        let permit = governor.permit(ActionKind::Discovery).await.unwrap();
        assert!(Instant::now() >= probe_failed_at + Duration::from_secs(60));
        assert!(permit.is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_in_half_open() {
        let governor = Arc::new(PacingGovernor::new(config(0, 0)));
        governor.report_ban();
        tokio::time::advance(Duration::from_secs(61)).await;

        let probe = governor.permit(ActionKind::Discovery).await.unwrap();
        assert!(probe.is_probe());

        let waiter = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move {
                let permit = governor.permit(ActionKind::Discovery).await.unwrap();
                permit.is_probe()
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        probe.succeeded();
        let second_was_probe = waiter.await.unwrap();
        assert!(!second_was_probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_lets_next_caller_probe() {
        let governor = PacingGovernor::new(config(0, 0));
        governor.report_ban();
        tokio::time::advance(Duration::from_secs(60)).await;

        let probe = governor.permit(ActionKind::Discovery).await.unwrap();
        assert!(probe.is_probe());
        drop(probe);

        let next = governor.permit(ActionKind::Discovery).await.unwrap();
        assert!(next.is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_alert_emitted_once() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let governor = PacingGovernor::new(config(0, 0)).with_notifier(NotificationHandle::new(tx));

        governor.report_ban();
        governor.report_ban();
        governor.report_ban();

        let envelope = rx.try_recv().unwrap();
        assert!(matches!(
            envelope.notification,
            Notification::BanDetected { cooldown_secs: 60 }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_classifies_results() {
        #[derive(Debug)]
        struct Banned;
        impl Classify for Banned {
            fn failure_class(&self) -> FailureClass {
                FailureClass::BanDetected
            }
        }

        let governor = PacingGovernor::new(config(0, 0));
        let permit = governor.permit(ActionKind::Discovery).await.unwrap();
        permit.record(&Result::<(), _>::Err(Banned));
        assert!(governor.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unperformed_actions_return_quota_slot() {
        #[derive(Debug)]
        struct Failure(FailureClass);
        impl Classify for Failure {
            fn failure_class(&self) -> FailureClass {
                self.0
            }
        }
        let bid_count = |governor: &PacingGovernor| {
            governor
                .status()
                .counts
                .get(&ActionKind::Bid)
                .copied()
                .unwrap_or(0)
        };

        let governor = PacingGovernor::new(config(0, 0)).with_day_source(fixed_day);

        let permit = governor.permit(ActionKind::Bid).await.unwrap();
        permit.record(&Result::<(), _>::Err(Failure(FailureClass::Transient)));
        assert_eq!(bid_count(&governor), 0);

        let permit = governor.permit(ActionKind::Bid).await.unwrap();
        permit.record(&Result::<(), _>::Err(Failure(FailureClass::Permanent)));
        assert_eq!(bid_count(&governor), 1);

        let permit = governor.permit(ActionKind::Bid).await.unwrap();
        permit.record(&Result::<(), _>::Err(Failure(FailureClass::BanDetected)));
        assert_eq!(bid_count(&governor), 1);
        assert!(governor.is_paused());

        // Dropped without a report: the bid may have landed
        tokio::time::advance(Duration::from_secs(60)).await;
        drop(governor.permit(ActionKind::Bid).await.unwrap());
        assert_eq!(bid_count(&governor), 2);
    }
}
