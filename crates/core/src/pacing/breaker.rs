//! Circuit breaker pausing all actions after a ban signal.

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Result of asking the breaker whether an action may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go ahead. `probe` is set for the single HalfOpen trial action.
    Proceed { probe: bool },
    /// Blocked until the given instant, or until the probe resolves.
    Wait(Option<Instant>),
}

/// Closed -> Open on a ban signal; Open -> HalfOpen after the cooldown;
/// HalfOpen admits one probe, whose success closes and whose failure
/// re-opens for a full cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    cooldown: Duration,
    open_until: Option<Instant>,
    probe_in_flight: bool,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            cooldown,
            open_until: None,
            probe_in_flight: false,
            trips: 0,
        }
    }

    /// Current state, advancing Open -> HalfOpen if the cooldown elapsed.
    pub fn state(&mut self, now: Instant) -> BreakerState {
        if self.state == BreakerState::Open && self.open_until.is_some_and(|until| now >= until) {
            self.state = BreakerState::HalfOpen;
            self.open_until = None;
            self.probe_in_flight = false;
        }
        self.state
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state(now) {
            BreakerState::Closed => Admission::Proceed { probe: false },
            BreakerState::Open => Admission::Wait(self.open_until),
            BreakerState::HalfOpen if !self.probe_in_flight => {
                self.probe_in_flight = true;
                Admission::Proceed { probe: true }
            }
            BreakerState::HalfOpen => Admission::Wait(None),
        }
    }

    pub fn record_success(&mut self, probe: bool) {
        if probe && self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Closed;
            self.probe_in_flight = false;
        }
    }

    /// Trip (or re-trip) the breaker. Returns true if it was not already open,
    /// i.e. this signal should raise an alert.
    pub fn record_ban(&mut self, now: Instant) -> bool {
        let newly_opened = self.state != BreakerState::Open;
        self.state = BreakerState::Open;
        self.probe_in_flight = false;
        if newly_opened {
            self.open_until = Some(now + self.cooldown);
            self.trips += 1;
        }
        newly_opened
    }

    /// The probe ended without a verdict; let another caller probe.
    pub fn release_probe(&mut self, probe: bool) {
        if probe && self.state == BreakerState::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.open_until) {
            (BreakerState::Open, Some(until)) => Some(until.saturating_duration_since(now)),
            _ => None,
        }
    }

    pub fn trips(&self) -> u64 {
        self.trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_admits_everything() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(breaker.admit(now), Admission::Proceed { probe: false });
        assert_eq!(breaker.admit(now), Admission::Proceed { probe: false });
    }

    #[test]
    fn test_ban_opens_for_cooldown() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(breaker.record_ban(now));
        assert!(!breaker.record_ban(now), "second signal must not re-alert");

        assert_eq!(
            breaker.admit(now + Duration::from_secs(59)),
            Admission::Wait(Some(now + Duration::from_secs(60)))
        );
        assert_eq!(
            breaker.cooldown_remaining(now + Duration::from_secs(45)),
            Some(Duration::from_secs(15))
        );
    }

    #[test]
    fn test_half_open_single_probe() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let now = Instant::now();
        breaker.record_ban(now);

        let later = now + Duration::from_secs(60);
        assert_eq!(breaker.admit(later), Admission::Proceed { probe: true });
        assert_eq!(breaker.admit(later), Admission::Wait(None));

        breaker.record_success(true);
        assert_eq!(breaker.state(later), BreakerState::Closed);
        assert_eq!(breaker.admit(later), Admission::Proceed { probe: false });
    }

    #[test]
    fn test_failed_probe_reopens_full_cooldown() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let now = Instant::now();
        breaker.record_ban(now);

        let probe_at = now + Duration::from_secs(61);
        assert_eq!(breaker.admit(probe_at), Admission::Proceed { probe: true });
        assert!(breaker.record_ban(probe_at));

        assert_eq!(
            breaker.admit(probe_at + Duration::from_secs(59)),
            Admission::Wait(Some(probe_at + Duration::from_secs(60)))
        );
        assert_eq!(breaker.trips(), 2);
    }

    #[test]
    fn test_released_probe_allows_next() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(10));
        let now = Instant::now();
        breaker.record_ban(now);

        let later = now + Duration::from_secs(10);
        assert_eq!(breaker.admit(later), Admission::Proceed { probe: true });
        breaker.release_probe(true);
        assert_eq!(breaker.admit(later), Admission::Proceed { probe: true });
    }
}
