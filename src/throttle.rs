//! Throttling Guard.
//!
//! Per-trigger rate-limit / debounce / once-per-period state.  Each trigger id
//! owns one `DashMap` entry, so concurrent trigger sources only contend on the
//! same trigger, never on a global lock.  Counters never go negative and the
//! rate-limit window resets exactly at the period boundary.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use dashmap::DashMap;

use crate::schema::{ThrottlePeriod, Throttling};

#[derive(Debug, Default, Clone)]
struct ThrottleState {
    window_start: Option<DateTime<Utc>>,
    window_count: u32,
    last_fire: Option<DateTime<Utc>>,
    last_period_key: Option<String>,
}

#[derive(Default)]
pub struct ThrottleGuard {
    states: DashMap<String, ThrottleState>,
}

impl ThrottleGuard {
    pub fn new() -> Self {
        ThrottleGuard {
            states: DashMap::new(),
        }
    }

    /// Decide whether a trigger fire is admitted under `policy`, mutating the
    /// per-trigger state.  `none` always admits.
    pub fn should_admit(&self, trigger_id: &str, policy: &Throttling, now: DateTime<Utc>) -> bool {
        match policy {
            Throttling::None => true,
            Throttling::RateLimit {
                count,
                period_seconds,
            } => self.admit_rate_limit(trigger_id, *count, *period_seconds, now),
            Throttling::Debounce { debounce_seconds } => {
                self.admit_debounce(trigger_id, *debounce_seconds, now)
            }
            Throttling::OncePerPeriod { period, reset_time } => {
                let key = period_key(*period, reset_time.as_deref(), now);
                self.admit_once_per_period(trigger_id, key)
            }
        }
    }

    /// Drop all state for a trigger (recipe removed).
    pub fn forget(&self, trigger_id: &str) {
        self.states.remove(trigger_id);
    }

    fn admit_rate_limit(
        &self,
        trigger_id: &str,
        count: u32,
        period_seconds: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.states.entry(trigger_id.to_string()).or_default();
        let expired = match state.window_start {
            Some(start) => now - start >= Duration::seconds(period_seconds as i64),
            None => true,
        };
        if expired {
            state.window_start = Some(now);
            state.window_count = 1;
            return true;
        }
        if state.window_count < count {
            state.window_count += 1;
            true
        } else {
            false
        }
    }

    fn admit_debounce(&self, trigger_id: &str, debounce_seconds: u64, now: DateTime<Utc>) -> bool {
        let mut state = self.states.entry(trigger_id.to_string()).or_default();
        let quiet = match state.last_fire {
            Some(last) => now - last >= Duration::seconds(debounce_seconds as i64),
            None => true,
        };
        // last_fire moves on admission only; denied events do not extend the
        // quiet period.
        if quiet {
            state.last_fire = Some(now);
        }
        quiet
    }

    fn admit_once_per_period(&self, trigger_id: &str, key: String) -> bool {
        let mut state = self.states.entry(trigger_id.to_string()).or_default();
        if state.last_period_key.as_deref() == Some(key.as_str()) {
            return false;
        }
        state.last_period_key = Some(key);
        true
    }
}

/// Compute the period bucket key for `now` in UTC.  `reset_time` ("HH:MM")
/// shifts the day boundary for `day` periods.
fn period_key(period: ThrottlePeriod, reset_time: Option<&str>, now: DateTime<Utc>) -> String {
    match period {
        ThrottlePeriod::Hour => now.format("%Y-%m-%dT%H").to_string(),
        ThrottlePeriod::Day => {
            let shifted = match reset_time.and_then(parse_reset_time) {
                Some(reset) => {
                    now - Duration::seconds(reset.num_seconds_from_midnight() as i64)
                }
                None => now,
            };
            shifted.format("%Y-%m-%d").to_string()
        }
        ThrottlePeriod::Week => now.format("%G-W%V").to_string(),
        ThrottlePeriod::Month => now.format("%Y-%m").to_string(),
    }
}

fn parse_reset_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_none_always_admits() {
        let guard = ThrottleGuard::new();
        for i in 0..10 {
            assert!(guard.should_admit("t", &Throttling::None, at(i)));
        }
    }

    #[test]
    fn test_rate_limit_denies_fourth_within_window() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::RateLimit {
            count: 3,
            period_seconds: 60,
        };
        assert!(guard.should_admit("t", &policy, at(0)));
        assert!(guard.should_admit("t", &policy, at(10)));
        assert!(guard.should_admit("t", &policy, at(20)));
        // 4th event within 60s of the window start is denied.
        assert!(!guard.should_admit("t", &policy, at(30)));
        // 5th event after the window rolls over is admitted.
        assert!(guard.should_admit("t", &policy, at(60)));
    }

    #[test]
    fn test_rate_limit_window_resets_exactly_at_boundary() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::RateLimit {
            count: 1,
            period_seconds: 60,
        };
        assert!(guard.should_admit("t", &policy, at(0)));
        assert!(!guard.should_admit("t", &policy, at(59)));
        assert!(guard.should_admit("t", &policy, at(60)));
    }

    #[test]
    fn test_rate_limit_state_is_per_trigger() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::RateLimit {
            count: 1,
            period_seconds: 60,
        };
        assert!(guard.should_admit("a", &policy, at(0)));
        assert!(guard.should_admit("b", &policy, at(0)));
        assert!(!guard.should_admit("a", &policy, at(1)));
    }

    #[test]
    fn test_debounce_updates_on_admission_only() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::Debounce {
            debounce_seconds: 30,
        };
        assert!(guard.should_admit("t", &policy, at(0)));
        assert!(!guard.should_admit("t", &policy, at(10)));
        assert!(!guard.should_admit("t", &policy, at(20)));
        // Denied events did not extend the quiet period, so 30s after the
        // admitted fire we are open again.
        assert!(guard.should_admit("t", &policy, at(30)));
    }

    #[test]
    fn test_once_per_period_hour() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::OncePerPeriod {
            period: ThrottlePeriod::Hour,
            reset_time: None,
        };
        let base = Utc.with_ymd_and_hms(2026, 8, 25, 14, 5, 0).unwrap();
        assert!(guard.should_admit("t", &policy, base));
        assert!(!guard.should_admit("t", &policy, base + Duration::minutes(30)));
        assert!(guard.should_admit("t", &policy, base + Duration::hours(1)));
    }

    #[test]
    fn test_once_per_period_day_with_reset_time() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::OncePerPeriod {
            period: ThrottlePeriod::Day,
            reset_time: Some("06:00".into()),
        };
        // 05:00 and 07:00 on the same date straddle the 06:00 boundary.
        let early = Utc.with_ymd_and_hms(2026, 8, 25, 5, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 8, 25, 7, 0, 0).unwrap();
        assert!(guard.should_admit("t", &policy, early));
        assert!(guard.should_admit("t", &policy, late));
        assert!(!guard.should_admit("t", &policy, late + Duration::hours(1)));
    }

    #[test]
    fn test_period_keys() {
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 14, 5, 0).unwrap();
        assert_eq!(period_key(ThrottlePeriod::Hour, None, now), "2026-08-25T14");
        assert_eq!(period_key(ThrottlePeriod::Day, None, now), "2026-08-25");
        assert_eq!(period_key(ThrottlePeriod::Month, None, now), "2026-08");
        assert_eq!(period_key(ThrottlePeriod::Week, None, now), "2026-W35");
    }

    #[test]
    fn test_forget_clears_state() {
        let guard = ThrottleGuard::new();
        let policy = Throttling::RateLimit {
            count: 1,
            period_seconds: 3600,
        };
        assert!(guard.should_admit("t", &policy, at(0)));
        assert!(!guard.should_admit("t", &policy, at(1)));
        guard.forget("t");
        assert!(guard.should_admit("t", &policy, at(2)));
    }
}
