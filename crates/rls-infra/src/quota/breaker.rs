//! Process-wide breaker for the quota Redis path.
//!
//! A one second sliding error window trips the breaker open when at least
//! 100 samples produced 50 or more errors. Open holds for 10 s, then
//! half-open warms traffic back up in steps: 10 % for the first 5 s, 20 %
//! until 10 s, 50 % until 20 s, then full. Any error while half-open
//! re-opens; a success after warm-up completes closes.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF: u8 = 2;

const STAT_INTERVAL_MS: i64 = 1_000;
const MIN_SAMPLES: i64 = 100;
const ERROR_THRESHOLD: i64 = 50;
const OPEN_MS: i64 = 10_000;
const WARMUP_FULL_MS: i64 = 20_000;

/// Verdict for one quota call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Pass,
    /// Shed by the half-open warm-up ramp.
    Throttled,
    Open,
}

pub(crate) struct QuotaBreaker {
    state: AtomicU8,
    entered_at_ms: AtomicI64,
    window_start_ms: AtomicI64,
    window_total: AtomicI64,
    window_errors: AtomicI64,
}

impl QuotaBreaker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            entered_at_ms: AtomicI64::new(0),
            window_start_ms: AtomicI64::new(0),
            window_total: AtomicI64::new(0),
            window_errors: AtomicI64::new(0),
        }
    }

    pub fn admit(&self, now_ms: i64) -> Gate {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                let entered = self.entered_at_ms.load(Ordering::Acquire);
                if now_ms - entered < OPEN_MS {
                    return Gate::Open;
                }
                // Cooldown elapsed; one caller wins the transition, the
                // rest fall through to the same half-open gate.
                if self
                    .state
                    .compare_exchange(
                        STATE_OPEN,
                        STATE_HALF,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.entered_at_ms.store(now_ms, Ordering::Release);
                    tracing::info!("quota breaker half-open");
                }
                self.half_gate(now_ms)
            }
            STATE_HALF => self.half_gate(now_ms),
            _ => Gate::Pass,
        }
    }

    fn half_gate(&self, now_ms: i64) -> Gate {
        let elapsed = now_ms - self.entered_at_ms.load(Ordering::Acquire);
        let ratio = warmup_ratio(elapsed);
        if ratio >= 1.0 || rand::random::<f64>() < ratio {
            Gate::Pass
        } else {
            Gate::Throttled
        }
    }

    pub fn record(&self, ok: bool, now_ms: i64) {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                self.roll_window(now_ms);
                self.window_total.fetch_add(1, Ordering::AcqRel);
                if !ok {
                    let errors = self.window_errors.fetch_add(1, Ordering::AcqRel) + 1;
                    let total = self.window_total.load(Ordering::Acquire);
                    if total >= MIN_SAMPLES && errors >= ERROR_THRESHOLD {
                        self.trip_open(now_ms);
                    }
                }
            }
            STATE_HALF => {
                if !ok {
                    self.trip_open(now_ms);
                } else {
                    let elapsed = now_ms - self.entered_at_ms.load(Ordering::Acquire);
                    if elapsed >= WARMUP_FULL_MS {
                        self.close();
                    }
                }
            }
            _ => {}
        }
    }

    fn roll_window(&self, now_ms: i64) {
        let start = self.window_start_ms.load(Ordering::Acquire);
        if now_ms - start >= STAT_INTERVAL_MS
            && self
                .window_start_ms
                .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.window_total.store(0, Ordering::Release);
            self.window_errors.store(0, Ordering::Release);
        }
    }

    fn trip_open(&self, now_ms: i64) {
        self.state.store(STATE_OPEN, Ordering::Release);
        self.entered_at_ms.store(now_ms, Ordering::Release);
        tracing::warn!("quota breaker open");
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.window_total.store(0, Ordering::Release);
        self.window_errors.store(0, Ordering::Release);
        tracing::info!("quota breaker closed");
    }
}

/// Share of traffic admitted by elapsed time in the half-open state.
pub(crate) fn warmup_ratio(elapsed_ms: i64) -> f64 {
    match elapsed_ms {
        ms if ms < 5_000 => 0.1,
        ms if ms < 10_000 => 0.2,
        ms if ms < 20_000 => 0.5,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saturate_errors(b: &QuotaBreaker, now_ms: i64) {
        for _ in 0..60 {
            b.record(true, now_ms);
        }
        for _ in 0..50 {
            b.record(false, now_ms);
        }
    }

    #[test]
    fn test_closed_passes() {
        let b = QuotaBreaker::new();
        assert_eq!(b.admit(1000), Gate::Pass);
    }

    #[test]
    fn test_error_storm_trips_open() {
        let b = QuotaBreaker::new();
        saturate_errors(&b, 1000);
        assert_eq!(b.admit(1500), Gate::Open);
        // Still inside the 10 s cooldown.
        assert_eq!(b.admit(1000 + OPEN_MS - 1), Gate::Open);
    }

    #[test]
    fn test_sparse_errors_do_not_trip() {
        let b = QuotaBreaker::new();
        // 50 errors but far fewer than 100 samples in-window each second.
        for i in 0..50 {
            b.record(false, i * STAT_INTERVAL_MS);
        }
        assert_eq!(b.admit(60_000), Gate::Pass);
    }

    #[test]
    fn test_half_open_after_cooldown_and_reopen_on_error() {
        let b = QuotaBreaker::new();
        saturate_errors(&b, 0);

        // Past the cooldown the gate starts warming up.
        let verdict = b.admit(OPEN_MS + 1);
        assert!(matches!(verdict, Gate::Pass | Gate::Throttled));

        // An error while half-open slams it shut again.
        b.record(false, OPEN_MS + 2);
        assert_eq!(b.admit(OPEN_MS + 3), Gate::Open);
    }

    #[test]
    fn test_success_after_full_warmup_closes() {
        let b = QuotaBreaker::new();
        saturate_errors(&b, 0);
        assert!(matches!(b.admit(OPEN_MS + 1), Gate::Pass | Gate::Throttled));

        let after_warmup = OPEN_MS + 1 + WARMUP_FULL_MS;
        // Ratio is 1.0 now, so admit always passes.
        assert_eq!(b.admit(after_warmup), Gate::Pass);
        b.record(true, after_warmup);
        assert_eq!(b.admit(after_warmup + 1), Gate::Pass);
        // Closed again: a lone error does not trip.
        b.record(false, after_warmup + 2);
        assert_eq!(b.admit(after_warmup + 3), Gate::Pass);
    }

    #[test]
    fn test_warmup_steps() {
        assert_eq!(warmup_ratio(0), 0.1);
        assert_eq!(warmup_ratio(4_999), 0.1);
        assert_eq!(warmup_ratio(5_000), 0.2);
        assert_eq!(warmup_ratio(10_000), 0.5);
        assert_eq!(warmup_ratio(20_000), 1.0);
    }
}
