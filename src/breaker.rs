//! Circuit breaker and strategy resolution
//!
//! The breaker counts consecutive failures per abstract mode across all
//! jobs — a shared reliability signal, not per-job state. When a mode
//! keeps failing, new jobs stop entering the chain at that mode; chains
//! already running are never interrupted. A single success closes the
//! breaker again (fail-fast, recover-fast; no half-open probing).
//!
//! State lives in memory only and resets on restart.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::BreakerConfig;
use crate::strategy::{HARSH, STABLE, Strategy};
use crate::types::Mode;

/// Breaker state for one mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// The mode is healthy
    Closed,
    /// The mode crossed the failure threshold and is degraded
    Open,
}

#[derive(Clone, Copy, Debug, Default)]
struct ModeCounter {
    consecutive_failures: u32,
    open: bool,
}

/// Shared failure counter, one set per abstract mode
///
/// Safe to call from any number of concurrent job workers: all counter
/// access happens under one mutex, so no outcome report is ever lost.
pub struct CircuitBreaker {
    threshold: u32,
    counters: Mutex<HashMap<Mode, ModeCounter>>,
}

impl CircuitBreaker {
    /// Create a breaker with the configured failure threshold
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Record the outcome of one job attempt chain for a mode
    ///
    /// A success resets the mode's counter to zero and closes the breaker
    /// immediately. A failure increments the counter; reaching the
    /// threshold opens the breaker.
    ///
    /// Cancellations must never be reported here — they are not a
    /// reliability signal.
    pub fn report_outcome(&self, mode: Mode, success: bool) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let counter = counters.entry(mode).or_default();

        if success {
            if counter.open {
                tracing::info!(%mode, "circuit breaker closed after success");
            }
            counter.consecutive_failures = 0;
            counter.open = false;
        } else {
            counter.consecutive_failures += 1;
            if counter.consecutive_failures >= self.threshold && !counter.open {
                counter.open = true;
                tracing::warn!(
                    %mode,
                    failures = counter.consecutive_failures,
                    threshold = self.threshold,
                    "circuit breaker opened"
                );
            }
        }
    }

    /// Current breaker state for a mode
    pub fn state(&self, mode: Mode) -> BreakerState {
        let counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match counters.get(&mode) {
            Some(c) if c.open => BreakerState::Open,
            _ => BreakerState::Closed,
        }
    }

    /// Returns true when the mode is currently degraded
    pub fn is_degraded(&self, mode: Mode) -> bool {
        self.state(mode) == BreakerState::Open
    }

    /// Consecutive failure count for a mode
    pub fn consecutive_failures(&self, mode: Mode) -> u32 {
        let counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters
            .get(&mode)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }
}

/// Maps abstract modes to concrete strategies
///
/// The resolver consults the breaker only for the *initial* strategy of a
/// new job: a degraded mode enters the chain one step down. Fallback
/// lookups during a running chain are pure and never re-consult the
/// breaker.
pub struct StrategyResolver<'a> {
    breaker: &'a CircuitBreaker,
}

impl<'a> StrategyResolver<'a> {
    /// Create a resolver over the shared breaker
    pub fn new(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker }
    }

    /// Resolve a mode to the strategy a new job should start with
    pub fn resolve(&self, mode: Mode) -> &'static Strategy {
        match mode {
            Mode::Auto => {
                // No network probe in this layer: Auto starts at Stable,
                // and at Harsh once Stable itself is failing.
                if self.breaker.is_degraded(Mode::Stable) {
                    tracing::info!("auto mode: stable degraded, starting at harsh");
                    &HARSH
                } else {
                    &STABLE
                }
            }
            Mode::Speed | Mode::Stable | Mode::Harsh => {
                let strategy = match Strategy::for_mode(mode) {
                    Some(s) => s,
                    // Unreachable for concrete modes; Stable is a safe floor
                    None => &STABLE,
                };
                if self.breaker.is_degraded(mode) {
                    match strategy.fallback() {
                        Some(fallback) => {
                            tracing::info!(
                                %mode,
                                fallback = fallback.label,
                                "mode degraded, starting at fallback"
                            );
                            fallback
                        }
                        None => strategy,
                    }
                } else {
                    strategy
                }
            }
        }
    }

    /// The designated fallback of a strategy, if any
    pub fn fallback(&self, strategy: &Strategy) -> Option<&'static Strategy> {
        strategy.fallback()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn breaker_with_threshold(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
        })
    }

    #[test]
    fn threshold_consecutive_failures_open_the_breaker() {
        let breaker = breaker_with_threshold(3);

        breaker.report_outcome(Mode::Speed, false);
        breaker.report_outcome(Mode::Speed, false);
        assert_eq!(breaker.state(Mode::Speed), BreakerState::Closed);

        breaker.report_outcome(Mode::Speed, false);
        assert_eq!(breaker.state(Mode::Speed), BreakerState::Open);
    }

    #[test]
    fn success_resets_counter_to_zero_and_closes() {
        let breaker = breaker_with_threshold(3);

        breaker.report_outcome(Mode::Speed, false);
        breaker.report_outcome(Mode::Speed, false);
        breaker.report_outcome(Mode::Speed, false);
        assert!(breaker.is_degraded(Mode::Speed));

        breaker.report_outcome(Mode::Speed, true);
        assert_eq!(breaker.consecutive_failures(Mode::Speed), 0);
        assert_eq!(breaker.state(Mode::Speed), BreakerState::Closed);
    }

    #[test]
    fn intervening_success_prevents_opening() {
        let breaker = breaker_with_threshold(3);

        breaker.report_outcome(Mode::Stable, false);
        breaker.report_outcome(Mode::Stable, false);
        breaker.report_outcome(Mode::Stable, true);
        breaker.report_outcome(Mode::Stable, false);
        breaker.report_outcome(Mode::Stable, false);

        assert_eq!(breaker.state(Mode::Stable), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(Mode::Stable), 2);
    }

    #[test]
    fn modes_are_tracked_independently() {
        let breaker = breaker_with_threshold(2);

        breaker.report_outcome(Mode::Speed, false);
        breaker.report_outcome(Mode::Speed, false);
        breaker.report_outcome(Mode::Stable, false);

        assert!(breaker.is_degraded(Mode::Speed));
        assert!(!breaker.is_degraded(Mode::Stable));
    }

    #[test]
    fn concurrent_failure_reports_are_not_lost() {
        // High threshold so the counter just accumulates
        let breaker = Arc::new(breaker_with_threshold(10_000));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let breaker = Arc::clone(&breaker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    breaker.report_outcome(Mode::Harsh, false);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.consecutive_failures(Mode::Harsh), 800);
    }

    #[test]
    fn concurrent_resolve_and_report_do_not_panic() {
        let breaker = Arc::new(breaker_with_threshold(3));
        let mut handles = Vec::new();

        for i in 0..8 {
            let breaker = Arc::clone(&breaker);
            handles.push(std::thread::spawn(move || {
                for n in 0..200 {
                    if i % 2 == 0 {
                        breaker.report_outcome(Mode::Speed, n % 5 == 0);
                    } else {
                        let resolver = StrategyResolver::new(&breaker);
                        let _ = resolver.resolve(Mode::Speed);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn resolver_returns_mode_strategy_when_healthy() {
        let breaker = breaker_with_threshold(3);
        let resolver = StrategyResolver::new(&breaker);

        assert_eq!(resolver.resolve(Mode::Speed).label, "speed");
        assert_eq!(resolver.resolve(Mode::Harsh).label, "harsh");
    }

    #[test]
    fn degraded_mode_starts_one_step_down_the_chain() {
        let breaker = breaker_with_threshold(2);
        breaker.report_outcome(Mode::Speed, false);
        breaker.report_outcome(Mode::Speed, false);

        let resolver = StrategyResolver::new(&breaker);
        assert_eq!(resolver.resolve(Mode::Speed).label, "stable");
        // Harsh has no fallback; degraded or not, it stays harsh
        breaker.report_outcome(Mode::Harsh, false);
        breaker.report_outcome(Mode::Harsh, false);
        assert_eq!(resolver.resolve(Mode::Harsh).label, "harsh");
    }

    #[test]
    fn auto_resolves_to_stable_or_harsh_by_breaker_state() {
        let breaker = breaker_with_threshold(2);
        let resolver = StrategyResolver::new(&breaker);
        assert_eq!(resolver.resolve(Mode::Auto).label, "stable");

        breaker.report_outcome(Mode::Stable, false);
        breaker.report_outcome(Mode::Stable, false);
        assert_eq!(resolver.resolve(Mode::Auto).label, "harsh");
    }

    #[test]
    fn fallback_lookup_ignores_breaker_state() {
        let breaker = breaker_with_threshold(1);
        breaker.report_outcome(Mode::Stable, false);

        // A running chain keeps its designated fallback even when that
        // mode's breaker is open.
        let resolver = StrategyResolver::new(&breaker);
        let fallback = resolver.fallback(&crate::strategy::SPEED).unwrap();
        assert_eq!(fallback.label, "stable");
    }
}
