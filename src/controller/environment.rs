//! Environment checker
//!
//! Runs the [`CheckSet`] at most once per scheduled interval and caches the
//! aggregate result in between. Passing environments are rechecked every
//! `recheck_interval`; failing ones on an exponential ramp starting at
//! `failure_initial_delay` and capped at `recheck_interval`.

use crate::checks::{CheckArgs, CheckResult, CheckSet};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Checker Port
// =============================================================================

/// What one call to [`EnvironmentChecker::check`] produced
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// Time until the next check is due
    pub requeue_after: Duration,
    /// Fresh or cached aggregate result
    pub result: CheckResult,
    /// The checks actually ran on this call
    pub ran: bool,
    /// The result differs from the previous one by status or reason
    pub changed: bool,
}

impl CheckOutcome {
    fn not_ran(result: CheckResult, requeue_after: Duration) -> Self {
        Self {
            requeue_after,
            result,
            ran: false,
            changed: false,
        }
    }
}

/// Decides whether the environment supports the driver
#[async_trait]
pub trait EnvironmentChecker: Send + Sync {
    async fn check(&self, cancel: &CancellationToken, args: &CheckArgs) -> CheckOutcome;

    /// Drop the last result so the next call runs the checks again.
    ///
    /// Called when a fresh result could not be applied.
    fn invalidate(&self) {}
}

// =============================================================================
// Configuration
// =============================================================================

/// Recheck cadence
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerConfig {
    /// Delay after a passing check, and upper bound of the failure ramp
    pub recheck_interval: Duration,
    /// First delay after a failing check
    pub failure_initial_delay: Duration,
    /// Growth factor of the failure ramp
    pub failure_multiplier: f64,
    /// Relative jitter applied to failure delays
    pub jitter: f64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(3600),
            failure_initial_delay: Duration::from_secs(60),
            failure_multiplier: 2.0,
            jitter: 0.01,
        }
    }
}

impl CheckerConfig {
    fn failure_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.failure_initial_delay)
            .with_multiplier(self.failure_multiplier)
            .with_randomization_factor(self.jitter)
            .with_max_interval(self.recheck_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

// =============================================================================
// Composite Checker
// =============================================================================

struct CheckState {
    last_result: Option<CheckResult>,
    next_check: Option<DateTime<Utc>>,
    failure_backoff: ExponentialBackoff,
}

/// Checker backed by a [`CheckSet`] with a cached result
pub struct CompositeChecker {
    checks: CheckSet,
    config: CheckerConfig,
    state: Mutex<CheckState>,
}

impl CompositeChecker {
    pub fn new(checks: CheckSet, config: CheckerConfig) -> Self {
        let failure_backoff = config.failure_backoff();
        Self {
            checks,
            config,
            state: Mutex::new(CheckState {
                last_result: None,
                next_check: None,
                failure_backoff,
            }),
        }
    }

    /// Make the next call run the checks regardless of schedule
    pub fn force_recheck(&self) {
        self.state.lock().next_check = Some(Utc::now() - chrono::Duration::seconds(1));
    }

    /// Forget the cached result; the next call runs the checks
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.last_result = None;
        state.next_check = None;
    }

    /// Cached result of the last completed run
    pub fn last_result(&self) -> Option<CheckResult> {
        self.state.lock().last_result.clone()
    }

    /// When the next run is due
    pub fn next_check(&self) -> Option<DateTime<Utc>> {
        self.state.lock().next_check
    }

    /// Cached outcome if the next check is not yet due
    fn cached(&self, now: DateTime<Utc>) -> Option<CheckOutcome> {
        let state = self.state.lock();
        let (next_check, last_result) = (state.next_check?, state.last_result.as_ref()?);
        if now >= next_check {
            return None;
        }
        let requeue_after = (next_check - now).to_std().unwrap_or_default();
        Some(CheckOutcome::not_ran(last_result.clone(), requeue_after))
    }

    /// Store a fresh result and schedule the next run
    fn store(&self, result: &CheckResult) -> (Duration, bool) {
        let mut state = self.state.lock();

        let changed = state
            .last_result
            .as_ref()
            .map_or(true, |previous| !previous.same_outcome(result));

        let delay = if result.is_pass() {
            state.failure_backoff.reset();
            self.config.recheck_interval
        } else {
            state
                .failure_backoff
                .next_backoff()
                .unwrap_or(self.config.recheck_interval)
        };

        let delay_chrono = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        state.next_check = Some(Utc::now() + delay_chrono);
        state.last_result = Some(result.clone());

        (delay, changed)
    }
}

#[async_trait]
impl EnvironmentChecker for CompositeChecker {
    async fn check(&self, cancel: &CancellationToken, args: &CheckArgs) -> CheckOutcome {
        if let Some(outcome) = self.cached(Utc::now()) {
            debug!(
                requeue_after_secs = outcome.requeue_after.as_secs(),
                "environment check not due, using cached result"
            );
            return outcome;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.checks.run(args) => Some(result),
        };

        let Some(result) = result else {
            warn!("environment check cancelled, cache left untouched");
            return CheckOutcome::not_ran(CheckResult::cancelled(), Duration::ZERO);
        };

        let (requeue_after, changed) = self.store(&result);
        debug!(
            status = %result.status,
            changed,
            next_check_secs = requeue_after.as_secs(),
            "environment check ran"
        );

        CheckOutcome {
            requeue_after,
            result,
            ran: true,
            changed,
        }
    }

    fn invalidate(&self) {
        self.clear();
    }
}

// =============================================================================
// Skipping Checker
// =============================================================================

/// Checker that never runs checks and always reports Pass
#[derive(Debug, Default, Clone, Copy)]
pub struct SkippingChecker;

#[async_trait]
impl EnvironmentChecker for SkippingChecker {
    async fn check(&self, _cancel: &CancellationToken, _args: &CheckArgs) -> CheckOutcome {
        CheckOutcome::not_ran(CheckResult::pass(), Duration::ZERO)
    }
}
