//! Adaptive request pacing for the Gmail API
//!
//! The controller tunes two knobs to hold a target request rate under the
//! per-user quota: the delay between batches (fine) and the number of
//! requests packed into each batch (coarse). When the network is slow the
//! pipe widens; when it is fast, pauses are inserted. A 429 is expensive —
//! a dead backoff window plus a lowered target — so the controller is
//! asymmetric: quick to widen, slow to narrow.
//!
//! This is an explicit state machine the caller drives around each batch
//! (`wait` → send → `on_batch_complete` / `on_rate_limit` / `on_error`),
//! not a middleware layer; backoff windows stay visible to the caller.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Tuning constants for one throttle instance
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Steady-state request rate to aim for
    pub target: u32,
    /// Floor the target never drops below under 429 pressure
    pub min_target: u32,
    /// Requests per batch at rest
    pub base_concurrency: u32,
    /// Hard ceiling on requests per batch
    pub max_concurrency: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub initial_delay: Duration,
    /// Backoff applied on a 429 without a Retry-After
    pub default_backoff: Duration,
    /// Quiet time per +1 of target recovery after a 429
    pub recovery_window: Duration,
    /// EWMA smoothing factor for batch latency
    pub ewma_alpha: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            target: 47,
            min_target: 30,
            base_concurrency: 20,
            max_concurrency: 40,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            initial_delay: Duration::from_millis(100),
            default_backoff: Duration::from_secs(60),
            recovery_window: Duration::from_secs(30),
            ewma_alpha: 0.3,
        }
    }
}

impl ThrottleConfig {
    /// Build from the configured rate and batch ceiling
    pub fn for_rate(target: u32, max_concurrency: u32) -> Self {
        let defaults = Self::default();
        Self {
            target: target.max(defaults.min_target),
            max_concurrency: max_concurrency.max(1),
            base_concurrency: defaults.base_concurrency.min(max_concurrency.max(1)),
            ..defaults
        }
    }
}

#[derive(Debug)]
struct ThrottleState {
    /// EWMA of batch wall-clock latency, ms; 0 = no sample yet
    ema_latency_ms: f64,
    delay_ms: f64,
    concurrency: u32,
    backoff_until: Option<Instant>,
    rate_limit_count: u32,
    last_rate_limit: Option<Instant>,
    effective_target: u32,
    /// Target right after the most recent 429; recovery climbs from here
    recovery_base: u32,
}

/// Snapshot of the controller for the health signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleStats {
    pub concurrency: u32,
    pub delay_ms: u64,
    pub avg_latency_ms: u64,
    pub effective_target: u32,
    pub rate_limit_count: u32,
    pub in_backoff: bool,
}

/// Latency-aware pacing controller, one instance per account
pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

impl AdaptiveThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let state = ThrottleState {
            ema_latency_ms: 0.0,
            delay_ms: config.initial_delay.as_millis() as f64,
            concurrency: config.base_concurrency,
            backoff_until: None,
            rate_limit_count: 0,
            last_rate_limit: None,
            effective_target: config.target,
            recovery_base: config.target,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// How many requests the next batch should carry
    pub fn concurrency(&self) -> usize {
        self.state.lock().unwrap().concurrency as usize
    }

    /// Sleep out the backoff window if one is active, else the tuned delay
    pub fn wait(&self) {
        let duration = self.wait_duration(Instant::now());
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    fn wait_duration(&self, now: Instant) -> Duration {
        let state = self.state.lock().unwrap();
        if let Some(until) = state.backoff_until
            && until > now
        {
            return until - now;
        }
        Duration::from_millis(state.delay_ms as u64)
    }

    /// Feed back one delivered batch
    pub fn on_batch_complete(&self, latency: Duration, successes: usize) {
        self.on_batch_complete_at(Instant::now(), latency, successes);
    }

    fn on_batch_complete_at(&self, now: Instant, latency: Duration, _successes: usize) {
        let mut state = self.state.lock().unwrap();
        let alpha = self.config.ewma_alpha;
        let latency_ms = latency.as_millis() as f64;
        state.ema_latency_ms = if state.ema_latency_ms == 0.0 {
            latency_ms
        } else {
            alpha * latency_ms + (1.0 - alpha) * state.ema_latency_ms
        };

        // One batch of `concurrency` requests per cycle; the cycle length
        // that hits the target is concurrency / target seconds.
        let cycle_target_ms = state.concurrency as f64 * 1000.0 / state.effective_target as f64;
        let required_delay = cycle_target_ms - state.ema_latency_ms;
        let min_delay_ms = self.config.min_delay.as_millis() as f64;

        if required_delay >= min_delay_ms {
            // Latency leaves room: pause between batches, and shed batch
            // width once the pause is comfortably positive
            state.delay_ms = required_delay.min(self.config.max_delay.as_millis() as f64);
            if state.concurrency > self.config.base_concurrency && required_delay > 50.0 {
                state.concurrency = (state.concurrency - 2).max(self.config.base_concurrency);
            }
        } else {
            // Latency alone eats the cycle: pin the delay and widen the
            // batch toward the size that sustains the target
            state.delay_ms = min_delay_ms;
            let desired =
                (state.effective_target as f64 * state.ema_latency_ms / 1000.0).ceil() as u32;
            if desired > state.concurrency {
                let step = (desired - state.concurrency).min(5);
                state.concurrency =
                    (state.concurrency + step).min(self.config.max_concurrency);
            }
        }

        self.recover(&mut state, now);

        debug!(
            "batch fed back: ema={:.0}ms delay={:.0}ms concurrency={} target={}",
            state.ema_latency_ms, state.delay_ms, state.concurrency, state.effective_target
        );
    }

    /// Climb the target back toward the configured rate after quiet time
    ///
    /// The first quiet window after a 429 holds the lowered target; each
    /// further window earns +1 until the configured target is restored,
    /// which also clears the 429 counter.
    fn recover(&self, state: &mut ThrottleState, now: Instant) {
        if state.rate_limit_count == 0 {
            return;
        }
        let Some(last) = state.last_rate_limit else {
            return;
        };
        let elapsed = now.saturating_duration_since(last);
        let window = self.config.recovery_window.as_secs().max(1);
        let windows = elapsed.as_secs() / window;
        if windows == 0 {
            return;
        }
        let regained = (windows - 1).min(u32::MAX as u64) as u32;
        let recovered = (state.recovery_base.saturating_add(regained)).min(self.config.target);
        if recovered > state.effective_target {
            debug!(
                "quota recovery: target {} -> {}",
                state.effective_target, recovered
            );
            state.effective_target = recovered;
        }
        if state.effective_target >= self.config.target {
            state.rate_limit_count = 0;
        }
    }

    /// Feed back a 429 on the whole batch
    pub fn on_rate_limit(&self, retry_after: Option<Duration>) {
        self.on_rate_limit_at(Instant::now(), retry_after);
    }

    fn on_rate_limit_at(&self, now: Instant, retry_after: Option<Duration>) {
        let mut state = self.state.lock().unwrap();
        let backoff = retry_after.unwrap_or(self.config.default_backoff);
        state.backoff_until = Some(now + backoff);
        state.effective_target = state
            .effective_target
            .saturating_sub(5)
            .max(self.config.min_target);
        state.recovery_base = state.effective_target;
        state.concurrency = state
            .concurrency
            .saturating_sub(5)
            .max(self.config.base_concurrency);
        state.delay_ms =
            (state.delay_ms * 2.0 + 100.0).min(self.config.max_delay.as_millis() as f64);
        state.rate_limit_count += 1;
        state.last_rate_limit = Some(now);
        warn!(
            "rate limited: backing off {:?}, target now {}",
            backoff, state.effective_target
        );
    }

    /// Feed back a transient failure; nudges the delay up
    pub fn on_error(&self) {
        let mut state = self.state.lock().unwrap();
        state.delay_ms = (state.delay_ms * 1.2).min(self.config.max_delay.as_millis() as f64);
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.state.lock().unwrap();
        ThrottleStats {
            concurrency: state.concurrency,
            delay_ms: state.delay_ms as u64,
            avg_latency_ms: state.ema_latency_ms as u64,
            effective_target: state.effective_target,
            rate_limit_count: state.rate_limit_count,
            in_backoff: state
                .backoff_until
                .is_some_and(|until| until > Instant::now()),
        }
    }
}
