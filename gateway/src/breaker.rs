//! Per-target circuit breaker.
//!
//! ```text
//! Closed   -> Open:     failure ratio over the rolling window reaches the threshold
//! Open     -> HalfOpen: cool-down elapsed, first caller after it takes a probe
//! HalfOpen -> Closed:   a probe succeeds
//! HalfOpen -> Open:     a probe fails
//! ```
//!
//! The current state is kept in an atomic so the open-state rejection never
//! takes a lock. All transitions happen under the window mutex and re-check
//! the state they transition from.

use crate::config::CircuitBreakerConfig;
use crate::metrics_defs::{BREAKER_REJECTED, BREAKER_STATE, BREAKER_TRANSITIONS};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared::{counter, gauge};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Window {
    // true = success
    outcomes: VecDeque<bool>,
    // Probes handed out since entering half-open
    probes_issued: u32,
}

impl Window {
    fn failure_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    // Milliseconds since `epoch` until which the circuit stays open
    open_until_ms: AtomicU64,
    epoch: Instant,
    window: Mutex<Window>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window_size = config.window_size;
        CircuitBreaker {
            target: target.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            open_until_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            window: Mutex::new(Window {
                outcomes: VecDeque::with_capacity(window_size),
                probes_issued: 0,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state as stored. An open circuit whose cool-down has elapsed
    /// still reads `Open` until the next caller moves it to half-open.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// State the next caller will find: an open circuit whose cool-down has
    /// elapsed reads `HalfOpen` even before anyone takes the probe.
    pub fn effective_state(&self) -> CircuitState {
        match self.state() {
            CircuitState::Open if self.cool_down_elapsed() => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Asks to send one request upstream. `None` means the circuit is open
    /// (or the half-open probe budget is spent) and nothing may be sent.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        // Lock-free fast paths
        match self.state() {
            CircuitState::Closed => return Some(Permit::new(self.clone(), false)),
            CircuitState::Open if !self.cool_down_elapsed() => {
                counter!(BREAKER_REJECTED).increment(1);
                return None;
            }
            _ => {}
        }

        let mut window = self.window.lock();
        let permit = match self.state() {
            CircuitState::Closed => Some(Permit::new(self.clone(), false)),
            CircuitState::Open if !self.cool_down_elapsed() => None,
            CircuitState::Open => {
                self.transition(&mut window, CircuitState::Open, CircuitState::HalfOpen);
                window.probes_issued = 1;
                Some(Permit::new(self.clone(), true))
            }
            CircuitState::HalfOpen if window.probes_issued < self.config.half_open_probes => {
                window.probes_issued += 1;
                Some(Permit::new(self.clone(), true))
            }
            CircuitState::HalfOpen => None,
        };

        if permit.is_none() {
            counter!(BREAKER_REJECTED).increment(1);
        }
        permit
    }

    fn record_success(&self, probe: bool) {
        let mut window = self.window.lock();
        match self.state() {
            CircuitState::Closed => self.push_outcome(&mut window, true),
            CircuitState::HalfOpen if probe => {
                self.transition(&mut window, CircuitState::HalfOpen, CircuitState::Closed);
            }
            // Late results from requests admitted before the last transition
            _ => {}
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut window = self.window.lock();
        match self.state() {
            CircuitState::Closed => {
                self.push_outcome(&mut window, false);
                if window.outcomes.len() >= self.config.minimum_calls
                    && window.failure_ratio() >= self.config.failure_ratio
                {
                    self.transition(&mut window, CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                self.transition(&mut window, CircuitState::HalfOpen, CircuitState::Open);
            }
            _ => {}
        }
    }

    // A probe that never reported back hands its slot back.
    fn release_probe(&self) {
        let mut window = self.window.lock();
        if self.state() == CircuitState::HalfOpen {
            window.probes_issued = window.probes_issued.saturating_sub(1);
        }
    }

    fn push_outcome(&self, window: &mut Window, success: bool) {
        if window.outcomes.len() == self.config.window_size {
            window.outcomes.pop_front();
        }
        window.outcomes.push_back(success);
    }

    // Caller holds the window lock.
    fn transition(&self, window: &mut Window, from: CircuitState, to: CircuitState) {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match to {
            CircuitState::Open => {
                let until = self.elapsed_ms() + self.config.cool_down_ms;
                self.open_until_ms.store(until, Ordering::Release);
                tracing::warn!(
                    target_host = %self.target,
                    failure_ratio = window.failure_ratio(),
                    cool_down_ms = self.config.cool_down_ms,
                    "circuit {from} -> open"
                );
            }
            CircuitState::HalfOpen => {
                window.probes_issued = 0;
                tracing::info!(target_host = %self.target, "circuit open -> half_open");
            }
            CircuitState::Closed => {
                window.outcomes.clear();
                window.probes_issued = 0;
                tracing::info!(target_host = %self.target, "circuit {from} -> closed");
            }
        }

        counter!(BREAKER_TRANSITIONS, "to" => to.as_str()).increment(1);
        gauge!(BREAKER_STATE, "target" => self.target.clone()).set(to as u8 as f64);
    }

    fn cool_down_elapsed(&self) -> bool {
        self.elapsed_ms() >= self.open_until_ms.load(Ordering::Acquire)
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Time left before an open circuit admits a probe.
    pub fn remaining_cool_down(&self) -> Duration {
        if self.state() != CircuitState::Open {
            return Duration::ZERO;
        }
        let until = self.open_until_ms.load(Ordering::Acquire);
        Duration::from_millis(until.saturating_sub(self.elapsed_ms()))
    }
}

/// Admission ticket for one upstream request. Report the outcome with
/// [`Permit::success`] or [`Permit::failure`]; dropping it unreported only
/// returns a half-open probe slot.
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    reported: bool,
}

impl Permit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Permit {
            breaker,
            probe,
            reported: false,
        }
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.record_success(self.probe);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.reported && self.probe {
            self.breaker.release_probe();
        }
    }
}

/// One breaker per upstream target, created on first use.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        BreakerRegistry {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(target) {
            return breaker.clone();
        }

        self.breakers
            .write()
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone())))
            .clone()
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .read()
            .iter()
            .map(|(target, breaker)| (target.clone(), breaker.effective_state()))
            .collect()
    }
}
