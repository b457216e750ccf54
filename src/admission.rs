//! Admission control: per-user windowed quotas with tier-priority queueing.
//!
//! Every run passes through an [`AdmissionController`] before any provider is
//! called. The in-process implementation keeps all counters behind one async
//! mutex so the quota check and the increment happen atomically; callers that
//! find an exhausted window wait in a bounded queue ordered by tier priority,
//! and an over-capacity queue refuses with a retryable error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pipeline::Tier;

/// Handle for one admitted run, used to commit or roll back the charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TicketId(pub Uuid);

impl TicketId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a successful admission check.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub ticket: TicketId,
    /// Runs left in the user's current window after this one.
    pub remaining: u32,
}

/// Gate consumed around every pipeline run.
#[async_trait]
pub trait AdmissionController: Send + Sync {
    /// Reserve a run slot for the user, waiting if the window is exhausted.
    /// A full wait queue refuses with a retryable [`Error::AdmissionRefused`].
    async fn begin_run(&self, user: &str, tier: Tier) -> Result<QuotaDecision>;

    /// Finalize the charge for a completed run.
    async fn commit_run(&self, ticket: TicketId);

    /// Return the charge for a run that never consumed providers.
    async fn rollback_run(&self, ticket: TicketId);
}

/// Configuration for the in-process controller.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Runs allowed per user per window.
    pub runs_per_window: u32,
    pub window: Duration,
    /// Waiters tolerated before refusing outright.
    pub queue_capacity: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            runs_per_window: 30,
            window: Duration::from_secs(60),
            queue_capacity: 16,
        }
    }
}

#[derive(Debug)]
struct UserWindow {
    started: Instant,
    count: u32,
}

struct Waiter {
    priority: u8,
    seq: u64,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct AdmissionState {
    windows: HashMap<String, UserWindow>,
    /// Ticket -> user, for rollback.
    pending: HashMap<TicketId, String>,
    waiters: Vec<Waiter>,
    next_seq: u64,
}

impl AdmissionState {
    /// Pop the highest-priority, longest-waiting waiter.
    fn pop_waiter(&mut self) -> Option<Waiter> {
        let best = self
            .waiters
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| (w.priority, u64::MAX - w.seq))
            .map(|(i, _)| i)?;
        Some(self.waiters.swap_remove(best))
    }
}

/// Windowed in-process rate limiter. Not a singleton: construct one and share
/// it via `Arc` with everything that admits runs.
pub struct InProcessAdmission {
    config: AdmissionConfig,
    state: Mutex<AdmissionState>,
}

impl InProcessAdmission {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    fn wake_one(state: &mut AdmissionState) {
        if let Some(waiter) = state.pop_waiter() {
            // A dropped receiver means the waiter gave up; the freed quota
            // stays available for the next begin_run.
            let _ = waiter.wake.send(());
        }
    }
}

#[async_trait]
impl AdmissionController for InProcessAdmission {
    async fn begin_run(&self, user: &str, tier: Tier) -> Result<QuotaDecision> {
        let mut my_seq: Option<u64> = None;
        loop {
            let (rx, until_reset) = {
                let mut state = self.state.lock().await;

                // A waiter admitted via window rollover (not via wake_one)
                // still has its entry in the queue; remove it before it
                // counts against capacity. Dropped receivers from cancelled
                // callers are swept the same way.
                if let Some(seq) = my_seq.take() {
                    state.waiters.retain(|w| w.seq != seq);
                }
                state.waiters.retain(|w| !w.wake.is_closed());

                let now = Instant::now();

                let (admitted, window_started) = {
                    let window = state
                        .windows
                        .entry(user.to_string())
                        .or_insert(UserWindow {
                            started: now,
                            count: 0,
                        });
                    if now.duration_since(window.started) >= self.config.window {
                        window.started = now;
                        window.count = 0;
                    }
                    let admitted = window.count < self.config.runs_per_window;
                    if admitted {
                        window.count += 1;
                    }
                    (
                        admitted.then(|| self.config.runs_per_window - window.count),
                        window.started,
                    )
                };

                if let Some(remaining) = admitted {
                    let ticket = TicketId::new();
                    state.pending.insert(ticket, user.to_string());
                    debug!(user, %ticket, remaining, "run admitted");
                    return Ok(QuotaDecision { ticket, remaining });
                }

                if state.waiters.len() >= self.config.queue_capacity {
                    return Err(Error::admission_refused("admission queue full"));
                }

                let until_reset = self
                    .config
                    .window
                    .saturating_sub(now.duration_since(window_started));
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                my_seq = Some(seq);
                state.waiters.push(Waiter {
                    priority: tier.queue_priority(),
                    seq,
                    wake: tx,
                });
                (rx, until_reset)
            };

            // Wait for a rollback wakeup or the window rollover, whichever
            // comes first, then retry the check under the lock.
            let _ = tokio::time::timeout(until_reset, rx).await;
        }
    }

    async fn commit_run(&self, ticket: TicketId) {
        let mut state = self.state.lock().await;
        state.pending.remove(&ticket);
    }

    async fn rollback_run(&self, ticket: TicketId) {
        let mut state = self.state.lock().await;
        let Some(user) = state.pending.remove(&ticket) else {
            return;
        };
        if let Some(window) = state.windows.get_mut(&user) {
            window.count = window.count.saturating_sub(1);
        }
        debug!(user, %ticket, "run charge rolled back");
        Self::wake_one(&mut state);
    }
}

/// Per-provider health: consecutive failures trip a cooldown.
///
/// Owned by whoever constructs the providers and passed by reference to call
/// sites; there is deliberately no process-wide instance.
pub struct ProviderHealth {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<HealthState>,
}

#[derive(Debug, Default)]
struct HealthState {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl ProviderHealth {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.cooldown_until = None;
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Whether the provider should be called right now.
    pub async fn available(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.cooldown_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                // Cooldown elapsed: allow a probe, keep the failure count so
                // one more failure re-trips immediately.
                state.cooldown_until = None;
                true
            }
            None => true,
        }
    }
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}
