//! Token-bucket admission control with priority lanes.
//!
//! The controller firmware services its HTTP endpoints from a small
//! single-threaded loop; more than a handful of requests per second makes
//! it shed connections. Every request path in this crate therefore funnels
//! through one [`RateBudget`] per physical device: a token bucket refilled
//! at a steady rate, with waiters parked in four priority lanes. A freed
//! token always goes to the oldest waiter in the highest non-empty lane,
//! so a safety-critical command is never stuck behind a backlog of
//! routine polls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::{self, Duration, Instant};

/// Urgency lane for token acquisition.
///
/// Lanes drain strictly in declaration order; within a lane, waiters are
/// served in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Safety-relevant commands (dosing stop, cover stop).
    Critical,
    /// User-initiated writes.
    High,
    /// Telemetry polling.
    Normal,
    /// Opportunistic reads (configuration prefetch, diagnostics).
    Low,
}

impl Priority {
    const COUNT: usize = 4;

    fn lane(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

/// Floor applied to nonsensical refill rates so the bucket can always
/// make progress.
const MIN_RATE_PER_SEC: f64 = 0.01;

struct BucketState {
    /// Current token balance, fractional between refills.
    tokens: f64,
    /// Refill rate in tokens per second.
    rate: f64,
    /// Balance ceiling; also the size of the initial burst allowance.
    burst: f64,
    last_refill: Instant,
    next_ticket: u64,
    /// Waiting tickets, one queue per lane, oldest at the front.
    lanes: [VecDeque<u64>; Priority::COUNT],
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Ticket currently entitled to the next token, if anyone is waiting.
    fn head(&self) -> Option<u64> {
        self.lanes.iter().find_map(|lane| lane.front().copied())
    }

    /// Earliest instant at which a full token will be available.
    fn next_token_at(&self, now: Instant) -> Instant {
        if self.tokens >= 1.0 {
            now
        } else {
            now + Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

/// Shared token bucket gating all traffic to one device.
///
/// The bucket starts full, so an idle client may burst up to the ceiling
/// immediately; sustained throughput is bounded by the refill rate.
/// [`RateBudget::acquire`] is cancel-safe: a waiter that is dropped before
/// being granted leaves the queue without consuming a token.
pub struct RateBudget {
    state: Mutex<BucketState>,
    wake: Notify,
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock_state();
        f.debug_struct("RateBudget")
            .field("tokens", &st.tokens)
            .field("rate", &st.rate)
            .field("burst", &st.burst)
            .finish_non_exhaustive()
    }
}

impl RateBudget {
    /// Create a bucket refilled at `rate_per_sec` tokens per second with
    /// the given burst ceiling.
    ///
    /// A non-positive rate is clamped to a small floor and a zero burst to
    /// one token, so a misconfigured budget degrades to "very slow" rather
    /// than deadlocking every caller.
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        debug_assert!(rate_per_sec > 0.0, "refill rate must be positive");
        debug_assert!(burst > 0, "burst ceiling must be at least 1");
        let rate = if rate_per_sec.is_finite() && rate_per_sec > 0.0 {
            rate_per_sec
        } else {
            MIN_RATE_PER_SEC
        };
        let burst = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                rate,
                burst,
                last_refill: Instant::now(),
                next_ticket: 0,
                lanes: std::array::from_fn(|_| VecDeque::new()),
            }),
            wake: Notify::new(),
        }
    }

    /// Wait for one token at the given priority.
    ///
    /// Returns as soon as this waiter is the oldest in the highest
    /// non-empty lane *and* a full token has accrued. Dropping the future
    /// before it resolves relinquishes the queue position and wakes the
    /// next waiter in line.
    pub async fn acquire(&self, priority: Priority) {
        let lane = priority.lane();
        let ticket = {
            let mut st = self.lock_state();
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            st.lanes[lane].push_back(ticket);
            ticket
        };
        let mut place = QueuePlace {
            budget: self,
            lane,
            ticket,
            granted: false,
        };

        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register for wake-ups *before* inspecting the queue, so a
            // grant or cancellation racing with this check is not missed.
            notified.as_mut().enable();

            let head_deadline = {
                let mut st = self.lock_state();
                let now = Instant::now();
                st.refill(now);
                if st.head() == Some(ticket) {
                    if st.tokens >= 1.0 {
                        st.tokens -= 1.0;
                        st.lanes[lane].pop_front();
                        place.granted = true;
                        drop(st);
                        // Leftover balance may admit the next head too.
                        self.wake.notify_waiters();
                        return;
                    }
                    Some(st.next_token_at(now))
                } else {
                    None
                }
            };

            match head_deadline {
                // Head of the queue: sleep until the token accrues, unless
                // the queue shape changes under us first.
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = time::sleep_until(deadline) => {}
                    }
                }
                // Someone is ahead of us; nothing to do until a grant or a
                // cancellation reshuffles the queue.
                None => notified.await,
            }
        }
    }

    /// Token balance right now, refill applied. Diagnostic only.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut st = self.lock_state();
        st.refill(Instant::now());
        st.tokens
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        // State mutations are single-assignment and cannot be left
        // half-applied by a panic, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queue membership for one in-flight `acquire`; dequeues on drop unless
/// the token was granted.
struct QueuePlace<'a> {
    budget: &'a RateBudget,
    lane: usize,
    ticket: u64,
    granted: bool,
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        let mut st = self.budget.lock_state();
        st.lanes[self.lane].retain(|&t| t != self.ticket);
        drop(st);
        // A successor may have been waiting on this ticket to clear.
        self.budget.wake.notify_waiters();
    }
}
