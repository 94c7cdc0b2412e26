// Copyright 2025 The Cumulus Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client-side flow control for bulk writes.
//!
//! The server reports, inside the response stream, how the client should
//! adjust its send rate. The [RateLimiter] spaces out bulk-write attempts
//! accordingly. One limiter is shared by all the bulk operations on the same
//! connection, so the feedback throttles aggregate throughput, and the
//! limiter must be safe to call concurrently.

use crate::stub::RateLimitInfo;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// The server cannot ask for adjustments beyond these bounds in a single
/// feedback message.
const MIN_FACTOR: f64 = 0.7;
const MAX_FACTOR: f64 = 1.3;

/// The errors thrown by [RateLimiter] constructors.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("the minimum period {0:?} must not exceed the maximum period {1:?}")]
    InvalidPeriodRange(Duration, Duration),
}

/// Spaces out send attempts, adjusting the spacing from server feedback.
///
/// `acquire()` suspends the caller until its send slot arrives. Callers
/// apply the server's feedback with `on_feedback()` after every partial
/// response that carries any.
#[derive(Debug)]
pub struct RateLimiter {
    min_period: Duration,
    max_period: Duration,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    period: Duration,
    next_send: Instant,
    // Feedback is applied at most once per feedback period.
    next_update: Instant,
}

impl RateLimiter {
    /// Creates a limiter with the given initial send period and the default
    /// period bounds.
    pub fn new(initial_period: Duration) -> Self {
        Self::with_limits(
            initial_period,
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .expect("default period bounds are valid")
    }

    /// Creates a limiter with explicit bounds on the send period.
    ///
    /// The period never leaves `[min_period, max_period]`, no matter what
    /// feedback the server sends.
    pub fn with_limits(
        initial_period: Duration,
        min_period: Duration,
        max_period: Duration,
    ) -> Result<Self, Error> {
        if min_period > max_period {
            return Err(Error::InvalidPeriodRange(min_period, max_period));
        }
        let now = Instant::now();
        Ok(Self {
            min_period,
            max_period,
            state: Mutex::new(State {
                period: initial_period.clamp(min_period, max_period),
                next_send: now,
                next_update: now,
            }),
        })
    }

    /// Waits until the next send slot.
    ///
    /// Slots are handed out in the order the callers arrive at the internal
    /// lock. The wait is computed under the lock and awaited outside it, so
    /// a slow waiter does not block other callers from reserving later
    /// slots.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().expect("rate limiter lock is poisoned");
            let now = Instant::now();
            let slot = state.next_send.max(now);
            state.next_send = slot + state.period;
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Applies the server's flow-control feedback.
    ///
    /// A factor above `1.0` shortens the send period (more throughput), a
    /// factor below `1.0` lengthens it. Factors are clamped to the protocol
    /// bounds, and at most one adjustment is applied per feedback period.
    pub fn on_feedback(&self, info: &RateLimitInfo) {
        let mut state = self.state.lock().expect("rate limiter lock is poisoned");
        let now = Instant::now();
        if now < state.next_update {
            return;
        }
        let factor = info.factor.clamp(MIN_FACTOR, MAX_FACTOR);
        state.period = state
            .period
            .div_f64(factor)
            .clamp(self.min_period, self.max_period);
        state.next_update = now + info.period;
    }

    /// The current send period.
    pub fn period(&self) -> Duration {
        self.state
            .lock()
            .expect("rate limiter lock is poisoned")
            .period
    }
}

/// Rate limiters are shared across all the bulk operations on a connection.
pub type SharedRateLimiter = Arc<RateLimiter>;
