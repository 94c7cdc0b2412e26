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

//! Retry throttling.
//!
//! An unthrottled retry loop can make an overload situation worse: while a
//! service recovers from an incident, retries may dominate the traffic and
//! keep it saturated. The throttlers in this module watch the outcome of
//! recent attempts and start rejecting retries when too many of them fail.
//! Only retries are rejected, the initial attempt of an operation always
//! goes through.
//!
//! A throttler observes traffic from every operation it is attached to, so
//! applications normally create one per service endpoint and share it across
//! all the clients talking to that endpoint.
//!
//! The implementations follow [Handling Overload] and the [gRPC retry
//! design].
//!
//! [Handling Overload]: https://sre.google/sre-book/handling-overload/
//! [gRPC retry design]: https://github.com/grpc/proposal/blob/master/A6-client-retries.md

use crate::retry_result::RetryResult;
use std::sync::{Arc, Mutex};

/// The error type for throttler creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the throttling factor ({0}) must not be negative")]
    NegativeFactor(f64),
    #[error("the throttling threshold ({threshold}) must not exceed the debt limit ({limit})")]
    ThresholdAboveLimit { threshold: u64, limit: u64 },
}

/// Decides whether a retry attempt may be sent.
///
/// The retry loop reports every attempt outcome to the throttler and asks it
/// before sending a retry. Throttlers are shared across operations and
/// threads, see [SharedRetryThrottler].
pub trait RetryThrottler: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the next retry attempt should be rejected.
    ///
    /// A rejected attempt is reported to the retry policy as if it had
    /// failed, so persistent throttling eventually exhausts the policy.
    fn throttle_retry_attempt(&self) -> bool;

    /// Reports a failed attempt, with the retry policy's classification.
    fn on_retry_failure(&mut self, flow: &RetryResult);

    /// Reports a successful attempt.
    fn on_success(&mut self);
}

/// The handle type used to share a throttler between operations.
pub type SharedRetryThrottler = Arc<Mutex<dyn RetryThrottler>>;

/// A helper type to use [RetryThrottler] in request options.
#[derive(Clone)]
pub struct RetryThrottlerArg(pub(crate) SharedRetryThrottler);

impl<T: RetryThrottler + 'static> From<T> for RetryThrottlerArg {
    fn from(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }
}

impl From<SharedRetryThrottler> for RetryThrottlerArg {
    fn from(value: SharedRetryThrottler) -> Self {
        Self(value)
    }
}

/// Rejects retries with a probability based on the observed failure rate.
///
/// This implements the client-side adaptive throttling described in
/// [Handling Overload]. The throttler counts completed requests and the
/// subset of them the service accepted, and rejects a retry attempt with
/// probability
///
/// ```norust
/// max(0, (requests - factor * accepts) / (requests + 1))
/// ```
///
/// Requests rejected with a permanent error count as accepted: the service
/// made a decision about them, it was not overloaded. Only transient
/// failures push the rejection probability up.
///
/// Larger values of `factor` tolerate higher failure rates before the
/// throttler kicks in. `2.0` is a reasonable starting point.
///
/// [Handling Overload]: https://sre.google/sre-book/handling-overload/
#[derive(Clone, Debug)]
pub struct AdaptiveThrottler {
    requests: u64,
    accepts: u64,
    factor: f64,
}

impl AdaptiveThrottler {
    /// Creates a throttler, validating `factor`.
    ///
    /// # Example
    /// ```
    /// # use cumulus_gax::retry_throttler::*;
    /// let throttler = AdaptiveThrottler::new(2.0)?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn new(factor: f64) -> Result<Self, Error> {
        if factor < 0.0 {
            return Err(Error::NegativeFactor(factor));
        }
        Ok(Self::clamp(factor))
    }

    /// Creates a throttler, forcing `factor` into range.
    pub fn clamp(factor: f64) -> Self {
        Self {
            requests: 0,
            accepts: 0,
            factor: factor.max(0.0),
        }
    }

    fn rejection_probability(&self) -> f64 {
        let requests = self.requests as f64;
        let accepts = self.accepts as f64;
        ((requests - self.factor * accepts) / (requests + 1.0)).max(0.0)
    }

    fn should_reject<R: rand::Rng>(&self, rng: &mut R) -> bool {
        rng.random::<f64>() < self.rejection_probability()
    }
}

impl Default for AdaptiveThrottler {
    /// Returns a throttler with the recommended factor.
    fn default() -> Self {
        Self::clamp(2.0)
    }
}

impl RetryThrottler for AdaptiveThrottler {
    fn throttle_retry_attempt(&self) -> bool {
        self.should_reject(&mut rand::rng())
    }

    fn on_retry_failure(&mut self, flow: &RetryResult) {
        self.requests += 1;
        if flow.is_permanent() {
            self.accepts += 1;
        }
    }

    fn on_success(&mut self) {
        self.requests += 1;
        self.accepts += 1;
    }
}

/// Rejects all retries while recent failures outweigh recent successes.
///
/// The breaker keeps a ledger of outstanding debt. Every transient failure
/// adds `failure_cost` to the debt, every completed request pays one unit
/// off, and retries are rejected while the debt is at or above `threshold`.
/// The debt is capped at `debt_limit` so recovering from a long incident
/// does not take arbitrarily long.
///
/// Only completed requests pay the debt down, so a tripped breaker relies on
/// the initial attempts of other operations (which are never throttled) to
/// close again. This is the behavior prescribed by the [gRPC retry design].
///
/// # Example
/// ```
/// # use cumulus_gax::retry_throttler::*;
/// let throttler = CircuitBreaker::new(100, 50, 10)?;
/// # Ok::<(), Error>(())
/// ```
///
/// [gRPC retry design]: https://github.com/grpc/proposal/blob/master/A6-client-retries.md
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    debt: u64,
    debt_limit: u64,
    threshold: u64,
    failure_cost: u64,
}

impl CircuitBreaker {
    /// Creates a breaker that trips once the failure debt reaches
    /// `threshold`, accrues `failure_cost` per transient failure, and caps
    /// the debt at `debt_limit`.
    pub fn new(debt_limit: u64, threshold: u64, failure_cost: u64) -> Result<Self, Error> {
        if threshold > debt_limit {
            return Err(Error::ThresholdAboveLimit {
                threshold,
                limit: debt_limit,
            });
        }
        Ok(Self {
            debt: 0,
            debt_limit,
            threshold,
            failure_cost,
        })
    }
}

impl Default for CircuitBreaker {
    /// Returns a breaker that trips after a burst of five transient
    /// failures.
    fn default() -> Self {
        Self {
            debt: 0,
            debt_limit: 100,
            threshold: 50,
            failure_cost: 10,
        }
    }
}

impl RetryThrottler for CircuitBreaker {
    fn throttle_retry_attempt(&self) -> bool {
        self.debt >= self.threshold
    }

    fn on_retry_failure(&mut self, flow: &RetryResult) {
        if flow.is_permanent() {
            // The service handled the request, count it as completed.
            self.on_success();
        } else {
            self.debt = self
                .debt
                .saturating_add(self.failure_cost)
                .min(self.debt_limit);
        }
    }

    fn on_success(&mut self) {
        self.debt = self.debt.saturating_sub(1);
    }
}
