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

//! Polling continuation policies.
//!
//! A polling loop needs two decisions a retry policy does not make: whether
//! a failed status query is worth repeating, and how long to keep watching
//! an operation that is still in progress. Status queries are always
//! idempotent and the operation keeps making progress while they fail, so
//! polling policies are usually far more tolerant than retry policies.
//!
//! # Example
//! ```
//! # use cumulus_gax::polling_error_policy::*;
//! use std::time::Duration;
//! // Give up after 15 minutes or 50 status queries, whichever comes first.
//! let policy = TransientErrors
//!     .with_time_limit(Duration::from_secs(15 * 60))
//!     .with_attempt_limit(50);
//! ```

use crate::error::Error;
use crate::retry_result::RetryResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides whether a polling loop continues.
pub trait PollingErrorPolicy: Send + Sync + std::fmt::Debug {
    /// Called after a status query fails.
    ///
    /// `attempt_count` counts the queries issued so far. It is at least one
    /// by the time any of them can fail.
    fn on_error(&self, loop_start: Instant, attempt_count: u32, error: Error) -> RetryResult;

    /// Called after a status query reports the operation still in progress.
    ///
    /// Policies that bound the polling loop return an error here once the
    /// bound is reached. The default never stops the loop.
    fn on_in_progress(
        &self,
        _loop_start: Instant,
        _attempt_count: u32,
        _operation_name: &str,
    ) -> Option<Error> {
        None
    }
}

/// A helper type to use [PollingErrorPolicy] in request options.
#[derive(Clone)]
pub struct PollingErrorPolicyArg(pub(crate) Arc<dyn PollingErrorPolicy>);

impl<T> From<T> for PollingErrorPolicyArg
where
    T: PollingErrorPolicy + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl From<Arc<dyn PollingErrorPolicy>> for PollingErrorPolicyArg {
    fn from(value: Arc<dyn PollingErrorPolicy>) -> Self {
        Self(value)
    }
}

/// Decorator helpers for [PollingErrorPolicy].
pub trait PollingErrorPolicyExt: PollingErrorPolicy + Sized {
    /// Bound the total time spent in the polling loop.
    fn with_time_limit(self, limit: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, limit)
    }

    /// Bound the number of status queries.
    ///
    /// `on_error()` runs only after a query, so a limit of zero or one stops
    /// the loop after the first query.
    fn with_attempt_limit(self, limit: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount::custom(self, limit)
    }
}

impl<T: PollingErrorPolicy> PollingErrorPolicyExt for T {}

/// Continues polling on errors that say nothing about the operation.
///
/// A query that failed before reaching the service, or was rejected with
/// UNAVAILABLE, reveals nothing about the operation itself and is worth
/// repeating. Any other failure stops the loop.
///
/// Decorate this policy with
/// [with_time_limit][PollingErrorPolicyExt::with_time_limit] or
/// [with_attempt_limit][PollingErrorPolicyExt::with_attempt_limit] to bound
/// the loop.
#[derive(Clone, Debug)]
pub struct TransientErrors;

impl PollingErrorPolicy for TransientErrors {
    fn on_error(&self, _loop_start: Instant, _attempt_count: u32, error: Error) -> RetryResult {
        let transient = error.is_io()
            || error
                .status()
                .is_some_and(|s| s.code == crate::error::rpc::Code::Unavailable);
        if transient {
            RetryResult::Continue(error)
        } else {
            RetryResult::Permanent(error)
        }
    }
}

/// Continues polling on any error.
///
/// This policy must be decorated with a time or attempt bound, on its own it
/// never stops the loop.
#[derive(Clone, Debug)]
pub struct AlwaysContinue;

impl PollingErrorPolicy for AlwaysContinue {
    fn on_error(&self, _loop_start: Instant, _attempt_count: u32, error: Error) -> RetryResult {
        RetryResult::Continue(error)
    }
}

// Downgrades a continuation once a loop bound is reached. Terminal decisions
// from the inner policy pass through untouched.
fn stop_if(flow: RetryResult, expired: bool) -> RetryResult {
    match flow {
        RetryResult::Continue(e) if expired => RetryResult::Exhausted(e),
        other => other,
    }
}

/// Bounds the total time spent in a polling loop.
///
/// Below the limit the inner policy decides. Past it, a query failure the
/// inner policy would repeat stops the loop instead, and an operation still
/// in progress is reported as [Exhausted::ElapsedTime].
///
/// # Example
/// ```
/// # use cumulus_gax::polling_error_policy::*;
/// use std::time::Duration;
/// let policy = LimitedElapsedTime::new(Duration::from_secs(300));
/// ```
#[derive(Debug)]
pub struct LimitedElapsedTime<P = TransientErrors>
where
    P: PollingErrorPolicy,
{
    inner: P,
    limit: Duration,
}

impl LimitedElapsedTime {
    /// Bounds the default [TransientErrors] policy.
    pub fn new(limit: Duration) -> Self {
        Self {
            inner: TransientErrors,
            limit,
        }
    }
}

impl<P> LimitedElapsedTime<P>
where
    P: PollingErrorPolicy,
{
    /// Bounds a custom inner policy.
    pub fn custom(inner: P, limit: Duration) -> Self {
        Self { inner, limit }
    }

    fn expired(&self, loop_start: Instant) -> Option<Duration> {
        let elapsed = Instant::now().saturating_duration_since(loop_start);
        (elapsed >= self.limit).then_some(elapsed)
    }
}

impl<P> PollingErrorPolicy for LimitedElapsedTime<P>
where
    P: PollingErrorPolicy + 'static,
{
    fn on_error(&self, loop_start: Instant, attempt_count: u32, error: Error) -> RetryResult {
        let flow = self.inner.on_error(loop_start, attempt_count, error);
        stop_if(flow, self.expired(loop_start).is_some())
    }

    fn on_in_progress(
        &self,
        loop_start: Instant,
        attempt_count: u32,
        operation_name: &str,
    ) -> Option<Error> {
        self.inner
            .on_in_progress(loop_start, attempt_count, operation_name)
            .or_else(|| {
                self.expired(loop_start).map(|elapsed| {
                    Error::other(Exhausted::ElapsedTime {
                        operation_name: operation_name.to_string(),
                        elapsed,
                        limit: self.limit,
                    })
                })
            })
    }
}

/// Bounds the number of status queries in a polling loop.
///
/// Below the limit the inner policy decides. At or past it, a query failure
/// the inner policy would repeat stops the loop instead, and an operation
/// still in progress is reported as [Exhausted::AttemptCount].
///
/// # Example
/// ```
/// # use cumulus_gax::polling_error_policy::*;
/// let policy = LimitedAttemptCount::new(50);
/// ```
#[derive(Debug)]
pub struct LimitedAttemptCount<P = TransientErrors>
where
    P: PollingErrorPolicy,
{
    inner: P,
    limit: u32,
}

impl LimitedAttemptCount {
    /// Bounds the default [TransientErrors] policy.
    pub fn new(limit: u32) -> Self {
        Self {
            inner: TransientErrors,
            limit,
        }
    }
}

impl<P> LimitedAttemptCount<P>
where
    P: PollingErrorPolicy,
{
    /// Bounds a custom inner policy.
    pub fn custom(inner: P, limit: u32) -> Self {
        Self { inner, limit }
    }
}

impl<P> PollingErrorPolicy for LimitedAttemptCount<P>
where
    P: PollingErrorPolicy,
{
    fn on_error(&self, loop_start: Instant, attempt_count: u32, error: Error) -> RetryResult {
        let flow = self.inner.on_error(loop_start, attempt_count, error);
        stop_if(flow, attempt_count >= self.limit)
    }

    fn on_in_progress(
        &self,
        loop_start: Instant,
        attempt_count: u32,
        operation_name: &str,
    ) -> Option<Error> {
        self.inner
            .on_in_progress(loop_start, attempt_count, operation_name)
            .or_else(|| {
                (attempt_count >= self.limit).then(|| {
                    Error::other(Exhausted::AttemptCount {
                        operation_name: operation_name.to_string(),
                        count: attempt_count,
                        limit: self.limit,
                    })
                })
            })
    }
}

/// The payload of errors that stop a polling loop at one of its bounds.
///
/// Callers can downcast the source of the loop's error to this type to
/// distinguish "the operation failed" from "we stopped watching it".
#[derive(Debug, thiserror::Error)]
pub enum Exhausted {
    /// The polling loop ran longer than its time bound.
    #[error(
        "polling loop for {operation_name} exhausted, elapsed time ({elapsed:?}) exceeds limit ({limit:?})"
    )]
    ElapsedTime {
        operation_name: String,
        elapsed: Duration,
        limit: Duration,
    },

    /// The polling loop issued more status queries than its attempt bound.
    #[error(
        "polling loop for {operation_name} exhausted, attempt count ({count}) exceeds limit ({limit})"
    )]
    AttemptCount {
        operation_name: String,
        count: u32,
        limit: u32,
    },
}
