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

//! Defines traits for retry policies and some common implementations.
//!
//! # Example
//! ```
//! # use cumulus_gax::retry_policy::*;
//! use std::time::Duration;
//! // Retry for at most 15 minutes or at most 5 attempts: whichever limit is
//! // reached first stops the retry loop.
//! let policy = TransientErrors
//!     .with_time_limit(Duration::from_secs(15 * 60))
//!     .with_attempt_limit(5);
//! ```
//!
//! The retry loop automatically retries operations when they fail with a
//! transient error and the operation is idempotent, that is, it is safe to
//! perform the operation more than once.
//!
//! Applications may override the default behavior, and maybe retry operations
//! that, while not safe in general, are safe given how the application manages
//! its resources.
//!
//! This module defines the trait for retry policies and implementations that
//! should meet most needs.

use crate::error::Error;
use crate::retry_result::RetryResult;
use crate::throttle_result::ThrottleResult;
use std::sync::Arc;

/// Determines how errors are handled in the retry loop.
///
/// Implementations of this trait classify errors as retryable or not, and
/// determine for how long the retry loop may continue.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts. This method is always
    ///   called after the first attempt, so the value is non-zero.
    /// * `idempotent` - if `true` assume the operation is idempotent. Many
    ///   more errors are retryable on idempotent operations.
    /// * `error` - the last error when attempting the request.
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult;

    /// Query the retry policy after the loop throttles a retry attempt.
    ///
    /// Throttled attempts consume the policy's attempt and time budgets, but
    /// never upgrade the previous error to a permanent failure.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts.
    /// * `error` - the error that caused the retry loop to backoff, before
    ///   the throttled attempt.
    fn on_throttle(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> ThrottleResult {
        ThrottleResult::Continue(error)
    }

    /// The remaining time in the retry policy.
    ///
    /// For policies based on time, this returns the remaining time in the
    /// policy. The retry loop can use this value to adjust the next attempt
    /// timeout. For policies that are not time based this returns `None`.
    fn remaining_time(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
    ) -> Option<std::time::Duration> {
        None
    }
}

/// A helper type to use [RetryPolicy] in request options.
#[derive(Clone)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl<T: RetryPolicy + 'static> std::convert::From<T> for RetryPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

/// Extension trait for [RetryPolicy].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [RetryPolicy] to limit the total elapsed time in the retry
    /// loop.
    ///
    /// # Example
    /// ```
    /// # use cumulus_gax::retry_policy::*;
    /// use std::time::{Duration, Instant};
    /// let policy = TransientErrors.with_time_limit(Duration::from_secs(10));
    /// let loop_start = Instant::now() - Duration::from_secs(20);
    /// assert!(policy.on_error(loop_start, 1, true, transient_error()).is_exhausted());
    ///
    /// use cumulus_gax::error::{Error, rpc::Code, rpc::Status};
    /// fn transient_error() -> Error { Error::service(Status::default().set_code(Code::Unavailable)) }
    /// ```
    fn with_time_limit(self, maximum_duration: std::time::Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [RetryPolicy] to limit the number of retry attempts.
    ///
    /// # Example
    /// ```
    /// # use cumulus_gax::retry_policy::*;
    /// use std::time::Instant;
    /// let policy = TransientErrors.with_attempt_limit(3);
    /// assert!(policy.on_error(Instant::now(), 1, true, transient_error()).is_continue());
    /// assert!(policy.on_error(Instant::now(), 2, true, transient_error()).is_continue());
    /// assert!(policy.on_error(Instant::now(), 3, true, transient_error()).is_exhausted());
    ///
    /// use cumulus_gax::error::{Error, rpc::Code, rpc::Status};
    /// fn transient_error() -> Error { Error::service(Status::default().set_code(Code::Unavailable)) }
    /// ```
    fn with_attempt_limit(self, maximum_attempts: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount::custom(self, maximum_attempts)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// A retry policy that retries transient errors on idempotent operations.
///
/// This policy should be decorated to limit the number of retry attempts or
/// the duration of the retry loop.
///
/// The retry decision for service errors is based only on the status code:
/// the only retryable status code is [Unavailable]. Errors that failed before
/// a response was received are also treated as transient, because the service
/// may never have seen the request.
///
/// Non-idempotent operations are never retried by this policy: the request
/// may have reached the service, and retrying it could apply the change
/// twice.
///
/// # Example
/// ```
/// # use cumulus_gax::retry_policy::*;
/// use std::time::Instant;
/// let policy = TransientErrors.with_attempt_limit(3);
/// assert!(policy.on_error(Instant::now(), 1, true, transient_error()).is_continue());
/// assert!(policy.on_error(Instant::now(), 1, false, transient_error()).is_permanent());
///
/// use cumulus_gax::error::{Error, rpc::Code, rpc::Status};
/// fn transient_error() -> Error { Error::service(Status::default().set_code(Code::Unavailable)) }
/// ```
///
/// [Unavailable]: crate::error::rpc::Code::Unavailable
#[derive(Clone, Debug)]
pub struct TransientErrors;

impl RetryPolicy for TransientErrors {
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult {
        if !idempotent {
            return RetryResult::Permanent(error);
        }
        if error.is_io() {
            return RetryResult::Continue(error);
        }
        if let Some(status) = error.status() {
            return if status.code == crate::error::rpc::Code::Unavailable {
                RetryResult::Continue(error)
            } else {
                RetryResult::Permanent(error)
            };
        }
        RetryResult::Permanent(error)
    }
}

/// A retry policy decorator that limits the total time in the retry loop.
///
/// This policy decorates an inner policy and limits the duration of retry
/// loops. While the time spent in the retry loop (including time in backoff)
/// is less than the prescribed duration the `on_error()` method returns the
/// results of the inner policy. After that time it returns
/// [Exhausted][RetryResult::Exhausted] if the inner policy returns
/// [Continue][RetryResult::Continue].
///
/// The `remaining_time()` function returns the remaining time. This is always
/// [Duration::ZERO][std::time::Duration::ZERO] once or after the policy's
/// deadline is reached.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [TransientErrors].
#[derive(Debug)]
pub struct LimitedElapsedTime<P = TransientErrors>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_duration: std::time::Duration,
}

impl LimitedElapsedTime {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use cumulus_gax::retry_policy::*;
    /// use std::time::{Duration, Instant};
    /// let policy = LimitedElapsedTime::new(Duration::from_secs(10));
    /// let loop_start = Instant::now() - Duration::from_secs(20);
    /// assert!(policy.on_error(loop_start, 1, true, transient_error()).is_exhausted());
    ///
    /// use cumulus_gax::error::{Error, rpc::Code, rpc::Status};
    /// fn transient_error() -> Error { Error::service(Status::default().set_code(Code::Unavailable)) }
    /// ```
    pub fn new(maximum_duration: std::time::Duration) -> Self {
        Self {
            inner: TransientErrors,
            maximum_duration,
        }
    }
}

impl<P> LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_duration: std::time::Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }

    fn expired(&self, loop_start: std::time::Instant) -> bool {
        std::time::Instant::now() >= loop_start + self.maximum_duration
    }
}

impl<P> RetryPolicy for LimitedElapsedTime<P>
where
    P: RetryPolicy + 'static,
{
    fn on_error(
        &self,
        start: std::time::Instant,
        count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult {
        match self.inner.on_error(start, count, idempotent, error) {
            RetryResult::Permanent(e) => RetryResult::Permanent(e),
            RetryResult::Exhausted(e) => RetryResult::Exhausted(e),
            RetryResult::Continue(e) => {
                if self.expired(start) {
                    RetryResult::Exhausted(e)
                } else {
                    RetryResult::Continue(e)
                }
            }
        }
    }

    fn on_throttle(
        &self,
        start: std::time::Instant,
        count: u32,
        error: Error,
    ) -> ThrottleResult {
        match self.inner.on_throttle(start, count, error) {
            ThrottleResult::Exhausted(e) => ThrottleResult::Exhausted(e),
            ThrottleResult::Continue(e) => {
                if self.expired(start) {
                    ThrottleResult::Exhausted(e)
                } else {
                    ThrottleResult::Continue(e)
                }
            }
        }
    }

    fn remaining_time(
        &self,
        start: std::time::Instant,
        count: u32,
    ) -> Option<std::time::Duration> {
        let deadline = start + self.maximum_duration;
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if let Some(inner) = self.inner.remaining_time(start, count) {
            return Some(std::cmp::min(remaining, inner));
        }
        Some(remaining)
    }
}

/// A retry policy decorator that limits the number of attempts.
///
/// This policy decorates an inner policy and limits the total number of
/// attempts. Note that `on_error()` is called only after an attempt, so
/// setting the maximum number of attempts to 0 or 1 results in no retries
/// after the initial attempt.
///
/// The policy passes through the results from the inner policy as long as
/// `attempt_count < maximum_attempts`. Once the maximum number of attempts is
/// reached, the policy replaces any [Continue][RetryResult::Continue] result
/// with [Exhausted][RetryResult::Exhausted].
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [TransientErrors].
#[derive(Debug)]
pub struct LimitedAttemptCount<P = TransientErrors>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_attempts: u32,
}

impl LimitedAttemptCount {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use cumulus_gax::retry_policy::*;
    /// use std::time::Instant;
    /// let policy = LimitedAttemptCount::new(5);
    /// let attempt_count = 10;
    /// assert!(policy.on_error(Instant::now(), attempt_count, true, transient_error()).is_exhausted());
    ///
    /// use cumulus_gax::error::{Error, rpc::Code, rpc::Status};
    /// fn transient_error() -> Error { Error::service(Status::default().set_code(Code::Unavailable)) }
    /// ```
    pub fn new(maximum_attempts: u32) -> Self {
        Self {
            inner: TransientErrors,
            maximum_attempts,
        }
    }
}

impl<P> LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_attempts: u32) -> Self {
        Self {
            inner,
            maximum_attempts,
        }
    }
}

impl<P> RetryPolicy for LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    fn on_error(
        &self,
        start: std::time::Instant,
        count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult {
        match self.inner.on_error(start, count, idempotent, error) {
            RetryResult::Permanent(e) => RetryResult::Permanent(e),
            RetryResult::Exhausted(e) => RetryResult::Exhausted(e),
            RetryResult::Continue(e) => {
                if count >= self.maximum_attempts {
                    RetryResult::Exhausted(e)
                } else {
                    RetryResult::Continue(e)
                }
            }
        }
    }

    fn on_throttle(
        &self,
        start: std::time::Instant,
        count: u32,
        error: Error,
    ) -> ThrottleResult {
        match self.inner.on_throttle(start, count, error) {
            ThrottleResult::Exhausted(e) => ThrottleResult::Exhausted(e),
            ThrottleResult::Continue(e) => {
                if count >= self.maximum_attempts {
                    ThrottleResult::Exhausted(e)
                } else {
                    ThrottleResult::Continue(e)
                }
            }
        }
    }

    fn remaining_time(
        &self,
        start: std::time::Instant,
        count: u32,
    ) -> Option<std::time::Duration> {
        self.inner.remaining_time(start, count)
    }
}
