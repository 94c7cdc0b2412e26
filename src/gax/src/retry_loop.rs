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

//! The retry loops.
//!
//! This module implements the retry loop shared by all clients. The loop
//! calls an attempt function until it succeeds, the retry policy stops the
//! loop, or the retry throttler rejects too many attempts. In between
//! attempts the loop waits the amount of time prescribed by the backoff
//! policy, or by a server-supplied retry delay hint when those are enabled.
//!
//! Both an async loop and a blocking loop are provided. They implement the
//! same decision logic; only the suspension mechanism differs. The sleep
//! function is injected so tests can run without waiting.

use crate::Result;
use crate::backoff_policy::BackoffPolicy;
use crate::error::Error;
use crate::idempotency::Idempotency;
use crate::retry_policy::RetryPolicy;
use crate::retry_result::RetryResult;
use crate::retry_throttler::SharedRetryThrottler;
use crate::throttle_result::ThrottleResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum RetryLoopAttempt {
    // The first attempt
    Initial,
    // (Attempt count, backoff delay, previous error)
    Retry(u32, Duration, Error),
}

impl RetryLoopAttempt {
    fn count(&self) -> u32 {
        match self {
            RetryLoopAttempt::Initial => 0,
            RetryLoopAttempt::Retry(count, _, _) => *count,
        }
    }
}

/// Runs the retry loop for a given function.
///
/// This function calls an inner function as long as (1) the retry policy has
/// not expired, (2) the inner function has not returned a successful
/// request, and (3) the retry throttler allows more calls.
///
/// In between calls the function waits the amount of time prescribed by the
/// backoff policy, using `sleep` to implement any delay. When
/// `enable_server_retries` is set and the error carries a server-supplied
/// retry delay, that delay takes precedence over the backoff policy, and the
/// error is treated as retryable even on non-idempotent operations.
///
/// Errors that stop the loop are annotated with `operation_name` and the
/// reason the loop stopped.
#[allow(clippy::too_many_arguments)]
pub async fn retry_loop<F, S, Response>(
    mut inner: F,
    sleep: S,
    operation_name: &str,
    idempotency: Idempotency,
    enable_server_retries: bool,
    retry_throttler: SharedRetryThrottler,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
{
    let loop_start = Instant::now();
    let mut attempt_state = RetryLoopAttempt::Initial;
    loop {
        let mut attempt_count = attempt_state.count();
        let remaining_time = retry_policy.remaining_time(loop_start, attempt_count);

        if let RetryLoopAttempt::Retry(attempt_count, delay, prev_error) = attempt_state {
            if remaining_time.is_some_and(|remaining| remaining < delay) {
                return Err(exhausted(operation_name, prev_error));
            }
            sleep(delay).await;

            if retry_throttler
                .lock()
                .expect("retry throttler lock is poisoned")
                .throttle_retry_attempt()
            {
                // This counts as an error for the purposes of the retry policy.
                let error = match retry_policy.on_throttle(loop_start, attempt_count, prev_error) {
                    ThrottleResult::Exhausted(e) => {
                        return Err(exhausted(operation_name, e));
                    }
                    ThrottleResult::Continue(e) => e,
                };
                let delay = backoff_policy.on_failure(loop_start, attempt_count);
                attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, error);
                continue;
            }
        }
        attempt_count += 1;
        match inner(remaining_time).await {
            Ok(r) => {
                retry_throttler
                    .lock()
                    .expect("retry throttler lock is poisoned")
                    .on_success();
                return Ok(r);
            }
            Err(e) => {
                match handle_attempt_error(
                    operation_name,
                    idempotency,
                    enable_server_retries,
                    &retry_throttler,
                    retry_policy.as_ref(),
                    backoff_policy.as_ref(),
                    loop_start,
                    attempt_count,
                    e,
                ) {
                    Err(e) => return Err(e),
                    Ok((delay, e)) => {
                        attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, e);
                        continue;
                    }
                }
            }
        };
    }
}

/// Runs the retry loop for a given function, blocking between attempts.
///
/// The decision logic is identical to [retry_loop]: the only difference is
/// that the attempt function and the sleeper block the calling thread
/// instead of suspending a task.
#[allow(clippy::too_many_arguments)]
pub fn retry_loop_blocking<F, S, Response>(
    mut inner: F,
    mut sleep: S,
    operation_name: &str,
    idempotency: Idempotency,
    enable_server_retries: bool,
    retry_throttler: SharedRetryThrottler,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
) -> Result<Response>
where
    F: FnMut(Option<Duration>) -> Result<Response>,
    S: FnMut(Duration),
{
    let loop_start = Instant::now();
    let mut attempt_state = RetryLoopAttempt::Initial;
    loop {
        let mut attempt_count = attempt_state.count();
        let remaining_time = retry_policy.remaining_time(loop_start, attempt_count);

        if let RetryLoopAttempt::Retry(attempt_count, delay, prev_error) = attempt_state {
            if remaining_time.is_some_and(|remaining| remaining < delay) {
                return Err(exhausted(operation_name, prev_error));
            }
            sleep(delay);

            if retry_throttler
                .lock()
                .expect("retry throttler lock is poisoned")
                .throttle_retry_attempt()
            {
                let error = match retry_policy.on_throttle(loop_start, attempt_count, prev_error) {
                    ThrottleResult::Exhausted(e) => {
                        return Err(exhausted(operation_name, e));
                    }
                    ThrottleResult::Continue(e) => e,
                };
                let delay = backoff_policy.on_failure(loop_start, attempt_count);
                attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, error);
                continue;
            }
        }
        attempt_count += 1;
        match inner(remaining_time) {
            Ok(r) => {
                retry_throttler
                    .lock()
                    .expect("retry throttler lock is poisoned")
                    .on_success();
                return Ok(r);
            }
            Err(e) => {
                match handle_attempt_error(
                    operation_name,
                    idempotency,
                    enable_server_retries,
                    &retry_throttler,
                    retry_policy.as_ref(),
                    backoff_policy.as_ref(),
                    loop_start,
                    attempt_count,
                    e,
                ) {
                    Err(e) => return Err(e),
                    Ok((delay, e)) => {
                        attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, e);
                        continue;
                    }
                }
            }
        };
    }
}

/// The decision logic shared by both loops.
///
/// Returns `Ok((delay, error))` when the loop should back off and try again,
/// and `Err(error)` when the loop must stop.
#[allow(clippy::too_many_arguments)]
fn handle_attempt_error(
    operation_name: &str,
    idempotency: Idempotency,
    enable_server_retries: bool,
    retry_throttler: &SharedRetryThrottler,
    retry_policy: &dyn RetryPolicy,
    backoff_policy: &dyn BackoffPolicy,
    loop_start: Instant,
    attempt_count: u32,
    error: Error,
) -> std::result::Result<(Duration, Error), Error> {
    // A server-supplied retry delay is permission to retry, even for
    // operations that are not idempotent.
    let hint = if enable_server_retries {
        error.retry_delay()
    } else {
        None
    };
    let effective_idempotent = idempotency.is_idempotent() || hint.is_some();
    let flow = retry_policy.on_error(loop_start, attempt_count, effective_idempotent, error);
    let delay = backoff_policy.on_failure(loop_start, attempt_count);
    retry_throttler
        .lock()
        .expect("retry throttler lock is poisoned")
        .on_retry_failure(&flow);
    match flow {
        RetryResult::Permanent(e) => {
            let annotation = if effective_idempotent {
                format!("permanent error in {operation_name}")
            } else {
                format!("non-idempotent operation not retried in {operation_name}")
            };
            Err(e.annotated(annotation))
        }
        RetryResult::Exhausted(e) => Err(exhausted(operation_name, e)),
        RetryResult::Continue(e) => Ok((hint.unwrap_or(delay), e)),
    }
}

fn exhausted(operation_name: &str, last_error: Error) -> Error {
    Error::exhausted(last_error)
        .annotated(format!("retry policy exhausted in {operation_name}"))
}

/// A helper to compute the time remaining in a retry loop, given the attempt
/// timeout and the overall timeout.
pub fn effective_timeout(
    options: &crate::options::RequestOptions,
    remaining_time: Option<Duration>,
) -> Option<Duration> {
    match (options.attempt_timeout(), remaining_time) {
        (None, None) => None,
        (None, Some(t)) => Some(t),
        (Some(t), None) => Some(*t),
        (Some(a), Some(r)) => Some(*std::cmp::min(a, &r)),
    }
}
