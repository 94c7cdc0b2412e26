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

//! Per-request options.
//!
//! While the defaults are intended to work for most applications, it is
//! sometimes necessary to customize the behavior of specific calls:
//! applications may change the timeout for a call, or change the retry
//! configuration. This module defines the options bag threaded from the
//! caller into the retry and polling loops.

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::idempotency::Idempotency;
use crate::polling_backoff_policy::{PollingBackoffPolicy, PollingBackoffPolicyArg};
use crate::polling_error_policy::{PollingErrorPolicy, PollingErrorPolicyArg};
use crate::retry_policy::{RetryPolicy, RetryPolicyArg};
use crate::retry_throttler::{RetryThrottlerArg, SharedRetryThrottler};
use std::sync::Arc;

/// A set of options configuring a single request.
///
/// The policies are stored as shared prototypes (`Arc<dyn ...>`): each
/// logical operation clones the `Arc`, never the policy state, so one options
/// value can configure many requests.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub(crate) idempotent: Option<bool>,
    attempt_timeout: Option<std::time::Duration>,
    enable_server_retries: bool,
    pub(crate) retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub(crate) backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    pub(crate) polling_error_policy: Option<Arc<dyn PollingErrorPolicy>>,
    pub(crate) polling_backoff_policy: Option<Arc<dyn PollingBackoffPolicy>>,
    pub(crate) retry_throttler: Option<SharedRetryThrottler>,
}

impl RequestOptions {
    /// Treat the operation underlying this request as idempotent.
    ///
    /// If a retry policy is configured, the policy may examine the
    /// idempotency and the error details to decide if the error is
    /// retryable. Typically [idempotent] operations are safe to retry under
    /// more error conditions than non-idempotent ones.
    ///
    /// [idempotent]: https://en.wikipedia.org/wiki/Idempotence
    pub fn set_idempotency(&mut self, value: bool) {
        self.idempotent = Some(value);
    }

    /// Set the idempotency for the underlying operation unless it is already
    /// set.
    ///
    /// If [set_idempotency][Self::set_idempotency] was already called this
    /// method has no effect. Clients use this to provide a conservative
    /// default: only requests that are provably safe to send twice default
    /// to idempotent.
    pub fn set_default_idempotency(mut self, default: bool) -> Self {
        self.idempotent.get_or_insert(default);
        self
    }

    /// The idempotency of the underlying operation.
    ///
    /// Defaults to the conservative
    /// [NonIdempotent][Idempotency::NonIdempotent] when neither the
    /// application nor the client set a value.
    pub fn idempotency(&self) -> Idempotency {
        self.idempotent
            .map(Idempotency::from)
            .unwrap_or(Idempotency::NonIdempotent)
    }

    /// Sets the per-attempt timeout.
    ///
    /// When using a retry loop, this affects the timeout for each attempt.
    /// The overall timeout for a request is set by the retry policy.
    pub fn set_attempt_timeout<T: Into<std::time::Duration>>(&mut self, v: T) {
        self.attempt_timeout = Some(v.into());
    }

    /// Gets the current per-attempt timeout.
    pub fn attempt_timeout(&self) -> &Option<std::time::Duration> {
        &self.attempt_timeout
    }

    /// Honor server-supplied retry delay hints.
    ///
    /// When enabled, an error carrying a retry delay hint overrides the
    /// client backoff for the next attempt, and the hint is treated as
    /// permission to retry even non-idempotent operations. When disabled,
    /// such hints are ignored.
    pub fn set_enable_server_retries(&mut self, v: bool) {
        self.enable_server_retries = v;
    }

    /// Whether server-supplied retry delay hints are honored.
    pub fn enable_server_retries(&self) -> bool {
        self.enable_server_retries
    }

    /// Sets the retry policy configuration.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(&mut self, v: V) {
        self.retry_policy = Some(v.into().0);
    }

    /// Gets the retry policy, if one was configured.
    pub fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        self.retry_policy.clone()
    }

    /// Sets the backoff policy configuration.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(&mut self, v: V) {
        self.backoff_policy = Some(v.into().0);
    }

    /// Gets the backoff policy, if one was configured.
    pub fn backoff_policy(&self) -> Option<Arc<dyn BackoffPolicy>> {
        self.backoff_policy.clone()
    }

    /// Sets the polling error policy configuration.
    pub fn set_polling_error_policy<V: Into<PollingErrorPolicyArg>>(&mut self, v: V) {
        self.polling_error_policy = Some(v.into().0);
    }

    /// Gets the polling error policy, if one was configured.
    pub fn polling_error_policy(&self) -> Option<Arc<dyn PollingErrorPolicy>> {
        self.polling_error_policy.clone()
    }

    /// Sets the polling backoff policy configuration.
    pub fn set_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(&mut self, v: V) {
        self.polling_backoff_policy = Some(v.into().0);
    }

    /// Gets the polling backoff policy, if one was configured.
    pub fn polling_backoff_policy(&self) -> Option<Arc<dyn PollingBackoffPolicy>> {
        self.polling_backoff_policy.clone()
    }

    /// Sets the retry throttling configuration.
    pub fn set_retry_throttler<V: Into<RetryThrottlerArg>>(&mut self, v: V) {
        self.retry_throttler = Some(v.into().0);
    }

    /// Gets the retry throttler, if one was configured.
    pub fn retry_throttler(&self) -> Option<SharedRetryThrottler> {
        self.retry_throttler.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exponential_backoff::ExponentialBackoffBuilder;
    use crate::polling_error_policy::{AlwaysContinue, PollingErrorPolicyExt};
    use crate::retry_policy::LimitedAttemptCount;
    use crate::retry_throttler::AdaptiveThrottler;
    use std::time::Duration;

    #[test]
    fn request_options() {
        let mut opts = RequestOptions::default();

        assert_eq!(opts.idempotent, None);
        assert_eq!(opts.idempotency(), Idempotency::NonIdempotent);
        opts.set_idempotency(true);
        assert_eq!(opts.idempotency(), Idempotency::Idempotent);
        opts.set_idempotency(false);
        assert_eq!(opts.idempotency(), Idempotency::NonIdempotent);

        assert_eq!(opts.attempt_timeout(), &None);
        let d = Duration::from_secs(123);
        opts.set_attempt_timeout(d);
        assert_eq!(opts.attempt_timeout(), &Some(d));

        assert!(!opts.enable_server_retries());
        opts.set_enable_server_retries(true);
        assert!(opts.enable_server_retries());

        opts.set_retry_policy(LimitedAttemptCount::new(3));
        assert!(opts.retry_policy.is_some(), "{opts:?}");

        opts.set_backoff_policy(ExponentialBackoffBuilder::new().clamp());
        assert!(opts.backoff_policy.is_some(), "{opts:?}");

        opts.set_polling_error_policy(AlwaysContinue.with_attempt_limit(3));
        assert!(opts.polling_error_policy.is_some(), "{opts:?}");

        opts.set_polling_backoff_policy(ExponentialBackoffBuilder::new().clamp());
        assert!(opts.polling_backoff_policy.is_some(), "{opts:?}");

        opts.set_retry_throttler(AdaptiveThrottler::default());
        assert!(opts.retry_throttler.is_some(), "{opts:?}");
    }

    #[test]
    fn request_options_idempotency() {
        let opts = RequestOptions::default().set_default_idempotency(true);
        assert_eq!(opts.idempotent, Some(true));
        let opts = opts.set_default_idempotency(false);
        assert_eq!(opts.idempotent, Some(true));

        let opts = RequestOptions::default().set_default_idempotency(false);
        assert_eq!(opts.idempotent, Some(false));
        let opts = opts.set_default_idempotency(true);
        assert_eq!(opts.idempotent, Some(false));
    }
}
