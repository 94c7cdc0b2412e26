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

//! The bulk-apply driver.
//!
//! Composes the [BulkMutator] state machine with the generic retry loop. The
//! loop decides *whether and when* to make another attempt; the mutator
//! decides *what* each attempt contains.

use crate::bulk_mutator::BulkMutator;
use crate::flow_control::RateLimiter;
use crate::mutation::{BulkMutation, FailedMutation};
use crate::stub::BigtableStub;
use cumulus_gax::error::Error;
use cumulus_gax::exponential_backoff::ExponentialBackoff;
use cumulus_gax::idempotency::Idempotency;
use cumulus_gax::operation_context::{OperationContext, SharedOperationContext};
use cumulus_gax::options::RequestOptions;
use cumulus_gax::retry_loop::{effective_timeout, retry_loop};
use cumulus_gax::retry_policy::LimitedElapsedTime;
use cumulus_gax::retry_throttler::CircuitBreaker;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_RETRY_DURATION: Duration = Duration::from_secs(60);

/// Applies a batch of row mutations, retrying the entries that fail with
/// retryable statuses and are safe to resend.
///
/// Returns the entries that did not succeed, indexed by their position in
/// the original batch. An empty vector means every mutation was applied.
///
/// The loop is driven as idempotent: the mutator only resends entries it has
/// already classified as safe, so by the time the loop considers a retry the
/// per-entry idempotency test has been applied.
///
/// Each attempt is bounded by the per-attempt timeout in `options` (when one
/// is set) and by the time remaining in the retry policy.
pub async fn bulk_apply(
    stub: &dyn BigtableStub,
    limiter: &RateLimiter,
    options: &RequestOptions,
    table_name: impl Into<String>,
    mutation: BulkMutation,
) -> Vec<FailedMutation> {
    let context: SharedOperationContext = Arc::new(Mutex::new(OperationContext::new()));
    let mut mutator = BulkMutator::new(
        table_name,
        mutation,
        context,
        options.enable_server_retries(),
    );
    if !mutator.has_pending_mutations() {
        return Vec::new();
    }

    let retry_policy = options
        .retry_policy()
        .unwrap_or_else(|| Arc::new(LimitedElapsedTime::new(DEFAULT_RETRY_DURATION)));
    let backoff_policy = options
        .backoff_policy()
        .unwrap_or_else(|| Arc::new(ExponentialBackoff::default()));
    let retry_throttler = options
        .retry_throttler()
        .unwrap_or_else(|| Arc::new(Mutex::new(CircuitBreaker::default())));

    let inner = async |remaining: Option<Duration>| {
        let attempt = mutator.make_one_request(stub, limiter);
        match effective_timeout(options, remaining) {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| Error::timeout(format!("attempt exceeded {limit:?}")))??,
            None => attempt.await?,
        }
        // A clean stream may still leave entries needing another attempt.
        // Surface them as an error so the loop keeps going.
        match mutator.pending_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    };
    let sleep = async |d: Duration| tokio::time::sleep(d).await;
    let result = retry_loop(
        inner,
        sleep,
        "MutateRows",
        Idempotency::Idempotent,
        options.enable_server_retries(),
        retry_throttler,
        retry_policy,
        backoff_policy,
    )
    .await;
    if let Err(e) = result {
        // The loop outcome is already recorded entry by entry; the caller
        // learns about it through the per-entry statuses.
        tracing::debug!(error = %e, "bulk apply stopped with unresolved entries");
    }
    mutator.on_retry_done()
}
