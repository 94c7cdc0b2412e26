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

//! The retry state machine for bulk writes.
//!
//! A bulk write is a batch of independent row mutations. The server resolves
//! each entry individually, streaming partial responses, so one attempt may
//! succeed for some entries and fail for others. [BulkMutator] tracks each
//! entry across attempts and builds follow-up requests containing only the
//! entries that failed with a retryable status and are safe to resend.
//!
//! Entries move through `Pending -> InFlight -> {Succeeded, Failed,
//! PendingRetry}`. `Succeeded` and `Failed` are terminal; `PendingRetry`
//! entries return to `InFlight` on the next attempt. The mutator is owned by
//! a single bulk-apply call and is not internally thread-safe; the rate
//! limiter it consumes is the shared, thread-safe piece.

use crate::flow_control::RateLimiter;
use crate::mutation::{BulkMutation, FailedMutation, RowMutation};
use crate::stub::{BigtableStub, EntryResult, MutateRowsEntry, MutateRowsRequest};
use cumulus_gax::Result;
use cumulus_gax::error::Error;
use cumulus_gax::error::rpc::{Code, Status};
use cumulus_gax::operation_context::SharedOperationContext;
use futures::StreamExt;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum EntryState {
    Pending,
    InFlight,
    Succeeded,
    Failed(Status),
    PendingRetry(Status),
}

#[derive(Debug)]
struct TrackedEntry {
    row: RowMutation,
    idempotent: bool,
    state: EntryState,
}

/// Tracks a batch of row mutations across streaming write attempts.
pub struct BulkMutator {
    table_name: String,
    entries: Vec<TrackedEntry>,
    context: SharedOperationContext,
    enable_server_retries: bool,
}

impl BulkMutator {
    pub fn new(
        table_name: impl Into<String>,
        mutation: BulkMutation,
        context: SharedOperationContext,
        enable_server_retries: bool,
    ) -> Self {
        let entries = mutation
            .into_entries()
            .into_iter()
            .map(|row| TrackedEntry {
                idempotent: row.is_idempotent(),
                row,
                state: EntryState::Pending,
            })
            .collect();
        Self {
            table_name: table_name.into(),
            entries,
            context,
            enable_server_retries,
        }
    }

    /// Returns true while any entry may still be resolved by another
    /// attempt.
    pub fn has_pending_mutations(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.state,
                EntryState::Pending | EntryState::PendingRetry(_) | EntryState::InFlight
            )
        })
    }

    /// An error representing the entries that still need another attempt.
    ///
    /// Used by the owning retry loop when an attempt's stream completed
    /// without error but left some entries unresolved.
    pub fn pending_error(&self) -> Option<Error> {
        self.entries.iter().find_map(|e| match &e.state {
            EntryState::PendingRetry(status) => Some(Error::service(status.clone())),
            _ => None,
        })
    }

    /// Issues one streaming write attempt for the unresolved entries.
    ///
    /// Acquires a send slot from `limiter` first, so concurrent bulk
    /// operations sharing the limiter observe the server's aggregate
    /// throughput limits. Consumes the response stream, resolving entries as
    /// their outcomes arrive and applying any flow-control feedback.
    ///
    /// Returns an error when the stream fails as a whole. The retryable and
    /// idempotency tests have then already been applied to every entry that
    /// was in flight, so the caller only decides whether to make another
    /// attempt.
    pub async fn make_one_request(
        &mut self,
        stub: &dyn BigtableStub,
        limiter: &RateLimiter,
    ) -> Result<()> {
        let mut request_map = Vec::new();
        let mut wire_entries = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if matches!(
                entry.state,
                EntryState::Pending | EntryState::PendingRetry(_)
            ) {
                entry.state = EntryState::InFlight;
                request_map.push(index);
                wire_entries.push(MutateRowsEntry {
                    row_key: entry.row.row_key().to_string(),
                    mutations: entry.row.mutations().to_vec(),
                });
            }
        }
        if request_map.is_empty() {
            return Ok(());
        }

        limiter.acquire().await;

        let (attempt, metadata) = {
            let mut context = self
                .context
                .lock()
                .expect("operation context lock is poisoned");
            let attempt = context.begin_attempt();
            let mut metadata = HashMap::new();
            context.apply(&mut metadata);
            (attempt, metadata)
        };
        tracing::debug!(
            table = %self.table_name,
            attempt,
            entries = request_map.len(),
            "sending bulk mutation attempt"
        );

        let request = MutateRowsRequest {
            table_name: self.table_name.clone(),
            entries: wire_entries,
            metadata,
        };
        let stream_error = match stub.mutate_rows(request).await {
            Err(e) => Some(e),
            Ok(mut stream) => {
                let mut failure = None;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(response) => {
                            self.context
                                .lock()
                                .expect("operation context lock is poisoned")
                                .process_response_metadata(&response.metadata);
                            if let Some(info) = &response.rate_limit_info {
                                limiter.on_feedback(info);
                            }
                            for result in response.entries {
                                self.record_entry_result(&request_map, result);
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure
            }
        };

        match stream_error {
            None => {
                self.finish_ok_stream(&request_map);
                Ok(())
            }
            Some(e) => {
                tracing::debug!(
                    table = %self.table_name,
                    attempt,
                    error = %e,
                    "bulk mutation stream failed"
                );
                self.finish_failed_stream(&request_map, &e);
                Err(e)
            }
        }
    }

    /// Consumes the mutator and reports every entry that did not succeed.
    ///
    /// Entries that never received an outcome, because the retry loop
    /// stopped first, are reported with their last observed status. Entries
    /// with no observed status at all are a bookkeeping contradiction and
    /// are reported as internal errors rather than silently dropped.
    pub fn on_retry_done(self) -> Vec<FailedMutation> {
        self.entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry.state {
                EntryState::Succeeded => None,
                EntryState::Failed(status) | EntryState::PendingRetry(status) => {
                    Some(FailedMutation::new(index, status))
                }
                EntryState::Pending | EntryState::InFlight => Some(FailedMutation::new(
                    index,
                    Status::default()
                        .set_code(Code::Internal)
                        .set_message("mutation did not resolve before retries stopped"),
                )),
            })
            .collect()
    }

    fn record_entry_result(&mut self, request_map: &[usize], result: EntryResult) {
        let Some(&index) = request_map.get(result.index) else {
            tracing::warn!(
                index = result.index,
                request_size = request_map.len(),
                "entry result index out of range, ignored"
            );
            return;
        };
        let entry = &mut self.entries[index];
        if !matches!(entry.state, EntryState::InFlight) {
            // Terminal outcomes are never overwritten by later reports.
            return;
        }
        entry.state = if result.status.code == Code::Ok {
            EntryState::Succeeded
        } else if is_retryable(&result.status) && entry.idempotent {
            EntryState::PendingRetry(result.status)
        } else {
            EntryState::Failed(result.status)
        };
    }

    fn finish_ok_stream(&mut self, request_map: &[usize]) {
        for &index in request_map {
            let entry = &mut self.entries[index];
            if matches!(entry.state, EntryState::InFlight) {
                // The server should have reported an outcome for every
                // entry in the request.
                entry.state = EntryState::Failed(
                    Status::default()
                        .set_code(Code::Internal)
                        .set_message("no result reported for this entry in a successful stream"),
                );
            }
        }
    }

    fn finish_failed_stream(&mut self, request_map: &[usize], error: &Error) {
        // A server-supplied retry delay authorizes resending even
        // non-idempotent entries, when the feature is enabled.
        let hint = if self.enable_server_retries {
            error.retry_delay()
        } else {
            None
        };
        let retryable = error.is_io() || error.status().is_some_and(is_retryable);
        let status = error.status().cloned().unwrap_or_else(|| {
            Status::default()
                .set_code(Code::Unknown)
                .set_message(format!("{error}"))
        });
        for &index in request_map {
            let entry = &mut self.entries[index];
            if matches!(entry.state, EntryState::InFlight) {
                entry.state = if retryable && (entry.idempotent || hint.is_some()) {
                    EntryState::PendingRetry(status.clone())
                } else {
                    EntryState::Failed(status.clone())
                };
            }
        }
    }
}

fn is_retryable(status: &Status) -> bool {
    status.code == Code::Unavailable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{Mutation, SERVER_ASSIGNED_TIMESTAMP};
    use crate::stub::{MutateRowsResponse, MutateRowsStream, RateLimitInfo};
    use cumulus_gax::error::rpc::RetryInfo;
    use cumulus_gax::operation_context::{COOKIE_PREFIX, OperationContext};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    mockall::mock! {
        Stub {}
        #[async_trait::async_trait]
        impl BigtableStub for Stub {
            async fn mutate_rows(&self, request: MutateRowsRequest) -> Result<MutateRowsStream>;
        }
    }

    fn set_cell() -> Mutation {
        Mutation::SetCell {
            family: "fam".to_string(),
            qualifier: "col".to_string(),
            timestamp_micros: 0,
            value: b"v".to_vec(),
        }
    }

    fn non_idempotent_cell() -> Mutation {
        Mutation::SetCell {
            family: "fam".to_string(),
            qualifier: "col".to_string(),
            timestamp_micros: SERVER_ASSIGNED_TIMESTAMP,
            value: b"v".to_vec(),
        }
    }

    fn two_entry_batch() -> BulkMutation {
        BulkMutation::new([
            RowMutation::new("r0", [set_cell()]),
            RowMutation::new("r1", [set_cell()]),
        ])
    }

    fn new_mutator(mutation: BulkMutation) -> BulkMutator {
        let context = Arc::new(Mutex::new(OperationContext::new()));
        BulkMutator::new("projects/p/tables/t", mutation, context, false)
    }

    fn ok_status() -> Status {
        Status::default().set_code(Code::Ok)
    }

    fn unavailable() -> Status {
        Status::default()
            .set_code(Code::Unavailable)
            .set_message("try-again")
    }

    fn response_stream(entries: Vec<EntryResult>) -> MutateRowsStream {
        futures::stream::iter(vec![Ok(MutateRowsResponse::default().set_entries(entries))])
            .boxed()
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn partial_failure_then_success() -> anyhow::Result<()> {
        // Entry 0 fails with a retryable status on the first attempt, entry
        // 1 succeeds. The second attempt contains only entry 0 and
        // succeeds. No failures remain.
        let mut seq = mockall::Sequence::new();
        let mut stub = MockStub::new();
        stub.expect_mutate_rows()
            .once()
            .in_sequence(&mut seq)
            .withf(|r| r.entries.len() == 2)
            .returning(|_| {
                Ok(response_stream(vec![
                    EntryResult {
                        index: 0,
                        status: unavailable(),
                    },
                    EntryResult {
                        index: 1,
                        status: ok_status(),
                    },
                ]))
            });
        stub.expect_mutate_rows()
            .once()
            .in_sequence(&mut seq)
            .withf(|r| r.entries.len() == 1 && r.entries[0].row_key == "r0")
            .returning(|_| {
                Ok(response_stream(vec![EntryResult {
                    index: 0,
                    status: ok_status(),
                }]))
            });

        let limiter = limiter();
        let mut mutator = new_mutator(two_entry_batch());
        assert!(mutator.has_pending_mutations());

        mutator.make_one_request(&stub, &limiter).await?;
        assert!(mutator.has_pending_mutations());

        mutator.make_one_request(&stub, &limiter).await?;
        assert!(!mutator.has_pending_mutations());

        let failures = mutator.on_retry_done();
        assert!(failures.is_empty(), "{failures:?}");
        Ok(())
    }

    #[tokio::test]
    async fn non_idempotent_entry_not_retried() -> anyhow::Result<()> {
        let mut stub = MockStub::new();
        stub.expect_mutate_rows().once().returning(|_| {
            Ok(response_stream(vec![EntryResult {
                index: 0,
                status: unavailable(),
            }]))
        });

        let limiter = limiter();
        let mutation = BulkMutation::new([RowMutation::new("r0", [non_idempotent_cell()])]);
        let mut mutator = new_mutator(mutation);

        mutator.make_one_request(&stub, &limiter).await?;
        // The transient failure is terminal for a non-idempotent entry.
        assert!(!mutator.has_pending_mutations());

        let failures = mutator.on_retry_done();
        assert_eq!(failures.len(), 1, "{failures:?}");
        assert_eq!(failures[0].index(), 0);
        assert_eq!(failures[0].status(), &unavailable());
        Ok(())
    }

    #[tokio::test]
    async fn missing_entry_is_internal_error() -> anyhow::Result<()> {
        // The stream completes successfully but never reports entry 0.
        let mut stub = MockStub::new();
        stub.expect_mutate_rows().once().returning(|_| {
            Ok(response_stream(vec![EntryResult {
                index: 1,
                status: ok_status(),
            }]))
        });

        let limiter = limiter();
        let mut mutator = new_mutator(two_entry_batch());
        mutator.make_one_request(&stub, &limiter).await?;
        assert!(!mutator.has_pending_mutations());

        let failures = mutator.on_retry_done();
        assert_eq!(failures.len(), 1, "{failures:?}");
        assert_eq!(failures[0].index(), 0);
        assert_eq!(failures[0].status().code, Code::Internal);
        Ok(())
    }

    #[tokio::test]
    async fn stream_error_applies_to_in_flight_entries() {
        // Entry 0 resolves before the stream fails. Entry 1 takes the
        // stream-level error and, being idempotent, becomes retryable.
        let mut stub = MockStub::new();
        stub.expect_mutate_rows().once().returning(|_| {
            Ok(futures::stream::iter(vec![
                Ok(MutateRowsResponse::default().set_entries(vec![EntryResult {
                    index: 0,
                    status: ok_status(),
                }])),
                Err(Error::service(unavailable())),
            ])
            .boxed())
        });

        let limiter = limiter();
        let mut mutator = new_mutator(two_entry_batch());
        let err = mutator
            .make_one_request(&stub, &limiter)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(&unavailable()), "{err:?}");
        assert!(mutator.has_pending_mutations());

        let failures = mutator.on_retry_done();
        assert_eq!(failures.len(), 1, "{failures:?}");
        assert_eq!(failures[0].index(), 1);
        assert_eq!(failures[0].status(), &unavailable());
    }

    #[tokio::test]
    async fn permanent_stream_error_is_terminal() {
        let denied = Status::default()
            .set_code(Code::PermissionDenied)
            .set_message("no access");
        let status = denied.clone();
        let mut stub = MockStub::new();
        stub.expect_mutate_rows()
            .once()
            .returning(move |_| Err(Error::service(status.clone())));

        let limiter = limiter();
        let mut mutator = new_mutator(two_entry_batch());
        let err = mutator
            .make_one_request(&stub, &limiter)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(&denied));
        assert!(!mutator.has_pending_mutations());

        let failures = mutator.on_retry_done();
        assert_eq!(failures.len(), 2, "{failures:?}");
        assert!(failures.iter().all(|f| f.status() == &denied));
    }

    #[test_case::test_case(true, true; "hint honored when enabled")]
    #[test_case::test_case(false, false; "hint ignored when disabled")]
    #[tokio::test]
    async fn server_hint_on_non_idempotent_entry(
        enable_server_retries: bool,
        expect_pending: bool,
    ) {
        let hinted = unavailable().set_details([
            RetryInfo::default().set_retry_delay(Duration::from_millis(250)),
        ]);
        let status = hinted.clone();
        let mut stub = MockStub::new();
        stub.expect_mutate_rows()
            .once()
            .returning(move |_| Err(Error::service(status.clone())));

        let limiter = limiter();
        let context = Arc::new(Mutex::new(OperationContext::new()));
        let mutation = BulkMutation::new([RowMutation::new("r0", [non_idempotent_cell()])]);
        let mut mutator = BulkMutator::new(
            "projects/p/tables/t",
            mutation,
            context,
            enable_server_retries,
        );

        let _ = mutator.make_one_request(&stub, &limiter).await;
        assert_eq!(mutator.has_pending_mutations(), expect_pending);
    }

    #[tokio::test]
    async fn cookies_stick_across_attempts() -> anyhow::Result<()> {
        // The first response carries a routing cookie. The second attempt
        // must attach it to the request metadata.
        let cookie = format!("{COOKIE_PREFIX}routing");
        let mut seq = mockall::Sequence::new();
        let mut stub = MockStub::new();
        let key = cookie.clone();
        stub.expect_mutate_rows()
            .once()
            .in_sequence(&mut seq)
            .returning(move |_| {
                let response = MutateRowsResponse::default()
                    .set_entries(vec![EntryResult {
                        index: 0,
                        status: unavailable(),
                    }])
                    .set_metadata([(key.clone(), "abc".to_string())]);
                Ok(futures::stream::iter(vec![Ok(response)]).boxed())
            });
        let key = cookie.clone();
        stub.expect_mutate_rows()
            .once()
            .in_sequence(&mut seq)
            .withf(move |r| r.metadata.get(&key).map(String::as_str) == Some("abc"))
            .returning(|_| {
                Ok(response_stream(vec![EntryResult {
                    index: 0,
                    status: ok_status(),
                }]))
            });

        let limiter = limiter();
        let mutation = BulkMutation::new([RowMutation::new("r0", [set_cell()])]);
        let mut mutator = new_mutator(mutation);

        mutator.make_one_request(&stub, &limiter).await?;
        mutator.make_one_request(&stub, &limiter).await?;
        assert!(!mutator.has_pending_mutations());
        Ok(())
    }

    #[tokio::test]
    async fn flow_feedback_reaches_limiter() -> anyhow::Result<()> {
        let mut stub = MockStub::new();
        stub.expect_mutate_rows().once().returning(|_| {
            let response = MutateRowsResponse::default()
                .set_entries(vec![EntryResult {
                    index: 0,
                    status: ok_status(),
                }])
                .set_rate_limit_info(RateLimitInfo {
                    period: Duration::from_secs(10),
                    factor: 0.8,
                });
            Ok(futures::stream::iter(vec![Ok(response)]).boxed())
        });

        let limiter = RateLimiter::new(Duration::from_millis(100));
        let mutation = BulkMutation::new([RowMutation::new("r0", [set_cell()])]);
        let mut mutator = new_mutator(mutation);

        mutator.make_one_request(&stub, &limiter).await?;
        assert_eq!(limiter.period(), Duration::from_millis(125));
        Ok(())
    }

    #[tokio::test]
    async fn attempts_are_numbered() -> anyhow::Result<()> {
        let mut stub = MockStub::new();
        stub.expect_mutate_rows().times(2).returning(|_| {
            Ok(response_stream(vec![EntryResult {
                index: 0,
                status: unavailable(),
            }]))
        });

        let limiter = limiter();
        let context = Arc::new(Mutex::new(OperationContext::new()));
        let mutation = BulkMutation::new([RowMutation::new("r0", [set_cell()])]);
        let mut mutator =
            BulkMutator::new("projects/p/tables/t", mutation, context.clone(), false);

        mutator.make_one_request(&stub, &limiter).await?;
        mutator.make_one_request(&stub, &limiter).await?;
        assert_eq!(
            context
                .lock()
                .expect("operation context lock is poisoned")
                .attempt_count(),
            2
        );
        Ok(())
    }

    #[tokio::test]
    async fn pending_error_reports_last_transient_status() -> anyhow::Result<()> {
        let mut stub = MockStub::new();
        stub.expect_mutate_rows().once().returning(|_| {
            Ok(response_stream(vec![EntryResult {
                index: 0,
                status: unavailable(),
            }]))
        });

        let limiter = limiter();
        let mutation = BulkMutation::new([RowMutation::new("r0", [set_cell()])]);
        let mut mutator = new_mutator(mutation);
        assert!(mutator.pending_error().is_none());

        mutator.make_one_request(&stub, &limiter).await?;
        let err = mutator.pending_error().expect("one entry needs a retry");
        assert_eq!(err.status(), Some(&unavailable()));
        Ok(())
    }
}
