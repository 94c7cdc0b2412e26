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

//! Types and functions to make long-running operations easier to use.
//!
//! Some operations take a long time to complete, hours or days. Services
//! represent these as a resource the client polls until completion. This
//! crate provides a [Poller] that composes the start request, the polling
//! requests, the polling error policy, and the polling backoff policy into
//! a single future.
//!
//! Pollers are typed: the caller names the response and metadata message
//! types, and payloads that do not match those types surface as errors.

use cumulus_gax::Result;
use cumulus_gax::error::Error;
use cumulus_gax::error::rpc::{Code, Status};
use cumulus_gax::polling_backoff_policy::PollingBackoffPolicy;
use cumulus_gax::polling_error_policy::PollingErrorPolicy;
use model::Message;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

pub mod model;

mod details;

/// The result of polling a long-running operation.
///
/// # Parameters
/// * `R` - the response type. This is the type returned when the operation
///   completes successfully.
/// * `M` - the metadata type. While operations are in progress the service
///   may return values of this type.
#[derive(Debug)]
pub enum PollingResult<R, M> {
    /// The operation is still in progress.
    InProgress(Option<M>),
    /// The operation completed. This includes the result.
    Completed(Result<R>),
    /// An error trying to poll the operation.
    ///
    /// Not all errors indicate that the operation failed. For example,
    /// polling may fail because it was not possible to connect to the
    /// service. Such transient errors may disappear in the next polling
    /// attempt. The polling error policy decides which errors terminate the
    /// loop.
    PollingError(Error),
}

/// A wrapper around [model::Operation] with typed responses.
///
/// The start and query closures given to [new_poller] return values of this
/// type. The poller extracts the response and metadata payloads, verifying
/// their types along the way.
pub struct Operation<R, M> {
    inner: model::Operation,
    response: PhantomData<R>,
    metadata: PhantomData<M>,
}

impl<R, M> Operation<R, M> {
    pub fn new(inner: model::Operation) -> Self {
        Self {
            inner,
            response: PhantomData,
            metadata: PhantomData,
        }
    }

    fn name(&self) -> String {
        self.inner.name.clone()
    }
    fn done(&self) -> bool {
        self.inner.done
    }
    fn metadata(&self) -> Option<&model::Payload> {
        self.inner.metadata.as_ref()
    }
    fn into_result(self) -> Option<model::OperationResult> {
        self.inner.result
    }
}

mod sealed {
    pub trait Poller {}
}

/// The trait implemented by pollers for long-running operations.
///
/// # Parameters
/// * `R` - the response type, that is, the type of response included when
///   the operation completes successfully.
/// * `M` - the metadata type, that is, the type returned by the service when
///   the operation is still in progress.
pub trait Poller<R, M>: Send + sealed::Poller {
    /// Query the current status of the long-running operation.
    fn poll(&mut self) -> impl Future<Output = Option<PollingResult<R, M>>> + Send;

    /// Poll the long-running operation until it completes.
    fn until_done(self) -> impl Future<Output = Result<R>> + Send;

    /// Convert a poller to a [futures::Stream].
    #[cfg(feature = "unstable-stream")]
    fn into_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>> + Unpin;
}

/// Creates a new `impl Poller<R, M>` from a start closure and a query
/// closure.
///
/// The start closure starts the operation. It should have captured all the
/// request parameters and options, including any retry configuration: the
/// poller treats a start failure as terminal. The query closure receives the
/// operation name and fetches its latest state.
pub fn new_poller<R, M, S, SF, Q, QF>(
    polling_error_policy: Arc<dyn PollingErrorPolicy>,
    polling_backoff_policy: Arc<dyn PollingBackoffPolicy>,
    start: S,
    query: Q,
) -> impl Poller<R, M>
where
    R: Message + Send,
    M: Message + Send,
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
{
    PollerImpl::new(
        polling_error_policy,
        polling_backoff_policy,
        Some(start),
        None,
        query,
    )
}

/// Creates a poller for an operation started elsewhere.
///
/// Applications may obtain the operation name out of band, for example from
/// a previous process that started the operation and persisted its name.
/// The returned poller skips the start step and goes straight to polling.
pub fn resume_poller<R, M, Q, QF>(
    polling_error_policy: Arc<dyn PollingErrorPolicy>,
    polling_backoff_policy: Arc<dyn PollingBackoffPolicy>,
    operation_name: impl Into<String>,
    query: Q,
) -> impl Poller<R, M>
where
    R: Message + Send + 'static,
    M: Message + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
{
    type NoStart<R, M> = fn() -> std::future::Ready<Result<Operation<R, M>>>;
    PollerImpl::new(
        polling_error_policy,
        polling_backoff_policy,
        None::<NoStart<R, M>>,
        Some(operation_name.into()),
        query,
    )
}

/// Polls an operation to completion, unless cancelled first.
///
/// Races `cancellation` against the polling loop. If the polling loop wins,
/// its result is returned and `cancel` is never invoked. If `cancellation`
/// wins, `cancel` is invoked exactly once (typically it sends the
/// cancellation RPC for the operation), and the result is either the cancel
/// closure's error or an error with [Code::Cancelled].
pub async fn until_done_with_cancellation<R, M, P, D, C, CF>(
    poller: P,
    cancellation: D,
    cancel: C,
) -> Result<R>
where
    P: Poller<R, M>,
    D: Future<Output = ()> + Send,
    C: FnOnce() -> CF + Send,
    CF: Future<Output = Result<()>> + Send,
{
    tokio::select! {
        result = poller.until_done() => result,
        _ = cancellation => {
            cancel().await?;
            Err(Error::service(
                Status::default()
                    .set_code(Code::Cancelled)
                    .set_message("operation cancelled by caller"),
            ))
        }
    }
}

/// An implementation of `Poller` based on closures.
///
/// # Parameters
/// * `R` - the response type. Typically a message representing the final
///   disposition of the long-running operation.
/// * `M` - the metadata type. The data included with partially completed
///   instances of this operation.
/// * `S` - the start closure type.
/// * `SF` - the type of future returned by `S`.
/// * `Q` - the query closure type. It receives the name of the operation as
///   its only input parameter.
/// * `QF` - the type of future returned by `Q`.
struct PollerImpl<R, M, S, SF, Q, QF>
where
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
{
    error_policy: Arc<dyn PollingErrorPolicy>,
    backoff_policy: Arc<dyn PollingBackoffPolicy>,
    start: Option<S>,
    query: Q,
    operation: Option<String>,
    loop_start: Instant,
    attempt_count: u32,
}

impl<R, M, S, SF, Q, QF> PollerImpl<R, M, S, SF, Q, QF>
where
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
{
    fn new(
        error_policy: Arc<dyn PollingErrorPolicy>,
        backoff_policy: Arc<dyn PollingBackoffPolicy>,
        start: Option<S>,
        operation: Option<String>,
        query: Q,
    ) -> Self {
        Self {
            error_policy,
            backoff_policy,
            start,
            query,
            operation,
            loop_start: Instant::now(),
            attempt_count: 0,
        }
    }
}

impl<R, M, S, SF, Q, QF> sealed::Poller for PollerImpl<R, M, S, SF, Q, QF>
where
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
{
}

impl<R, M, S, SF, Q, QF> Poller<R, M> for PollerImpl<R, M, S, SF, Q, QF>
where
    R: Message + Send,
    M: Message + Send,
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
    Q: Fn(String) -> QF + Send + Sync + Clone,
    QF: Future<Output = Result<Operation<R, M>>> + Send + 'static,
{
    async fn poll(&mut self) -> Option<PollingResult<R, M>> {
        if let Some(start) = self.start.take() {
            let result = start().await;
            let (op, poll) = details::handle_start(result);
            self.operation = op;
            return Some(poll);
        }
        if let Some(name) = self.operation.take() {
            self.attempt_count += 1;
            let query = self.query.clone();
            let result = query(name.clone()).await;
            let (op, poll) = details::handle_poll(
                self.error_policy.clone(),
                self.loop_start,
                self.attempt_count,
                name,
                result,
            );
            self.operation = op;
            return Some(poll);
        }
        None
    }

    async fn until_done(mut self) -> Result<R> {
        while let Some(p) = self.poll().await {
            match p {
                // Return, the operation completed or the polling policy is
                // exhausted.
                PollingResult::Completed(r) => return r,
                // Continue, the operation was successfully polled and the
                // polling policy was queried.
                PollingResult::InProgress(_) => (),
                // Continue, the polling policy was queried and decided the
                // error is recoverable.
                PollingResult::PollingError(_) => (),
            }
            let wait = self
                .backoff_policy
                .wait_period(self.loop_start, self.attempt_count);
            tokio::time::sleep(wait).await;
        }
        // `poll()` only returns `None` after it returned
        // `PollingResult::Completed`, so this line is never reached.
        unreachable!("loop should exit via the `Completed` branch vs. this line");
    }

    #[cfg(feature = "unstable-stream")]
    fn into_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>> + Unpin {
        use futures::stream::unfold;
        Box::pin(unfold(Some(self), move |state| async move {
            if let Some(mut poller) = state {
                if let Some(pr) = poller.poll().await {
                    return Some((pr, Some(poller)));
                }
            };
            None
        }))
    }
}
