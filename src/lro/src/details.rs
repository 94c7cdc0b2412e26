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

//! Simplifies the implementation of `PollerImpl`.

use super::*;
use crate::model::{Message, OperationResult};
use cumulus_gax::polling_error_policy::PollingErrorPolicy;
use cumulus_gax::retry_result::RetryResult;
use std::sync::Arc;
use std::time::Instant;

pub(crate) fn handle_start<R, M>(
    result: Result<Operation<R, M>>,
) -> (Option<String>, PollingResult<R, M>)
where
    R: Message,
    M: Message,
{
    match result {
        Err(e) => (None, PollingResult::Completed(Err(e))),
        Ok(op) => handle_common(op),
    }
}

pub(crate) fn handle_poll<R, M>(
    error_policy: Arc<dyn PollingErrorPolicy>,
    loop_start: Instant,
    attempt_count: u32,
    operation_name: String,
    result: Result<Operation<R, M>>,
) -> (Option<String>, PollingResult<R, M>)
where
    R: Message,
    M: Message,
{
    match result {
        Err(e) => {
            let state = error_policy.on_error(loop_start, attempt_count, e);
            handle_polling_error(state, operation_name)
        }
        Ok(op) => {
            let (name, result) = handle_common(op);
            match &result {
                PollingResult::Completed(_) => (name, result),
                PollingResult::InProgress(_) | PollingResult::PollingError(_) => {
                    match error_policy.on_in_progress(loop_start, attempt_count, &operation_name) {
                        None => (name, result),
                        Some(e) => (None, PollingResult::Completed(Err(e))),
                    }
                }
            }
        }
    }
}

fn handle_polling_error<R, M>(
    state: RetryResult,
    operation_name: String,
) -> (Option<String>, PollingResult<R, M>) {
    match state {
        RetryResult::Continue(e) => (Some(operation_name), PollingResult::PollingError(e)),
        RetryResult::Exhausted(e) | RetryResult::Permanent(e) => {
            (None, PollingResult::Completed(Err(e)))
        }
    }
}

pub(crate) fn handle_common<R, M>(op: Operation<R, M>) -> (Option<String>, PollingResult<R, M>)
where
    R: Message,
    M: Message,
{
    if op.done() {
        let result = as_result(op);
        return (None, PollingResult::Completed(result));
    }
    let name = op.name();
    match as_metadata(&op) {
        Ok(metadata) => (Some(name), PollingResult::InProgress(metadata)),
        // Bad metadata does not terminate the operation. Report the problem
        // and keep polling.
        Err(e) => (Some(name), PollingResult::PollingError(e)),
    }
}

fn as_result<R, M>(op: Operation<R, M>) -> Result<R>
where
    R: Message,
{
    // A completed operation must carry either the response *or* the error.
    // Carrying neither means the incoming data does not satisfy the
    // invariants of the type.
    match op.into_result() {
        Some(OperationResult::Response(payload)) => payload
            .to_msg::<R>()
            .map_err(|e| Error::internal(e).annotated("unexpected operation result type")),
        Some(OperationResult::Error(status)) => Err(Error::service(status)),
        None => Err(Error::internal(
            "operation completed without a result or error",
        )),
    }
}

fn as_metadata<R, M>(op: &Operation<R, M>) -> Result<Option<M>>
where
    M: Message,
{
    op.metadata()
        .map(|payload| {
            payload
                .to_msg::<M>()
                .map_err(|e| Error::internal(e).annotated("unexpected operation metadata type"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, PayloadError};
    use cumulus_gax::error::rpc::{Code, Status};
    use cumulus_gax::polling_error_policy::{
        AlwaysContinue, PollingErrorPolicyExt, TransientErrors,
    };
    use serde::{Deserialize, Serialize};
    use std::error::Error as _;

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
    struct Summary {
        rows: u64,
    }
    impl Message for Summary {
        fn type_url() -> &'static str {
            "test.cumulus.dev/Summary"
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
    struct Progress {
        percent: u32,
    }
    impl Message for Progress {
        fn type_url() -> &'static str {
            "test.cumulus.dev/Progress"
        }
    }

    type TestOperation = Operation<Summary, Progress>;

    fn in_progress_operation() -> anyhow::Result<TestOperation> {
        let op = model::Operation::default()
            .set_name("operations/123")
            .set_metadata(Payload::from_msg(&Progress { percent: 25 })?);
        Ok(TestOperation::new(op))
    }

    #[test]
    fn start_success() -> anyhow::Result<()> {
        let result = Ok(in_progress_operation()?);
        let (name, poll) = handle_start(result);
        assert_eq!(name.as_deref(), Some("operations/123"));
        match poll {
            PollingResult::InProgress(m) => assert_eq!(m, Some(Progress { percent: 25 })),
            _ => panic!("{poll:?}"),
        };
        Ok(())
    }

    #[test]
    fn start_error() {
        let status = Status::default()
            .set_code(Code::AlreadyExists)
            .set_message("thing already there");
        let result = Err::<TestOperation, Error>(Error::service(status.clone()));
        let (name, poll) = handle_start(result);
        assert_eq!(name, None);
        match poll {
            PollingResult::Completed(Err(e)) => assert_eq!(e.status(), Some(&status)),
            _ => panic!("{poll:?}"),
        };
    }

    #[test]
    fn poll_success() -> anyhow::Result<()> {
        let result = Ok(in_progress_operation()?);
        let (name, poll) = handle_poll(
            Arc::new(AlwaysContinue),
            Instant::now(),
            1,
            "operations/123".to_string(),
            result,
        );
        assert_eq!(name.as_deref(), Some("operations/123"));
        match poll {
            PollingResult::InProgress(m) => assert_eq!(m, Some(Progress { percent: 25 })),
            _ => panic!("{poll:?}"),
        };
        Ok(())
    }

    #[test]
    fn poll_success_exhausted() -> anyhow::Result<()> {
        let result = Ok(in_progress_operation()?);
        let (name, poll) = handle_poll(
            Arc::new(AlwaysContinue.with_attempt_limit(3)),
            Instant::now(),
            5,
            "operations/123".to_string(),
            result,
        );
        assert_eq!(name, None);
        match poll {
            PollingResult::Completed(Err(error)) => {
                assert!(
                    error
                        .source()
                        .and_then(|e| e
                            .downcast_ref::<cumulus_gax::polling_error_policy::Exhausted>())
                        .is_some(),
                    "{error:?}"
                );
            }
            _ => panic!("{poll:?}"),
        };
        Ok(())
    }

    #[test]
    fn poll_error_continue() {
        let result = Err::<TestOperation, Error>(Error::io("disconnected"));
        let (name, poll) = handle_poll(
            Arc::new(AlwaysContinue),
            Instant::now(),
            1,
            "operations/123".to_string(),
            result,
        );
        assert_eq!(name.as_deref(), Some("operations/123"));
        match poll {
            PollingResult::PollingError(e) => {
                assert!(e.is_io(), "{e:?}");
                let source = e.source().map(ToString::to_string);
                assert_eq!(source.as_deref(), Some("disconnected"), "{e:?}");
            }
            _ => panic!("{poll:?}"),
        };
    }

    #[test]
    fn poll_error_finishes() {
        let status = Status::default()
            .set_code(Code::Aborted)
            .set_message("operation-aborted");
        let result = Err::<TestOperation, Error>(Error::service(status.clone()));
        let (name, poll) = handle_poll(
            Arc::new(TransientErrors),
            Instant::now(),
            1,
            "operations/123".to_string(),
            result,
        );
        assert_eq!(name, None);
        match poll {
            PollingResult::Completed(Err(e)) => assert_eq!(e.status(), Some(&status)),
            _ => panic!("{poll:?}"),
        };
    }

    #[test]
    fn common_done() -> anyhow::Result<()> {
        let op = model::Operation::default()
            .set_name("operations/123")
            .set_done(true)
            .set_result(Payload::from_msg(&Summary { rows: 234 })?);
        let (name, polling) = handle_common(TestOperation::new(op));
        assert_eq!(name, None);
        match polling {
            PollingResult::Completed(Ok(response)) => {
                assert_eq!(response, Summary { rows: 234 });
            }
            _ => panic!("{polling:?}"),
        };
        Ok(())
    }

    #[test]
    fn common_not_done() -> anyhow::Result<()> {
        let (name, polling) = handle_common(in_progress_operation()?);
        assert_eq!(name.as_deref(), Some("operations/123"));
        match &polling {
            PollingResult::InProgress(m) => assert_eq!(m, &Some(Progress { percent: 25 })),
            _ => panic!("{polling:?}"),
        };
        Ok(())
    }

    #[test]
    fn common_bad_metadata_keeps_polling() -> anyhow::Result<()> {
        // The metadata has the wrong type. The operation is otherwise
        // healthy, so its name must be preserved.
        let op = model::Operation::default()
            .set_name("operations/123")
            .set_metadata(Payload::from_msg(&Summary { rows: 7 })?);
        let (name, polling) = handle_common(TestOperation::new(op));
        assert_eq!(name.as_deref(), Some("operations/123"));
        match polling {
            PollingResult::PollingError(e) => {
                assert!(e.is_internal(), "{e:?}");
                assert!(
                    format!("{e}").contains("unexpected operation metadata type"),
                    "{e}"
                );
            }
            _ => panic!("{polling:?}"),
        };
        Ok(())
    }

    #[test]
    fn extract_result() -> anyhow::Result<()> {
        let op = model::Operation::default()
            .set_done(true)
            .set_result(Payload::from_msg(&Summary { rows: 123 })?);
        let result = as_result(TestOperation::new(op))?;
        assert_eq!(result, Summary { rows: 123 });
        Ok(())
    }

    #[test]
    fn extract_result_with_error() {
        let status = Status::default()
            .set_code(Code::FailedPrecondition)
            .set_message("test only");
        let op = model::Operation::default()
            .set_done(true)
            .set_result(status.clone());
        let err = as_result(TestOperation::new(op)).unwrap_err();
        assert_eq!(err.status(), Some(&status), "{err:?}");
    }

    #[test]
    fn extract_result_bad_type() -> anyhow::Result<()> {
        // The result payload holds the metadata type. That is an error, the
        // value must not be coerced.
        let op = model::Operation::default()
            .set_done(true)
            .set_result(Payload::from_msg(&Progress { percent: 100 })?);
        let err = as_result(TestOperation::new(op)).unwrap_err();
        assert!(err.is_internal(), "{err:?}");
        assert!(
            format!("{err}").contains("unexpected operation result type"),
            "{err}"
        );
        assert!(
            matches!(
                err.source().and_then(|e| e.downcast_ref::<PayloadError>()),
                Some(PayloadError::TypeMismatch { .. })
            ),
            "{err:?}",
        );
        Ok(())
    }

    #[test]
    fn extract_result_not_set() {
        let op = model::Operation::default().set_done(true);
        let err = as_result(TestOperation::new(op)).unwrap_err();
        assert!(err.is_internal(), "{err:?}");
    }

    #[test]
    fn extract_metadata() -> anyhow::Result<()> {
        let metadata = as_metadata(&in_progress_operation()?)?;
        assert_eq!(metadata, Some(Progress { percent: 25 }));
        Ok(())
    }

    #[test]
    fn extract_metadata_not_set() -> anyhow::Result<()> {
        let op = TestOperation::new(model::Operation::default());
        let metadata = as_metadata(&op)?;
        assert_eq!(metadata, None);
        Ok(())
    }
}
