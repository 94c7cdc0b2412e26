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

//! The core error types used by clients.

/// The `Status` error model and its detail payloads.
pub mod rpc;

use rpc::Status;
use std::error::Error as StdError;
use std::time::Duration;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by all clients.
///
/// Errors come from multiple sources. The service may return an error, the
/// transport may be unable to complete the request, the retry policy may be
/// exhausted, or the client may detect a contradiction in the data returned
/// by the service.
///
/// Most applications just return or log the error. Applications that need to
/// branch on the error can use the predicates defined on this type, and can
/// query [source][std::error::Error::source] for deeper information.
///
/// # Example
/// ```
/// use cumulus_gax::error::Error;
/// use cumulus_gax::error::rpc::{Code, Status};
/// let error = Error::service(Status::default().set_code(Code::NotFound));
/// assert_eq!(error.status().map(|s| s.code), Some(Code::NotFound));
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
    annotation: Option<String>,
}

impl Error {
    /// Creates an error with the information returned by the service.
    pub fn service(status: Status) -> Self {
        Self {
            kind: ErrorKind::Service(Box::new(status)),
            source: None,
            annotation: None,
        }
    }

    /// The service sent a detailed [Status] with this error.
    pub fn status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(status) => Some(status),
            _ => None,
        }
    }

    /// Creates an error representing an exhausted retry or polling policy.
    ///
    /// The previous error is preserved as the
    /// [source][std::error::Error::source] so callers can diagnose the
    /// failure without inspecting retry internals.
    pub fn exhausted<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Exhausted,
            source: Some(source.into()),
            annotation: None,
        }
    }

    /// The request could not complete before the retry policy expired.
    ///
    /// This is always a client-side generated error, but it may be the
    /// result of multiple errors received from the service. The last of
    /// these is available via [source][std::error::Error::source].
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted)
    }

    /// Creates an error representing a timeout.
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
            annotation: None,
        }
    }

    /// The request could not be completed before its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing a contradiction in the data returned by
    /// the service.
    ///
    /// For example, a bulk mutation entry with no reported outcome despite a
    /// successful stream, or an operation payload whose type does not match
    /// the expected response type. These are never guessed around: the
    /// contradiction is surfaced so it can be reported and fixed.
    pub fn internal<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Internal,
            source: Some(source.into()),
            annotation: None,
        }
    }

    /// The client detected a contradiction in the service response.
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ErrorKind::Internal)
    }

    /// Creates an error representing an I/O problem before a response was
    /// received.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
            annotation: None,
        }
    }

    /// The request failed before a response was received.
    ///
    /// The request may or may not have started; if it mutates state it may
    /// or may not be safe to attempt again.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error for problems that fit no other category.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
            annotation: None,
        }
    }

    /// The server-suggested retry delay, if this error carries one.
    ///
    /// See [Status::retry_delay].
    pub fn retry_delay(&self) -> Option<Duration> {
        self.status().and_then(Status::retry_delay)
    }

    /// Annotates the error with the originating operation and how the retry
    /// loop classified it.
    ///
    /// The annotation only affects the [Display][std::fmt::Display]
    /// rendering. The error kind, status, and source are unchanged, so
    /// callers can still branch on them.
    ///
    /// # Example
    /// ```
    /// use cumulus_gax::error::Error;
    /// use cumulus_gax::error::rpc::{Code, Status};
    /// let error = Error::service(Status::default().set_code(Code::InvalidArgument))
    ///     .annotated("permanent error in ListInstances");
    /// assert!(format!("{error}").contains("ListInstances"));
    /// assert_eq!(error.status().map(|s| s.code), Some(Code::InvalidArgument));
    /// ```
    pub fn annotated<T: Into<String>>(mut self, annotation: T) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(annotation) = &self.annotation {
            write!(f, "{annotation}: ")?;
        }
        match &self.kind {
            ErrorKind::Service(status) => {
                write!(f, "the service reports an error: {status:?}")
            }
            ErrorKind::Exhausted => write!(f, "the retry or polling policy is exhausted"),
            ErrorKind::Timeout => write!(f, "the request exceeded its deadline"),
            ErrorKind::Internal => {
                write!(f, "the client detected a contradiction in the response")
            }
            ErrorKind::Io => write!(f, "the request failed before a response was received"),
            ErrorKind::Other => write!(f, "an error was detected in the client"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

#[derive(Debug)]
enum ErrorKind {
    Service(Box<Status>),
    Exhausted,
    Timeout,
    Internal,
    Io,
    Other,
}

#[cfg(test)]
mod tests {
    use super::rpc::Code;
    use super::*;

    #[test]
    fn service_error() {
        let status = Status::default()
            .set_code(Code::PermissionDenied)
            .set_message("uh-oh");
        let error = Error::service(status.clone());
        assert_eq!(error.status(), Some(&status));
        assert!(!error.is_exhausted());
        assert!(!error.is_internal());
        let fmt = format!("{error}");
        assert!(fmt.contains("uh-oh"), "{fmt}");
    }

    #[test]
    fn exhausted_preserves_last_error() {
        let last = Error::service(Status::default().set_code(Code::Unavailable));
        let error = Error::exhausted(last);
        assert!(error.is_exhausted());
        let source = error
            .source()
            .and_then(|e| e.downcast_ref::<Error>())
            .and_then(|e| e.status());
        assert_eq!(source.map(|s| s.code), Some(Code::Unavailable));
    }

    #[test]
    fn retry_delay_passthrough() {
        use super::rpc::RetryInfo;
        let status = Status::default().set_code(Code::ResourceExhausted).set_details([
            RetryInfo::default().set_retry_delay(Duration::from_millis(100)),
        ]);
        let error = Error::service(status);
        assert_eq!(error.retry_delay(), Some(Duration::from_millis(100)));

        let error = Error::other("no status here");
        assert_eq!(error.retry_delay(), None);
    }

    #[test]
    fn predicates() {
        assert!(Error::timeout("t").is_timeout());
        assert!(Error::internal("i").is_internal());
        assert!(Error::io("io").is_io());
        assert!(Error::other("o").source().is_some());
    }
}
