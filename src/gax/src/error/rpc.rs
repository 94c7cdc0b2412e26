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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The [Status] type defines a logical error model that is suitable for
/// different programming environments, including REST APIs and RPC APIs.
/// Each [Status] message contains three pieces of data: error code, error
/// message, and error details.
///
/// A `Status` is immutable once constructed. The fluent `set_*` functions
/// consume and return the value, they are intended for construction:
///
/// ```
/// # use cumulus_gax::error::rpc::{Code, Status};
/// let status = Status::default()
///     .set_code(Code::Unavailable)
///     .set_message("try again");
/// assert_eq!(status.code, Code::Unavailable);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct Status {
    /// The status code.
    pub code: Code,

    /// A developer-facing error message, which should be in English.
    pub message: String,

    /// A list of messages that carry the error details. There is a common
    /// set of message types for APIs to use.
    pub details: Vec<StatusDetails>,
}

impl Status {
    /// Sets the value of [code][Status::code].
    pub fn set_code<T: Into<Code>>(mut self, v: T) -> Self {
        self.code = v.into();
        self
    }

    /// Sets the value of [message][Status::message].
    pub fn set_message<T: Into<String>>(mut self, v: T) -> Self {
        self.message = v.into();
        self
    }

    /// Sets the value of [details][Status::details].
    pub fn set_details<T, I>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = I>,
        I: Into<StatusDetails>,
    {
        self.details = v.into_iter().map(|d| d.into()).collect();
        self
    }

    /// The server-suggested retry delay, if the status carries one.
    ///
    /// Services may attach a [RetryInfo] detail to transient failures. The
    /// retry loop honors this delay, in preference over the client-side
    /// backoff policy, when server-driven retries are enabled.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.details.iter().find_map(|d| match d {
            StatusDetails::RetryInfo(info) => info.retry_delay,
            _ => None,
        })
    }
}

/// The canonical error codes for APIs.
///
/// Sometimes multiple error codes may apply. Services should return the most
/// specific error code that applies. For example, prefer `OutOfRange` over
/// `FailedPrecondition` if both codes apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(into = "i32", from = "i32")]
#[non_exhaustive]
pub enum Code {
    /// Not an error; returned on success.
    Ok = 0,

    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,

    /// Unknown error. For example, errors raised by APIs that do not return
    /// enough error information may be converted to this error.
    #[default]
    Unknown = 2,

    /// The client specified an invalid argument. Indicates arguments that
    /// are problematic regardless of the state of the system.
    InvalidArgument = 3,

    /// The deadline expired before the operation could complete. For
    /// operations that change the state of the system, this error may be
    /// returned even if the operation has completed successfully.
    DeadlineExceeded = 4,

    /// Some requested entity (e.g., file or directory) was not found.
    NotFound = 5,

    /// The entity that a client attempted to create already exists.
    AlreadyExists = 6,

    /// The caller does not have permission to execute the specified
    /// operation.
    PermissionDenied = 7,

    /// Some resource has been exhausted, perhaps a per-user quota.
    ResourceExhausted = 8,

    /// The operation was rejected because the system is not in a state
    /// required for the operation's execution.
    FailedPrecondition = 9,

    /// The operation was aborted, typically due to a concurrency issue such
    /// as a sequencer check failure or transaction abort.
    Aborted = 10,

    /// The operation was attempted past the valid range.
    OutOfRange = 11,

    /// The operation is not implemented or is not supported/enabled in this
    /// service.
    Unimplemented = 12,

    /// Internal errors. This means that some invariants expected by the
    /// underlying system have been broken. This error code is reserved for
    /// serious errors.
    Internal = 13,

    /// The service is currently unavailable. This is most likely a transient
    /// condition, which can be corrected by retrying with a backoff. Note
    /// that it is not always safe to retry non-idempotent operations.
    Unavailable = 14,

    /// Unrecoverable data loss or corruption.
    DataLoss = 15,

    /// The request does not have valid authentication credentials for the
    /// operation.
    Unauthenticated = 16,
}

impl std::convert::From<i32> for Code {
    fn from(value: i32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::default(),
        }
    }
}

impl std::convert::From<Code> for i32 {
    fn from(value: Code) -> i32 {
        value as i32
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        };
        write!(f, "{name}")
    }
}

/// The detail payloads attached to a [Status].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "@type")]
#[non_exhaustive]
pub enum StatusDetails {
    /// Describes when the client can retry a failed request.
    #[serde(rename = "type.googleapis.com/google.rpc.RetryInfo")]
    RetryInfo(RetryInfo),

    /// Debugging information for the request.
    #[serde(rename = "type.googleapis.com/google.rpc.DebugInfo")]
    DebugInfo(DebugInfo),

    /// The cause of the error with structured details.
    #[serde(rename = "type.googleapis.com/google.rpc.ErrorInfo")]
    ErrorInfo(ErrorInfo),

    /// A detail payload this client does not interpret.
    #[serde(untagged)]
    Other(serde_json::Value),
}

/// Describes when clients can retry a failed request.
///
/// Clients could ignore this recommendation. Applying the recommendation
/// without limits could cause retry loops that never terminate, so the retry
/// loop still consults the retry policy after honoring the delay.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct RetryInfo {
    /// Clients should wait at least this long between retrying the same
    /// request.
    pub retry_delay: Option<Duration>,
}

impl RetryInfo {
    /// Sets the value of [retry_delay][RetryInfo::retry_delay].
    pub fn set_retry_delay<T: Into<Duration>>(mut self, v: T) -> Self {
        self.retry_delay = Some(v.into());
        self
    }
}

impl From<RetryInfo> for StatusDetails {
    fn from(value: RetryInfo) -> Self {
        StatusDetails::RetryInfo(value)
    }
}

/// Describes additional debugging info.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct DebugInfo {
    /// The stack trace entries indicating where the error occurred.
    pub stack_entries: Vec<String>,

    /// Additional debugging information provided by the server.
    pub detail: String,
}

impl DebugInfo {
    /// Sets the value of [detail][DebugInfo::detail].
    pub fn set_detail<T: Into<String>>(mut self, v: T) -> Self {
        self.detail = v.into();
        self
    }

    /// Sets the value of [stack_entries][DebugInfo::stack_entries].
    pub fn set_stack_entries<T, I>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = I>,
        I: Into<String>,
    {
        self.stack_entries = v.into_iter().map(|e| e.into()).collect();
        self
    }
}

impl From<DebugInfo> for StatusDetails {
    fn from(value: DebugInfo) -> Self {
        StatusDetails::DebugInfo(value)
    }
}

/// Describes the cause of the error with structured details.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
#[non_exhaustive]
pub struct ErrorInfo {
    /// The reason of the error, a constant value that identifies the
    /// proximate cause of the error.
    pub reason: String,

    /// The logical grouping to which the "reason" belongs.
    pub domain: String,

    /// Additional structured details about this error.
    pub metadata: HashMap<String, String>,
}

impl ErrorInfo {
    /// Sets the value of [reason][ErrorInfo::reason].
    pub fn set_reason<T: Into<String>>(mut self, v: T) -> Self {
        self.reason = v.into();
        self
    }

    /// Sets the value of [domain][ErrorInfo::domain].
    pub fn set_domain<T: Into<String>>(mut self, v: T) -> Self {
        self.domain = v.into();
        self
    }
}

impl From<ErrorInfo> for StatusDetails {
    fn from(value: ErrorInfo) -> Self {
        StatusDetails::ErrorInfo(value)
    }
}
