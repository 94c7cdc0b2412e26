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

//! The wire model for long-running operations.
//!
//! Services report long-running operations with a generic `Operation`
//! message: the result and metadata are dynamically-typed payloads. This
//! module defines that message and the [Payload] type used to box the
//! dynamic parts. Extraction is strict: a payload only converts to the type
//! it was created from, anything else is an error.

use cumulus_gax::error::rpc::Status;
use serde::{Deserialize, Serialize};

/// Implemented by message types that can travel inside a [Payload].
///
/// The type URL uniquely identifies the message type. Two different message
/// types must never share a type URL.
pub trait Message: Serialize + serde::de::DeserializeOwned {
    /// The globally unique identifier for this message type.
    fn type_url() -> &'static str;
}

/// The errors from [Payload] conversions.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload holds a different message type than requested.
    #[error("payload type mismatch, expected {want}, found {got}")]
    TypeMismatch {
        /// The type URL of the requested message type.
        want: &'static str,
        /// The type URL found in the payload.
        got: String,
    },

    /// The payload value did not serialize or deserialize cleanly.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// A dynamically-typed message payload.
///
/// Payloads pair a type URL with the JSON encoding of the message. They are
/// produced with [Payload::from_msg] and consumed with [Payload::to_msg],
/// which verifies the type URL before deserializing.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Payload {
    /// The type URL of the boxed message.
    #[serde(rename = "@type")]
    pub type_url: String,

    /// The JSON encoding of the boxed message.
    #[serde(flatten)]
    pub value: serde_json::Value,
}

impl Payload {
    /// Boxes a message into a payload.
    pub fn from_msg<T: Message>(msg: &T) -> Result<Self, PayloadError> {
        Ok(Self {
            type_url: T::type_url().to_string(),
            value: serde_json::to_value(msg)?,
        })
    }

    /// Extracts a message of type `T` from the payload.
    ///
    /// Fails with [PayloadError::TypeMismatch] if the payload was created
    /// from a different message type. There is no coercion between types,
    /// even structurally identical ones.
    pub fn to_msg<T: Message>(&self) -> Result<T, PayloadError> {
        if self.type_url != T::type_url() {
            return Err(PayloadError::TypeMismatch {
                want: T::type_url(),
                got: self.type_url.clone(),
            });
        }
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// The generic representation of a long-running operation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Operation {
    /// The server-assigned name of the operation, unique within the service.
    pub name: String,

    /// If `false` the operation is still in progress. If `true`, the
    /// operation has completed and `result` is available.
    pub done: bool,

    /// Service-specific progress information, such as completion percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,

    /// The final disposition of the operation. Only meaningful when `done`
    /// is `true`.
    #[serde(flatten)]
    pub result: Option<OperationResult>,
}

impl Operation {
    /// Sets the value of [name][Operation::name].
    pub fn set_name<T: Into<String>>(mut self, v: T) -> Self {
        self.name = v.into();
        self
    }

    /// Sets the value of [done][Operation::done].
    pub fn set_done(mut self, v: bool) -> Self {
        self.done = v;
        self
    }

    /// Sets the value of [metadata][Operation::metadata].
    pub fn set_metadata<T: Into<Payload>>(mut self, v: T) -> Self {
        self.metadata = Some(v.into());
        self
    }

    /// Sets the value of [result][Operation::result].
    pub fn set_result<T: Into<OperationResult>>(mut self, v: T) -> Self {
        self.result = Some(v.into());
        self
    }
}

/// The final outcome of a long-running operation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationResult {
    /// The operation failed.
    Error(Status),

    /// The operation succeeded, with a typed response.
    Response(Payload),
}

impl From<Status> for OperationResult {
    fn from(value: Status) -> Self {
        OperationResult::Error(value)
    }
}

impl From<Payload> for OperationResult {
    fn from(value: Payload) -> Self {
        OperationResult::Response(value)
    }
}
