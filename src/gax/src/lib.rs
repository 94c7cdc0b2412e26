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

//! Cloud API client helpers.
//!
//! This crate contains the retry, backoff, and polling machinery shared by
//! all the clients in this workspace. Clients wrap each RPC in a retry loop,
//! parameterized by a retry policy, a backoff policy, and the idempotency of
//! the request. Long-running operations additionally use a polling policy
//! with its own (typically slower) cadence.
//!
//! All policies are prototypes: each logical call receives its own instance
//! (via `Arc<dyn Trait>` handles in [options::RequestOptions]) so concurrent
//! calls never share mutable retry state.

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all functions wrapping RPCs.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// The core error types used by clients.
pub mod error;

pub mod backoff_policy;
pub mod exponential_backoff;
pub mod idempotency;
pub mod operation_context;
pub mod options;
pub mod polling_backoff_policy;
pub mod polling_error_policy;
pub mod retry_loop;
pub mod retry_policy;
pub mod retry_result;
pub mod retry_throttler;
pub mod throttle_result;

#[cfg(test)]
mod mock_rng;
