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

//! The idempotency classification consumed by the retry loop.
//!
//! Requests are classified by the layer that understands their shape: pure
//! reads are idempotent, and writes are idempotent only when every side
//! effect uses a client-chosen, collision-proof identifier. The default
//! classification is conservative: when in doubt, a request is
//! [NonIdempotent][Idempotency::NonIdempotent] and transient failures are
//! surfaced instead of retried.

/// Whether a request is safe to send more than once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Idempotency {
    /// The request can be resent without causing duplicate side effects.
    Idempotent,

    /// Resending the request may cause a duplicate side effect. The retry
    /// loop does not retry these on transient failures, unless the service
    /// explicitly authorizes the retry and server-driven retries are
    /// enabled.
    NonIdempotent,
}

impl Idempotency {
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Idempotency::Idempotent)
    }
}

impl From<bool> for Idempotency {
    fn from(value: bool) -> Self {
        if value {
            Idempotency::Idempotent
        } else {
            Idempotency::NonIdempotent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert!(Idempotency::from(true).is_idempotent());
        assert!(!Idempotency::from(false).is_idempotent());
    }
}
