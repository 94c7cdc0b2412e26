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

//! Per-operation state threaded through every attempt of a retry loop.
//!
//! A logical operation may span multiple attempts. Some state must survive
//! from one attempt to the next: the attempt counter, and any sticky routing
//! cookies returned by the service. Cookies preserve request affinity across
//! retries, so a retried attempt lands on the same backend resources as the
//! attempt that failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Metadata keys with this prefix are sticky routing cookies.
pub const COOKIE_PREFIX: &str = "x-cumulus-cookie-";

/// State shared across all the attempts of one logical operation.
///
/// The retry loop and the caller both hold a reference, so the context is
/// typically wrapped in a [SharedOperationContext].
///
/// # Example
/// ```
/// # use cumulus_gax::operation_context::OperationContext;
/// use std::collections::HashMap;
/// let mut context = OperationContext::new();
/// assert_eq!(context.begin_attempt(), 1);
///
/// let response_metadata = HashMap::from([
///     ("x-cumulus-cookie-routing".to_string(), "token".to_string()),
/// ]);
/// context.process_response_metadata(&response_metadata);
///
/// let mut request_metadata = HashMap::new();
/// context.apply(&mut request_metadata);
/// assert_eq!(request_metadata.get("x-cumulus-cookie-routing").map(String::as_str), Some("token"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct OperationContext {
    attempt_count: u32,
    cookies: HashMap<String, String>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of attempts started so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Records the start of a new attempt and returns its ordinal.
    ///
    /// The first attempt is `1`.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    /// Captures sticky cookies from response metadata.
    ///
    /// Both successful and failed attempts may carry cookies. A cookie
    /// returned on a later attempt replaces one with the same name from an
    /// earlier attempt.
    pub fn process_response_metadata(&mut self, metadata: &HashMap<String, String>) {
        for (key, value) in metadata {
            if key.starts_with(COOKIE_PREFIX) {
                self.cookies.insert(key.clone(), value.clone());
            }
        }
    }

    /// Attaches the captured cookies to the metadata for the next attempt.
    pub fn apply(&self, metadata: &mut HashMap<String, String>) {
        for (key, value) in &self.cookies {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

/// Operation contexts are updated by the retry loop and read by the caller's
/// attempt closure, so they are shared behind `Arc<Mutex<>>`.
pub type SharedOperationContext = Arc<Mutex<OperationContext>>;
