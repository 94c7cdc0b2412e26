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

//! The service capability consumed by the bulk mutation engine.
//!
//! The engine is transport-agnostic. It talks to the service through
//! [BigtableStub], a narrow trait that issues one streaming bulk-write RPC.
//! Production implementations wrap a real transport; tests provide mocks.

use crate::mutation::Mutation;
use cumulus_gax::Result;
use cumulus_gax::error::rpc::Status;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;

/// One row mutation as placed on the wire, positioned by its index within
/// the request.
#[derive(Clone, Debug, PartialEq)]
pub struct MutateRowsEntry {
    pub row_key: String,
    pub mutations: Vec<Mutation>,
}

/// The request for one streaming bulk-write attempt.
///
/// The metadata carries per-attempt key/value pairs, including any sticky
/// routing cookies captured on earlier attempts of the same logical
/// operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutateRowsRequest {
    pub table_name: String,
    pub entries: Vec<MutateRowsEntry>,
    pub metadata: HashMap<String, String>,
}

/// The outcome of one entry, reported within a partial response.
///
/// The index refers to the position of the entry in the *request*, not in
/// the original batch.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryResult {
    pub index: usize,
    pub status: Status,
}

/// The server's flow-control feedback.
///
/// The server periodically reports how the client should adjust its send
/// rate. A factor above `1.0` permits more throughput, below `1.0` requires
/// less, over the given period.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitInfo {
    pub period: Duration,
    pub factor: f64,
}

/// One partial response from a streaming bulk-write RPC.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutateRowsResponse {
    /// The entries resolved by this partial response.
    pub entries: Vec<EntryResult>,

    /// Flow-control feedback, when the server chose to send any.
    pub rate_limit_info: Option<RateLimitInfo>,

    /// Response metadata. May carry sticky routing cookies.
    pub metadata: HashMap<String, String>,
}

impl MutateRowsResponse {
    pub fn set_entries<I: IntoIterator<Item = EntryResult>>(mut self, v: I) -> Self {
        self.entries = v.into_iter().collect();
        self
    }

    pub fn set_rate_limit_info(mut self, v: RateLimitInfo) -> Self {
        self.rate_limit_info = Some(v);
        self
    }

    pub fn set_metadata<I, K, V>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata = v
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }
}

/// The stream of partial responses for one bulk-write attempt.
///
/// A `Err` item terminates the stream: the attempt failed as a whole and
/// entries without a reported outcome take that error.
pub type MutateRowsStream = BoxStream<'static, Result<MutateRowsResponse>>;

/// The service operations used by the bulk mutation engine.
#[async_trait::async_trait]
pub trait BigtableStub: Send + Sync {
    /// Issues one streaming bulk-write RPC.
    ///
    /// An error here means the stream could not be established; it is
    /// treated the same as a stream that fails before reporting any entry.
    async fn mutate_rows(&self, request: MutateRowsRequest) -> Result<MutateRowsStream>;
}
