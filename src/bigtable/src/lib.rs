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

//! Bulk-write helpers for Bigtable-style tables.
//!
//! A bulk write submits a batch of independent row mutations in one
//! streaming RPC. The server resolves each entry individually, so a single
//! attempt may leave the batch partially applied. This crate provides the
//! retry engine for such batches:
//!
//! * [mutation] defines row mutations and their idempotency classification.
//! * [stub] defines the narrow service trait the engine talks through.
//! * [bulk_mutator] tracks per-entry outcomes across attempts.
//! * [flow_control] paces attempts from server-supplied feedback.
//! * [bulk_apply] ties the pieces to the generic retry loop in
//!   [cumulus_gax].
//!
//! Only entries that failed with a retryable status *and* are safe to
//! resend are included in follow-up attempts. Writes at a server-assigned
//! timestamp are never resent, unless the server explicitly supplies a
//! retry delay hint and the application opted into honoring them.

pub mod bulk_apply;
pub mod bulk_mutator;
pub mod flow_control;
pub mod mutation;
pub mod stub;
