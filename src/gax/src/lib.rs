// Copyright 2024 Google LLC
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

//! Retry, backoff, and polling helpers.
//!
//! This crate contains the policies and loops used by the Google Cloud Client
//! Libraries for Rust to retry RPCs, poll long-running operations, and renew
//! leases:
//!
//! * [retry_policy] decides if an error is worth retrying, and for how long.
//! * [backoff_policy] and [exponential_backoff] decide how long to wait between
//!   attempts.
//! * [polling_policy] combines both for long-running operations.
//! * [retry_loop] runs a single request until it succeeds, fails permanently,
//!   exhausts its policy, or is cancelled.
//!
//! All the loops are asynchronous. They issue their attempts and timers
//! through a [scheduler::Scheduler].

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all the retry loops and policies.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

pub mod error;

pub mod backoff_policy;
pub mod exponential_backoff;
pub mod idempotency;
pub mod options;
pub mod polling_backoff_policy;
pub mod polling_policy;
pub mod retry_loop;
pub mod retry_policy;
pub mod retry_result;
pub mod retry_state;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod mock_rng;
