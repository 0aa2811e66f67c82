// Copyright 2025 Google LLC
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

//! Defines types to query retry policies.

use std::time::Instant;

/// The input into a retry policy query.
///
/// On an error, the retry loop queries the retry policy to decide if the loop
/// should continue. This type captures the state of the loop at that point.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RetryState {
    /// If true, the request is idempotent and it is safe to retry.
    pub idempotent: bool,

    /// The start time for this retry loop.
    pub start: Instant,

    /// The number of failed attempts so far, including the failure being
    /// classified.
    pub attempt_count: u32,
}

impl RetryState {
    /// Creates a new instance, starting now.
    pub fn new(idempotent: bool) -> Self {
        Self::default().set_idempotent(idempotent)
    }

    /// Updates the idempotency.
    pub fn set_idempotent(mut self, v: bool) -> Self {
        self.idempotent = v;
        self
    }

    /// Updates the start time.
    pub fn set_start<T: Into<Instant>>(mut self, v: T) -> Self {
        self.start = v.into();
        self
    }

    /// Updates the attempt count.
    pub fn set_attempt_count<T: Into<u32>>(mut self, v: T) -> Self {
        self.attempt_count = v.into();
        self
    }
}

impl std::default::Default for RetryState {
    fn default() -> Self {
        Self {
            start: now(),
            idempotent: false,
            attempt_count: 0,
        }
    }
}

// The policies read the tokio clock, so tests can pause and advance time.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
