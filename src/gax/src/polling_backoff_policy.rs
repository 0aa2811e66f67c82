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

//! Defines the trait for polling backoff policies.
//!
//! Long-running operations are polled until completion, with a delay between
//! polls to avoid overloading the service. These delays should not be
//! confused with retry backoff: polling backoff uses no jitter, because the
//! operation makes progress regardless of how often it is polled.
//!
//! The most common implementation is truncated exponential backoff without
//! jitter, see [ExponentialBackoff][crate::exponential_backoff::ExponentialBackoff].

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Defines the trait implemented by all polling backoff strategies.
pub trait PollingBackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before the next poll.
    ///
    /// # Parameters
    /// * `loop_start` - when the polling loop started.
    /// * `attempt_count` - the number of polls so far, starting at 1 for the
    ///   delay before the first poll.
    fn wait_period(&self, loop_start: Instant, attempt_count: u32) -> Duration;
}

/// A helper type to use [PollingBackoffPolicy] in client and request options.
#[derive(Clone, Debug)]
pub struct PollingBackoffPolicyArg(pub(crate) Arc<dyn PollingBackoffPolicy>);

impl<T: PollingBackoffPolicy + 'static> std::convert::From<T> for PollingBackoffPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn PollingBackoffPolicy>> for PollingBackoffPolicyArg {
    fn from(value: Arc<dyn PollingBackoffPolicy>) -> Self {
        Self(value)
    }
}
