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

//! Defines traits for backoff policies and the per-operation backoff state.
//!
//! Retry loops should avoid immediately retrying an operation, as the service
//! may need time to recover. [Exponential backoff] is a well known algorithm
//! to find an acceptable delay between retries.
//!
//! A [BackoffPolicy] is configuration. The state consumed by one operation
//! lives in a [BackoffSchedule]. Cloning a schedule resets it to the initial
//! delay.
//!
//! # Example
//! ```
//! # use google_cloud_gax_retry::backoff_policy::*;
//! # use google_cloud_gax_retry::exponential_backoff::ExponentialBackoffBuilder;
//! use std::time::Duration;
//! let policy = ExponentialBackoffBuilder::new()
//!     .with_initial_delay(Duration::from_millis(100))
//!     .with_maximum_delay(Duration::from_secs(5))
//!     .with_scaling(4.0)
//!     .build()?;
//! let mut schedule = BackoffSchedule::new(policy);
//! let delay = schedule.on_completion();
//! assert!(delay <= Duration::from_millis(100));
//! # Ok::<(), google_cloud_gax_retry::exponential_backoff::Error>(())
//! ```
//!
//! [Exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff

use crate::retry_state::now;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Defines the trait implemented by all backoff strategies.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the backoff delay on a failure.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts. This method is always
    ///   called after the first attempt.
    fn on_failure(&self, loop_start: Instant, attempt_count: u32) -> Duration;
}

/// A helper type to use [BackoffPolicy] in client and request options.
#[derive(Clone, Debug)]
pub struct BackoffPolicyArg(pub(crate) Arc<dyn BackoffPolicy>);

impl<T: BackoffPolicy + 'static> std::convert::From<T> for BackoffPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn BackoffPolicy>> for BackoffPolicyArg {
    fn from(value: Arc<dyn BackoffPolicy>) -> Self {
        Self(value)
    }
}

/// The backoff state consumed by a single operation.
///
/// Each call to [on_completion][BackoffSchedule::on_completion] returns the
/// delay before the next attempt and advances the schedule.
#[derive(Debug)]
pub struct BackoffSchedule {
    policy: Arc<dyn BackoffPolicy>,
    start: Instant,
    completions: u32,
}

impl BackoffSchedule {
    /// Creates a new schedule, starting now.
    pub fn new<P: Into<BackoffPolicyArg>>(policy: P) -> Self {
        Self {
            policy: policy.into().0,
            start: now(),
            completions: 0,
        }
    }

    /// Returns the delay before the next attempt, and advances the schedule.
    pub fn on_completion(&mut self) -> Duration {
        self.completions = self.completions.saturating_add(1);
        self.policy.on_failure(self.start, self.completions)
    }

    /// The number of delays returned so far.
    pub fn completions(&self) -> u32 {
        self.completions
    }
}

impl Clone for BackoffSchedule {
    fn clone(&self) -> Self {
        Self::new(BackoffPolicyArg(self.policy.clone()))
    }
}
