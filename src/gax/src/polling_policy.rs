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

//! Defines the policy used to poll long-running operations.
//!
//! A [PollingPolicy] composes a retry budget, which decides how many errors
//! are tolerated while polling, with a polling backoff policy, which decides
//! how long to wait between polls. An operation that is not done yet is not
//! a failure: only errors reported by the polling RPC consume the retry
//! budget.
//!
//! # Example
//! ```
//! # use google_cloud_gax_retry::polling_policy::PollingPolicy;
//! # use google_cloud_gax_retry::retry_policy::*;
//! # use google_cloud_gax_retry::exponential_backoff::ExponentialBackoff;
//! use std::time::Duration;
//! let mut policy = PollingPolicy::new(
//!     LimitedElapsedTime::new(Duration::from_secs(600)),
//!     ExponentialBackoff::default(),
//! );
//! assert_eq!(policy.wait_period(), Duration::from_secs(1));
//! assert_eq!(policy.wait_period(), Duration::from_secs(2));
//! assert!(!policy.exhausted());
//! ```

use crate::error::Error;
use crate::polling_backoff_policy::{PollingBackoffPolicy, PollingBackoffPolicyArg};
use crate::retry_policy::{RetryBudget, RetryPolicyArg};
use crate::retry_result::RetryResult;
use crate::retry_state::now;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Controls the polling loop for one long-running operation.
///
/// Cloning a polling policy returns a fresh instance with the initial
/// configuration of both the retry and backoff policies.
#[derive(Debug)]
pub struct PollingPolicy {
    budget: RetryBudget,
    backoff: Arc<dyn PollingBackoffPolicy>,
    start: Instant,
    polls: u32,
}

impl PollingPolicy {
    /// Creates a new polling policy.
    ///
    /// Polling is always idempotent, the retry policy sees every polling
    /// error as a failure of an idempotent request.
    pub fn new<R, B>(retry: R, backoff: B) -> Self
    where
        R: Into<RetryPolicyArg>,
        B: Into<PollingBackoffPolicyArg>,
    {
        Self {
            budget: RetryBudget::new(retry, true),
            backoff: backoff.into().0,
            start: now(),
            polls: 0,
        }
    }

    /// Returns the time to wait before the next poll.
    pub fn wait_period(&mut self) -> Duration {
        self.polls = self.polls.saturating_add(1);
        self.backoff.wait_period(self.start, self.polls)
    }

    /// Classifies a polling error, without consuming any budget.
    pub fn is_permanent_error(&self, error: &Error) -> bool {
        self.budget.is_permanent_failure(error)
    }

    /// Consumes one polling error.
    ///
    /// Permanent errors return [RetryResult::Permanent] immediately, without
    /// consuming any budget.
    pub fn on_failure(&mut self, error: Error) -> RetryResult {
        if self.is_permanent_error(&error) {
            return RetryResult::Permanent(error);
        }
        self.budget.on_failure(error)
    }

    /// Returns true if the policy would not accept another failure.
    ///
    /// Calling this function does not consume any budget.
    pub fn exhausted(&self) -> bool {
        self.budget.next_failure_exhausts()
    }

    /// The remaining time in the retry policy, if it limits the elapsed time.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.budget.remaining_time()
    }

    /// The number of polls so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl Clone for PollingPolicy {
    fn clone(&self) -> Self {
        Self {
            budget: self.budget.clone(),
            backoff: self.backoff.clone(),
            start: now(),
            polls: 0,
        }
    }
}
