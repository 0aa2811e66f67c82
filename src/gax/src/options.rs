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

//! Configuration for the retry, polling, and lease loops.
//!
//! A [RetryOptions] value is a template. Service clients keep one, possibly
//! customized by the application, and mint fresh per-operation state from it
//! for each request: a [RetryBudget], a [BackoffSchedule], and a
//! [PollingPolicy]. No operation ever observes the budget consumed by
//! another.
//!
//! # Example
//! ```
//! # use google_cloud_gax_retry::options::RetryOptions;
//! # use google_cloud_gax_retry::retry_policy::*;
//! # use google_cloud_gax_retry::exponential_backoff::ExponentialBackoffBuilder;
//! use std::time::Duration;
//! let options = RetryOptions::new()
//!     .set_retry_policy(Aip194Strict.with_error_limit(5))
//!     .set_backoff_policy(
//!         ExponentialBackoffBuilder::new()
//!             .with_initial_delay(Duration::from_millis(100))
//!             .with_maximum_delay(Duration::from_secs(10))
//!             .clamp(),
//!     );
//! # let _ = options;
//! ```

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg, BackoffSchedule};
use crate::exponential_backoff::ExponentialBackoff;
use crate::idempotency::Idempotency;
use crate::polling_backoff_policy::{PollingBackoffPolicy, PollingBackoffPolicyArg};
use crate::polling_policy::PollingPolicy;
use crate::retry_policy::{LimitedElapsedTime, RetryBudget, RetryPolicy, RetryPolicyArg};
use std::sync::Arc;
use std::time::Duration;

const LOGGING_VAR: &str = "GOOGLE_CLOUD_RUST_LOGGING";

// The default retry and polling policies stop after this much time.
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(600);

/// Configures the retry, polling, and lease loops.
#[derive(Clone, Debug)]
pub struct RetryOptions {
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    polling_error_policy: Arc<dyn RetryPolicy>,
    polling_backoff_policy: Arc<dyn PollingBackoffPolicy>,
    idempotency: Option<bool>,
    tracing: bool,
}

impl RetryOptions {
    /// Returns the default configuration.
    ///
    /// The default retry and polling error policies follow AIP-194 and stop
    /// after 10 minutes. Both backoff policies start at 1 second, double on
    /// each attempt, and are capped at 60 seconds.
    pub fn new() -> Self {
        Self {
            retry_policy: Arc::new(LimitedElapsedTime::new(DEFAULT_TIME_LIMIT)),
            backoff_policy: Arc::new(ExponentialBackoff::default()),
            polling_error_policy: Arc::new(LimitedElapsedTime::new(DEFAULT_TIME_LIMIT)),
            polling_backoff_policy: Arc::new(ExponentialBackoff::default()),
            idempotency: None,
            tracing: false,
        }
    }

    /// Returns true if tracing is enabled, either in these options or via the
    /// `GOOGLE_CLOUD_RUST_LOGGING` environment variable.
    pub fn tracing_enabled(&self) -> bool {
        if self.tracing {
            return true;
        }
        std::env::var(LOGGING_VAR)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Enable tracing of each attempt, backoff, and poll.
    pub fn enable_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    /// Disable tracing, unless the environment variable enables it.
    pub fn disable_tracing(mut self) -> Self {
        self.tracing = false;
        self
    }

    /// Configure the retry policy.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.retry_policy = v.into().0;
        self
    }

    /// Configure the retry backoff policy.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff_policy = v.into().0;
        self
    }

    /// Configure the policy for errors while polling long-running operations.
    pub fn set_polling_error_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.polling_error_policy = v.into().0;
        self
    }

    /// Configure the backoff between polls of long-running operations.
    pub fn set_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(mut self, v: V) -> Self {
        self.polling_backoff_policy = v.into().0;
        self
    }

    /// Overrides the idempotency of all requests using these options.
    ///
    /// Applications may know that a request is safe to retry, even if the
    /// request type is not idempotent in general.
    pub fn set_idempotency(mut self, v: bool) -> Self {
        self.idempotency = Some(v);
        self
    }

    /// The idempotency override, if any.
    pub fn idempotency(&self) -> Option<bool> {
        self.idempotency
    }

    /// The effective idempotency for a request of the given type.
    pub fn effective_idempotency(&self, default: Idempotency) -> Idempotency {
        self.idempotency.map(Idempotency::from).unwrap_or(default)
    }

    /// Creates a fresh retry budget for one operation.
    pub fn retry_budget(&self, idempotency: Idempotency) -> RetryBudget {
        RetryBudget::new(
            RetryPolicyArg(self.retry_policy.clone()),
            idempotency.is_idempotent(),
        )
    }

    /// Creates a fresh backoff schedule for one operation.
    pub fn backoff_schedule(&self) -> BackoffSchedule {
        BackoffSchedule::new(BackoffPolicyArg(self.backoff_policy.clone()))
    }

    /// Creates a fresh polling policy for one long-running operation.
    pub fn polling_policy(&self) -> PollingPolicy {
        PollingPolicy::new(
            RetryPolicyArg(self.polling_error_policy.clone()),
            PollingBackoffPolicyArg(self.polling_backoff_policy.clone()),
        )
    }
}

impl std::default::Default for RetryOptions {
    fn default() -> Self {
        Self::new()
    }
}
