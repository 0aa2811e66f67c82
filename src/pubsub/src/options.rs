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

use gax::exponential_backoff::ExponentialBackoffBuilder;
use gax::options::RetryOptions;
use gax::retry_policy::{Aip194Strict, RetryPolicyExt};
use std::time::Duration;

const DEFAULT_MAX_LEASE: Duration = Duration::from_secs(600);
const DEFAULT_LEASE_EXTENSION: Duration = Duration::from_secs(10);
const DEFAULT_EXTENSION_ERRORS: u32 = 3;

/// Configuration for a [LeaseManager][crate::LeaseManager].
///
/// # Example
/// ```
/// # use google_cloud_pubsub_lease::LeaseOptions;
/// use std::time::Duration;
/// let options = LeaseOptions::new()
///     .set_max_lease(Duration::from_secs(300))
///     .set_lease_extension(Duration::from_secs(30));
/// assert_eq!(options.max_lease(), Duration::from_secs(300));
/// ```
#[derive(Clone, Debug)]
pub struct LeaseOptions {
    max_lease: Duration,
    lease_extension: Duration,
    retry: RetryOptions,
}

impl LeaseOptions {
    /// Returns the default configuration.
    ///
    /// Leases are extended 10 seconds at a time, for up to 10 minutes. Each
    /// extension is retried after at most 3 transient errors, waiting between
    /// 100 milliseconds and 1 second between attempts.
    pub fn new() -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_maximum_delay(Duration::from_secs(1))
            .clamp();
        let retry = RetryOptions::new()
            .set_retry_policy(Aip194Strict.with_error_limit(DEFAULT_EXTENSION_ERRORS))
            .set_backoff_policy(backoff);
        Self {
            max_lease: DEFAULT_MAX_LEASE,
            lease_extension: DEFAULT_LEASE_EXTENSION,
            retry,
        }
    }

    /// The maximum time a message stays under lease, from the time it was
    /// received.
    pub fn max_lease(&self) -> Duration {
        self.max_lease
    }

    /// Sets the maximum lease duration.
    pub fn set_max_lease<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_lease = v.into();
        self
    }

    /// How much time each extension adds to the lease.
    pub fn lease_extension(&self) -> Duration {
        self.lease_extension
    }

    /// Sets the lease extension.
    pub fn set_lease_extension<V: Into<Duration>>(mut self, v: V) -> Self {
        self.lease_extension = v.into();
        self
    }

    /// The retry configuration for each extension RPC.
    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    /// Sets the retry configuration for each extension RPC.
    ///
    /// Extensions are idempotent. An idempotency override in `v` takes
    /// precedence.
    pub fn set_retry_options(mut self, v: RetryOptions) -> Self {
        self.retry = v;
        self
    }

    /// The period between lease extensions.
    ///
    /// Extensions start one second before the current extension expires, or
    /// every 500 milliseconds if the extension is too short.
    pub fn refresh_period(&self) -> Duration {
        const LEEWAY: Duration = Duration::from_secs(1);
        const MIN_PERIOD: Duration = Duration::from_millis(500);
        if self.lease_extension > 2 * LEEWAY {
            self.lease_extension - LEEWAY
        } else {
            MIN_PERIOD
        }
    }
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self::new()
    }
}
