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

//! Defines traits for retry policies and some common implementations.
//!
//! The retry loop automatically retries operations when they fail due to
//! transient errors and the operation is idempotent, that is, it is safe to
//! perform the operation more than once.
//!
//! A [RetryPolicy] is pure configuration: it carries static limits (maximum
//! elapsed time, maximum number of errors) and classifies errors. The state
//! consumed by a single operation lives in a [RetryBudget]. Cloning a budget
//! creates a fresh one from the same policy, so each operation starts with the
//! full budget, regardless of how much budget any other operation consumed.
//!
//! # Example
//! ```
//! # use google_cloud_gax_retry::retry_policy::*;
//! # use google_cloud_gax_retry::error::{Error, rpc::{Code, Status}};
//! use std::time::Duration;
//! let policy = Aip194Strict.with_error_limit(3).with_time_limit(Duration::from_secs(60));
//! let mut budget = RetryBudget::new(policy, true);
//! let transient = || Error::service(Status::default().set_code(Code::Unavailable));
//! assert!(budget.on_failure(transient()).is_continue());
//! assert!(budget.on_failure(transient()).is_continue());
//! assert!(budget.on_failure(transient()).is_continue());
//! assert!(budget.on_failure(transient()).is_exhausted());
//! assert!(budget.is_exhausted());
//!
//! // A clone starts with a full budget.
//! let fresh = budget.clone();
//! assert!(!fresh.is_exhausted());
//! ```

use crate::error::Error;
use crate::error::rpc::Code;
use crate::retry_result::RetryResult;
use crate::retry_state::{RetryState, now};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Determines how errors are handled in the retry loop.
///
/// Implementations of this trait determine if an error is retryable, and
/// whether the retry loop has any budget left. The retry loop calls
/// [on_error][RetryPolicy::on_error] after each failure. The
/// [RetryState] argument carries everything the loop has consumed so far, so
/// implementations do not need interior mutability.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `state` - the state of the retry loop, including the number of
    ///   failures so far and the error being classified.
    /// * `error` - the last error.
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult;

    /// Classifies an error as permanent, without consuming any budget.
    ///
    /// Permanent errors stop the loop regardless of the remaining budget.
    fn is_permanent_failure(&self, _error: &Error) -> bool {
        false
    }

    /// The remaining time in the retry policy.
    ///
    /// For policies based on elapsed time this is the remaining time. Other
    /// policies return `None`. The retry loop never sleeps past this time.
    fn remaining_time(&self, _state: &RetryState) -> Option<Duration> {
        None
    }

    /// Returns true if the next call to `on_error()` would necessarily stop
    /// the loop.
    ///
    /// This is best-effort. Policies that do not track their budget return
    /// `false`, and [RetryBudget] treats them as exhausted once they refuse a
    /// failure.
    fn is_exhausted(&self, _state: &RetryState) -> bool {
        false
    }
}

/// A helper type to use [RetryPolicy] in client and request options.
#[derive(Clone, Debug)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl<T: RetryPolicy + 'static> std::convert::From<T> for RetryPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

/// Extension trait for [`RetryPolicy`]
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [`RetryPolicy`] to limit the total elapsed time in the retry
    /// loop.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_gax_retry::retry_policy::*;
    /// use std::time::Duration;
    /// let policy = Aip194Strict.with_time_limit(Duration::from_secs(10));
    /// ```
    fn with_time_limit(self, maximum_duration: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [`RetryPolicy`] to limit the number of errors.
    ///
    /// The decorated policy accepts `maximum_errors` transient errors, and
    /// stops the loop on the next one.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_gax_retry::retry_policy::*;
    /// let policy = Aip194Strict.with_error_limit(3);
    /// ```
    fn with_error_limit(self, maximum_errors: u32) -> LimitedErrorCount<Self> {
        LimitedErrorCount::custom(self, maximum_errors)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// A retry policy that strictly follows [AIP-194].
///
/// This policy must be decorated to limit the number of retry attempts or the
/// duration of the retry loop.
///
/// The policy interprets AIP-194 **strictly**: only `UNAVAILABLE` errors and
/// errors sending the request are retried. As an exception, `INTERNAL` errors
/// caused by an HTTP/2 stream reset are treated as `UNAVAILABLE`. Requests
/// that are not idempotent are never retried.
///
/// # Example
/// ```
/// # use google_cloud_gax_retry::retry_policy::*;
/// use std::time::Duration;
/// let policy = Aip194Strict.with_time_limit(Duration::from_secs(10)).with_error_limit(3);
/// ```
///
/// [AIP-194]: https://google.aip.dev/194
#[derive(Clone, Debug)]
pub struct Aip194Strict;

impl RetryPolicy for Aip194Strict {
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        if !state.idempotent || self.is_permanent_failure(&error) {
            return RetryResult::Permanent(error);
        }
        RetryResult::Continue(error)
    }

    fn is_permanent_failure(&self, error: &Error) -> bool {
        !is_transient(error)
    }
}

// Markers in `INTERNAL` errors reporting an HTTP/2 stream reset.
const STREAM_RESET_MARKERS: [&str; 2] = [
    "RST_STREAM",
    "Received unexpected EOS on DATA frame from server",
];

fn is_transient(error: &Error) -> bool {
    if error.is_io() {
        return true;
    }
    match error.service_status() {
        Some(s) if s.code == Code::Unavailable => true,
        Some(s) if s.code == Code::Internal => {
            STREAM_RESET_MARKERS.iter().any(|m| s.message.contains(m))
        }
        _ => false,
    }
}

/// A retry policy that retries all errors.
///
/// This policy must be decorated to limit the number of retry attempts or the
/// duration of the retry loop. It does not check idempotency; the retry loop
/// stops on any failure of a non-idempotent request before consulting the
/// policy.
#[derive(Clone, Debug)]
pub struct AlwaysRetry;

impl RetryPolicy for AlwaysRetry {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        RetryResult::Continue(error)
    }
}

/// A retry policy that never retries.
///
/// The loop makes a single attempt and reports any error as exhausted.
#[derive(Clone, Debug)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        RetryResult::Exhausted(error)
    }

    fn is_exhausted(&self, state: &RetryState) -> bool {
        state.attempt_count > 0
    }
}

/// A retry policy decorator that limits the total time in the retry loop.
///
/// The elapsed time is measured from the [start][RetryState::start] of the
/// retry loop. Each [RetryBudget] has its own start time.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [Aip194Strict].
#[derive(Debug)]
pub struct LimitedElapsedTime<P = Aip194Strict>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_duration: Duration,
}

impl LimitedElapsedTime {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_gax_retry::retry_policy::*;
    /// use std::time::Duration;
    /// let policy = LimitedElapsedTime::new(Duration::from_secs(10));
    /// ```
    pub fn new(maximum_duration: Duration) -> Self {
        Self {
            inner: Aip194Strict,
            maximum_duration,
        }
    }
}

impl<P> LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_duration: Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }

    fn deadline(&self, state: &RetryState) -> Option<Instant> {
        state.start.checked_add(self.maximum_duration)
    }

    fn on_error_now(&self, now: Instant, state: &RetryState, error: Error) -> RetryResult {
        match self.inner.on_error(state, error) {
            RetryResult::Continue(e) if self.expired(now, state) => RetryResult::Exhausted(e),
            result => result,
        }
    }

    fn expired(&self, now: Instant, state: &RetryState) -> bool {
        self.deadline(state).is_some_and(|d| now >= d)
    }

    fn remaining_time_now(&self, now: Instant, state: &RetryState) -> Option<Duration> {
        let remaining = self
            .deadline(state)
            .map(|d| d.saturating_duration_since(now));
        match (remaining, self.inner.remaining_time(state)) {
            (Some(r), Some(i)) => Some(std::cmp::min(r, i)),
            (r, i) => r.or(i),
        }
    }
}

impl<P> RetryPolicy for LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        self.on_error_now(now(), state, error)
    }

    fn is_permanent_failure(&self, error: &Error) -> bool {
        self.inner.is_permanent_failure(error)
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        self.remaining_time_now(now(), state)
    }

    fn is_exhausted(&self, state: &RetryState) -> bool {
        self.expired(now(), state) || self.inner.is_exhausted(state)
    }
}

/// A retry policy decorator that limits the number of errors.
///
/// The policy accepts up to `maximum_errors` transient errors. The next error
/// exhausts the policy.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [Aip194Strict].
#[derive(Debug)]
pub struct LimitedErrorCount<P = Aip194Strict>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_errors: u32,
}

impl LimitedErrorCount {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_gax_retry::retry_policy::*;
    /// let policy = LimitedErrorCount::new(5);
    /// ```
    pub fn new(maximum_errors: u32) -> Self {
        Self {
            inner: Aip194Strict,
            maximum_errors,
        }
    }
}

impl<P> LimitedErrorCount<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_errors: u32) -> Self {
        Self {
            inner,
            maximum_errors,
        }
    }
}

impl<P> RetryPolicy for LimitedErrorCount<P>
where
    P: RetryPolicy,
{
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        match self.inner.on_error(state, error) {
            RetryResult::Continue(e) if state.attempt_count > self.maximum_errors => {
                RetryResult::Exhausted(e)
            }
            result => result,
        }
    }

    fn is_permanent_failure(&self, error: &Error) -> bool {
        self.inner.is_permanent_failure(error)
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        self.inner.remaining_time(state)
    }

    fn is_exhausted(&self, state: &RetryState) -> bool {
        state.attempt_count > self.maximum_errors || self.inner.is_exhausted(state)
    }
}

/// The retry budget consumed by a single operation.
///
/// The budget pairs a [RetryPolicy] with the [RetryState] of one operation.
/// Cloning a budget returns a fresh budget, with the same policy and
/// idempotency, but none of the consumed state.
#[derive(Debug)]
pub struct RetryBudget {
    policy: Arc<dyn RetryPolicy>,
    state: RetryState,
    refused: bool,
}

impl RetryBudget {
    /// Creates a new budget, starting now.
    pub fn new<P: Into<RetryPolicyArg>>(policy: P, idempotent: bool) -> Self {
        Self {
            policy: policy.into().0,
            state: RetryState::new(idempotent),
            refused: false,
        }
    }

    /// Consumes one failure from the budget.
    ///
    /// Returns [RetryResult::Continue] if the caller may retry.
    pub fn on_failure(&mut self, error: Error) -> RetryResult {
        self.state.attempt_count = self.state.attempt_count.saturating_add(1);
        let result = self.policy.on_error(&self.state, error);
        if !result.is_continue() {
            self.refused = true;
        }
        result
    }

    /// Returns true if a subsequent [on_failure][RetryBudget::on_failure]
    /// would necessarily stop the loop.
    ///
    /// Policies without native exhaustion tracking are treated as exhausted
    /// once they have refused a failure.
    pub fn is_exhausted(&self) -> bool {
        self.refused || self.policy.is_exhausted(&self.state)
    }

    /// Returns true if the next [on_failure][RetryBudget::on_failure] would
    /// refuse any transient error.
    ///
    /// Unlike [is_exhausted][RetryBudget::is_exhausted], this looks one
    /// failure ahead. It runs the policy against a copy of the consumed state,
    /// so it does not consume any budget.
    pub fn next_failure_exhausts(&self) -> bool {
        let next = self
            .state
            .clone()
            .set_attempt_count(self.state.attempt_count.saturating_add(1));
        self.refused || self.policy.is_exhausted(&next)
    }

    /// Classifies an error as permanent, without consuming any budget.
    pub fn is_permanent_failure(&self, error: &Error) -> bool {
        self.policy.is_permanent_failure(error)
    }

    /// The remaining time, if the policy limits the elapsed time.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.policy.remaining_time(&self.state)
    }

    /// The state consumed so far.
    pub fn state(&self) -> &RetryState {
        &self.state
    }
}

impl Clone for RetryBudget {
    fn clone(&self) -> Self {
        Self::new(RetryPolicyArg(self.policy.clone()), self.state.idempotent)
    }
}
