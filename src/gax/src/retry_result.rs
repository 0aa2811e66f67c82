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

//! Retry loop control types.
//!
//! Applications only need to use these types when implementing their own
//! retry policies.

use crate::error::Error;

/// The result of a retry policy decision.
///
/// The error is returned to the loop in all cases, so the loop can include it
/// in any terminal error.
#[derive(Debug)]
pub enum RetryResult {
    /// The error is not retryable, stop the loop.
    ///
    /// Permanent errors stop the loop regardless of any remaining budget.
    Permanent(Error),

    /// The retry policy has run out of budget, stop the loop.
    Exhausted(Error),

    /// The error is transient and the policy has budget for another attempt.
    Continue(Error),
}

impl RetryResult {
    /// Returns true if the result is [RetryResult::Permanent].
    pub fn is_permanent(&self) -> bool {
        match &self {
            Self::Permanent(_) => true,
            Self::Exhausted(_) | Self::Continue(_) => false,
        }
    }

    /// Returns true if the result is [RetryResult::Exhausted].
    pub fn is_exhausted(&self) -> bool {
        match &self {
            Self::Exhausted(_) => true,
            Self::Permanent(_) | Self::Continue(_) => false,
        }
    }

    /// Returns true if the result is [RetryResult::Continue].
    pub fn is_continue(&self) -> bool {
        match &self {
            Self::Continue(_) => true,
            Self::Permanent(_) | Self::Exhausted(_) => false,
        }
    }

    /// Consumes the result and returns the error.
    pub fn into_error(self) -> Error {
        match self {
            Self::Permanent(e) | Self::Exhausted(e) | Self::Continue(e) => e,
        }
    }
}
