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

/// Classifies a request as safe, or unsafe, to retry.
///
/// The service client supplies this classification per request type. A
/// request is idempotent if sending it more than once has the same effect as
/// sending it once. Failures of non-idempotent requests are never retried,
/// because the service may have applied the request before the failure was
/// reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Idempotency {
    /// The request is safe to retry.
    Idempotent,
    /// The request is not safe to retry.
    NonIdempotent,
}

impl Idempotency {
    /// Returns true for [Idempotency::Idempotent].
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Idempotent)
    }
}

impl std::convert::From<bool> for Idempotency {
    fn from(value: bool) -> Self {
        if value {
            Self::Idempotent
        } else {
            Self::NonIdempotent
        }
    }
}
