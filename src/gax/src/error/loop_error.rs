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

use super::Error;

/// The details of a terminal error in a retry, polling, or lease loop.
///
/// The loops report every terminal condition exactly once. The error
/// [kind][Error] distinguishes the conditions (exhausted, permanent,
/// cancelled, etc.) and this type carries the diagnostics: the location
/// string provided by the caller, a short summary, and the last error
/// observed by the loop, if any.
#[derive(Debug, thiserror::Error)]
#[error("{summary} in {location}{}", LastError(.last.as_ref()))]
pub struct LoopError {
    location: String,
    summary: String,
    #[source]
    last: Option<Error>,
}

impl LoopError {
    /// Creates a new instance.
    pub fn new<L, S>(location: L, summary: S, last: Option<Error>) -> Self
    where
        L: Into<String>,
        S: Into<String>,
    {
        Self {
            location: location.into(),
            summary: summary.into(),
            last,
        }
    }

    /// The diagnostic location, typically the name of the RPC or operation.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// A short description of the terminal condition.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// The last error observed by the loop.
    pub fn last(&self) -> Option<&Error> {
        self.last.as_ref()
    }
}

struct LastError<'a>(Option<&'a Error>);

impl std::fmt::Display for LastError<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(e) => write!(f, ", last error: {e}"),
            None => Ok(()),
        }
    }
}
