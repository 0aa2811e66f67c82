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

//! Lease management for Google Cloud Pub/Sub messages.
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. Testing is also incomplete, we do
//! **not** recommend that you use this crate in production. We welcome feedback
//! about the APIs, documentation, missing features, bugs, etc.
//!
//! Messages delivered by a subscription are leased to the subscriber. If the
//! subscriber does not acknowledge the message before the lease expires, the
//! service redelivers it. A [LeaseManager] keeps a message leased while the
//! application processes it, extending the lease in the background until the
//! application acknowledges or rejects the message.
//!
//! The RPCs are provided by the application through the [Leaser] trait. The
//! extension RPCs run in a retry loop, configured via [LeaseOptions].

pub use gax::Result;
pub use gax::error::Error;

mod lease_manager;
mod leaser;
mod options;

pub use lease_manager::{LeaseManager, LeaseStatus};
pub use leaser::Leaser;
pub use options::LeaseOptions;
