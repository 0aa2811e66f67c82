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

use crate::Result;
use std::time::Duration;

/// A trait representing leaser actions.
///
/// The lease manager uses this trait to extend, acknowledge, and reject a
/// message. Applications implement it on top of the Pub/Sub service stub, we
/// stub it out in tests.
#[async_trait::async_trait]
pub trait Leaser: Send + Sync + std::fmt::Debug {
    /// Extend the lease deadline of a message to `extension` from now.
    async fn extend(&self, ack_id: String, extension: Duration) -> Result<()>;
    /// Acknowledge a message.
    async fn ack(&self, ack_id: String) -> Result<()>;
    /// Negatively acknowledge a message, so the service redelivers it.
    async fn nack(&self, ack_id: String) -> Result<()>;
}
