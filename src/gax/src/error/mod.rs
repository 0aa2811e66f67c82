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

mod core_error;
mod loop_error;
pub use core_error::*;
pub use loop_error::*;

/// The canonical status returned by Google Cloud services.
///
/// The retry loops distinguish between errors detected while trying to send
/// a RPC (e.g. cannot open a connection), and errors returned by the service
/// itself. The types in this module represent the latter.
///
/// # Examples
///
/// ```
/// # use google_cloud_gax_retry::error;
/// use error::Error;
/// use error::rpc::{Code, Status};
/// fn handle_error(e: Error) {
///     if let Some(status) = e.status() {
///         if status.code == Code::Unavailable {
///             println!("the service is unavailable: {status:?}")
///         }
///     }
/// }
/// ```
pub mod rpc;
