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

use crate::any::Any;
use gax::error::rpc::Status;

/// A handle to a long-running operation.
///
/// Created by the RPC that starts the operation, and refreshed by each
/// "get operation" RPC. Once `done` is set the operation is never polled
/// again.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Operation {
    /// The server-assigned name, used to query the operation.
    pub name: String,

    /// If true, the operation completed and `result` holds its outcome.
    pub done: bool,

    /// Service-specific progress information, if any.
    pub metadata: Option<Any>,

    /// The outcome of a completed operation.
    pub result: Option<OperationResult>,
}

/// The outcome of a completed [Operation].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum OperationResult {
    /// The operation succeeded with this response.
    Response(Any),
    /// The operation failed with this status.
    Error(Status),
}

impl Operation {
    /// Sets the value of [name][Operation::name].
    pub fn set_name<T: Into<String>>(mut self, v: T) -> Self {
        self.name = v.into();
        self
    }

    /// Sets the value of [done][Operation::done].
    pub fn set_done<T: Into<bool>>(mut self, v: T) -> Self {
        self.done = v.into();
        self
    }

    /// Sets the value of [metadata][Operation::metadata].
    pub fn set_metadata<T: Into<Any>>(mut self, v: T) -> Self {
        self.metadata = Some(v.into());
        self
    }

    /// Sets the value of [result][Operation::result] to a response.
    pub fn set_response<T: Into<Any>>(mut self, v: T) -> Self {
        self.result = Some(OperationResult::Response(v.into()));
        self
    }

    /// Sets the value of [result][Operation::result] to an error.
    pub fn set_error<T: Into<Status>>(mut self, v: T) -> Self {
        self.result = Some(OperationResult::Error(v.into()));
        self
    }

    /// The response of a successful operation, if any.
    pub fn response(&self) -> Option<&Any> {
        match &self.result {
            Some(OperationResult::Response(any)) => Some(any),
            _ => None,
        }
    }

    /// The error of a failed operation, if any.
    pub fn error(&self) -> Option<&Status> {
        match &self.result {
            Some(OperationResult::Error(status)) => Some(status),
            _ => None,
        }
    }
}
