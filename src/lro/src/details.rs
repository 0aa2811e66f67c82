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

//! Simplifies the implementation of `PollerImpl`

use crate::any::Message;
use crate::{Operation, PollingResult};
use gax::Result;
use gax::error::rpc::Status;
use gax::error::{Error, LoopError};
use gax::polling_policy::PollingPolicy;
use gax::retry_result::RetryResult;

pub(crate) fn handle_start<R, M>(result: Result<Operation>) -> (Option<String>, PollingResult<R, M>)
where
    R: Message,
    M: Message,
{
    match result {
        Err(e) => (None, PollingResult::Completed(Err(e))),
        Ok(op) => handle_common(op),
    }
}

/// Classifies the result of a "get operation" RPC.
///
/// Errors are consumed by the polling policy. In-progress results stop the
/// loop once the policy is exhausted. `last_status` tracks the last status
/// returned by a failed poll, to decorate the exhausted error.
pub(crate) fn handle_poll<R, M>(
    policy: &mut PollingPolicy,
    last_status: &mut Option<Status>,
    name: String,
    result: Result<Operation>,
) -> (Option<String>, PollingResult<R, M>)
where
    R: Message,
    M: Message,
{
    match result {
        Err(e) => {
            if let Some(status) = e.status() {
                *last_status = Some(status.clone());
            }
            match policy.on_failure(e) {
                RetryResult::Continue(e) if policy.exhausted() => {
                    (None, PollingResult::Completed(Err(exhausted(&name, Some(e)))))
                }
                RetryResult::Continue(e) => (Some(name), PollingResult::PollingError(e)),
                RetryResult::Exhausted(e) => {
                    (None, PollingResult::Completed(Err(exhausted(&name, Some(e)))))
                }
                RetryResult::Permanent(e) => {
                    tracing::warn!(operation = %name, "permanent error polling operation: {e}");
                    (None, PollingResult::Completed(Err(e)))
                }
            }
        }
        Ok(op) => match handle_common(op) {
            (_, PollingResult::InProgress(_)) if policy.exhausted() => {
                let last = last_status.take().map(Error::service);
                (None, PollingResult::Completed(Err(exhausted(&name, last))))
            }
            (next, result) => (next, result),
        },
    }
}

fn exhausted(name: &str, last: Option<Error>) -> Error {
    let error = Error::exhausted(LoopError::new(name, "polling policy exhausted", last));
    tracing::warn!(operation = %name, "{error}");
    error
}

fn handle_common<R, M>(op: Operation) -> (Option<String>, PollingResult<R, M>)
where
    R: Message,
    M: Message,
{
    if op.done {
        return (None, PollingResult::Completed(as_result(op)));
    }
    let name = op.name.clone();
    (Some(name), PollingResult::InProgress(as_metadata(op)))
}

fn as_result<R>(op: Operation) -> Result<R>
where
    R: Message,
{
    // The result must set either the response *or* the error. Setting neither
    // is a deserialization error, as the incoming data does not satisfy the
    // invariants required by the receiving type.
    match (op.response(), op.error()) {
        (Some(any), _) => any.to_msg::<R>().map_err(Error::deser),
        (None, Some(status)) => Err(Error::service(status.clone())),
        (None, None) => Err(Error::deser("neither result nor error set in LRO result")),
    }
}

fn as_metadata<M>(op: Operation) -> Option<M>
where
    M: Message,
{
    op.metadata.and_then(|a| a.to_msg::<M>().ok())
}
