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

//! The asynchronous retry loop.
//!
//! [async_retry_loop] turns a single fallible attempt into a robust,
//! cancellable, idempotency-aware operation. The loop alternates between
//! attempts and backoff timers, consulting the retry and backoff policies
//! after each failure, until the operation succeeds, fails with a permanent
//! error, exhausts the retry policy, or is cancelled.
//!
//! The loop never blocks. Attempts and timers run on a [Scheduler], and their
//! continuations hold only weak references to the loop, so an abandoned loop
//! is released as soon as its future is dropped.

use crate::Result;
use crate::backoff_policy::BackoffSchedule;
use crate::error::{Error, LoopError};
use crate::idempotency::Idempotency;
use crate::options::RetryOptions;
use crate::retry_policy::RetryBudget;
use crate::retry_result::RetryResult;
use crate::scheduler::Scheduler;
use futures::FutureExt;
use futures::future::{AbortHandle, Aborted, BoxFuture, abortable};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;

/// Starts a retry loop.
///
/// The loop starts immediately. The returned future resolves exactly once,
/// with the first successful response or with an error describing why the
/// loop stopped:
///
/// * [is_permanent()][Error::is_permanent]: the retry policy classified the
///   error as permanent.
/// * [is_exhausted()][Error::is_exhausted]: the retry policy ran out of
///   budget, or its remaining time is shorter than the next backoff.
/// * [is_non_idempotent()][Error::is_non_idempotent]: a non-idempotent
///   request failed. The retry policy is not consulted.
/// * [is_timer()][Error::is_timer]: the backoff timer failed.
/// * [is_cancelled()][Error::is_cancelled]: the loop was cancelled.
///
/// In all cases the error includes `location` and the last error returned by
/// an attempt, if any. Use [Error::status] to query the last status.
///
/// Dropping the returned future cancels the loop.
///
/// # Parameters
/// * `options` - the retry and backoff policies. The loop uses a fresh budget
///   and backoff schedule.
/// * `idempotency` - the idempotency of the request. The options may override
///   it.
/// * `scheduler` - runs the attempts and timers.
/// * `attempt` - makes one attempt of the request.
/// * `request` - the request, passed to each attempt.
/// * `location` - a diagnostic string, typically the name of the RPC.
///
/// # Example
/// ```
/// # use google_cloud_gax_retry::*;
/// # use google_cloud_gax_retry::error::{Error, rpc::{Code, Status}};
/// # use google_cloud_gax_retry::idempotency::Idempotency;
/// # use google_cloud_gax_retry::options::RetryOptions;
/// # use google_cloud_gax_retry::retry_loop::async_retry_loop;
/// # use google_cloud_gax_retry::scheduler::{CompletionQueue, Scheduler};
/// # tokio_test::block_on(async {
/// use std::sync::Arc;
/// let scheduler: Arc<dyn Scheduler> = Arc::new(CompletionQueue::new());
/// let response = async_retry_loop(
///     &RetryOptions::new(),
///     Idempotency::Idempotent,
///     scheduler,
///     |_, name: &String| {
///         let response = format!("hello {name}");
///         async move { Ok::<_, Error>(response) }
///     },
///     "world".to_string(),
///     "my-service::greet",
/// )
/// .await?;
/// assert_eq!(response, "hello world");
/// # Ok::<(), Error>(()) });
/// ```
pub fn async_retry_loop<Req, Resp, F, Fut>(
    options: &RetryOptions,
    idempotency: Idempotency,
    scheduler: Arc<dyn Scheduler>,
    attempt: F,
    request: Req,
    location: &str,
) -> RetryLoopFuture<Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    F: Fn(&Arc<dyn Scheduler>, &Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    let idempotency = options.effective_idempotency(idempotency);
    let (tx, rx) = oneshot::channel();
    let state = LoopState {
        cancelled: false,
        done: false,
        operation: 0,
        pending: None,
        tx: Some(tx),
        budget: options.retry_budget(idempotency),
        backoff: options.backoff_schedule(),
        last_error: None,
    };
    let inner = Arc::new(RetryLoop {
        attempt: Box::new(move |s, r| attempt(s, r).boxed()),
        request,
        location: location.to_string(),
        idempotency,
        scheduler,
        tracing: options.tracing_enabled(),
        state: Mutex::new(state),
    });
    inner.start_attempt();
    RetryLoopFuture { inner, rx }
}

/// The result of [async_retry_loop].
///
/// Dropping this future cancels the retry loop.
#[must_use = "dropping the future cancels the retry loop"]
pub struct RetryLoopFuture<Resp> {
    inner: Arc<dyn Cancellable>,
    rx: oneshot::Receiver<Result<Resp>>,
}

impl<Resp> RetryLoopFuture<Resp> {
    /// Cancels the retry loop.
    ///
    /// The future resolves with a cancelled error, unless the loop already
    /// terminated. Any attempt or timer in progress is cancelled, though the
    /// request may still complete in the service.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns a handle to cancel the loop from any thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::downgrade(&self.inner))
    }
}

impl<Resp> Future for RetryLoopFuture<Resp> {
    type Output = Result<Resp>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::other(
                "the retry loop terminated without a result",
            ))),
        }
    }
}

impl<Resp> Drop for RetryLoopFuture<Resp> {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl<Resp> std::fmt::Debug for RetryLoopFuture<Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryLoopFuture").finish_non_exhaustive()
    }
}

/// Cancels a retry loop from any thread.
///
/// The handle does not keep the loop alive. Cancelling a loop that already
/// terminated, or whose future was dropped, has no effect.
#[derive(Clone, Debug)]
pub struct CancelHandle(Weak<dyn Cancellable>);

impl CancelHandle {
    /// Cancels the retry loop, if it is still running.
    pub fn cancel(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancel();
        }
    }
}

trait Cancellable: Send + Sync {
    fn cancel(&self);
}

type AttemptFn<Req, Resp> =
    Box<dyn Fn(&Arc<dyn Scheduler>, &Req) -> BoxFuture<'static, Result<Resp>> + Send + Sync>;

struct RetryLoop<Req, Resp> {
    attempt: AttemptFn<Req, Resp>,
    request: Req,
    location: String,
    idempotency: Idempotency,
    scheduler: Arc<dyn Scheduler>,
    tracing: bool,
    state: Mutex<LoopState<Resp>>,
}

// The mutable state of a loop. Attempts and timers are sub-operations, each
// with its own sequence number. `pending` always holds the most recently
// started sub-operation.
struct LoopState<Resp> {
    cancelled: bool,
    done: bool,
    operation: u64,
    pending: Option<AbortHandle>,
    tx: Option<oneshot::Sender<Result<Resp>>>,
    budget: RetryBudget,
    backoff: BackoffSchedule,
    last_error: Option<Error>,
}

type Guard<'a, Resp> = MutexGuard<'a, LoopState<Resp>>;

impl<Req, Resp> RetryLoop<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn lock(&self) -> Guard<'_, Resp> {
        self.state.lock().expect("retry loop state lock is poisoned")
    }

    fn start_attempt(self: &Arc<Self>) {
        // The attempt is created under the lock, so no attempt starts after
        // the loop is cancelled.
        let (operation, attempt) = {
            let mut state = self.lock();
            if state.done {
                return;
            }
            if state.cancelled {
                let last = state.last_error.take();
                return self.fail(state, Error::cancelled, "retry loop cancelled", last);
            }
            if state.budget.is_exhausted() {
                let last = state.last_error.take();
                return self.fail(state, Error::exhausted, "retry policy exhausted", last);
            }
            state.operation += 1;
            if self.tracing {
                tracing::debug!(
                    location = %self.location,
                    attempt = state.budget.state().attempt_count.saturating_add(1),
                    "starting attempt"
                );
            }
            (
                state.operation,
                (self.attempt)(&self.scheduler, &self.request),
            )
        };
        self.start_operation(operation, attempt, Self::on_attempt);
    }

    fn on_attempt(
        self: &Arc<Self>,
        operation: u64,
        result: std::result::Result<Result<Resp>, Aborted>,
    ) {
        // Only cancel() aborts sub-operations, and it resolves the loop.
        let Ok(result) = result else {
            return;
        };
        let mut state = self.lock();
        if state.done || state.operation != operation {
            return;
        }
        let error = match result {
            Ok(response) => return self.resolve(state, Ok(response)),
            Err(e) => e,
        };
        if !self.idempotency.is_idempotent() {
            return self.fail(
                state,
                Error::non_idempotent,
                "non-idempotent request failed",
                Some(error),
            );
        }
        let error = match state.budget.on_failure(error) {
            RetryResult::Continue(e) => e,
            RetryResult::Permanent(e) => {
                return self.fail(state, Error::permanent, "permanent error", Some(e));
            }
            RetryResult::Exhausted(e) => {
                return self.fail(state, Error::exhausted, "retry policy exhausted", Some(e));
            }
        };
        let delay = state.backoff.on_completion();
        if state.budget.remaining_time().is_some_and(|r| r < delay) {
            return self.fail(state, Error::exhausted, "retry policy exhausted", Some(error));
        }
        if self.tracing {
            tracing::debug!(
                location = %self.location,
                attempt = state.budget.state().attempt_count,
                ?delay,
                "attempt failed with transient error, backing off: {error}"
            );
        }
        state.last_error = Some(error);
        state.operation += 1;
        let operation = state.operation;
        drop(state);
        let timer = self.scheduler.make_timer(delay);
        self.start_operation(operation, timer, Self::on_timer);
    }

    fn on_timer(
        self: &Arc<Self>,
        operation: u64,
        result: std::result::Result<Result<Instant>, Aborted>,
    ) {
        let Ok(result) = result else {
            return;
        };
        let mut state = self.lock();
        if state.done || state.operation != operation {
            return;
        }
        match result {
            Ok(_) => {
                drop(state);
                self.start_attempt();
            }
            Err(e) => {
                let last = state.last_error.take();
                let summary = format!("backoff timer failed: {e}");
                self.fail(state, Error::timer, &summary, last);
            }
        }
    }

    // Runs a sub-operation on the scheduler. The scheduler may run the
    // continuation before this function records the pending operation.
    fn start_operation<T, G>(
        self: &Arc<Self>,
        operation: u64,
        future: G,
        on_done: fn(&Arc<Self>, u64, std::result::Result<T, Aborted>),
    ) where
        G: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (future, handle) = abortable(future);
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(
            async move {
                let result = future.await;
                if let Some(this) = weak.upgrade() {
                    on_done(&this, operation, result);
                }
            }
            .boxed(),
        );
        self.set_pending(operation, handle);
    }

    fn set_pending(&self, operation: u64, handle: AbortHandle) {
        let mut state = self.lock();
        if state.cancelled {
            handle.abort();
            return;
        }
        // A synchronous completion may have started a newer sub-operation.
        if !state.done && state.operation == operation {
            state.pending = Some(handle);
        }
    }

    fn fail(
        &self,
        state: Guard<'_, Resp>,
        kind: fn(LoopError) -> Error,
        summary: &str,
        last: Option<Error>,
    ) {
        let error = kind(LoopError::new(&self.location, summary, last));
        self.resolve(state, Err(error));
    }

    // Resolves the loop, at most once. The result is delivered after the lock
    // is released.
    fn resolve(&self, mut state: Guard<'_, Resp>, result: Result<Resp>) {
        if state.done {
            return;
        }
        state.done = true;
        state.pending = None;
        let tx = state.tx.take();
        drop(state);
        match &result {
            Ok(_) if self.tracing => {
                tracing::debug!(location = %self.location, "retry loop succeeded");
            }
            Ok(_) => {}
            Err(e) if e.is_cancelled() => {
                tracing::debug!(location = %self.location, "{e}");
            }
            Err(e) => {
                tracing::warn!(location = %self.location, "{e}");
            }
        }
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }
}

impl<Req, Resp> Cancellable for RetryLoop<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn cancel(&self) {
        let mut state = self.lock();
        if state.done {
            return;
        }
        state.cancelled = true;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        let last = state.last_error.take();
        self.fail(state, Error::cancelled, "retry loop cancelled", last);
    }
}
