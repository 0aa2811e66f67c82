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

//! The asynchronous scheduler used by the retry loops.
//!
//! The retry loop, the long-running operation poller, and the lease manager
//! never block. They issue attempts and timers through a [Scheduler], which
//! runs the continuations, possibly on any worker thread.
//!
//! [CompletionQueue] is the default implementation, backed by the current
//! tokio runtime.

use crate::Result;
use crate::error::Error;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The asynchronous scheduler used by the retry loops.
///
/// Implementations may run scheduled work on any thread, and may even run it
/// before `schedule()` returns. They must not run two continuations of the same
/// future concurrently, which holds trivially for futures.
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    /// Runs `task` in the background.
    fn schedule(&self, task: BoxFuture<'static, ()>);

    /// Creates a timer that expires after `duration`.
    ///
    /// The timer returns the time when it expired, or an error if the timer
    /// cannot complete, e.g. because the scheduler is shutting down.
    fn make_timer(&self, duration: Duration) -> BoxFuture<'static, Result<Instant>>;
}

/// A [Scheduler] backed by a tokio runtime.
///
/// Cloning a completion queue returns a new handle to the same queue. Calling
/// [shutdown()][CompletionQueue::shutdown] on any clone affects all of them.
///
/// # Example
/// ```
/// # use google_cloud_gax_retry::scheduler::*;
/// # tokio_test::block_on(async {
/// use std::time::Duration;
/// let cq = CompletionQueue::new();
/// let expired = cq.make_timer(Duration::from_millis(1)).await;
/// assert!(expired.is_ok());
/// cq.shutdown();
/// let expired = cq.make_timer(Duration::from_millis(1)).await;
/// assert!(expired.is_err());
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct CompletionQueue {
    handle: tokio::runtime::Handle,
    shutdown: CancellationToken,
}

impl CompletionQueue {
    /// Creates a completion queue running on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(tokio::runtime::Handle::current())
    }

    /// Creates a completion queue running on the given tokio runtime.
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            shutdown: CancellationToken::new(),
        }
    }

    /// Shuts down the completion queue.
    ///
    /// Pending and future timers fail. Scheduled tasks still run, so any
    /// retry loop waiting on a timer terminates with a timer error.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns true if the completion queue is shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::default::Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for CompletionQueue {
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        let _ = self.handle.spawn(task);
    }

    fn make_timer(&self, duration: Duration) -> BoxFuture<'static, Result<Instant>> {
        let shutdown = self.shutdown.clone();
        async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(Error::other("the completion queue is shut down")),
                _ = tokio::time::sleep(duration) => Ok(tokio::time::Instant::now().into_std()),
            }
        }
        .boxed()
    }
}
