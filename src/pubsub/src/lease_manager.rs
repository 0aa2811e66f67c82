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
use crate::leaser::Leaser;
use crate::options::LeaseOptions;
use futures::FutureExt;
use futures::future::{AbortHandle, abortable};
use gax::error::Error;
use gax::idempotency::Idempotency;
use gax::retry_loop::async_retry_loop;
use gax::scheduler::Scheduler;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// Used when the maximum lease does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 86400);

/// The state of a [LeaseManager].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LeaseStatus {
    /// Waiting for the next extension.
    Scheduled,
    /// Extending the lease.
    Extending,
    /// The manager no longer extends the lease.
    Stopped,
}

/// Keeps the lease of a single message until the application is done with it.
///
/// The manager periodically extends the message's processing deadline, until
/// the message is acknowledged or rejected, the lease reaches its maximum
/// duration, or an extension fails.
///
/// Dropping the manager stops the extensions and cancels any pending timer or
/// RPC. It does not release the message, the lease just expires.
///
/// # Example
/// ```
/// # use google_cloud_pubsub_lease::*;
/// # use gax::scheduler::{CompletionQueue, Scheduler};
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # #[derive(Debug)]
/// # struct MyLeaser;
/// # #[async_trait::async_trait]
/// # impl Leaser for MyLeaser {
/// #     async fn extend(&self, _: String, _: Duration) -> Result<()> { Ok(()) }
/// #     async fn ack(&self, _: String) -> Result<()> { Ok(()) }
/// #     async fn nack(&self, _: String) -> Result<()> { Ok(()) }
/// # }
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<()> {
/// let scheduler: Arc<dyn Scheduler> = Arc::new(CompletionQueue::new());
/// let manager = LeaseManager::new(scheduler, Arc::new(MyLeaser), "ack-id-001", LeaseOptions::new());
/// assert_eq!(manager.status(), LeaseStatus::Scheduled);
/// // ... process the message ...
/// manager.ack().await?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct LeaseManager {
    inner: Arc<Inner>,
}

impl LeaseManager {
    /// Starts managing the lease of a message that was just received.
    ///
    /// The message is assumed to be leased for one
    /// [lease_extension()][LeaseOptions::lease_extension]. The first
    /// extension starts after one [refresh_period()][LeaseOptions::refresh_period].
    pub fn new<S>(
        scheduler: Arc<dyn Scheduler>,
        leaser: Arc<dyn Leaser>,
        ack_id: S,
        options: LeaseOptions,
    ) -> Self
    where
        S: Into<String>,
    {
        let received_at = now();
        let state = LeaseState {
            status: LeaseStatus::Scheduled,
            current_deadline: deadline_after(received_at, options.lease_extension()),
            operation: 0,
            pending: None,
        };
        let inner = Arc::new(Inner {
            ack_id: ack_id.into(),
            leaser,
            scheduler,
            max_deadline: deadline_after(received_at, options.max_lease()),
            tracing: options.retry_options().tracing_enabled(),
            options,
            state: Mutex::new(state),
        });
        inner.schedule_refresh(received_at);
        Self { inner }
    }

    /// The id of the managed message.
    pub fn ack_id(&self) -> &str {
        &self.inner.ack_id
    }

    /// The current state of the lease loop.
    pub fn status(&self) -> LeaseStatus {
        self.inner.lock().status
    }

    /// The last recorded lease deadline.
    pub fn current_deadline(&self) -> Instant {
        self.inner.lock().current_deadline
    }

    /// The time when the manager stops extending the lease.
    pub fn max_deadline(&self) -> Instant {
        self.inner.max_deadline
    }

    /// Stops the lease loop and acknowledges the message.
    pub async fn ack(self) -> Result<()> {
        self.inner.shutdown();
        self.inner.leaser.ack(self.inner.ack_id.clone()).await
    }

    /// Stops the lease loop and rejects the message, so the service
    /// redelivers it.
    pub async fn nack(self) -> Result<()> {
        self.inner.shutdown();
        self.inner.leaser.nack(self.inner.ack_id.clone()).await
    }
}

impl Drop for LeaseManager {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

#[derive(Debug)]
struct Inner {
    ack_id: String,
    leaser: Arc<dyn Leaser>,
    scheduler: Arc<dyn Scheduler>,
    max_deadline: Instant,
    tracing: bool,
    options: LeaseOptions,
    state: Mutex<LeaseState>,
}

#[derive(Debug)]
struct LeaseState {
    status: LeaseStatus,
    current_deadline: Instant,
    operation: u64,
    pending: Option<AbortHandle>,
}

#[derive(Clone, Debug)]
struct ExtendRequest {
    ack_id: String,
    extension: Duration,
    // The lease is lost after this time, extending it is pointless.
    deadline: Instant,
}

// The outcome of an extension, with the times it was computed from.
struct Extended {
    result: Result<()>,
    requested_at: Instant,
    target: Instant,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().expect("lease state lock is poisoned")
    }

    // Arms the refresh timer one period after `from`, or right away if that
    // time already passed.
    fn schedule_refresh(self: &Arc<Self>, from: Instant) {
        let period = deadline_after(from, self.options.refresh_period())
            .saturating_duration_since(now());
        let operation = {
            let mut state = self.lock();
            if state.status == LeaseStatus::Stopped {
                return;
            }
            state.status = LeaseStatus::Scheduled;
            state.operation += 1;
            state.operation
        };
        if self.tracing {
            tracing::debug!(ack_id = %self.ack_id, ?period, "scheduling lease extension");
        }
        let timer = self.scheduler.make_timer(period);
        self.start_operation(operation, timer, Self::on_timer);
    }

    fn on_timer(self: &Arc<Self>, operation: u64, result: Result<Instant>) {
        let state = self.lock();
        if state.status == LeaseStatus::Stopped || state.operation != operation {
            return;
        }
        match result {
            Ok(_) => {
                drop(state);
                self.extend();
            }
            Err(e) => {
                tracing::warn!(ack_id = %self.ack_id, "lease refresh timer failed: {e}");
                stop(state);
            }
        }
    }

    fn extend(self: &Arc<Self>) {
        let requested_at = now();
        let mut state = self.lock();
        if state.status == LeaseStatus::Stopped {
            return;
        }
        if requested_at >= self.max_deadline {
            tracing::debug!(ack_id = %self.ack_id, "the lease reached its maximum deadline");
            return stop(state);
        }
        let extension = std::cmp::min(
            self.max_deadline - requested_at,
            self.options.lease_extension(),
        );
        let target = requested_at + extension;
        if extension.is_zero() || target <= state.current_deadline {
            tracing::debug!(ack_id = %self.ack_id, "the lease cannot be extended any further");
            return stop(state);
        }
        state.status = LeaseStatus::Extending;
        state.operation += 1;
        let operation = state.operation;
        let request = ExtendRequest {
            ack_id: self.ack_id.clone(),
            extension,
            deadline: std::cmp::min(state.current_deadline, self.max_deadline),
        };
        drop(state);

        if self.tracing {
            tracing::debug!(ack_id = %self.ack_id, ?extension, "extending lease");
        }
        let leaser = self.leaser.clone();
        let pending = async_retry_loop(
            self.options.retry_options(),
            Idempotency::Idempotent,
            self.scheduler.clone(),
            move |_, request: &ExtendRequest| {
                let leaser = leaser.clone();
                let request = request.clone();
                async move {
                    if now() >= request.deadline {
                        return Err(Error::timeout(format!(
                            "the lease for {} expired before it could be extended",
                            request.ack_id
                        )));
                    }
                    leaser.extend(request.ack_id, request.extension).await
                }
            },
            request,
            &self.ack_id,
        );
        let pending = pending.map(move |r| Extended {
            result: r,
            requested_at,
            target,
        });
        self.start_operation(operation, pending, Self::on_extended);
    }

    fn on_extended(self: &Arc<Self>, operation: u64, extended: Extended) {
        let Extended {
            result,
            requested_at,
            target,
        } = extended;
        let mut state = self.lock();
        if state.status == LeaseStatus::Stopped || state.operation != operation {
            return;
        }
        if let Err(e) = result {
            tracing::warn!(ack_id = %self.ack_id, "cannot extend lease: {e}");
            return stop(state);
        }
        state.current_deadline = target;
        drop(state);
        if self.tracing {
            tracing::debug!(ack_id = %self.ack_id, "lease extended");
        }
        self.schedule_refresh(requested_at);
    }

    // Runs `future` on the scheduler and calls `on_done` with its output,
    // unless the lease loop moved on or stopped.
    fn start_operation<T, G>(
        self: &Arc<Self>,
        operation: u64,
        future: G,
        on_done: fn(&Arc<Self>, u64, T),
    ) where
        G: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (future, handle) = abortable(future);
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(
            async move {
                if let Ok(value) = future.await {
                    if let Some(this) = weak.upgrade() {
                        on_done(&this, operation, value);
                    }
                }
            }
            .boxed(),
        );
        let mut state = self.lock();
        if state.status == LeaseStatus::Stopped {
            handle.abort();
        } else if state.operation == operation {
            state.pending = Some(handle);
        }
    }

    fn shutdown(&self) {
        stop(self.lock());
    }
}

fn stop(mut state: MutexGuard<'_, LeaseState>) {
    state.status = LeaseStatus::Stopped;
    if let Some(pending) = state.pending.take() {
        pending.abort();
    }
}

fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaser::tests::MockLeaser;
    use gax::backoff_policy::BackoffPolicy;
    use gax::error::rpc::{Code, Status};
    use gax::options::RetryOptions;
    use gax::retry_policy::{Aip194Strict, RetryPolicyExt};
    use gax::scheduler::CompletionQueue;

    const ACK_ID: &str = "test-ack-id";

    #[derive(Debug)]
    struct FixedBackoff(Duration);

    impl BackoffPolicy for FixedBackoff {
        fn on_failure(&self, _loop_start: Instant, _attempt_count: u32) -> Duration {
            self.0
        }
    }

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(CompletionQueue::new())
    }

    fn options(max_lease: Duration) -> LeaseOptions {
        LeaseOptions::new()
            .set_max_lease(max_lease)
            .set_lease_extension(Duration::from_secs(10))
    }

    fn unavailable() -> Error {
        Error::service(Status::default().set_code(Code::Unavailable))
    }

    // Records each extension as (offset from the start, extension).
    type Calls = Arc<Mutex<Vec<(Duration, Duration)>>>;

    fn recording_leaser(start: Instant, times: usize) -> (MockLeaser, Calls) {
        let calls = Calls::default();
        let recorded = calls.clone();
        let mut mock = MockLeaser::new();
        mock.expect_extend()
            .times(times)
            .withf(|ack_id, _| ack_id == ACK_ID)
            .returning(move |_, extension| {
                recorded
                    .lock()
                    .expect("test lock is poisoned")
                    .push((now() - start, extension));
                Ok(())
            });
        (mock, calls)
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[tokio::test(start_paused = true)]
    async fn extends_until_max_deadline() {
        let start = now();
        let (mock, calls) = recording_leaser(start, 2);
        let manager = LeaseManager::new(scheduler(), Arc::new(mock), ACK_ID, options(secs(20.0)));
        assert_eq!(manager.status(), LeaseStatus::Scheduled);
        assert_eq!(manager.current_deadline(), start + secs(10.0));
        assert_eq!(manager.max_deadline(), start + secs(20.0));
        assert_eq!(manager.ack_id(), ACK_ID);

        tokio::time::sleep(secs(10.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Scheduled);
        assert_eq!(manager.current_deadline(), start + secs(19.0));

        tokio::time::sleep(secs(9.0)).await;
        assert_eq!(manager.current_deadline(), start + secs(20.0));

        tokio::time::sleep(secs(60.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Stopped);
        assert_eq!(manager.current_deadline(), start + secs(20.0));

        let calls = calls.lock().expect("test lock is poisoned").clone();
        assert_eq!(calls, vec![(secs(9.0), secs(10.0)), (secs(18.0), secs(2.0))]);
    }

    // Each extension takes 2 seconds to complete.
    #[derive(Debug, Default)]
    struct SlowLeaser {
        calls: Mutex<Vec<Duration>>,
        start: Option<Instant>,
    }

    #[async_trait::async_trait]
    impl Leaser for SlowLeaser {
        async fn extend(&self, _ack_id: String, _extension: Duration) -> Result<()> {
            let start = self.start.unwrap_or_else(now);
            self.calls
                .lock()
                .expect("test lock is poisoned")
                .push(now() - start);
            tokio::time::sleep(secs(2.0)).await;
            Ok(())
        }

        async fn ack(&self, _ack_id: String) -> Result<()> {
            Ok(())
        }

        async fn nack(&self, _ack_id: String) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_extensions_keep_the_lease() {
        let start = now();
        let leaser = Arc::new(SlowLeaser {
            start: Some(start),
            ..Default::default()
        });
        let manager = LeaseManager::new(scheduler(), leaser.clone(), ACK_ID, LeaseOptions::new());

        tokio::time::sleep(secs(60.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Scheduled);
        assert_eq!(manager.current_deadline(), start + secs(64.0));
        let calls = leaser.calls.lock().expect("test lock is poisoned").clone();
        let want = [9.0, 18.0, 27.0, 36.0, 45.0, 54.0].map(secs).to_vec();
        assert_eq!(calls, want);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_deadline_cannot_increase() {
        let start = now();
        let (mock, calls) = recording_leaser(start, 1);
        let manager = LeaseManager::new(scheduler(), Arc::new(mock), ACK_ID, options(secs(18.5)));

        tokio::time::sleep(secs(60.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Stopped);
        assert_eq!(manager.current_deadline(), start + secs(18.5));
        let calls = calls.lock().expect("test lock is poisoned").clone();
        assert_eq!(calls, vec![(secs(9.0), secs(9.5))]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let start = now();
        let mut mock = MockLeaser::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_extend()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(unavailable()));
        mock.expect_extend()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let manager = LeaseManager::new(scheduler(), Arc::new(mock), ACK_ID, options(secs(15.0)));

        tokio::time::sleep(secs(12.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Scheduled);
        assert_eq!(manager.current_deadline(), start + secs(15.0));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops() {
        let start = now();
        let mut mock = MockLeaser::new();
        mock.expect_extend().times(1).returning(|_, _| {
            Err(Error::service(
                Status::default().set_code(Code::FailedPrecondition),
            ))
        });
        let manager = LeaseManager::new(scheduler(), Arc::new(mock), ACK_ID, options(secs(600.0)));

        tokio::time::sleep(secs(60.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Stopped);
        assert_eq!(manager.current_deadline(), start + secs(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_not_extended() {
        let start = now();
        let mut mock = MockLeaser::new();
        mock.expect_extend()
            .times(1)
            .returning(|_, _| Err(unavailable()));
        // The first attempt fails, the retry would start after the lease
        // expired.
        let retry = RetryOptions::new()
            .set_retry_policy(Aip194Strict.with_error_limit(3))
            .set_backoff_policy(FixedBackoff(secs(5.0)));
        let options = options(secs(600.0)).set_retry_options(retry);
        let manager = LeaseManager::new(scheduler(), Arc::new(mock), ACK_ID, options);

        tokio::time::sleep(secs(60.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Stopped);
        assert_eq!(manager.current_deadline(), start + secs(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_failure_stops() {
        let mut mock = MockLeaser::new();
        mock.expect_extend().never();
        let cq = CompletionQueue::new();
        cq.shutdown();
        let manager = LeaseManager::new(Arc::new(cq), Arc::new(mock), ACK_ID, options(secs(600.0)));

        tokio::time::sleep(secs(1.0)).await;
        assert_eq!(manager.status(), LeaseStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_extensions() {
        let mut mock = MockLeaser::new();
        mock.expect_extend().never();
        let mock = Arc::new(mock);
        let manager = LeaseManager::new(scheduler(), mock.clone(), ACK_ID, options(secs(600.0)));
        tokio::time::sleep(secs(5.0)).await;
        drop(manager);
        tokio::time::sleep(secs(60.0)).await;
        // The scheduled tasks released their references.
        assert_eq!(Arc::strong_count(&mock), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack() -> anyhow::Result<()> {
        let start = now();
        let (mut mock, calls) = recording_leaser(start, 1);
        mock.expect_ack()
            .times(1)
            .withf(|ack_id| ack_id == ACK_ID)
            .returning(|_| Ok(()));
        mock.expect_nack().never();
        let mock = Arc::new(mock);
        let manager = LeaseManager::new(scheduler(), mock.clone(), ACK_ID, options(secs(600.0)));
        tokio::time::sleep(secs(10.0)).await;
        manager.ack().await?;

        tokio::time::sleep(secs(60.0)).await;
        let calls = calls.lock().expect("test lock is poisoned").clone();
        assert_eq!(calls, vec![(secs(9.0), secs(10.0))]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn nack() {
        let mut mock = MockLeaser::new();
        mock.expect_extend().never();
        mock.expect_ack().never();
        mock.expect_nack()
            .times(1)
            .withf(|ack_id| ack_id == ACK_ID)
            .returning(|_| Err(unavailable()));
        let manager = LeaseManager::new(scheduler(), Arc::new(mock), ACK_ID, options(secs(600.0)));
        let err = manager.nack().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
        tokio::time::sleep(secs(60.0)).await;
    }
}
