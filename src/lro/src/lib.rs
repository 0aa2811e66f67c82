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

//! Types and functions to make LROs easier to use and to require less boilerplate.
//!
//! Some RPCs start a long-running operation (LRO) on the service. These RPCs
//! return an [Operation] handle. The [Poller] returned by [new_poller] queries
//! the operation until it completes, waiting between queries as directed by
//! the polling policy, and decodes the final response.

pub use gax::Result;
pub use gax::error::Error;
use gax::error::LoopError;
use gax::error::rpc::Status;
use gax::options::RetryOptions;
use gax::polling_policy::PollingPolicy;
use gax::scheduler::Scheduler;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub mod any;
mod details;
mod operation;
pub use operation::{Operation, OperationResult};

/// The result of polling a Long-Running Operation (LRO).
///
/// # Parameters
/// * `R` - the response type. This is the type returned when the LRO completes
///   successfully.
/// * `M` - the metadata type. While operations are in progress the LRO may
///   return values of this type.
#[derive(Debug)]
pub enum PollingResult<R, M> {
    /// The operation is still in progress.
    InProgress(Option<M>),
    /// The operation completed. This includes the result.
    Completed(Result<R>),
    /// An error trying to poll the LRO.
    ///
    /// Not all errors indicate that the operation failed. For example, this
    /// may fail because it was not possible to connect to Google Cloud. Such
    /// transient errors may disappear in the next polling attempt.
    ///
    /// The polling policy decides which errors are transient. Permanent errors,
    /// and errors that exhaust the policy, are reported as
    /// [Completed][PollingResult::Completed].
    PollingError(Error),
}

pub(crate) mod sealed {
    pub trait Poller {}
}

/// The trait implemented by LRO helpers.
///
/// # Parameters
/// * `R` - the response type, that is, the type of response included when the
///   long-running operation completes successfully.
/// * `M` - the metadata type, that is, the type returned by the service when
///   the long-running operation is still in progress.
pub trait Poller<R, M>: Send + sealed::Poller {
    /// Query the current status of the long-running operation.
    ///
    /// Except for the first call, this waits for the polling policy's wait
    /// period before querying the operation. Returns `None` once the operation
    /// completed.
    fn poll(&mut self) -> impl Future<Output = Option<PollingResult<R, M>>> + Send;

    /// Poll the long-running operation until it completes.
    fn until_done(self) -> impl Future<Output = Result<R>> + Send;

    /// Convert a poller to a [futures::Stream].
    #[cfg(feature = "unstable-stream")]
    fn to_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>> + Send + Unpin;
}

/// Creates a new `impl Poller<R, M>` from two closures.
///
/// # Parameters
/// * `options` - the polling error and backoff policies. The poller uses a
///   fresh [PollingPolicy] minted from these options.
/// * `scheduler` - creates the timers between polls.
/// * `start` - starts the operation. It should capture any request and
///   request options.
/// * `query` - queries the operation. It receives the name of the operation
///   as its only input parameter.
///
/// # Example
/// ```
/// # use google_cloud_lro_poller::*;
/// # use google_cloud_lro_poller::any::{Any, Message};
/// # use gax::options::RetryOptions;
/// # use gax::scheduler::{CompletionQueue, Scheduler};
/// # tokio_test::block_on(async {
/// #[derive(Debug, serde::Serialize, serde::Deserialize)]
/// struct Database { name: String }
/// impl Message for Database {
///     fn typename() -> &'static str { "example.Database" }
/// }
///
/// let scheduler: std::sync::Arc<dyn Scheduler> = std::sync::Arc::new(CompletionQueue::new());
/// let start = || async {
///     Ok::<_, Error>(Operation::default().set_name("operations/create-database"))
/// };
/// let query = |name: String| async move {
///     let db = Any::from_msg(&Database { name: "my-database".into() }).map_err(Error::ser)?;
///     Ok::<_, Error>(Operation::default().set_name(name).set_done(true).set_response(db))
/// };
/// let poller = new_poller::<Database, Database, _, _, _, _>(
///     &RetryOptions::new(), scheduler, start, query);
/// let db = poller.until_done().await?;
/// assert_eq!(db.name, "my-database");
/// # Ok::<(), Error>(()) });
/// ```
pub fn new_poller<R, M, S, SF, Q, QF>(
    options: &RetryOptions,
    scheduler: Arc<dyn Scheduler>,
    start: S,
    query: Q,
) -> impl Poller<R, M> + use<R, M, S, SF, Q, QF>
where
    R: any::Message + Send,
    M: any::Message + Send,
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation>> + Send + 'static,
    Q: FnMut(String) -> QF + Send + Sync,
    QF: Future<Output = Result<Operation>> + Send + 'static,
{
    PollerImpl::new(options, scheduler, start, query)
}

/// Creates a new `impl Poller<R, M>` for an operation that already started.
///
/// The first call to [Poller::poll] reports the state of `operation`, without
/// querying the service.
pub fn from_operation<R, M, Q, QF>(
    options: &RetryOptions,
    scheduler: Arc<dyn Scheduler>,
    operation: Operation,
    query: Q,
) -> impl Poller<R, M> + use<R, M, Q, QF>
where
    R: any::Message + Send,
    M: any::Message + Send,
    Q: FnMut(String) -> QF + Send + Sync,
    QF: Future<Output = Result<Operation>> + Send + 'static,
{
    let start = move || std::future::ready(Ok::<_, Error>(operation));
    PollerImpl::new(options, scheduler, start, query)
}

/// An implementation of `Poller` based on closures.
///
/// # Parameters
/// * `S` - the start closure. Starts a LRO, or returns the handle of an
///   operation that already started.
/// * `Q` - the query closure. Queries the status of the LRO created by `start`.
struct PollerImpl<R, M, S, Q> {
    start: Option<S>,
    query: Q,
    scheduler: Arc<dyn Scheduler>,
    policy: PollingPolicy,
    tracing: bool,
    operation: Option<String>,
    last_status: Option<Status>,
    _types: PhantomData<fn() -> (R, M)>,
}

impl<R, M, S, Q> PollerImpl<R, M, S, Q> {
    fn new(options: &RetryOptions, scheduler: Arc<dyn Scheduler>, start: S, query: Q) -> Self {
        Self {
            start: Some(start),
            query,
            scheduler,
            policy: options.polling_policy(),
            tracing: options.tracing_enabled(),
            operation: None,
            last_status: None,
            _types: PhantomData,
        }
    }
}

impl<R, M, S, Q> sealed::Poller for PollerImpl<R, M, S, Q> {}

impl<R, M, S, SF, Q, QF> Poller<R, M> for PollerImpl<R, M, S, Q>
where
    R: any::Message + Send,
    M: any::Message + Send,
    S: FnOnce() -> SF + Send + Sync,
    SF: Future<Output = Result<Operation>> + Send + 'static,
    Q: FnMut(String) -> QF + Send + Sync,
    QF: Future<Output = Result<Operation>> + Send + 'static,
{
    async fn poll(&mut self) -> Option<PollingResult<R, M>> {
        if let Some(start) = self.start.take() {
            let result = start().await;
            let (op, poll) = details::handle_start(result);
            self.operation = op;
            return Some(poll);
        }
        let name = self.operation.take()?;
        let delay = self.policy.wait_period();
        if self.tracing {
            tracing::debug!(
                operation = %name,
                poll = self.policy.polls(),
                ?delay,
                "waiting before polling"
            );
        }
        if let Err(e) = self.scheduler.make_timer(delay).await {
            let last = self.last_status.take().map(Error::service);
            let error = Error::timer(LoopError::new(
                &name,
                format!("polling timer failed: {e}"),
                last,
            ));
            tracing::warn!(operation = %name, "{error}");
            return Some(PollingResult::Completed(Err(error)));
        }
        let result = (self.query)(name.clone()).await;
        let (op, poll) =
            details::handle_poll(&mut self.policy, &mut self.last_status, name, result);
        self.operation = op;
        Some(poll)
    }

    async fn until_done(mut self) -> Result<R> {
        while let Some(p) = self.poll().await {
            match p {
                // Return, the operation completed or the polling policy is
                // exhausted.
                PollingResult::Completed(r) => return r,
                // Continue, the operation was successfully polled and the
                // polling policy was queried.
                PollingResult::InProgress(_) => (),
                // Continue, the polling policy was queried and decided the
                // error is recoverable.
                PollingResult::PollingError(_) => (),
            }
        }
        // `poll()` only returns `None` after it returned `Completed`.
        Err(Error::other("the poller stopped without a result"))
    }

    #[cfg(feature = "unstable-stream")]
    fn to_stream(self) -> impl futures::Stream<Item = PollingResult<R, M>> + Send + Unpin {
        use futures::stream::unfold;
        Box::pin(unfold(Some(self), move |state| async move {
            if let Some(mut poller) = state {
                if let Some(pr) = poller.poll().await {
                    return Some((pr, Some(poller)));
                }
            };
            None
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use any::{Any, Message};
    use gax::error::rpc::Code;
    use gax::exponential_backoff::ExponentialBackoffBuilder;
    use gax::retry_policy::{Aip194Strict, LimitedErrorCount, RetryPolicyExt};
    use gax::scheduler::CompletionQueue;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Response {
        name: String,
    }
    impl Message for Response {
        fn typename() -> &'static str {
            "test.Response"
        }
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Metadata {
        percent: i32,
    }
    impl Message for Metadata {
        fn typename() -> &'static str {
            "test.Metadata"
        }
    }

    fn in_progress(percent: i32) -> Result<Operation> {
        let metadata = Any::from_msg(&Metadata { percent }).map_err(Error::ser)?;
        Ok(Operation::default()
            .set_name("op-001")
            .set_metadata(metadata))
    }

    fn done() -> Result<Operation> {
        let response = Any::from_msg(&Response {
            name: "resource-001".to_string(),
        })
        .map_err(Error::ser)?;
        Ok(Operation::default()
            .set_name("op-001")
            .set_done(true)
            .set_response(response))
    }

    fn unavailable() -> Error {
        Error::service(Status::default().set_code(Code::Unavailable).set_message("try-again"))
    }

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(CompletionQueue::new())
    }

    // Returns `results` in order, one per query.
    fn scripted(
        results: Vec<Result<Operation>>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut(String) -> std::future::Ready<Result<Operation>> + Send + Sync,
    ) {
        let counter = Arc::new(AtomicU32::new(0));
        let queries = counter.clone();
        let results = Mutex::new(results.into_iter());
        let query = move |name: String| {
            assert_eq!(name, "op-001");
            queries.fetch_add(1, Ordering::SeqCst);
            let next = results
                .lock()
                .expect("test lock is poisoned")
                .next()
                .unwrap_or_else(|| Err(Error::other("unexpected query")));
            std::future::ready(next)
        };
        (counter, query)
    }

    // The poller copies what it needs from the options.
    fn make_poller(
        query: impl FnMut(String) -> std::future::Ready<Result<Operation>> + Send + Sync,
    ) -> Result<impl Poller<Response, Metadata>> {
        let options = RetryOptions::new().set_polling_backoff_policy(
            ExponentialBackoffBuilder::new()
                .with_initial_delay(Duration::from_secs(2))
                .clamp(),
        );
        let poller = from_operation(&options, scheduler(), in_progress(0)?, query);
        drop(options);
        Ok(poller)
    }

    #[tokio::test(start_paused = true)]
    async fn poller_outlives_options() -> anyhow::Result<()> {
        let (counter, query) = scripted(vec![done()]);
        let start = tokio::time::Instant::now();
        let poller = make_poller(query)?;
        let response = poller.until_done().await?;
        assert_eq!(response.name, "resource-001");
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_basic_flow() -> anyhow::Result<()> {
        let (counter, query) = scripted(vec![in_progress(50), done()]);
        let start = tokio::time::Instant::now();
        let mut poller = from_operation::<Response, Metadata, _, _>(
            &RetryOptions::new(),
            scheduler(),
            in_progress(0)?,
            query,
        );

        let p0 = poller.poll().await;
        match p0 {
            Some(PollingResult::InProgress(m)) => assert_eq!(m, Some(Metadata { percent: 0 })),
            r => panic!("unexpected result {r:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let p1 = poller.poll().await;
        match p1 {
            Some(PollingResult::InProgress(m)) => assert_eq!(m, Some(Metadata { percent: 50 })),
            r => panic!("unexpected result {r:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let p2 = poller.poll().await;
        match p2 {
            Some(PollingResult::Completed(Ok(r))) => assert_eq!(r.name, "resource-001"),
            r => panic!("unexpected result {r:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let p3 = poller.poll().await;
        assert!(p3.is_none(), "{p3:?}");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn done_on_start() -> anyhow::Result<()> {
        let (counter, query) = scripted(vec![]);
        let poller = new_poller::<Response, Metadata, _, _, _, _>(
            &RetryOptions::new(),
            scheduler(),
            || async { done() },
            query,
        );
        let response = poller.until_done().await?;
        assert_eq!(response.name, "resource-001");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn start_error() {
        let (counter, query) = scripted(vec![]);
        let poller = new_poller::<Response, Metadata, _, _, _, _>(
            &RetryOptions::new(),
            scheduler(),
            || async { Err(unavailable()) },
            query,
        );
        let err = poller.until_done().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_with_transient_errors() -> anyhow::Result<()> {
        let (counter, query) = scripted(vec![
            Err(unavailable()),
            in_progress(50),
            Err(unavailable()),
            done(),
        ]);
        let poller = from_operation::<Response, Metadata, _, _>(
            &RetryOptions::new(),
            scheduler(),
            in_progress(0)?,
            query,
        );
        let response = poller.until_done().await?;
        assert_eq!(response.name, "resource-001");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_permanent_error() -> anyhow::Result<()> {
        let (counter, query) = scripted(vec![
            in_progress(50),
            Err(Error::service(Status::default().set_code(Code::NotFound))),
        ]);
        let poller = from_operation::<Response, Metadata, _, _>(
            &RetryOptions::new(),
            scheduler(),
            in_progress(0)?,
            query,
        );
        let err = poller.until_done().await.unwrap_err();
        assert!(!err.is_exhausted(), "{err:?}");
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_operation_error() -> anyhow::Result<()> {
        let failed = Operation::default()
            .set_name("op-001")
            .set_done(true)
            .set_error(Status::default().set_code(Code::Aborted).set_message("conflict"));
        let (_, query) = scripted(vec![Ok(failed)]);
        let poller = from_operation::<Response, Metadata, _, _>(
            &RetryOptions::new(),
            scheduler(),
            in_progress(0)?,
            query,
        );
        let err = poller.until_done().await.unwrap_err();
        let status = err.status().expect("operation errors carry a status");
        assert_eq!(status.code, Code::Aborted);
        assert_eq!(status.message, "conflict");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_exhausted() -> anyhow::Result<()> {
        let counter = Arc::new(AtomicU32::new(0));
        let queries = counter.clone();
        let query = move |_: String| {
            let n = queries.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n == 0 { Err(unavailable()) } else { in_progress(50) })
        };
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(1))
            .build()?;
        let options = RetryOptions::new()
            .set_polling_error_policy(Aip194Strict.with_time_limit(Duration::from_secs(10)))
            .set_polling_backoff_policy(backoff);
        let poller = from_operation::<Response, Metadata, _, _>(
            &options,
            scheduler(),
            in_progress(0)?,
            query,
        );
        let err = poller.until_done().await.unwrap_err();
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
        let fmt = err.to_string();
        assert!(fmt.contains("op-001"), "{fmt}");
        assert!(fmt.contains("polling policy exhausted"), "{fmt}");
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_too_many_errors() -> anyhow::Result<()> {
        let (counter, query) = scripted(vec![Err(unavailable()), Err(unavailable())]);
        let options = RetryOptions::new().set_polling_error_policy(LimitedErrorCount::new(2));
        let poller = from_operation::<Response, Metadata, _, _>(
            &options,
            scheduler(),
            in_progress(0)?,
            query,
        );
        let err = poller.until_done().await.unwrap_err();
        assert!(err.is_exhausted(), "{err:?}");
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
        // The second error exhausts the policy, there is no third query.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timer_failure() -> anyhow::Result<()> {
        let cq = CompletionQueue::new();
        let (counter, query) = scripted(vec![in_progress(50)]);
        let poller = from_operation::<Response, Metadata, _, _>(
            &RetryOptions::new(),
            Arc::new(cq.clone()),
            in_progress(0)?,
            query,
        );
        cq.shutdown();
        let err = poller.until_done().await.unwrap_err();
        assert!(err.is_timer(), "{err:?}");
        assert!(err.to_string().contains("op-001"), "{err}");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[cfg(feature = "unstable-stream")]
    #[tokio::test(start_paused = true)]
    async fn poll_stream() -> anyhow::Result<()> {
        use futures::StreamExt;
        let (_, query) = scripted(vec![Err(unavailable()), done()]);
        let mut stream = from_operation::<Response, Metadata, _, _>(
            &RetryOptions::new(),
            scheduler(),
            in_progress(0)?,
            query,
        )
        .to_stream();
        let p0 = stream.next().await;
        assert!(matches!(p0, Some(PollingResult::InProgress(Some(_)))), "{p0:?}");
        let p1 = stream.next().await;
        assert!(matches!(p1, Some(PollingResult::PollingError(_))), "{p1:?}");
        let p2 = stream.next().await;
        assert!(matches!(p2, Some(PollingResult::Completed(Ok(_)))), "{p2:?}");
        let p3 = stream.next().await;
        assert!(p3.is_none(), "{p3:?}");
        Ok(())
    }
}
