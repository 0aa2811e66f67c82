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

use gax::error::Error;
use gax::error::rpc::{Code, Status};
use gax::scheduler::{CompletionQueue, Scheduler};
use google_cloud_pubsub_lease::{LeaseManager, LeaseOptions, LeaseStatus, Leaser, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// A fake service tracking the lease deadline of each message.
#[derive(Debug, Default)]
struct FakeLeaser {
    deadlines: Mutex<HashMap<String, Instant>>,
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
    extend_calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl FakeLeaser {
    fn failing_after(calls: usize) -> Self {
        Self {
            fail_after: Some(calls),
            ..Default::default()
        }
    }

    fn deadline(&self, ack_id: &str) -> Option<Instant> {
        self.deadlines.lock().unwrap().get(ack_id).cloned()
    }
}

#[async_trait::async_trait]
impl Leaser for FakeLeaser {
    async fn extend(&self, ack_id: String, extension: Duration) -> Result<()> {
        let count = self.extend_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|n| count >= n) {
            return Err(Error::service(
                Status::default()
                    .set_code(Code::FailedPrecondition)
                    .set_message("the subscription was deleted"),
            ));
        }
        let deadline = tokio::time::Instant::now().into_std() + extension;
        self.deadlines.lock().unwrap().insert(ack_id, deadline);
        Ok(())
    }

    async fn ack(&self, ack_id: String) -> Result<()> {
        self.deadlines.lock().unwrap().remove(&ack_id);
        self.acked.lock().unwrap().push(ack_id);
        Ok(())
    }

    async fn nack(&self, ack_id: String) -> Result<()> {
        self.deadlines.lock().unwrap().remove(&ack_id);
        self.nacked.lock().unwrap().push(ack_id);
        Ok(())
    }
}

fn scheduler() -> Arc<dyn Scheduler> {
    Arc::new(CompletionQueue::new())
}

fn options() -> LeaseOptions {
    LeaseOptions::new()
        .set_max_lease(Duration::from_secs(60))
        .set_lease_extension(Duration::from_secs(10))
}

#[tokio::test(start_paused = true)]
async fn many_messages() -> anyhow::Result<()> {
    let leaser = Arc::new(FakeLeaser::default());
    let managers = (0..8)
        .map(|i| LeaseManager::new(scheduler(), leaser.clone(), format!("ack-{i}"), options()))
        .collect::<Vec<_>>();

    tokio::time::sleep(Duration::from_secs(30)).await;
    for m in managers.iter() {
        assert_eq!(m.status(), LeaseStatus::Scheduled, "{m:?}");
        let deadline = leaser.deadline(m.ack_id());
        assert_eq!(deadline, Some(m.current_deadline()), "{m:?}");
    }

    let ids = managers
        .iter()
        .map(|m| m.ack_id().to_string())
        .collect::<Vec<_>>();
    for (i, m) in managers.into_iter().enumerate() {
        if i % 2 == 0 {
            m.ack().await?;
        } else {
            m.nack().await?;
        }
    }
    let acked = ids.iter().step_by(2).cloned().collect::<Vec<_>>();
    let nacked = ids.iter().skip(1).step_by(2).cloned().collect::<Vec<_>>();
    assert_eq!(*leaser.acked.lock().unwrap(), acked);
    assert_eq!(*leaser.nacked.lock().unwrap(), nacked);
    assert!(leaser.deadlines.lock().unwrap().is_empty());

    let calls = leaser.extend_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(leaser.extend_calls.load(Ordering::SeqCst), calls);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn lease_expires_at_max_deadline() {
    let leaser = Arc::new(FakeLeaser::default());
    let manager = LeaseManager::new(scheduler(), leaser.clone(), "ack-001", options());
    let max = manager.max_deadline();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(manager.status(), LeaseStatus::Stopped);
    assert_eq!(manager.current_deadline(), max);
    assert_eq!(leaser.deadline("ack-001"), Some(max));
}

#[tokio::test(start_paused = true)]
async fn service_error_stops_lease() {
    let leaser = Arc::new(FakeLeaser::failing_after(2));
    let manager = LeaseManager::new(scheduler(), leaser.clone(), "ack-001", options());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(manager.status(), LeaseStatus::Stopped);
    assert_eq!(leaser.extend_calls.load(Ordering::SeqCst), 3);
    assert_eq!(Some(manager.current_deadline()), leaser.deadline("ack-001"));
}

// A leaser that never completes an extension, and detects when the pending
// RPC is dropped.
#[derive(Debug, Default)]
struct StuckLeaser {
    started: AtomicBool,
    dropped: Arc<AtomicBool>,
}

struct DropDetector(Arc<AtomicBool>);

impl Drop for DropDetector {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Leaser for StuckLeaser {
    async fn extend(&self, _ack_id: String, _extension: Duration) -> Result<()> {
        let _detector = DropDetector(self.dropped.clone());
        self.started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn ack(&self, _ack_id: String) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, _ack_id: String) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drop_cancels_pending_extension() -> anyhow::Result<()> {
    let leaser = Arc::new(StuckLeaser::default());
    let options = LeaseOptions::new()
        .set_max_lease(Duration::from_secs(60))
        .set_lease_extension(Duration::from_secs(3));
    let manager = LeaseManager::new(scheduler(), leaser.clone(), "ack-001", options);

    tokio::time::timeout(Duration::from_secs(10), async {
        while !leaser.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(manager.status(), LeaseStatus::Extending);
    drop(manager);

    tokio::time::timeout(Duration::from_secs(10), async {
        while !leaser.dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}
