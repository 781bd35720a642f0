//! Test containers started from a profile to check it before saving.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{anyhow, Error};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use uuid::Uuid;

use super::model::{SettingsDocument, TestPhase, TestStatus};
use super::port::DockerDaemon;

/// Finished tests stay queryable for this long unless cancelled.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

struct TestRun {
    status: TestStatus,
    finished_at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    watcher: Option<JoinHandle<()>>,
}

type Runs = Arc<Mutex<HashMap<String, TestRun>>>;

pub struct TestRunner {
    daemon: Arc<dyn DockerDaemon + Send + Sync>,
    poll_interval: Duration,
    retention: Duration,
    runs: Runs,
}

impl TestRunner {
    pub fn new(daemon: Arc<dyn DockerDaemon + Send + Sync>, poll_interval: Duration) -> Self {
        TestRunner {
            daemon,
            poll_interval,
            retention: DEFAULT_RETENTION,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Forgets tests that finished more than the retention ago and removes
    /// their containers. Returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let expired: Vec<TestRun> = {
            let mut runs = self.runs.lock().await;
            let ids: Vec<String> = runs
                .iter()
                .filter(|(_, run)| run.finished_at.is_some_and(|at| at.elapsed() >= self.retention))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| runs.remove(id)).collect()
        };
        for run in &expired {
            debug!("Evicting finished test {}", run.status.id);
            if let Some(container_id) = &run.status.container_id {
                if let Err(e) = self.daemon.remove(container_id).await {
                    warn!("Can't remove test container {} {:?}", container_id, e);
                }
            }
        }
        expired.len()
    }

    pub async fn create(&self, profile: &str, settings: &SettingsDocument) -> Result<TestStatus, Error> {
        self.sweep().await;
        let container_id = self.daemon.create_test_container(settings).await?;
        let status = TestStatus {
            id: Uuid::new_v4().to_string(),
            profile: profile.to_string(),
            container_id: Some(container_id),
            phase: TestPhase::Created,
        };
        info!("Test {} created for profile {}", status.id, profile);
        self.runs.lock().await.insert(
            status.id.clone(),
            TestRun {
                status: status.clone(),
                finished_at: None,
                cancelled: Arc::new(AtomicBool::new(false)),
                cancel: Arc::new(Notify::new()),
                watcher: None,
            },
        );
        Ok(status)
    }

    pub async fn start(&self, id: &str) -> Result<TestStatus, Error> {
        let container_id = {
            let runs = self.runs.lock().await;
            let run = runs.get(id).ok_or(anyhow!("Unknown test {}", id))?;
            if run.status.phase != TestPhase::Created {
                return Err(anyhow!("Test {} was already started", id));
            }
            run.status
                .container_id
                .clone()
                .ok_or(anyhow!("Test {} has no container", id))?
        };
        if let Err(e) = self.daemon.start(&container_id).await {
            set_phase(&self.runs, id, TestPhase::Failed {
                message: format!("{:#}", e),
            })
            .await;
            return Err(e);
        }

        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(id).ok_or(anyhow!("Unknown test {}", id))?;
        if run.status.phase.is_final() {
            return Ok(run.status.clone());
        }
        run.status.phase = TestPhase::Running;
        run.watcher = Some(tokio::spawn(watch(
            self.daemon.clone(),
            self.runs.clone(),
            id.to_string(),
            container_id,
            self.poll_interval,
            run.cancelled.clone(),
            run.cancel.clone(),
        )));
        info!("Test {} started", id);
        Ok(run.status.clone())
    }

    pub async fn query(&self, id: &str) -> Result<TestStatus, Error> {
        self.runs
            .lock()
            .await
            .get(id)
            .map(|run| run.status.clone())
            .ok_or(anyhow!("Unknown test {}", id))
    }

    pub async fn logs(&self, id: &str) -> Result<Vec<String>, Error> {
        let container_id = self
            .query(id)
            .await?
            .container_id
            .ok_or(anyhow!("Test {} has no container", id))?;
        self.daemon.logs(&container_id).await
    }

    /// Flags the watcher to stop on its next tick, closes the push
    /// subscription, removes the container and forgets the test.
    pub async fn cancel(&self, id: &str) -> Result<TestStatus, Error> {
        let (status, watcher) = {
            let mut runs = self.runs.lock().await;
            let run = runs.get_mut(id).ok_or(anyhow!("Unknown test {}", id))?;
            run.cancelled.store(true, Ordering::SeqCst);
            run.cancel.notify_one();
            if !run.status.phase.is_final() {
                run.status.phase = TestPhase::Cancelled;
            }
            (run.status.clone(), run.watcher.take())
        };
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!("Watcher of test {} ended abnormally {:?}", id, e);
            }
        }
        if let Some(container_id) = &status.container_id {
            if let Err(e) = self.daemon.remove(container_id).await {
                warn!("Can't remove test container {} {:?}", container_id, e);
            }
        }
        self.runs.lock().await.remove(id);
        info!("Test {} cancelled", id);
        Ok(status)
    }
}

/// Returns `true` when the test reached a final phase and watching can stop.
async fn set_phase(runs: &Runs, id: &str, phase: TestPhase) -> bool {
    let mut runs = runs.lock().await;
    let Some(run) = runs.get_mut(id) else {
        return true;
    };
    if run.status.phase.is_final() {
        return true;
    }
    if run.status.phase != phase {
        debug!("Test {} is now {:?}", id, phase);
        run.status.phase = phase;
    }
    if run.status.phase.is_final() {
        run.finished_at = Some(Instant::now());
        return true;
    }
    false
}

async fn watch(
    daemon: Arc<dyn DockerDaemon + Send + Sync>,
    runs: Runs,
    id: String,
    container_id: String,
    poll_interval: Duration,
    cancelled: Arc<AtomicBool>,
    cancel: Arc<Notify>,
) {
    if let Some(mut events) = daemon.status_events(&container_id) {
        loop {
            tokio::select! {
                _ = cancel.notified() => return,
                event = events.next() => match event {
                    Some(Ok(phase)) => {
                        if set_phase(&runs, &id, phase).await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Status events of test {} failed {:?}, polling instead", id, e);
                        break;
                    }
                    None => {
                        debug!("Status events of test {} ended, polling instead", id);
                        break;
                    }
                }
            }
        }
    }
    loop {
        tokio::select! {
            _ = cancel.notified() => return,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        let phase = match daemon.inspect(&container_id).await {
            Ok(phase) => phase,
            Err(e) => TestPhase::Failed {
                message: format!("{:#}", e),
            },
        };
        if set_phase(&runs, &id, phase).await {
            return;
        }
    }
}
