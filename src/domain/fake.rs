//! In-memory daemon and repository for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;

use super::model::{SettingsDocument, TestPhase};
use super::port::{DockerDaemon, PhaseStream, ProfileRepository};

/// Clones share the saved list, so a test can keep one to inspect it.
#[derive(Default, Clone)]
pub struct MemoryRepository {
    pub saved: Arc<Mutex<Option<String>>>,
    pub failing: Arc<AtomicBool>,
}

#[async_trait]
impl ProfileRepository for MemoryRepository {
    async fn load(&self) -> Result<Option<String>, Error> {
        Ok(self.saved.lock().unwrap().clone())
    }

    async fn save(&self, serialized: String) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("Disk full"));
        }
        *self.saved.lock().unwrap() = Some(serialized);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDaemon {
    pub unreachable: bool,
    pub first_ping_delay: Option<Duration>,
    pub push: bool,
    pub pings: AtomicUsize,
    pub inspections: AtomicUsize,
    pub containers: Mutex<HashMap<String, TestPhase>>,
    pub created: Mutex<Vec<SettingsDocument>>,
    pub removed: Mutex<Vec<String>>,
    pub subscribers: Mutex<HashMap<String, UnboundedSender<Result<TestPhase, Error>>>>,
}

impl FakeDaemon {
    pub fn exit(&self, container_id: &str, code: i64) {
        let phase = TestPhase::Exited { code };
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.to_string(), phase.clone());
        if let Some(subscriber) = self.subscribers.lock().unwrap().get(container_id) {
            let _ = subscriber.unbounded_send(Ok(phase));
        }
    }

    pub fn is_subscribed(&self, container_id: &str) -> bool {
        self.subscribers
            .lock()
            .unwrap()
            .get(container_id)
            .map(|subscriber| !subscriber.is_closed())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DockerDaemon for FakeDaemon {
    async fn ping(&self) -> Result<String, Error> {
        let count = self.pings.fetch_add(1, Ordering::SeqCst);
        if let (0, Some(delay)) = (count, self.first_ping_delay) {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable {
            Err(anyhow!("Cannot connect to the Docker daemon"))
        } else {
            Ok("27.1.0".to_string())
        }
    }

    async fn create_test_container(&self, settings: &SettingsDocument) -> Result<String, Error> {
        let mut created = self.created.lock().unwrap();
        created.push(settings.clone());
        let id = format!("container-{}", created.len());
        self.containers.lock().unwrap().insert(id.clone(), TestPhase::Created);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<(), Error> {
        let mut containers = self.containers.lock().unwrap();
        let phase = containers
            .get_mut(container_id)
            .ok_or(anyhow!("No such container {}", container_id))?;
        *phase = TestPhase::Running;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<TestPhase, Error> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        self.containers
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or(anyhow!("No such container {}", container_id))
    }

    async fn logs(&self, container_id: &str) -> Result<Vec<String>, Error> {
        Ok(vec![format!("{} started", container_id)])
    }

    fn status_events(&self, container_id: &str) -> Option<PhaseStream> {
        if !self.push {
            return None;
        }
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .unwrap()
            .insert(container_id.to_string(), sender);
        Some(receiver.boxed())
    }

    async fn remove(&self, container_id: &str) -> Result<(), Error> {
        self.containers.lock().unwrap().remove(container_id);
        self.removed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}
