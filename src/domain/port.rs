use anyhow::Error;
use async_trait::async_trait;
use futures::stream::BoxStream;

use super::model::{SettingsDocument, TestPhase};

pub type PhaseStream = BoxStream<'static, Result<TestPhase, Error>>;

#[async_trait]
pub trait DockerDaemon {
    /// Returns the daemon version.
    async fn ping(&self) -> Result<String, Error>;

    async fn create_test_container(&self, settings: &SettingsDocument) -> Result<String, Error>;

    async fn start(&self, container_id: &str) -> Result<(), Error>;

    async fn inspect(&self, container_id: &str) -> Result<TestPhase, Error>;

    async fn logs(&self, container_id: &str) -> Result<Vec<String>, Error>;

    /// Push notifications of phase changes, `None` when the daemon can't
    /// provide them and the caller has to poll.
    fn status_events(&self, container_id: &str) -> Option<PhaseStream>;

    async fn remove(&self, container_id: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait ProfileRepository {
    /// `None` when nothing was persisted yet.
    async fn load(&self) -> Result<Option<String>, Error>;

    async fn save(&self, serialized: String) -> Result<(), Error>;
}
