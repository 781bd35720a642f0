use std::collections::BTreeMap;

use anyhow::{anyhow, Error};
use check::{CheckOutcome, ConnectionChecker};
use log::{info, warn};
use model::{SettingsDocument, TestStatus, ViewModel};
use port::ProfileRepository;
use store::{ProfileStore, SaveOutcome};
use test_run::TestRunner;
use tokio::sync::Mutex;
use validation::ValidationReport;

pub mod accessor;
pub mod check;
pub mod mapper;
pub mod migration;
pub mod model;
pub mod port;
pub mod schema;
pub mod store;
pub mod test_run;
pub mod units;
pub mod validation;

#[cfg(test)]
pub mod fake;

pub struct ProfileService {
    pub store: Mutex<ProfileStore>,
    pub repository: Box<dyn ProfileRepository + 'static + Sync + Send>,
    pub checker: ConnectionChecker,
    pub tests: TestRunner,
}

pub enum TestRequest {
    Created(TestStatus),
    Rejected(ValidationReport),
}

impl ProfileService {
    /// Loads persisted profiles into the store, if any were saved.
    pub async fn restore(&self) -> Result<usize, Error> {
        match self.repository.load().await? {
            Some(serialized) => self.store.lock().await.load(&serialized),
            None => {
                info!("No persisted profiles yet");
                Ok(0)
            }
        }
    }

    pub async fn list_profiles(&self) -> Vec<String> {
        self.store.lock().await.names()
    }

    pub async fn get_profile(&self, name: &str) -> Option<ViewModel> {
        self.store.lock().await.view_model(name)
    }

    /// Writes the store through the repository. On failure the store goes
    /// back to `snapshot`, so memory never holds what the file does not.
    async fn persist(&self, store: &mut ProfileStore, snapshot: BTreeMap<String, SettingsDocument>) -> Result<(), Error> {
        let saved = match store.serialize() {
            Ok(serialized) => self.repository.save(serialized).await,
            Err(e) => Err(e),
        };
        if saved.is_err() {
            warn!("Persisting profiles failed, rolling back");
            store.rollback(snapshot);
        }
        saved
    }

    pub async fn save_profile(&self, model: &ViewModel, previous: Option<&str>) -> Result<SaveOutcome, Error> {
        let mut store = self.store.lock().await;
        let snapshot = store.snapshot();
        let outcome = store.upsert(model, previous);
        if let SaveOutcome::Saved { name, .. } = &outcome {
            self.persist(&mut store, snapshot).await?;
            info!("Profile {} saved", name);
        }
        Ok(outcome)
    }

    pub async fn delete_profile(&self, name: &str) -> Result<(), Error> {
        let mut store = self.store.lock().await;
        let snapshot = store.snapshot();
        if store.remove(name).is_none() {
            return Err(anyhow!("Profile {} does not exist", name));
        }
        self.persist(&mut store, snapshot).await?;
        info!("Profile {} deleted", name);
        Ok(())
    }

    pub async fn export_settings(&self) -> Result<String, Error> {
        self.store.lock().await.serialize()
    }

    /// Replaces every profile with the given serialized list.
    pub async fn import_settings(&self, serialized: &str) -> Result<usize, Error> {
        let mut store = self.store.lock().await;
        let snapshot = store.snapshot();
        let count = store.load(serialized)?;
        self.persist(&mut store, snapshot).await?;
        Ok(count)
    }

    pub async fn check_connection(&self) -> CheckOutcome {
        self.checker.check().await
    }

    /// Creates a test container from the profile being edited. Refused
    /// while the view model has validation errors.
    pub async fn create_test(&self, model: &ViewModel) -> Result<TestRequest, Error> {
        let (report, settings) = {
            let store = self.store.lock().await;
            (store.validate(model), store.to_settings(model))
        };
        if report.blocks_save() {
            return Ok(TestRequest::Rejected(report));
        }
        let profile = settings.profile().unwrap_or_default().to_string();
        self.tests
            .create(&profile, &settings)
            .await
            .map(TestRequest::Created)
    }
}
