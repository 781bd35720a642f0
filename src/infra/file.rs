use std::{io::ErrorKind, path::PathBuf};

use anyhow::{Context, Error};
use async_trait::async_trait;
use log::debug;

use crate::domain::port::ProfileRepository;

/// Profiles list kept as a single JSON file.
pub struct FileProfileRepository {
    pub path: PathBuf,
}

#[async_trait]
impl ProfileRepository for FileProfileRepository {
    async fn load(&self) -> Result<Option<String>, Error> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(serialized) => Ok(Some(serialized)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No profiles file at {}", self.path.display());
                Ok(None)
            }
            Err(e) => Err(e).context(format!("Can't read profiles file {}", self.path.display())),
        }
    }

    async fn save(&self, serialized: String) -> Result<(), Error> {
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, serialized)
            .await
            .context(format!("Can't write profiles file {}", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .context(format!("Can't replace profiles file {}", self.path.display()))
    }
}
