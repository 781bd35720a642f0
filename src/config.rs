use anyhow::{Context, Error};
use config::Config;

use crate::domain::model::SchemaVariant;

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub docker_socket: String,
    pub listen_address: String,
    pub profiles_file: String,
    pub schema: SchemaVariant,
    pub test_poll_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            listen_address: "0.0.0.0:3000".to_string(),
            profiles_file: "profiles.json".to_string(),
            schema: SchemaVariant::Container,
            test_poll_interval_secs: 5,
        }
    }
}

pub fn load_config() -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(config::Environment::with_prefix("dockprof"))
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}
