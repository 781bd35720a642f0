use std::{error::Error, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use bollard::{Docker, API_DEFAULT_VERSION};
use crate::config::load_config;
use domain::{check::ConnectionChecker, store::ProfileStore, test_run::TestRunner, ProfileService};
use infra::{docker::DockerDaemonClient, file::FileProfileRepository, web::router};
use log::info;
use tokio::{net::TcpListener, sync::Mutex};

mod config;
mod domain;
mod infra;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    info!("Start dockprof - Docker cloud profile editor");

    let config = load_config()?;
    info!("Loaded config {:?}", config);
    let docker = Docker::connect_with_socket(&config.docker_socket, 120, API_DEFAULT_VERSION)
        .context("Can't connect to docker socket")?;
    let daemon = Arc::new(DockerDaemonClient {
        variant: config.schema,
        docker,
    });

    let service = ProfileService {
        store: Mutex::new(ProfileStore::new(config.schema)),
        repository: Box::new(FileProfileRepository {
            path: PathBuf::from(&config.profiles_file),
        }),
        checker: ConnectionChecker::new(daemon.clone()),
        tests: TestRunner::new(daemon, Duration::from_secs(config.test_poll_interval_secs)),
    };
    let restored = service.restore().await?;
    info!("Restored {} profiles from {}", restored, config.profiles_file);

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .context(format!("Can't listen on {}", config.listen_address))?;
    info!("Listening on {}", config.listen_address);
    axum::serve(listener, router(service)).await?;
    Ok(())
}
