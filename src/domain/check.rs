use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, task::AbortHandle};

use super::port::DockerDaemon;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CheckOutcome {
    Connected { version: String },
    Failed { message: String },
    /// A newer check started before this one finished.
    Superseded,
}

/// Daemon connectivity check. Only the latest request is kept alive, a new
/// one aborts the one in flight.
pub struct ConnectionChecker {
    daemon: Arc<dyn DockerDaemon + Send + Sync>,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl ConnectionChecker {
    pub fn new(daemon: Arc<dyn DockerDaemon + Send + Sync>) -> Self {
        ConnectionChecker {
            daemon,
            in_flight: Mutex::new(None),
        }
    }

    pub async fn check(&self) -> CheckOutcome {
        let daemon = self.daemon.clone();
        let task = tokio::spawn(async move { daemon.ping().await });
        if let Some(previous) = self.in_flight.lock().await.replace(task.abort_handle()) {
            debug!("Aborting previous connection check");
            previous.abort();
        }
        match task.await {
            Ok(Ok(version)) => {
                info!("Docker daemon reachable, version {}", version);
                CheckOutcome::Connected { version }
            }
            Ok(Err(e)) => {
                warn!("Docker daemon check failed {:?}", e);
                CheckOutcome::Failed {
                    message: format!("{:#}", e),
                }
            }
            Err(e) if e.is_cancelled() => CheckOutcome::Superseded,
            Err(e) => CheckOutcome::Failed {
                message: format!("Connection check crashed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fake::FakeDaemon;
    use std::time::Duration;

    #[tokio::test]
    async fn reports_version() {
        let checker = ConnectionChecker::new(Arc::new(FakeDaemon::default()));
        assert_eq!(
            checker.check().await,
            CheckOutcome::Connected {
                version: "27.1.0".to_string()
            }
        );
    }

    #[tokio::test]
    async fn reports_failure() {
        let daemon = FakeDaemon {
            unreachable: true,
            ..Default::default()
        };
        let checker = ConnectionChecker::new(Arc::new(daemon));
        assert!(matches!(checker.check().await, CheckOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn new_check_supersedes_in_flight_one() {
        let daemon = FakeDaemon {
            first_ping_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let checker = Arc::new(ConnectionChecker::new(Arc::new(daemon)));
        let slow = {
            let checker = checker.clone();
            tokio::spawn(async move { checker.check().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(checker.check().await, CheckOutcome::Connected { .. }));
        assert_eq!(slow.await.unwrap(), CheckOutcome::Superseded);
    }
}
