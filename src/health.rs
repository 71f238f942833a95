//! Backend status polling

use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::ApiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Checking,
    Online,
    Offline,
}

impl BackendStatus {
    pub fn symbol(&self) -> char {
        match self {
            BackendStatus::Checking => '?',
            BackendStatus::Online => '●',
            BackendStatus::Offline => '○',
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendStatus::Checking => "checking",
            BackendStatus::Online => "online",
            BackendStatus::Offline => "offline",
        })
    }
}

pub async fn probe(client: &ApiClient) -> BackendStatus {
    match client.check_health().await {
        Ok(health) if health.status == "ok" => BackendStatus::Online,
        Ok(health) => {
            debug!(status = %health.status, "backend reported unhealthy status");
            BackendStatus::Offline
        }
        Err(e) => {
            debug!(error = %e, "health check failed");
            BackendStatus::Offline
        }
    }
}

/// Probe now and then every `interval`; the task ends when every receiver is gone
pub fn spawn_status_poller(
    client: ApiClient,
    interval: Duration,
) -> (watch::Receiver<BackendStatus>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(BackendStatus::Checking);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let status = probe(&client).await;
            tx.send_if_modified(|current| {
                if *current == status {
                    return false;
                }
                *current = status;
                true
            });
            if tx.is_closed() {
                break;
            }
        }
    });

    (rx, handle)
}
