//! Upstream health monitoring: one periodic prober per registered source,
//! status transitions fan out to listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use beltrex_model::ServerStatus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stream::StreamClient;

pub type StatusListener = Arc<dyn Fn(&str, ServerStatus, ServerStatus) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub name: String,
    pub health_url: String,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl HealthMonitorConfig {
    pub fn new(name: impl Into<String>, health_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health_url: health_url.into(),
            check_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
        }
    }
}

struct MonitorEntry {
    config: HealthMonitorConfig,
    status: Arc<RwLock<ServerStatus>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Owns every per-source monitor. Monitors share nothing beyond this
/// registry.
pub struct HealthService {
    client: StreamClient,
    monitors: Mutex<HashMap<String, MonitorEntry>>,
    listeners: Arc<Mutex<Vec<StatusListener>>>,
}

impl std::fmt::Debug for HealthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthService").finish_non_exhaustive()
    }
}

impl HealthService {
    pub fn new(client: StreamClient) -> Self {
        Self {
            client,
            monitors: Mutex::new(HashMap::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn register(&self, config: HealthMonitorConfig) {
        let mut monitors = self.monitors.lock().unwrap();
        if monitors.contains_key(&config.name) {
            warn!("server {} is already registered for monitoring", config.name);
            return;
        }
        let name = config.name.clone();
        monitors.insert(
            name.clone(),
            MonitorEntry {
                config,
                status: Arc::new(RwLock::new(ServerStatus::Unknown)),
                token: CancellationToken::new(),
                handle: None,
            },
        );
        info!("registered server {name} for health monitoring");
    }

    /// Notify on every status transition of any monitored source.
    pub fn add_listener(&self, listener: StatusListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn start_all(&self) {
        let mut monitors = self.monitors.lock().unwrap();
        let mut started = 0usize;
        for entry in monitors.values_mut() {
            if entry.handle.is_some() {
                continue;
            }
            entry.handle = Some(tokio::spawn(monitor_loop(
                self.client.clone(),
                entry.config.clone(),
                Arc::clone(&entry.status),
                entry.token.clone(),
                Arc::clone(&self.listeners),
            )));
            started += 1;
        }
        info!("started health monitoring for {started} servers");
    }

    pub async fn stop_all(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut monitors = self.monitors.lock().unwrap();
            monitors
                .iter_mut()
                .filter_map(|(name, entry)| {
                    entry.token.cancel();
                    entry.handle.take().map(|h| (name.clone(), h))
                })
                .collect()
        };
        for (name, handle) in handles {
            if handle.await.is_err() {
                warn!("health monitor for {name} ended abnormally");
            }
        }
        info!("stopped all health monitoring");
    }

    pub fn status_of(&self, name: &str) -> Option<ServerStatus> {
        let monitors = self.monitors.lock().unwrap();
        monitors.get(name).map(|e| *e.status.read().unwrap())
    }

    pub fn snapshot(&self) -> HashMap<String, ServerStatus> {
        let monitors = self.monitors.lock().unwrap();
        monitors
            .iter()
            .map(|(name, entry)| (name.clone(), *entry.status.read().unwrap()))
            .collect()
    }
}

async fn monitor_loop(
    client: StreamClient,
    config: HealthMonitorConfig,
    status: Arc<RwLock<ServerStatus>>,
    token: CancellationToken,
    listeners: Arc<Mutex<Vec<StatusListener>>>,
) {
    let mut interval = tokio::time::interval(config.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let new_status = match client.probe(&config.health_url, Some(config.timeout)).await {
            Ok(code) if code == reqwest::StatusCode::OK => ServerStatus::Available,
            Ok(_) | Err(_) => ServerStatus::Unavailable,
        };

        let old_status = *status.read().unwrap();
        if new_status != old_status {
            *status.write().unwrap() = new_status;
            info!(
                "server {} status changed: {old_status} -> {new_status}",
                config.name
            );
            let current: Vec<StatusListener> = listeners.lock().unwrap().clone();
            for listener in current {
                listener(&config.name, old_status, new_status);
            }
        }
    }
}
