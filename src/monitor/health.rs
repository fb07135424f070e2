use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::monitor::supervisor::{ReceiverInfo, Supervisor};

pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// A receiver is stale when nothing has arrived for this long while the
/// connection still claims to be up.
const STALE_EVENT_SECS: i64 = 300;
const QUEUE_DEPTH_DEGRADED: usize = 128;
const FAILED_RECONNECT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountHealth {
    pub account_id: Uuid,
    pub state: HealthState,
    pub connected: bool,
    pub last_event_age_secs: Option<i64>,
    pub reconnects_in_window: u32,
    pub queue_depth: usize,
}

/// Pure classification over one probe sample.
pub fn classify(
    connected: bool,
    last_event_age_secs: Option<i64>,
    reconnects_in_window: u32,
    queue_depth: usize,
) -> HealthState {
    if !connected {
        if reconnects_in_window >= FAILED_RECONNECT_THRESHOLD {
            return HealthState::Failed;
        }
        return HealthState::Degraded;
    }
    let stale = last_event_age_secs.map(|age| age > STALE_EVENT_SECS).unwrap_or(true);
    if stale || queue_depth > QUEUE_DEPTH_DEGRADED {
        return HealthState::Degraded;
    }
    HealthState::Healthy
}

/// Fixed-cadence prober over the supervisor's receivers. `failed`
/// accounts get a stop-and-restart; `degraded` only shows up in the
/// snapshot.
pub struct HealthMonitor {
    supervisor: Arc<Supervisor>,
    snapshots: RwLock<HashMap<Uuid, Vec<AccountHealth>>>,
    window_base: Mutex<HashMap<Uuid, u32>>,
    shutdown: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(supervisor: Arc<Supervisor>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            supervisor,
            snapshots: RwLock::new(HashMap::new()),
            window_base: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = monitor.shutdown.clone();
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => monitor.probe().await,
                }
            }
            debug!("Health monitor stopped");
        });
        info!("Health monitor started ({}s cadence)", PROBE_INTERVAL.as_secs());
    }

    async fn probe(&self) {
        let receivers = self.supervisor.stats_snapshot().await;
        let now = Utc::now().timestamp();

        let mut fresh: HashMap<Uuid, Vec<AccountHealth>> = HashMap::new();
        let mut failed: Vec<Uuid> = Vec::new();
        let mut window_base = self.window_base.lock().await;

        for info in &receivers {
            let health = self.sample(info, now, &mut window_base);
            if health.state == HealthState::Failed {
                failed.push(info.account_id);
            }
            fresh.entry(info.tenant_id).or_default().push(health);
        }

        window_base.retain(|account_id, _| receivers.iter().any(|r| r.account_id == *account_id));
        drop(window_base);

        *self.snapshots.write().await = fresh;

        for account_id in failed {
            self.supervisor.restart_account(account_id).await;
        }
    }

    fn sample(
        &self,
        info: &ReceiverInfo,
        now: i64,
        window_base: &mut HashMap<Uuid, u32>,
    ) -> AccountHealth {
        let base = window_base.insert(info.account_id, info.reconnects).unwrap_or(0);
        let reconnects_in_window = info.reconnects.saturating_sub(base);
        let last_event_age_secs = info.last_event_unix.map(|t| now - t);

        AccountHealth {
            account_id: info.account_id,
            state: classify(
                info.connected,
                last_event_age_secs,
                reconnects_in_window,
                info.queue_depth,
            ),
            connected: info.connected,
            last_event_age_secs,
            reconnects_in_window,
            queue_depth: info.queue_depth,
        }
    }

    /// Read-only snapshot for one tenant.
    pub async fn tenant_snapshot(&self, tenant: Uuid) -> Vec<AccountHealth> {
        self.snapshots
            .read()
            .await
            .get(&tenant)
            .cloned()
            .unwrap_or_default()
    }

    /// Account ids currently classified `failed`; the balancer skips them.
    pub async fn failed_accounts(&self, tenant: Uuid) -> Vec<Uuid> {
        self.tenant_snapshot(tenant)
            .await
            .into_iter()
            .filter(|h| h.state == HealthState::Failed)
            .map(|h| h.account_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_and_fresh_is_healthy() {
        assert_eq!(classify(true, Some(3), 0, 0), HealthState::Healthy);
        assert_eq!(classify(true, Some(299), 2, 10), HealthState::Healthy);
    }

    #[test]
    fn test_stale_or_queueing_is_degraded() {
        assert_eq!(classify(true, Some(301), 0, 0), HealthState::Degraded);
        assert_eq!(classify(true, None, 0, 0), HealthState::Degraded);
        assert_eq!(classify(true, Some(5), 0, 200), HealthState::Degraded);
    }

    #[test]
    fn test_disconnected_with_repeated_reconnects_is_failed() {
        assert_eq!(classify(false, Some(5), 3, 0), HealthState::Failed);
        assert_eq!(classify(false, Some(5), 10, 0), HealthState::Failed);
    }

    #[test]
    fn test_briefly_disconnected_is_degraded() {
        assert_eq!(classify(false, Some(5), 0, 0), HealthState::Degraded);
        assert_eq!(classify(false, Some(5), 2, 0), HealthState::Degraded);
    }
}
