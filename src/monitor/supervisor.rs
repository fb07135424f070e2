use chrono::Utc;
use diesel::prelude::*;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::monitor::client::{ClientError, ClientEvent, IncomingMessage, SessionConnector};
use crate::monitor::pipeline::{IngestSource, Pipeline};
use crate::shared::models::{Account, AccountStatus};
use crate::shared::utils::DbPool;

const EVENT_QUEUE_CAPACITY: usize = 512;
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Reconnect schedule for transient session errors: 1s, 2s, 5s, 15s,
/// then 60s for every further attempt.
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let secs = match attempt {
        0 | 1 => 1,
        2 => 2,
        3 => 5,
        4 => 15,
        _ => 60,
    };
    Duration::from_secs(secs)
}

#[derive(Debug, Default)]
struct ReceiverStats {
    connected: AtomicBool,
    last_event_unix: AtomicI64,
    reconnects: AtomicU32,
}

impl ReceiverStats {
    fn mark_event(&self) {
        self.connected.store(true, Ordering::Relaxed);
        self.last_event_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Read-only view of one running receiver, consumed by the health
/// monitor.
#[derive(Debug, Clone)]
pub struct ReceiverInfo {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub connected: bool,
    pub last_event_unix: Option<i64>,
    pub reconnects: u32,
    pub queue_depth: usize,
}

struct ReceiverHandle {
    tenant_id: Uuid,
    stats: Arc<ReceiverStats>,
    assignments: watch::Sender<HashSet<String>>,
    queue: mpsc::Sender<IncomingMessage>,
    reader: JoinHandle<()>,
    ingester: JoinHandle<()>,
}

/// Owns one long-lived receiver per active account: start/stop,
/// reconnect with bounded backoff, and escalation to `error`.
pub struct Supervisor {
    conn: DbPool,
    pipeline: Arc<Pipeline>,
    connector: Arc<dyn SessionConnector>,
    receivers: Mutex<HashMap<Uuid, ReceiverHandle>>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(
        conn: DbPool,
        pipeline: Arc<Pipeline>,
        connector: Arc<dyn SessionConnector>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            conn,
            pipeline,
            connector,
            receivers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Opens the session and registers the receiver. The first connect
    /// happens inline so activation reports artifact errors immediately.
    pub async fn start_account(&self, account: &Account) -> Result<(), ClientError> {
        self.stop_account(account.id).await;

        let stream = self.connector.connect(&account.session_path).await?;
        info!(
            "Receiver for account {} ({}) connected",
            account.id, account.name
        );

        let chats = self
            .assigned_chat_ids(account)
            .map_err(|e| ClientError::Transient(format!("assignment lookup failed: {e}")))?;

        let stats = Arc::new(ReceiverStats::default());
        stats.mark_event();

        let (assign_tx, assign_rx) = watch::channel(chats);
        let (queue_tx, queue_rx) = mpsc::channel::<IncomingMessage>(EVENT_QUEUE_CAPACITY);

        let ingester = {
            let pipeline = Arc::clone(&self.pipeline);
            let tenant = account.tenant_id;
            let account_id = account.id;
            let mut shutdown = self.shutdown.clone();
            let mut queue_rx = queue_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        next = queue_rx.recv() => match next {
                            Some(msg) => {
                                if let Err(e) =
                                    pipeline.ingest(tenant, IngestSource::Session, msg).await
                                {
                                    error!("Account {account_id}: pipeline error: {e}");
                                }
                            }
                            None => break,
                        },
                    }
                }
            })
        };

        let reader = {
            let conn = self.conn.clone();
            let connector = Arc::clone(&self.connector);
            let stats = Arc::clone(&stats);
            let shutdown = self.shutdown.clone();
            let queue_tx = queue_tx.clone();
            let session_path = account.session_path.clone();
            let account_id = account.id;
            tokio::spawn(async move {
                receiver_loop(
                    stream,
                    connector,
                    conn,
                    account_id,
                    session_path,
                    stats,
                    assign_rx,
                    queue_tx,
                    shutdown,
                )
                .await;
            })
        };

        let handle = ReceiverHandle {
            tenant_id: account.tenant_id,
            stats,
            assignments: assign_tx,
            queue: queue_tx,
            reader,
            ingester,
        };

        let mut receivers = self.receivers.lock().await;
        receivers.insert(account.id, handle);

        self.touch_last_activity(account.id);
        Ok(())
    }

    pub async fn stop_account(&self, account_id: Uuid) -> bool {
        let mut receivers = self.receivers.lock().await;
        if let Some(handle) = receivers.remove(&account_id) {
            handle.reader.abort();
            handle.ingester.abort();
            debug!("Receiver for account {account_id} stopped");
            true
        } else {
            false
        }
    }

    /// Replaces the chat set a running receiver listens on.
    pub async fn set_assignments(&self, account_id: Uuid, chat_ids: Vec<String>) -> bool {
        let receivers = self.receivers.lock().await;
        match receivers.get(&account_id) {
            Some(handle) => handle
                .assignments
                .send(chat_ids.into_iter().collect())
                .is_ok(),
            None => false,
        }
    }

    pub async fn is_running(&self, account_id: Uuid) -> bool {
        let receivers = self.receivers.lock().await;
        receivers.contains_key(&account_id)
    }

    pub async fn stats_snapshot(&self) -> Vec<ReceiverInfo> {
        let receivers = self.receivers.lock().await;
        receivers
            .iter()
            .map(|(account_id, handle)| {
                let last = handle.stats.last_event_unix.load(Ordering::Relaxed);
                ReceiverInfo {
                    account_id: *account_id,
                    tenant_id: handle.tenant_id,
                    connected: handle.stats.connected.load(Ordering::Relaxed),
                    last_event_unix: (last > 0).then_some(last),
                    reconnects: handle.stats.reconnects.load(Ordering::Relaxed),
                    queue_depth: EVENT_QUEUE_CAPACITY - handle.queue.capacity(),
                }
            })
            .collect()
    }

    /// Stop-and-start for the health monitor's `failed` verdict.
    pub async fn restart_account(&self, account_id: Uuid) {
        use crate::shared::models::schema::accounts::dsl::*;

        let account: Option<Account> = match self.conn.get() {
            Ok(mut conn) => accounts
                .filter(id.eq(account_id))
                .first(&mut conn)
                .optional()
                .unwrap_or(None),
            Err(e) => {
                error!("Restart of account {account_id} skipped: {e}");
                None
            }
        };

        let Some(account) = account else { return };
        if account.status != AccountStatus::Active.as_str() {
            return;
        }

        warn!("Restarting unhealthy receiver for account {account_id}");
        if let Err(e) = self.start_account(&account).await {
            error!("Restart of account {account_id} failed: {e}");
            mark_account_error(&self.conn, account_id, &e.to_string());
            self.stop_account(account_id).await;
        }
    }

    /// Brings receivers back up for every account left `active` by the
    /// previous run. Assignment caches are rebuilt by the balancer right
    /// after.
    pub async fn resume(&self) {
        use crate::shared::models::schema::accounts::dsl::*;

        let rows: Vec<Account> = match self.conn.get() {
            Ok(mut conn) => accounts
                .filter(status.eq(AccountStatus::Active.as_str()))
                .load(&mut conn)
                .unwrap_or_default(),
            Err(e) => {
                error!("Account resume skipped: {e}");
                return;
            }
        };

        for account in rows {
            if let Err(e) = self.start_account(&account).await {
                warn!("Account {} did not resume: {e}", account.id);
                mark_account_error(&self.conn, account.id, &e.to_string());
            }
        }
    }

    pub async fn stop_all(&self) {
        let mut receivers = self.receivers.lock().await;
        for (account_id, handle) in receivers.drain() {
            handle.reader.abort();
            handle.ingester.abort();
            debug!("Receiver for account {account_id} stopped on shutdown");
        }
    }

    fn assigned_chat_ids(&self, account: &Account) -> crate::shared::error::AppResult<HashSet<String>> {
        use crate::shared::models::schema::groups::dsl::*;
        let mut conn = self.conn.get()?;
        let chats: Vec<String> = groups
            .filter(tenant_id.eq(account.tenant_id))
            .filter(id.eq_any(&account.assigned_group_ids))
            .filter(is_active.eq(true))
            .select(group_id)
            .load(&mut conn)?;
        Ok(chats.into_iter().collect())
    }

    fn touch_last_activity(&self, account_id: Uuid) {
        use crate::shared::models::schema::accounts::dsl::*;
        if let Ok(mut conn) = self.conn.get() {
            let _ = diesel::update(accounts.filter(id.eq(account_id)))
                .set(last_activity.eq(Some(Utc::now())))
                .execute(&mut conn);
        }
    }
}

pub fn mark_account_error(conn: &DbPool, account_id: Uuid, message: &str) {
    use crate::shared::models::schema::accounts::dsl::*;
    match conn.get() {
        Ok(mut conn) => {
            if let Err(e) = diesel::update(accounts.filter(id.eq(account_id)))
                .set((
                    status.eq(AccountStatus::Error.as_str()),
                    last_error.eq(Some(message.to_string())),
                ))
                .execute(&mut conn)
            {
                error!("Failed to record error state for account {account_id}: {e}");
            }
        }
        Err(e) => error!("Failed to record error state for account {account_id}: {e}"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn receiver_loop(
    mut stream: Box<dyn crate::monitor::client::SessionStream>,
    connector: Arc<dyn SessionConnector>,
    conn: DbPool,
    account_id: Uuid,
    session_path: String,
    stats: Arc<ReceiverStats>,
    assignments: watch::Receiver<HashSet<String>>,
    queue: mpsc::Sender<IncomingMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut consecutive_failures: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.next_event() => event,
        };

        match event {
            Ok(ClientEvent::Message(msg)) => {
                stats.mark_event();
                consecutive_failures = 0;
                let watched = assignments.borrow().contains(&msg.chat_id);
                if watched && queue.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(ClientEvent::Other) => {
                stats.mark_event();
            }
            Err(e) if e.is_fatal() => {
                error!("Account {account_id}: fatal session error: {e}");
                mark_account_error(&conn, account_id, &e.to_string());
                break;
            }
            Err(e) => {
                stats.connected.store(false, Ordering::Relaxed);
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES {
                    error!(
                        "Account {account_id}: {consecutive_failures} consecutive failures; escalating"
                    );
                    mark_account_error(
                        &conn,
                        account_id,
                        &format!("connection lost after repeated retries: {e}"),
                    );
                    break;
                }

                let delay = reconnect_backoff(consecutive_failures);
                warn!(
                    "Account {account_id}: transient session error ({e}); reconnect {consecutive_failures}/{MAX_CONSECUTIVE_FAILURES} in {delay:?}"
                );
                stats.reconnects.fetch_add(1, Ordering::Relaxed);

                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                match connector.connect(&session_path).await {
                    Ok(new_stream) => {
                        stream = new_stream;
                        stats.mark_event();
                        info!("Account {account_id}: reconnected");
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Account {account_id}: fatal error on reconnect: {e}");
                        mark_account_error(&conn, account_id, &e.to_string());
                        break;
                    }
                    Err(e) => {
                        debug!("Account {account_id}: reconnect attempt failed: {e}");
                    }
                }
            }
        }
    }

    stats.connected.store(false, Ordering::Relaxed);
    debug!("Receiver loop for account {account_id} exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::Forwarder;
    use crate::monitor::client::DetachedConnector;
    use crate::shared::config::ForwardingConfig;
    use crate::telegram::bot_api::BotApi;
    use diesel::r2d2::ConnectionManager;
    use diesel::PgConnection;

    #[test]
    fn test_reconnect_backoff_schedule() {
        assert_eq!(reconnect_backoff(1), Duration::from_secs(1));
        assert_eq!(reconnect_backoff(2), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(3), Duration::from_secs(5));
        assert_eq!(reconnect_backoff(4), Duration::from_secs(15));
        assert_eq!(reconnect_backoff(5), Duration::from_secs(60));
        assert_eq!(reconnect_backoff(40), Duration::from_secs(60));
    }

    fn supervisor_without_store() -> (Supervisor, watch::Sender<bool>) {
        let manager =
            ConnectionManager::<PgConnection>::new("postgres://localhost/telewatch_test");
        let pool = diesel::r2d2::Pool::builder().max_size(1).build_unchecked(manager);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bot = Arc::new(BotApi::new(""));
        let forwarder = Arc::new(Forwarder::new(
            pool.clone(),
            bot,
            ForwardingConfig {
                messages_per_window: 20,
                window_seconds: 60,
                max_attempts: 5,
            },
            shutdown_rx.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(pool.clone(), forwarder));
        let supervisor = Supervisor::new(
            pool,
            pipeline,
            Arc::new(DetachedConnector),
            shutdown_rx,
        );
        (supervisor, shutdown_tx)
    }

    fn account_with_session(path: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "acc1".into(),
            session_path: path.into(),
            metadata_path: format!("{path}.json"),
            phone_number: None,
            username: None,
            first_name: None,
            last_name: None,
            status: AccountStatus::Pending.as_str().to_string(),
            last_error: None,
            assigned_group_ids: Vec::new(),
            created_at: Utc::now(),
            last_activity: None,
        }
    }

    #[tokio::test]
    async fn test_start_with_missing_artifact_is_fatal() {
        let (supervisor, _shutdown) = supervisor_without_store();
        let account = account_with_session("/nonexistent/path/acc1.session");

        let err = supervisor
            .start_account(&account)
            .await
            .expect_err("connect must fail");
        assert!(err.is_fatal());
        assert!(!supervisor.is_running(account.id).await);
    }

    #[tokio::test]
    async fn test_start_without_linked_client_reports_not_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session_path = dir.path().join("acc1.session");
        std::fs::write(&session_path, b"opaque").expect("write artifact");

        let (supervisor, _shutdown) = supervisor_without_store();
        let account = account_with_session(&session_path.to_string_lossy());

        let err = supervisor
            .start_account(&account)
            .await
            .expect_err("connect must fail");
        assert!(matches!(err, ClientError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_stop_unknown_account_is_noop() {
        let (supervisor, _shutdown) = supervisor_without_store();
        assert!(!supervisor.stop_account(Uuid::new_v4()).await);
        assert!(!supervisor.set_assignments(Uuid::new_v4(), vec!["-100500".into()]).await);
    }
}
