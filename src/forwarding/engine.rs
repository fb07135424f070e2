use chrono::{DateTime, Utc};
use diesel::prelude::*;
use governor::{Quota, RateLimiter};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::shared::config::ForwardingConfig;
use crate::shared::models::{ForwardedMessage, MessageType};
use crate::shared::utils::{escape_markdown, DbPool};
use crate::telegram::bot_api::{BotApi, BotApiError};

const QUEUE_CAPACITY: usize = 256;

pub const OUTCOME_DELIVERED: &str = "delivered";
pub const OUTCOME_FAILED: &str = "failed";
pub const REASON_DESTINATION_INACTIVE: &str = "destination_inactive";

/// One requested delivery: a matched archive row bound for one destination.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub tenant_id: Uuid,
    pub message_log_id: Uuid,
    pub username: String,
    pub group_name: String,
    pub source_chat_id: String,
    pub source_message_id: i64,
    pub message_text: Option<String>,
    pub message_type: MessageType,
    pub sent_at: DateTime<Utc>,
    pub destination_id: Uuid,
    pub destination_chat_id: String,
    pub destination_name: String,
}

/// Per-destination single-writer queues with token-bucket pacing. The
/// pipeline enqueues; one long-lived task per destination drains in FIFO
/// order and settles every request into exactly one ledger row.
pub struct Forwarder {
    conn: DbPool,
    bot: Arc<BotApi>,
    limits: ForwardingConfig,
    queues: Mutex<HashMap<Uuid, mpsc::Sender<ForwardRequest>>>,
    shutdown: watch::Receiver<bool>,
}

impl Forwarder {
    pub fn new(
        conn: DbPool,
        bot: Arc<BotApi>,
        limits: ForwardingConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            conn,
            bot,
            limits,
            queues: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub async fn enqueue(&self, request: ForwardRequest) {
        let sender = self.sender_for(request.destination_id).await;
        if sender.send(request).await.is_err() {
            error!("Forward queue closed; delivery dropped");
        }
    }

    async fn sender_for(&self, destination: Uuid) -> mpsc::Sender<ForwardRequest> {
        let mut queues = self.queues.lock().await;
        if let Some(existing) = queues.get(&destination) {
            if !existing.is_closed() {
                return existing.clone();
            }
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = DeliveryTask {
            conn: self.conn.clone(),
            bot: Arc::clone(&self.bot),
            limits: self.limits.clone(),
            destination,
        };
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { task.run(rx, shutdown).await });
        queues.insert(destination, tx.clone());
        tx
    }

}

struct DeliveryTask {
    conn: DbPool,
    bot: Arc<BotApi>,
    limits: ForwardingConfig,
    destination: Uuid,
}

impl DeliveryTask {
    async fn run(self, mut rx: mpsc::Receiver<ForwardRequest>, mut shutdown: watch::Receiver<bool>) {
        debug!("Delivery task started for destination {}", self.destination);
        let limiter = RateLimiter::direct(forward_quota(
            self.limits.messages_per_window,
            self.limits.window_seconds,
        ));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Delivery task for destination {} draining", self.destination);
                    break;
                }
                next = rx.recv() => {
                    match next {
                        Some(request) => {
                            limiter.until_ready().await;
                            self.settle(request).await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Delivers with retry and writes the single terminal ledger row.
    async fn settle(&self, request: ForwardRequest) {
        let outcome = self.deliver_with_retry(&request).await;
        let (outcome_str, reason) = match &outcome {
            Ok(()) => (OUTCOME_DELIVERED, None),
            Err(e) => (OUTCOME_FAILED, Some(e.to_string())),
        };

        if let Err(e) = self.record(&request, outcome_str, reason.as_deref()) {
            error!(
                "Ledger write failed for message {} -> destination {}: {e}",
                request.message_log_id, request.destination_id
            );
        }
    }

    async fn deliver_with_retry(&self, request: &ForwardRequest) -> Result<(), BotApiError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.deliver(request).await {
                Ok(()) => {
                    debug!(
                        "Delivered message {} to {} (attempt {attempt})",
                        request.message_log_id, request.destination_name
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.limits.max_attempts => {
                    let delay = e
                        .retry_after()
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| backoff_delay(attempt));
                    warn!(
                        "Delivery to {} failed (attempt {attempt}): {e}; retrying in {delay:?}",
                        request.destination_name
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        "Delivery to {} failed terminally after {attempt} attempt(s): {e}",
                        request.destination_name
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn deliver(&self, request: &ForwardRequest) -> Result<(), BotApiError> {
        let text = render_forward(request);
        self.bot
            .send_message(&request.destination_chat_id, &text)
            .await?;

        // Media is re-delivered by reference when the bot shares the source
        // chat; the text notice above already carries the fallback link.
        if request.message_type != MessageType::Text {
            match self
                .bot
                .copy_message(
                    &request.destination_chat_id,
                    &request.source_chat_id,
                    request.source_message_id,
                )
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    debug!(
                        "copyMessage into {} unavailable: {e}",
                        request.destination_name
                    );
                }
            }
        }

        Ok(())
    }

    fn record(
        &self,
        request: &ForwardRequest,
        outcome_value: &str,
        reason: Option<&str>,
    ) -> crate::shared::error::AppResult<()> {
        let mut conn = self.conn.get()?;
        append_ledger(
            &mut conn,
            request.tenant_id,
            request.message_log_id,
            &request.username,
            &request.group_name,
            request.destination_id,
            outcome_value,
            reason,
        )?;

        use crate::shared::models::schema::destinations::dsl::*;
        if outcome_value == OUTCOME_DELIVERED {
            diesel::update(destinations.filter(id.eq(request.destination_id)))
                .set((
                    message_count.eq(message_count + 1),
                    last_forwarded.eq(Some(Utc::now())),
                ))
                .execute(&mut conn)?;
        } else if let Some(reason_text) = reason {
            diesel::update(destinations.filter(id.eq(request.destination_id)))
                .set(last_error.eq(Some(reason_text.to_string())))
                .execute(&mut conn)?;
        }

        Ok(())
    }
}

/// Appends one ledger row. Also used by the pipeline to account for
/// destinations that were inactive at emit time.
pub fn append_ledger(
    conn: &mut PgConnection,
    tenant: Uuid,
    message_log: Uuid,
    watch_username: &str,
    source_group_name: &str,
    destination: Uuid,
    outcome_value: &str,
    reason: Option<&str>,
) -> crate::shared::error::AppResult<()> {
    use crate::shared::models::schema::forwarded_messages::dsl::*;

    let row = ForwardedMessage {
        id: Uuid::new_v4(),
        tenant_id: tenant,
        message_log_id: message_log,
        username: watch_username.to_string(),
        group_name: source_group_name.to_string(),
        destination_id: destination,
        forwarded_at: Utc::now(),
        outcome: outcome_value.to_string(),
        failure_reason: reason.map(|r| r.to_string()),
    };
    diesel::insert_into(forwarded_messages)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

/// 20 messages per 60 seconds means one token every 3 seconds with a full
/// bucket to absorb bursts.
pub fn forward_quota(messages_per_window: u32, window_seconds: u64) -> Quota {
    let per = messages_per_window.max(1);
    let period = Duration::from_secs_f64(window_seconds.max(1) as f64 / per as f64);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(per).unwrap_or(NonZeroU32::MIN))
}

pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64 << (attempt.saturating_sub(1)).min(5);
    Duration::from_secs(secs.min(60))
}

/// Attribution header, body (or media reference), and tenant routing
/// footer, all MarkdownV2-escaped.
pub fn render_forward(request: &ForwardRequest) -> String {
    let header = format!(
        "📨 *@{}* in *{}* at {}",
        escape_markdown(&request.username),
        escape_markdown(&request.group_name),
        escape_markdown(&request.sent_at.format("%Y-%m-%d %H:%M UTC").to_string()),
    );

    let body = match (&request.message_text, request.message_type) {
        (Some(text), _) if !text.is_empty() => escape_markdown(text),
        (_, kind) => match media_link(&request.source_chat_id, request.source_message_id) {
            Some(link) => format!(
                "\\[{}\\] {}",
                escape_markdown(kind.as_str()),
                escape_markdown(&link)
            ),
            None => format!("\\[{}\\]", escape_markdown(kind.as_str())),
        },
    };

    let footer = format!("_tw\\:{}_", escape_markdown(&request.tenant_id.to_string()));

    format!("{header}\n\n{body}\n\n{footer}")
}

/// Public t.me deep link for supergroup/channel messages. Private groups
/// have no linkable form.
pub fn media_link(chat_id: &str, message_id: i64) -> Option<String> {
    chat_id
        .strip_prefix("-100")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .map(|internal| format!("https://t.me/c/{internal}/{message_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }

    #[test]
    fn test_media_link() {
        assert_eq!(
            media_link("-1001234567890", 42).as_deref(),
            Some("https://t.me/c/1234567890/42")
        );
        assert_eq!(media_link("-987654", 42), None);
        assert_eq!(media_link("12345", 42), None);
        assert_eq!(media_link("-100", 42), None);
    }

    #[test]
    fn test_render_forward_escapes_markdown() {
        let request = ForwardRequest {
            tenant_id: Uuid::new_v4(),
            message_log_id: Uuid::new_v4(),
            username: "alice_trader".into(),
            group_name: "Signals (VIP)".into(),
            source_chat_id: "-1001234567890".into(),
            source_message_id: 7,
            message_text: Some("bought 1.5 BTC!".into()),
            message_type: MessageType::Text,
            sent_at: Utc::now(),
            destination_id: Uuid::new_v4(),
            destination_chat_id: "-100999".into(),
            destination_name: "archive".into(),
        };

        let rendered = render_forward(&request);
        assert!(rendered.contains("@alice\\_trader"));
        assert!(rendered.contains("Signals \\(VIP\\)"));
        assert!(rendered.contains("bought 1\\.5 BTC\\!"));
        assert!(rendered.contains("_tw\\:"));
    }

    #[test]
    fn test_render_forward_media_without_text_links_source() {
        let request = ForwardRequest {
            tenant_id: Uuid::new_v4(),
            message_log_id: Uuid::new_v4(),
            username: "alice".into(),
            group_name: "g".into(),
            source_chat_id: "-1001234567890".into(),
            source_message_id: 9,
            message_text: None,
            message_type: MessageType::Photo,
            sent_at: Utc::now(),
            destination_id: Uuid::new_v4(),
            destination_chat_id: "-100999".into(),
            destination_name: "archive".into(),
        };

        let rendered = render_forward(&request);
        assert!(rendered.contains("photo"));
        assert!(rendered.contains("t\\.me/c/1234567890/9"));
    }

    #[tokio::test]
    async fn test_token_bucket_paces_after_burst() {
        // 2 per second: two immediate, then one every 500ms.
        let limiter = RateLimiter::direct(forward_quota(2, 1));
        let start = std::time::Instant::now();
        for _ in 0..4 {
            limiter.until_ready().await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_forward_quota_default_shape() {
        // The default 20/60s bucket replenishes one token every 3 seconds.
        let quota = forward_quota(20, 60);
        assert_eq!(quota.burst_size().get(), 20);
        assert_eq!(quota.replenish_interval(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_one_queue_per_destination() {
        use diesel::r2d2::ConnectionManager;
        use diesel::PgConnection;

        let manager =
            ConnectionManager::<PgConnection>::new("postgres://localhost/telewatch_test");
        let pool = diesel::r2d2::Pool::builder().max_size(1).build_unchecked(manager);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let forwarder = Forwarder::new(
            pool,
            Arc::new(BotApi::new("")),
            crate::shared::config::ForwardingConfig {
                messages_per_window: 20,
                window_seconds: 60,
                max_attempts: 5,
            },
            shutdown_rx,
        );

        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();

        let first = forwarder.sender_for(d1).await;
        let again = forwarder.sender_for(d1).await;
        let other = forwarder.sender_for(d2).await;

        assert!(first.same_channel(&again));
        assert!(!first.same_channel(&other));
    }
}
