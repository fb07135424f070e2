use diesel::prelude::*;
use log::{debug, info, warn};
use regex::RegexBuilder;
use std::sync::Arc;
use uuid::Uuid;

use crate::forwarding::engine::{self, ForwardRequest, REASON_DESTINATION_INACTIVE};
use crate::forwarding::Forwarder;
use crate::monitor::client::IncomingMessage;
use crate::shared::error::AppResult;
use crate::shared::models::{Destination, Group, MessageLog, WatchlistUser};
use crate::shared::utils::{normalize_username, DbPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    Session,
    Webhook,
}

impl IngestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No active group, no watch user, or no keyword hit.
    Dropped,
    /// Already archived; duplicate receives emit no forwards.
    Duplicate,
    Archived { forwards: usize },
}

/// Matches incoming messages against the tenant's watch criteria,
/// appends archive rows, and emits forward requests.
pub struct Pipeline {
    conn: DbPool,
    forwarder: Arc<Forwarder>,
}

/// True when the watch user monitors this group: an empty scope means
/// every monitored group of the tenant.
pub fn scope_allows(watch: &WatchlistUser, group_uuid: Uuid) -> bool {
    watch.group_ids.is_empty() || watch.group_ids.contains(&group_uuid)
}

/// Keywords are tried as case-insensitive regular expressions; a pattern
/// that fails to compile degrades to plain substring matching.
pub fn keyword_matches(keywords: &[String], text: &str) -> Vec<String> {
    let mut matched = Vec::new();
    let lowered = text.to_lowercase();
    for keyword in keywords {
        let hit = match RegexBuilder::new(keyword).case_insensitive(true).build() {
            Ok(re) => re.is_match(text),
            Err(_) => lowered.contains(&keyword.to_lowercase()),
        };
        if hit {
            matched.push(keyword.clone());
        }
    }
    matched
}

/// One watch user's verdict for a message: scope first, then keywords.
/// `None` means not matched; an empty vec means matched with no keyword
/// restriction in place.
pub fn match_watch_user(
    watch: &WatchlistUser,
    group_uuid: Uuid,
    text: &str,
) -> Option<Vec<String>> {
    if !scope_allows(watch, group_uuid) {
        return None;
    }
    if watch.keywords.is_empty() {
        return Some(Vec::new());
    }
    let matched = keyword_matches(&watch.keywords, text);
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

impl Pipeline {
    pub fn new(conn: DbPool, forwarder: Arc<Forwarder>) -> Self {
        Self { conn, forwarder }
    }

    pub async fn ingest(
        &self,
        tenant: Uuid,
        via: IngestSource,
        msg: IncomingMessage,
    ) -> AppResult<IngestOutcome> {
        let (group, matches) = {
            let mut conn = self.conn.get()?;

            let Some(group) = self.monitored_group(&mut conn, tenant, &msg.chat_id)? else {
                return Ok(IngestOutcome::Dropped);
            };

            let candidates = self.candidate_watch_users(&mut conn, tenant, &msg)?;
            let text = msg.text.clone().unwrap_or_default();
            let matches: Vec<(WatchlistUser, Vec<String>)> = candidates
                .into_iter()
                .filter_map(|watch| {
                    match_watch_user(&watch, group.id, &text).map(|kw| (watch, kw))
                })
                .collect();

            (group, matches)
        };

        if matches.is_empty() {
            debug!(
                "Tenant {tenant}: message {} in {} matched no watch user",
                msg.message_id, msg.chat_id
            );
            return Ok(IngestOutcome::Dropped);
        }

        let mut matched_keywords: Vec<String> = Vec::new();
        for (_, keywords) in &matches {
            for keyword in keywords {
                if !matched_keywords.contains(keyword) {
                    matched_keywords.push(keyword.clone());
                }
            }
        }

        let log_row = match self.archive(tenant, via, &group, &msg, &matched_keywords)? {
            Some(row) => row,
            None => {
                debug!(
                    "Tenant {tenant}: duplicate message {} in {}; not re-forwarded",
                    msg.message_id, msg.chat_id
                );
                return Ok(IngestOutcome::Duplicate);
            }
        };

        let forwards = self.emit_forwards(tenant, &log_row, &msg, &matches).await?;

        info!(
            "Tenant {tenant}: archived message {} from @{} in {} ({} forward(s))",
            msg.message_id, log_row.username, group.group_name, forwards
        );
        Ok(IngestOutcome::Archived { forwards })
    }

    fn monitored_group(
        &self,
        conn: &mut PgConnection,
        tenant: Uuid,
        chat_id: &str,
    ) -> AppResult<Option<Group>> {
        use crate::shared::models::schema::groups::dsl::*;
        Ok(groups
            .filter(tenant_id.eq(tenant))
            .filter(group_id.eq(chat_id))
            .filter(is_active.eq(true))
            .first(conn)
            .optional()?)
    }

    fn candidate_watch_users(
        &self,
        conn: &mut PgConnection,
        tenant: Uuid,
        msg: &IncomingMessage,
    ) -> AppResult<Vec<WatchlistUser>> {
        use crate::shared::models::schema::watchlist_users::dsl::*;

        let normalized = msg
            .sender_username
            .as_deref()
            .map(normalize_username)
            .unwrap_or_default();

        Ok(watchlist_users
            .filter(tenant_id.eq(tenant))
            .filter(is_active.eq(true))
            .filter(
                username
                    .eq(normalized)
                    .or(user_id.assume_not_null().eq(msg.sender_id.clone())),
            )
            .load(conn)?)
    }

    /// Appends the archive row; `None` when `(tenant, group, message)` has
    /// been seen before.
    fn archive(
        &self,
        tenant: Uuid,
        via: IngestSource,
        group: &Group,
        msg: &IncomingMessage,
        matched: &[String],
    ) -> AppResult<Option<MessageLog>> {
        use crate::shared::models::schema::message_logs::dsl::*;
        let mut conn = self.conn.get()?;

        let external_id = msg.message_id.to_string();
        let seen: i64 = message_logs
            .filter(tenant_id.eq(tenant))
            .filter(group_id.eq(&group.group_id))
            .filter(message_id.eq(&external_id))
            .count()
            .get_result(&mut conn)?;
        if seen > 0 {
            return Ok(None);
        }

        let row = MessageLog {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            group_id: group.group_id.clone(),
            group_name: group.group_name.clone(),
            user_id: msg.sender_id.clone(),
            username: msg
                .sender_username
                .as_deref()
                .map(normalize_username)
                .unwrap_or_default(),
            message_id: external_id,
            message_text: msg.text.clone(),
            message_type: msg.message_type().as_str().to_string(),
            media_info: msg.media_info(),
            matched_keywords: matched.to_vec(),
            timestamp: msg.sent_at,
            ingested_via: via.as_str().to_string(),
        };
        diesel::insert_into(message_logs)
            .values(&row)
            .execute(&mut conn)?;
        Ok(Some(row))
    }

    async fn emit_forwards(
        &self,
        tenant: Uuid,
        log_row: &MessageLog,
        msg: &IncomingMessage,
        matches: &[(WatchlistUser, Vec<String>)],
    ) -> AppResult<usize> {
        use crate::shared::models::schema::destinations::dsl::*;

        let mut emitted = 0;
        for (watch, _) in matches {
            for dest_uuid in &watch.forwarding_destination_ids {
                let target: Option<Destination> = {
                    let mut conn = self.conn.get()?;
                    destinations
                        .filter(id.eq(dest_uuid))
                        .filter(tenant_id.eq(tenant))
                        .first(&mut conn)
                        .optional()?
                };

                let Some(target) = target else {
                    warn!(
                        "Tenant {tenant}: watch user @{} references unknown destination {dest_uuid}",
                        watch.username
                    );
                    continue;
                };

                if !target.is_active {
                    // Kept in the ledger so the fan-out stays auditable.
                    let mut conn = self.conn.get()?;
                    engine::append_ledger(
                        &mut conn,
                        tenant,
                        log_row.id,
                        &watch.username,
                        &log_row.group_name,
                        target.id,
                        engine::OUTCOME_FAILED,
                        Some(REASON_DESTINATION_INACTIVE),
                    )?;
                    emitted += 1;
                    continue;
                }

                self.forwarder
                    .enqueue(ForwardRequest {
                        tenant_id: tenant,
                        message_log_id: log_row.id,
                        username: watch.username.clone(),
                        group_name: log_row.group_name.clone(),
                        source_chat_id: msg.chat_id.clone(),
                        source_message_id: msg.message_id,
                        message_text: msg.text.clone(),
                        message_type: msg.message_type(),
                        sent_at: msg.sent_at,
                        destination_id: target.id,
                        destination_chat_id: target.destination_id.clone(),
                        destination_name: target.destination_name.clone(),
                    })
                    .await;
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn watch_user(keywords: &[&str], group_ids: Vec<Uuid>) -> WatchlistUser {
        WatchlistUser {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            username: "alice".into(),
            user_id: None,
            full_name: None,
            group_ids,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            forwarding_destination_ids: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let matched = keyword_matches(
            &["btc".to_string(), "eth".to_string()],
            "just bought BTC today",
        );
        assert_eq!(matched, vec!["btc".to_string()]);
    }

    #[test]
    fn test_keyword_regex_patterns() {
        let matched = keyword_matches(&[r"bt[cs]".to_string()], "selling BTS tokens");
        assert_eq!(matched, vec![r"bt[cs]".to_string()]);
    }

    #[test]
    fn test_broken_regex_falls_back_to_substring() {
        // "c++(" is not a valid pattern; the raw text still matches.
        let matched = keyword_matches(&["c++(".to_string()], "learning C++( basics");
        assert_eq!(matched, vec!["c++(".to_string()]);
        assert!(keyword_matches(&["c++(".to_string()], "plain text").is_empty());
    }

    #[test]
    fn test_scoped_watch_user_matches_only_its_groups() {
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        let watch = watch_user(&["btc", "eth"], vec![g1]);

        // In-scope group with a keyword hit.
        assert_eq!(
            match_watch_user(&watch, g1, "just bought BTC today"),
            Some(vec!["btc".to_string()])
        );
        // Same message in an out-of-scope group.
        assert_eq!(match_watch_user(&watch, g2, "just bought BTC today"), None);
        // In-scope group without any keyword.
        assert_eq!(match_watch_user(&watch, g1, "hello"), None);
    }

    #[test]
    fn test_global_watch_user_matches_any_group() {
        let watch = watch_user(&[], vec![]);
        assert_eq!(
            match_watch_user(&watch, Uuid::new_v4(), "anything at all"),
            Some(vec![])
        );
    }

    #[test]
    fn test_empty_keywords_match_all_text() {
        let g1 = Uuid::new_v4();
        let watch = watch_user(&[], vec![g1]);
        assert_eq!(match_watch_user(&watch, g1, ""), Some(vec![]));
    }

    #[test]
    fn test_ingest_source_labels() {
        assert_eq!(IngestSource::Session.as_str(), "session");
        assert_eq!(IngestSource::Webhook.as_str(), "webhook");
    }
}
