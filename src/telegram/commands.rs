use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::AppResult;
use crate::shared::models::{BotCommandLog, Group, MessageLog, User, WatchlistUser};
use crate::shared::state::AppState;
use crate::shared::utils::escape_markdown;
use crate::telegram::{TelegramCallbackQuery, TelegramMessage};

const LIST_LIMIT: i64 = 50;
const RECENT_MESSAGES: i64 = 10;

/// `/groups@botname list` → `("/groups", "list")`.
pub fn split_command(text: &str) -> (String, String) {
    let trimmed = text.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let args = parts.next().unwrap_or_default().trim().to_string();
    let command = head.split('@').next().unwrap_or(head).to_string();
    (command, args)
}

pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn main_menu_buttons() -> Vec<(String, String)> {
    vec![
        ("📊 Status".into(), "status".into()),
        ("📁 Groups".into(), "groups".into()),
        ("👥 Watchlist".into(), "watchlist".into()),
        ("💬 Messages".into(), "messages".into()),
        ("⚙️ Settings".into(), "settings".into()),
        ("❓ Help".into(), "help".into()),
    ]
}

fn back_button() -> Vec<(String, String)> {
    vec![("⬅️ Main menu".into(), "main_menu".into())]
}

fn onboarding_text() -> String {
    "*🤖 telewatch*\n\n\
     This Telegram account is not linked to an organization\\.\n\n\
     Sign in on the dashboard with Telegram login to create or join one, \
     then come back here for status and reports\\."
        .to_string()
}

fn help_text() -> String {
    "*📋 Available commands*\n\n\
     /status \\- monitoring status\n\
     /groups \\- monitored groups\n\
     /watchlist \\- watched users\n\
     /messages \\- recent captured messages\n\
     /menu \\- interactive menu\n\
     /help \\- this text\n\n\
     Management happens on the web dashboard\\."
        .to_string()
}

fn welcome_text() -> String {
    "*🤖 telewatch*\n\n\
     Welcome to your monitoring assistant\\.\n\n\
     Pick an item below, or use /help for the command list\\."
        .to_string()
}

pub fn render_status(
    groups: i64,
    watch_users: i64,
    messages: i64,
    connected_accounts: usize,
    total_accounts: usize,
) -> String {
    let stamp = Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
    format!(
        "*📊 Monitoring status*\n\n\
         • Groups: {groups}\n\
         • Watchlist users: {watch_users}\n\
         • Messages archived: {messages}\n\
         • Accounts online: {connected_accounts}/{total_accounts}\n\n\
         _Last updated: {}_",
        escape_markdown(&stamp)
    )
}

pub fn render_groups(rows: &[Group]) -> String {
    if rows.is_empty() {
        return "*📁 Monitored groups*\n\nNo groups are being monitored\\.".to_string();
    }
    let list = rows
        .iter()
        .map(|g| {
            // Code spans keep their content verbatim in MarkdownV2.
            format!("• {} \\(`{}`\\)", escape_markdown(&g.group_name), g.group_id)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("*📁 Monitored groups* \\({}\\)\n\n{list}", rows.len())
}

pub fn render_watchlist(rows: &[WatchlistUser]) -> String {
    if rows.is_empty() {
        return "*👥 Watchlist*\n\nNo users are being watched\\.".to_string();
    }
    let list = rows
        .iter()
        .map(|w| {
            let scope = if w.group_ids.is_empty() {
                "all groups".to_string()
            } else {
                format!("{} group\\(s\\)", w.group_ids.len())
            };
            format!("• @{} \\- {scope}", escape_markdown(&w.username))
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("*👥 Watchlist* \\({}\\)\n\n{list}", rows.len())
}

pub fn render_messages(rows: &[MessageLog]) -> String {
    if rows.is_empty() {
        return "*💬 Recent messages*\n\nNothing captured yet\\.".to_string();
    }
    let list = rows
        .iter()
        .map(|m| {
            let body = m.message_text.as_deref().unwrap_or("\u{2014}");
            format!(
                "• @{} in {}: {}",
                escape_markdown(&m.username),
                escape_markdown(&m.group_name),
                escape_markdown(&truncate_text(body, 48))
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("*💬 Recent messages*\n\n{list}")
}

fn settings_text() -> String {
    "*⚙️ Settings*\n\n\
     Accounts, destinations and plan changes are managed on the web \
     dashboard\\. This bot surface is read\\-only\\."
        .to_string()
}

fn resolve_tenant(state: &Arc<AppState>, from_telegram_id: i64) -> AppResult<Option<Uuid>> {
    use crate::shared::models::schema::users::dsl::*;
    let mut conn = state.conn.get()?;
    let user: Option<User> = users
        .filter(telegram_id.eq(from_telegram_id))
        .filter(is_active.eq(true))
        .first(&mut conn)
        .optional()?;
    Ok(user.map(|u| u.tenant_id))
}

fn record_command(
    state: &Arc<AppState>,
    tenant: Option<Uuid>,
    from_telegram_id: i64,
    cmd_name: &str,
    cmd_args: &str,
) -> AppResult<()> {
    use crate::shared::models::schema::bot_commands::dsl::*;
    let mut conn = state.conn.get()?;
    let row = BotCommandLog {
        id: Uuid::new_v4(),
        tenant_id: tenant,
        telegram_user_id: from_telegram_id,
        command: cmd_name.to_string(),
        args: cmd_args.to_string(),
        timestamp: Utc::now(),
    };
    diesel::insert_into(bot_commands).values(&row).execute(&mut conn)?;
    Ok(())
}

/// Tenant-scoped reply for one command or callback key; `None` keyboard
/// means a plain message.
async fn dispatch(
    state: &Arc<AppState>,
    tenant: Uuid,
    key: &str,
) -> AppResult<(String, Option<Vec<(String, String)>>)> {
    let reply = match key {
        "start" | "main_menu" | "menu" => (welcome_text(), Some(main_menu_buttons())),
        "help" => (help_text(), Some(back_button())),
        "settings" | "admin_menu" => (settings_text(), Some(back_button())),
        "status" => {
            let (group_count, watch_count, message_count) = {
                use crate::shared::models::schema::groups::dsl as g;
                use crate::shared::models::schema::message_logs::dsl as m;
                use crate::shared::models::schema::watchlist_users::dsl as w;
                let mut conn = state.conn.get()?;
                (
                    g::groups
                        .filter(g::tenant_id.eq(tenant))
                        .filter(g::is_active.eq(true))
                        .count()
                        .get_result::<i64>(&mut conn)?,
                    w::watchlist_users
                        .filter(w::tenant_id.eq(tenant))
                        .filter(w::is_active.eq(true))
                        .count()
                        .get_result::<i64>(&mut conn)?,
                    m::message_logs
                        .filter(m::tenant_id.eq(tenant))
                        .count()
                        .get_result::<i64>(&mut conn)?,
                )
            };
            let health = state.health.tenant_snapshot(tenant).await;
            let connected = health.iter().filter(|h| h.connected).count();
            (
                render_status(group_count, watch_count, message_count, connected, health.len()),
                Some(back_button()),
            )
        }
        "groups" => {
            use crate::shared::models::schema::groups::dsl::*;
            let mut conn = state.conn.get()?;
            let rows: Vec<Group> = groups
                .filter(tenant_id.eq(tenant))
                .filter(is_active.eq(true))
                .order(created_at.desc())
                .limit(LIST_LIMIT)
                .load(&mut conn)?;
            (render_groups(&rows), Some(back_button()))
        }
        "watchlist" => {
            use crate::shared::models::schema::watchlist_users::dsl::*;
            let mut conn = state.conn.get()?;
            let rows: Vec<WatchlistUser> = watchlist_users
                .filter(tenant_id.eq(tenant))
                .filter(is_active.eq(true))
                .order(created_at.desc())
                .limit(LIST_LIMIT)
                .load(&mut conn)?;
            (render_watchlist(&rows), Some(back_button()))
        }
        "messages" => {
            use crate::shared::models::schema::message_logs::dsl::*;
            let mut conn = state.conn.get()?;
            let rows: Vec<MessageLog> = message_logs
                .filter(tenant_id.eq(tenant))
                .order(timestamp.desc())
                .limit(RECENT_MESSAGES)
                .load(&mut conn)?;
            (render_messages(&rows), Some(back_button()))
        }
        _ => (
            "Unknown command\\. Use /help to see what I understand\\.".to_string(),
            None,
        ),
    };
    Ok(reply)
}

pub async fn handle_command(state: &Arc<AppState>, message: &TelegramMessage) -> AppResult<()> {
    let Some(from) = &message.from else {
        return Ok(());
    };
    let chat_id = message.chat.id.to_string();
    let text = message.text.clone().unwrap_or_default();
    let (command, args) = split_command(&text);
    let key = command.trim_start_matches('/');

    let tenant = resolve_tenant(state, from.id)?;
    record_command(state, tenant, from.id, &command, &args)?;
    info!(
        "Bot command {command} from telegram_id={} (tenant: {:?})",
        from.id, tenant
    );

    let (reply, buttons) = match tenant {
        Some(tenant) => dispatch(state, tenant, key).await?,
        None => (onboarding_text(), None),
    };

    let result = match buttons {
        Some(buttons) => {
            state
                .bot
                .send_message_with_buttons(&chat_id, &reply, buttons)
                .await
        }
        None => state.bot.send_message(&chat_id, &reply).await,
    };
    if let Err(e) = result {
        warn!("Bot reply to chat {chat_id} failed: {e}");
    }
    Ok(())
}

pub async fn handle_callback(
    state: &Arc<AppState>,
    callback: &TelegramCallbackQuery,
) -> AppResult<()> {
    let Some(data) = callback.data.as_deref().filter(|d| !d.is_empty()) else {
        return Ok(());
    };
    let Some(chat_id) = callback
        .message
        .as_ref()
        .map(|m| m.chat.id.to_string())
    else {
        return Ok(());
    };

    let tenant = resolve_tenant(state, callback.from.id)?;
    record_command(
        state,
        tenant,
        callback.from.id,
        &format!("callback:{data}"),
        "",
    )?;

    let (reply, buttons) = match tenant {
        Some(tenant) => dispatch(state, tenant, data).await?,
        None => (onboarding_text(), None),
    };

    let result = match buttons {
        Some(buttons) => {
            state
                .bot
                .send_message_with_buttons(&chat_id, &reply, buttons)
                .await
        }
        None => state.bot.send_message(&chat_id, &reply).await,
    };
    if let Err(e) = result {
        warn!("Bot callback reply to chat {chat_id} failed: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("/start"), ("/start".into(), String::new()));
        assert_eq!(
            split_command("/groups@telewatch_bot"),
            ("/groups".into(), String::new())
        );
        assert_eq!(
            split_command("/messages  last week "),
            ("/messages".into(), "last week".into())
        );
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("0123456789", 10), "0123456789");
        assert_eq!(truncate_text("0123456789x", 10), "012345678…");
        // Multi-byte input must not split a char.
        assert_eq!(truncate_text("héllo wörld extra", 6), "héllo…");
    }

    #[test]
    fn test_render_status_escapes_timestamp() {
        let rendered = render_status(3, 2, 100, 1, 2);
        assert!(rendered.contains("Groups: 3"));
        assert!(rendered.contains("Accounts online: 1/2"));
        assert!(rendered.contains("\\-"));
    }

    #[test]
    fn test_render_empty_collections() {
        assert!(render_groups(&[]).contains("No groups"));
        assert!(render_watchlist(&[]).contains("No users"));
        assert!(render_messages(&[]).contains("Nothing captured"));
    }

    #[test]
    fn test_render_groups_escapes_names() {
        let rows = vec![Group {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            group_id: "-100500".into(),
            group_name: "Deals (VIP)".into(),
            group_type: "supergroup".into(),
            invite_link: None,
            description: None,
            is_active: true,
            created_at: Utc::now(),
        }];
        let rendered = render_groups(&rows);
        assert!(rendered.contains("Deals \\(VIP\\)"));
        assert!(rendered.contains("`-100500`"));
    }
}
