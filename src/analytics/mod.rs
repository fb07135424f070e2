use axum::extract::{Json, State};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::forwarding::engine::OUTCOME_DELIVERED;
use crate::monitor::health::AccountHealth;
use crate::shared::error::AppResult;
use crate::shared::state::AppState;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/stats", get(stats))
}

#[derive(Debug, Serialize)]
pub struct UserCount {
    pub username: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TypeCount {
    pub message_type: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DestinationCount {
    pub destination_name: String,
    pub count: i64,
}

/// Rollup rows carry names only, never store ids.
#[derive(Debug, Serialize)]
pub struct RecentForward {
    pub username: String,
    pub group_name: String,
    pub destination_name: String,
    pub outcome: String,
    pub forwarded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_groups: i64,
    pub total_watchlist_users: i64,
    pub total_destinations: i64,
    pub total_messages: i64,
    pub messages_today: i64,
    pub total_forwarded: i64,
    pub forwarding_success_rate: f64,
    pub forwarded_today: i64,
    pub top_users: Vec<UserCount>,
    pub message_types: Vec<TypeCount>,
    pub top_destinations: Vec<DestinationCount>,
    pub recent_forwards: Vec<RecentForward>,
    pub account_health: Vec<AccountHealth>,
    pub last_updated: DateTime<Utc>,
}

pub fn success_rate(delivered: i64, attempts: i64) -> f64 {
    if attempts == 0 {
        return 100.0;
    }
    (delivered as f64 / attempts as f64 * 10_000.0).round() / 100.0
}

fn today_start() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> AppResult<Json<StatsResponse>> {
    use crate::shared::models::schema::destinations::dsl as d;
    use crate::shared::models::schema::forwarded_messages::dsl as f;
    use crate::shared::models::schema::groups::dsl as g;
    use crate::shared::models::schema::message_logs::dsl as m;
    use crate::shared::models::schema::watchlist_users::dsl as w;

    let tenant = ctx.tenant_id;
    let mut conn = state.conn.get()?;
    let midnight = today_start();

    let total_groups: i64 = g::groups
        .filter(g::tenant_id.eq(tenant))
        .filter(g::is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    let total_watchlist_users: i64 = w::watchlist_users
        .filter(w::tenant_id.eq(tenant))
        .filter(w::is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    let total_destinations: i64 = d::destinations
        .filter(d::tenant_id.eq(tenant))
        .filter(d::is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    let total_messages: i64 = m::message_logs
        .filter(m::tenant_id.eq(tenant))
        .count()
        .get_result(&mut conn)?;
    let messages_today: i64 = m::message_logs
        .filter(m::tenant_id.eq(tenant))
        .filter(m::timestamp.ge(midnight))
        .count()
        .get_result(&mut conn)?;

    let ledger_total: i64 = f::forwarded_messages
        .filter(f::tenant_id.eq(tenant))
        .count()
        .get_result(&mut conn)?;
    let total_forwarded: i64 = f::forwarded_messages
        .filter(f::tenant_id.eq(tenant))
        .filter(f::outcome.eq(OUTCOME_DELIVERED))
        .count()
        .get_result(&mut conn)?;
    let forwarded_today: i64 = f::forwarded_messages
        .filter(f::tenant_id.eq(tenant))
        .filter(f::outcome.eq(OUTCOME_DELIVERED))
        .filter(f::forwarded_at.ge(midnight))
        .count()
        .get_result(&mut conn)?;

    let mut top_users: Vec<(String, i64)> = m::message_logs
        .filter(m::tenant_id.eq(tenant))
        .group_by(m::username)
        .select((m::username, count_star()))
        .load(&mut conn)?;
    top_users.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_users.truncate(10);

    let mut message_types: Vec<(String, i64)> = m::message_logs
        .filter(m::tenant_id.eq(tenant))
        .group_by(m::message_type)
        .select((m::message_type, count_star()))
        .load(&mut conn)?;
    message_types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut delivered_by_destination: Vec<(Uuid, i64)> = f::forwarded_messages
        .filter(f::tenant_id.eq(tenant))
        .filter(f::outcome.eq(OUTCOME_DELIVERED))
        .group_by(f::destination_id)
        .select((f::destination_id, count_star()))
        .load(&mut conn)?;
    delivered_by_destination.sort_by(|a, b| b.1.cmp(&a.1));
    delivered_by_destination.truncate(10);

    let destination_names: HashMap<Uuid, String> = d::destinations
        .filter(d::tenant_id.eq(tenant))
        .select((d::id, d::destination_name))
        .load::<(Uuid, String)>(&mut conn)?
        .into_iter()
        .collect();

    let recent_rows: Vec<crate::shared::models::ForwardedMessage> = f::forwarded_messages
        .filter(f::tenant_id.eq(tenant))
        .order(f::forwarded_at.desc())
        .limit(10)
        .load(&mut conn)?;

    let response = StatsResponse {
        total_groups,
        total_watchlist_users,
        total_destinations,
        total_messages,
        messages_today,
        total_forwarded,
        forwarding_success_rate: success_rate(total_forwarded, ledger_total),
        forwarded_today,
        top_users: top_users
            .into_iter()
            .map(|(username, count)| UserCount { username, count })
            .collect(),
        message_types: message_types
            .into_iter()
            .map(|(message_type, count)| TypeCount { message_type, count })
            .collect(),
        top_destinations: delivered_by_destination
            .into_iter()
            .map(|(dest, count)| DestinationCount {
                destination_name: destination_names
                    .get(&dest)
                    .cloned()
                    .unwrap_or_else(|| "(removed)".to_string()),
                count,
            })
            .collect(),
        recent_forwards: recent_rows
            .into_iter()
            .map(|row| RecentForward {
                username: row.username,
                group_name: row.group_name,
                destination_name: destination_names
                    .get(&row.destination_id)
                    .cloned()
                    .unwrap_or_else(|| "(removed)".to_string()),
                outcome: row.outcome,
                forwarded_at: row.forwarded_at,
            })
            .collect(),
        account_health: state.health.tenant_snapshot(tenant).await,
        last_updated: Utc::now(),
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        assert_eq!(success_rate(0, 0), 100.0);
        assert_eq!(success_rate(1, 2), 50.0);
        assert_eq!(success_rate(2, 3), 66.67);
        assert_eq!(success_rate(5, 5), 100.0);
        assert_eq!(success_rate(0, 4), 0.0);
    }
}
