use axum::extract::{Json, Query, State};
use axum::routing::get;
use axum::Router;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{MessageLog, MessageType};
use crate::shared::state::AppState;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", get(list_messages))
        .route("/messages/search", get(search_messages))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub skip: Option<i64>,
}

fn page_bounds(limit: Option<i64>, skip: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let skip = skip.unwrap_or(0).max(0);
    (limit, skip)
}

/// LIKE patterns treat `%` and `_` as wildcards; user input should not.
fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<MessageLog>>> {
    if let Some(kind) = &query.message_type {
        if MessageType::parse(kind).is_none() {
            return Err(AppError::Validation(format!(
                "invalid message_type {kind:?}"
            )));
        }
    }

    use crate::shared::models::schema::message_logs::dsl::*;
    let mut conn = state.conn.get()?;
    let (limit, skip) = page_bounds(query.limit, query.skip);

    let mut q = message_logs
        .filter(tenant_id.eq(ctx.tenant_id))
        .into_boxed();
    if let Some(chat) = &query.group_id {
        q = q.filter(group_id.eq(chat.clone()));
    }
    if let Some(kind) = &query.message_type {
        q = q.filter(message_type.eq(kind.clone()));
    }
    if let Some(name) = &query.username {
        q = q.filter(username.ilike(like_pattern(name)));
    }

    let rows = q
        .order(timestamp.desc())
        .offset(skip)
        .limit(limit)
        .load::<MessageLog>(&mut conn)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub skip: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub messages: Vec<MessageLog>,
    pub total: i64,
    pub limit: i64,
    pub skip: i64,
}

pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let needle = query.q.trim();
    if needle.is_empty() {
        return Err(AppError::Validation("q must not be empty".into()));
    }

    use crate::shared::models::schema::message_logs::dsl::*;
    let mut conn = state.conn.get()?;
    let (limit, skip) = page_bounds(query.limit, query.skip);
    let pattern = like_pattern(needle);

    let rows = message_logs
        .filter(tenant_id.eq(ctx.tenant_id))
        .filter(
            message_text
                .assume_not_null()
                .ilike(pattern.clone())
                .or(username.ilike(pattern.clone()))
                .or(group_name.ilike(pattern.clone())),
        )
        .order(timestamp.desc())
        .offset(skip)
        .limit(limit)
        .load::<MessageLog>(&mut conn)?;

    let total: i64 = message_logs
        .filter(tenant_id.eq(ctx.tenant_id))
        .filter(
            message_text
                .assume_not_null()
                .ilike(pattern.clone())
                .or(username.ilike(pattern.clone()))
                .or(group_name.ilike(pattern)),
        )
        .count()
        .get_result(&mut conn)?;

    Ok(Json(SearchResponse {
        messages: rows,
        total,
        limit,
        skip,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds_defaults_and_clamps() {
        assert_eq!(page_bounds(None, None), (50, 0));
        assert_eq!(page_bounds(Some(10), Some(5)), (10, 5));
        assert_eq!(page_bounds(Some(0), Some(-3)), (1, 0));
        assert_eq!(page_bounds(Some(10_000), None), (200, 0));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("btc"), "%btc%");
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
    }
}
