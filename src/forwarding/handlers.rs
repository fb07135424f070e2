use axum::extract::{Json, Query, State};
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::shared::error::AppResult;
use crate::shared::models::ForwardedMessage;
use crate::shared::state::AppState;
use crate::shared::utils::normalize_username;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub destination_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub skip: Option<i64>,
}

pub async fn list_forwarded(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<LedgerQuery>,
) -> AppResult<Json<Vec<ForwardedMessage>>> {
    use crate::shared::models::schema::forwarded_messages::dsl::*;
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let skip = query.skip.unwrap_or(0).max(0);

    let mut q = forwarded_messages
        .filter(tenant_id.eq(ctx.tenant_id))
        .into_boxed();
    if let Some(name) = &query.username {
        q = q.filter(username.eq(normalize_username(name)));
    }
    if let Some(dest) = query.destination_id {
        q = q.filter(destination_id.eq(dest));
    }

    let rows = q
        .order(forwarded_at.desc())
        .offset(skip)
        .limit(limit)
        .load::<ForwardedMessage>(&mut conn)?;
    Ok(Json(rows))
}
