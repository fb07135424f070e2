use axum::extract::{Json, Path, Query, State};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::WatchlistUser;
use crate::shared::state::AppState;
use crate::shared::utils::normalize_username;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/watchlist", get(list_watchlist).post(create_watch_user))
        .route(
            "/watchlist/:id",
            get(get_watch_user)
                .put(update_watch_user)
                .delete(delete_watch_user),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_watchlist(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<WatchlistUser>>> {
    use crate::shared::models::schema::watchlist_users::dsl::*;
    let mut conn = state.conn.get()?;

    let mut q = watchlist_users
        .filter(tenant_id.eq(ctx.tenant_id))
        .into_boxed();
    if !query.include_inactive {
        q = q.filter(is_active.eq(true));
    }
    let rows = q.order(created_at.desc()).load::<WatchlistUser>(&mut conn)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchUserRequest {
    pub username: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub forwarding_destination_ids: Vec<Uuid>,
}

/// Referential invariant: scoped groups and destinations must be active
/// rows of this tenant.
fn validate_references(
    conn: &mut PgConnection,
    tenant: Uuid,
    body: &WatchUserRequest,
) -> AppResult<()> {
    use crate::shared::models::schema::destinations::dsl as destinations;
    use crate::shared::models::schema::groups::dsl as groups;

    if !body.group_ids.is_empty() {
        let known: i64 = groups::groups
            .filter(groups::tenant_id.eq(tenant))
            .filter(groups::is_active.eq(true))
            .filter(groups::id.eq_any(&body.group_ids))
            .count()
            .get_result(conn)?;
        if known != body.group_ids.len() as i64 {
            return Err(AppError::Validation(
                "group_ids contains an unknown or inactive group".into(),
            ));
        }
    }

    if !body.forwarding_destination_ids.is_empty() {
        let known: i64 = destinations::destinations
            .filter(destinations::tenant_id.eq(tenant))
            .filter(destinations::is_active.eq(true))
            .filter(destinations::id.eq_any(&body.forwarding_destination_ids))
            .count()
            .get_result(conn)?;
        if known != body.forwarding_destination_ids.len() as i64 {
            return Err(AppError::Validation(
                "forwarding_destination_ids contains an unknown or inactive destination".into(),
            ));
        }
    }

    Ok(())
}

fn clean_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

pub async fn create_watch_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(body): Json<WatchUserRequest>,
) -> AppResult<Json<WatchlistUser>> {
    ctx.require_admin()?;

    let normalized = normalize_username(&body.username);
    if normalized.is_empty() {
        return Err(AppError::Validation("username is required".into()));
    }

    use crate::shared::models::schema::watchlist_users::dsl::*;
    let mut conn = state.conn.get()?;
    validate_references(&mut conn, ctx.tenant_id, &body)?;

    let duplicate: i64 = watchlist_users
        .filter(tenant_id.eq(ctx.tenant_id))
        .filter(username.eq(&normalized))
        .filter(is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    if duplicate > 0 {
        return Err(AppError::Conflict("user already in watchlist".into()));
    }

    let watch_user = WatchlistUser {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id,
        username: normalized,
        user_id: body.user_id,
        full_name: body.full_name,
        group_ids: body.group_ids,
        keywords: clean_keywords(&body.keywords),
        forwarding_destination_ids: body.forwarding_destination_ids,
        is_active: true,
        created_at: Utc::now(),
    };
    diesel::insert_into(watchlist_users)
        .values(&watch_user)
        .execute(&mut conn)?;

    info!(
        "Tenant {}: watching @{} ({} groups, {} keywords)",
        ctx.tenant_id,
        watch_user.username,
        watch_user.group_ids.len(),
        watch_user.keywords.len()
    );
    Ok(Json(watch_user))
}

pub async fn get_watch_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(watch_id): Path<Uuid>,
) -> AppResult<Json<WatchlistUser>> {
    use crate::shared::models::schema::watchlist_users::dsl::*;
    let mut conn = state.conn.get()?;

    let row: WatchlistUser = watchlist_users
        .filter(id.eq(watch_id))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("watchlist user not found".into()))?;
    Ok(Json(row))
}

pub async fn update_watch_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(watch_id): Path<Uuid>,
    Json(body): Json<WatchUserRequest>,
) -> AppResult<Json<WatchlistUser>> {
    ctx.require_admin()?;

    let normalized = normalize_username(&body.username);
    if normalized.is_empty() {
        return Err(AppError::Validation("username is required".into()));
    }

    use crate::shared::models::schema::watchlist_users::dsl::*;
    let mut conn = state.conn.get()?;

    let existing: WatchlistUser = watchlist_users
        .filter(id.eq(watch_id))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("watchlist user not found".into()))?;

    validate_references(&mut conn, ctx.tenant_id, &body)?;

    if existing.username != normalized {
        let duplicate: i64 = watchlist_users
            .filter(tenant_id.eq(ctx.tenant_id))
            .filter(username.eq(&normalized))
            .filter(is_active.eq(true))
            .filter(id.ne(existing.id))
            .count()
            .get_result(&mut conn)?;
        if duplicate > 0 {
            return Err(AppError::Conflict("user already in watchlist".into()));
        }
    }

    diesel::update(watchlist_users.filter(id.eq(existing.id)))
        .set((
            username.eq(normalized.clone()),
            user_id.eq(body.user_id.clone()),
            full_name.eq(body.full_name.clone()),
            group_ids.eq(body.group_ids.clone()),
            keywords.eq(clean_keywords(&body.keywords)),
            forwarding_destination_ids.eq(body.forwarding_destination_ids.clone()),
        ))
        .execute(&mut conn)?;

    let updated: WatchlistUser = watchlist_users.filter(id.eq(existing.id)).first(&mut conn)?;
    Ok(Json(updated))
}

pub async fn delete_watch_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(watch_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_admin()?;

    use crate::shared::models::schema::watchlist_users::dsl::*;
    let mut conn = state.conn.get()?;

    let updated = diesel::update(
        watchlist_users
            .filter(id.eq(watch_id))
            .filter(tenant_id.eq(ctx.tenant_id)),
    )
    .set(is_active.eq(false))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::NotFound("watchlist user not found".into()));
    }

    info!("Tenant {}: watchlist user {} removed", ctx.tenant_id, watch_id);
    Ok(Json(serde_json::json!({ "message": "User removed from watchlist" })))
}
