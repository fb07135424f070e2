use axum::extract::{Json, Path, Query, State};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use diesel::prelude::*;
use log::{error, info};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::monitor::balancer;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::Group;
use crate::shared::state::AppState;

const GROUP_TYPES: &[&str] = &["group", "supergroup", "channel"];

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route(
            "/groups/:id",
            get(get_group).put(update_group).delete(delete_group),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Group>>> {
    use crate::shared::models::schema::groups::dsl::*;
    let mut conn = state.conn.get()?;

    let mut q = groups.filter(tenant_id.eq(ctx.tenant_id)).into_boxed();
    if !query.include_inactive {
        q = q.filter(is_active.eq(true));
    }
    let rows = q.order(created_at.desc()).load::<Group>(&mut conn)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupRequest {
    pub group_id: String,
    pub group_name: String,
    #[serde(default = "default_group_type")]
    pub group_type: String,
    #[serde(default)]
    pub invite_link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_group_type() -> String {
    "group".to_string()
}

fn validate_request(body: &GroupRequest) -> AppResult<()> {
    if body.group_id.trim().is_empty() {
        return Err(AppError::Validation("group_id is required".into()));
    }
    if body.group_name.trim().is_empty() {
        return Err(AppError::Validation("group_name is required".into()));
    }
    if !GROUP_TYPES.contains(&body.group_type.as_str()) {
        return Err(AppError::Validation(format!(
            "invalid group_type {:?}; expected one of group, supergroup, channel",
            body.group_type
        )));
    }
    Ok(())
}

pub async fn create_group(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(body): Json<GroupRequest>,
) -> AppResult<Json<Group>> {
    ctx.require_admin()?;
    validate_request(&body)?;

    use crate::shared::models::schema::groups::dsl::*;
    let mut conn = state.conn.get()?;

    let duplicate: i64 = groups
        .filter(tenant_id.eq(ctx.tenant_id))
        .filter(group_id.eq(body.group_id.trim()))
        .filter(is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    if duplicate > 0 {
        return Err(AppError::Conflict("group already monitored".into()));
    }

    let group = Group {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id,
        group_id: body.group_id.trim().to_string(),
        group_name: body.group_name.trim().to_string(),
        group_type: body.group_type,
        invite_link: body.invite_link,
        description: body.description,
        is_active: true,
        created_at: Utc::now(),
    };
    diesel::insert_into(groups).values(&group).execute(&mut conn)?;
    drop(conn);

    info!(
        "Tenant {}: monitoring group {} ({})",
        ctx.tenant_id, group.group_name, group.group_id
    );

    if let Err(e) = balancer::rebalance_tenant(&state, ctx.tenant_id).await {
        error!("Rebalance after group create failed: {e}");
    }

    Ok(Json(group))
}

pub async fn get_group(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(group_uuid): Path<Uuid>,
) -> AppResult<Json<Group>> {
    use crate::shared::models::schema::groups::dsl::*;
    let mut conn = state.conn.get()?;

    let group: Group = groups
        .filter(id.eq(group_uuid))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;
    Ok(Json(group))
}

pub async fn update_group(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(group_uuid): Path<Uuid>,
    Json(body): Json<GroupRequest>,
) -> AppResult<Json<Group>> {
    ctx.require_admin()?;
    validate_request(&body)?;

    use crate::shared::models::schema::groups::dsl::*;
    let mut conn = state.conn.get()?;

    let existing: Group = groups
        .filter(id.eq(group_uuid))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("group not found".into()))?;

    if existing.group_id != body.group_id.trim() {
        let duplicate: i64 = groups
            .filter(tenant_id.eq(ctx.tenant_id))
            .filter(group_id.eq(body.group_id.trim()))
            .filter(is_active.eq(true))
            .filter(id.ne(existing.id))
            .count()
            .get_result(&mut conn)?;
        if duplicate > 0 {
            return Err(AppError::Conflict("group already monitored".into()));
        }
    }

    diesel::update(groups.filter(id.eq(existing.id)))
        .set((
            group_id.eq(body.group_id.trim().to_string()),
            group_name.eq(body.group_name.trim().to_string()),
            group_type.eq(body.group_type.clone()),
            invite_link.eq(body.invite_link.clone()),
            description.eq(body.description.clone()),
        ))
        .execute(&mut conn)?;

    let updated: Group = groups.filter(id.eq(existing.id)).first(&mut conn)?;
    Ok(Json(updated))
}

pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(group_uuid): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_admin()?;

    use crate::shared::models::schema::groups::dsl::*;
    let mut conn = state.conn.get()?;

    let updated = diesel::update(
        groups
            .filter(id.eq(group_uuid))
            .filter(tenant_id.eq(ctx.tenant_id)),
    )
    .set(is_active.eq(false))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::NotFound("group not found".into()));
    }
    drop(conn);

    info!("Tenant {}: group {} removed from monitoring", ctx.tenant_id, group_uuid);

    if let Err(e) = balancer::rebalance_tenant(&state, ctx.tenant_id).await {
        error!("Rebalance after group delete failed: {e}");
    }

    Ok(Json(serde_json::json!({ "message": "Group removed from monitoring" })))
}
