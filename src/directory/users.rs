use axum::extract::{Json, Path, State};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{Role, User};
use crate::shared::state::AppState;

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> AppResult<Json<Vec<User>>> {
    ctx.require_admin()?;

    use crate::shared::models::schema::users::dsl::*;
    let mut conn = state.conn.get()?;
    let rows = users
        .filter(tenant_id.eq(ctx.tenant_id))
        .order(created_at.asc())
        .load::<User>(&mut conn)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InviteUserRequest {
    pub telegram_id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub role: String,
}

pub async fn invite_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(body): Json<InviteUserRequest>,
) -> AppResult<Json<User>> {
    ctx.require_admin()?;

    let invited_role = Role::parse(&body.role)
        .ok_or_else(|| AppError::Validation(format!("invalid role {:?}", body.role)))?;
    if invited_role == Role::Owner {
        return Err(AppError::Validation(
            "an organization has exactly one owner".into(),
        ));
    }
    if body.first_name.trim().is_empty() {
        return Err(AppError::Validation("first_name is required".into()));
    }

    use crate::shared::models::schema::users::dsl::*;
    let mut conn = state.conn.get()?;

    let taken: i64 = users
        .filter(telegram_id.eq(body.telegram_id))
        .count()
        .get_result(&mut conn)?;
    if taken > 0 {
        return Err(AppError::Conflict(
            "telegram account already registered".into(),
        ));
    }

    let user = User {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id,
        telegram_id: body.telegram_id,
        username: body.username,
        first_name: body.first_name.trim().to_string(),
        last_name: body.last_name,
        photo_url: None,
        role: invited_role.as_str().to_string(),
        is_active: true,
        created_at: Utc::now(),
        last_login: None,
    };
    diesel::insert_into(users).values(&user).execute(&mut conn)?;

    info!(
        "Invited user telegram_id={} as {} into tenant {}",
        user.telegram_id, user.role, ctx.tenant_id
    );
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRoleRequest {
    pub role: String,
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(body): Json<UpdateRoleRequest>,
) -> AppResult<Json<User>> {
    ctx.require_owner()?;

    let new_role = Role::parse(&body.role)
        .ok_or_else(|| AppError::Validation(format!("invalid role {:?}", body.role)))?;
    if new_role == Role::Owner {
        return Err(AppError::Validation(
            "ownership cannot be reassigned through this endpoint".into(),
        ));
    }

    use crate::shared::models::schema::users::dsl::*;
    let mut conn = state.conn.get()?;

    let target: User = users
        .filter(id.eq(user_id))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    if target.role == Role::Owner.as_str() {
        return Err(AppError::Validation(
            "the owner role cannot be changed".into(),
        ));
    }

    diesel::update(users.filter(id.eq(target.id)))
        .set(role.eq(new_role.as_str()))
        .execute(&mut conn)?;

    info!(
        "Tenant {}: user {} role {} -> {}",
        ctx.tenant_id,
        target.id,
        target.role,
        new_role.as_str()
    );

    Ok(Json(User {
        role: new_role.as_str().to_string(),
        ..target
    }))
}

pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_admin()?;

    use crate::shared::models::schema::users::dsl::*;
    let mut conn = state.conn.get()?;

    let target: User = users
        .filter(id.eq(user_id))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    if target.role == Role::Owner.as_str() {
        return Err(AppError::Validation("the owner cannot be deactivated".into()));
    }

    diesel::update(users.filter(id.eq(target.id)))
        .set(is_active.eq(false))
        .execute(&mut conn)?;

    info!("Tenant {}: user {} deactivated", ctx.tenant_id, target.id);
    Ok(Json(serde_json::json!({ "message": "User deactivated" })))
}
