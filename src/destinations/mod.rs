use axum::extract::{Json, Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::Destination;
use crate::shared::state::AppState;
use crate::shared::utils::escape_markdown;

const DESTINATION_TYPES: &[&str] = &["channel", "group", "user"];

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/forwarding-destinations",
            get(list_destinations).post(create_destination),
        )
        .route(
            "/forwarding-destinations/:id",
            get(get_destination)
                .put(update_destination)
                .delete(delete_destination),
        )
        .route("/forwarding-destinations/:id/test", post(test_destination))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_destinations(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Destination>>> {
    use crate::shared::models::schema::destinations::dsl::*;
    let mut conn = state.conn.get()?;

    let mut q = destinations.filter(tenant_id.eq(ctx.tenant_id)).into_boxed();
    if !query.include_inactive {
        q = q.filter(is_active.eq(true));
    }
    let rows = q.order(created_at.desc()).load::<Destination>(&mut conn)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationRequest {
    pub destination_id: String,
    pub destination_name: String,
    pub destination_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn validate_request(body: &DestinationRequest) -> AppResult<()> {
    if body.destination_id.trim().is_empty() {
        return Err(AppError::Validation("destination_id is required".into()));
    }
    if body.destination_name.trim().is_empty() {
        return Err(AppError::Validation("destination_name is required".into()));
    }
    if !DESTINATION_TYPES.contains(&body.destination_type.as_str()) {
        return Err(AppError::Validation(format!(
            "invalid destination_type {:?}; expected one of channel, group, user",
            body.destination_type
        )));
    }
    Ok(())
}

pub async fn create_destination(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(body): Json<DestinationRequest>,
) -> AppResult<Json<Destination>> {
    ctx.require_admin()?;
    validate_request(&body)?;

    use crate::shared::models::schema::destinations::dsl::*;
    let mut conn = state.conn.get()?;

    let duplicate: i64 = destinations
        .filter(tenant_id.eq(ctx.tenant_id))
        .filter(destination_id.eq(body.destination_id.trim()))
        .filter(is_active.eq(true))
        .count()
        .get_result(&mut conn)?;
    if duplicate > 0 {
        return Err(AppError::Conflict("destination already configured".into()));
    }

    let destination = Destination {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id,
        destination_id: body.destination_id.trim().to_string(),
        destination_name: body.destination_name.trim().to_string(),
        destination_type: body.destination_type,
        description: body.description,
        message_count: 0,
        last_forwarded: None,
        last_error: None,
        is_active: true,
        created_at: Utc::now(),
    };
    diesel::insert_into(destinations)
        .values(&destination)
        .execute(&mut conn)?;

    info!(
        "Tenant {}: forwarding destination {} ({}) added",
        ctx.tenant_id, destination.destination_name, destination.destination_id
    );
    Ok(Json(destination))
}

pub async fn get_destination(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(dest_id): Path<Uuid>,
) -> AppResult<Json<Destination>> {
    use crate::shared::models::schema::destinations::dsl::*;
    let mut conn = state.conn.get()?;

    let row: Destination = destinations
        .filter(id.eq(dest_id))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("destination not found".into()))?;
    Ok(Json(row))
}

pub async fn update_destination(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(dest_id): Path<Uuid>,
    Json(body): Json<DestinationRequest>,
) -> AppResult<Json<Destination>> {
    ctx.require_admin()?;
    validate_request(&body)?;

    use crate::shared::models::schema::destinations::dsl::*;
    let mut conn = state.conn.get()?;

    let existing: Destination = destinations
        .filter(id.eq(dest_id))
        .filter(tenant_id.eq(ctx.tenant_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("destination not found".into()))?;

    if existing.destination_id != body.destination_id.trim() {
        let duplicate: i64 = destinations
            .filter(tenant_id.eq(ctx.tenant_id))
            .filter(destination_id.eq(body.destination_id.trim()))
            .filter(is_active.eq(true))
            .filter(id.ne(existing.id))
            .count()
            .get_result(&mut conn)?;
        if duplicate > 0 {
            return Err(AppError::Conflict("destination already configured".into()));
        }
    }

    diesel::update(destinations.filter(id.eq(existing.id)))
        .set((
            destination_id.eq(body.destination_id.trim().to_string()),
            destination_name.eq(body.destination_name.trim().to_string()),
            destination_type.eq(body.destination_type.clone()),
            description.eq(body.description.clone()),
        ))
        .execute(&mut conn)?;

    let updated: Destination = destinations.filter(id.eq(existing.id)).first(&mut conn)?;
    Ok(Json(updated))
}

pub async fn delete_destination(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(dest_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_admin()?;

    use crate::shared::models::schema::destinations::dsl::*;
    let mut conn = state.conn.get()?;

    let updated = diesel::update(
        destinations
            .filter(id.eq(dest_id))
            .filter(tenant_id.eq(ctx.tenant_id)),
    )
    .set(is_active.eq(false))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::NotFound("destination not found".into()));
    }

    info!("Tenant {}: destination {} disabled", ctx.tenant_id, dest_id);
    Ok(Json(serde_json::json!({ "message": "Destination disabled" })))
}

/// Sends a probe message so the operator can confirm the bot can reach
/// the chat before routing real traffic at it.
pub async fn test_destination(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(dest_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_admin()?;

    use crate::shared::models::schema::destinations::dsl::*;
    let row: Destination = {
        let mut conn = state.conn.get()?;
        destinations
            .filter(id.eq(dest_id))
            .filter(tenant_id.eq(ctx.tenant_id))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("destination not found".into()))?
    };

    let text = format!(
        "🔔 *Connection test*\n\nThis chat is configured as forwarding destination {}\\.",
        escape_markdown(&row.destination_name)
    );
    state
        .bot
        .send_message(&row.destination_id, &text)
        .await
        .map_err(|e| AppError::Upstream(format!("probe delivery failed: {e}")))?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Probe message delivered"
    })))
}
