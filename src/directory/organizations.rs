use axum::extract::{Json, State};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{Organization, Plan};
use crate::shared::state::AppState;

#[derive(Debug, Serialize)]
pub struct UsageStats {
    pub groups: i64,
    pub watchlist_users: i64,
    pub destinations: i64,
    pub accounts: i64,
}

#[derive(Debug, Serialize)]
pub struct OrganizationView {
    #[serde(flatten)]
    pub organization: Organization,
    pub usage_stats: UsageStats,
}

fn load_view(conn: &mut PgConnection, tenant: uuid::Uuid) -> AppResult<OrganizationView> {
    use crate::shared::models::schema::accounts::dsl as accounts;
    use crate::shared::models::schema::destinations::dsl as destinations;
    use crate::shared::models::schema::groups::dsl as groups;
    use crate::shared::models::schema::organizations::dsl as orgs;
    use crate::shared::models::schema::watchlist_users::dsl as watchlist;

    let organization: Organization = orgs::organizations
        .filter(orgs::id.eq(tenant))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("organization not found".into()))?;

    let usage_stats = UsageStats {
        groups: groups::groups
            .filter(groups::tenant_id.eq(tenant))
            .filter(groups::is_active.eq(true))
            .count()
            .get_result(conn)?,
        watchlist_users: watchlist::watchlist_users
            .filter(watchlist::tenant_id.eq(tenant))
            .filter(watchlist::is_active.eq(true))
            .count()
            .get_result(conn)?,
        destinations: destinations::destinations
            .filter(destinations::tenant_id.eq(tenant))
            .filter(destinations::is_active.eq(true))
            .count()
            .get_result(conn)?,
        accounts: accounts::accounts
            .filter(accounts::tenant_id.eq(tenant))
            .count()
            .get_result(conn)?,
    };

    Ok(OrganizationView {
        organization,
        usage_stats,
    })
}

pub async fn current(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> AppResult<Json<OrganizationView>> {
    let mut conn = state.conn.get()?;
    Ok(Json(load_view(&mut conn, ctx.tenant_id)?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

pub async fn update_current(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(body): Json<UpdateOrganizationRequest>,
) -> AppResult<Json<OrganizationView>> {
    ctx.require_admin()?;

    if let Some(plan_value) = &body.plan {
        if Plan::parse(plan_value).is_none() {
            return Err(AppError::Validation(format!(
                "invalid plan {plan_value:?}; expected one of free, pro, enterprise"
            )));
        }
    }
    if let Some(name_value) = &body.name {
        if name_value.trim().is_empty() {
            return Err(AppError::Validation("name must not be empty".into()));
        }
    }

    use crate::shared::models::schema::organizations::dsl::*;
    let mut conn = state.conn.get()?;

    if let Some(new_name) = &body.name {
        diesel::update(organizations.filter(id.eq(ctx.tenant_id)))
            .set(name.eq(new_name.trim()))
            .execute(&mut conn)?;
    }
    if let Some(new_description) = &body.description {
        diesel::update(organizations.filter(id.eq(ctx.tenant_id)))
            .set(description.eq(Some(new_description.clone())))
            .execute(&mut conn)?;
    }
    if let Some(new_plan) = &body.plan {
        diesel::update(organizations.filter(id.eq(ctx.tenant_id)))
            .set(plan.eq(new_plan))
            .execute(&mut conn)?;
        info!("Tenant {} switched to plan {}", ctx.tenant_id, new_plan);
    }

    Ok(Json(load_view(&mut conn, ctx.tenant_id)?))
}
