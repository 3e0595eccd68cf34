use actix_web::{web, HttpResponse};
use log::{info, warn};
use serde::Deserialize;
use sqlx::PgPool;
use validator::Validate;

use crate::errors::AppError;
use crate::handlers::deleted;
use crate::models::role::{Capabilities, Role};
use crate::services::policy::AccessPolicy;
use crate::utils;
use crate::utils::jwt::AuthUser;

#[derive(Deserialize, Validate)]
pub struct RoleCreate {
    #[validate(length(min = 1, max = 64))]
    name: String,
    #[serde(flatten)]
    capabilities: Capabilities,
}

#[derive(Deserialize, Validate, Default)]
pub struct RoleUpdate {
    #[validate(length(min = 1, max = 64))]
    name: Option<String>,
    can_manage_settings: Option<bool>,
    can_edit_all: Option<bool>,
    can_view_all: Option<bool>,
    can_view_only: Option<bool>,
    can_view_finance: Option<bool>,
    can_edit_finance: Option<bool>,
    can_export: Option<bool>,
    can_manage_employees: Option<bool>,
    can_manage_users: Option<bool>,
    can_manage_departments: Option<bool>,
}

impl RoleUpdate {
    /// Flag columns present in the payload, paired with their new values.
    fn flag_changes(&self) -> Vec<(&'static str, bool)> {
        [
            ("can_manage_settings", self.can_manage_settings),
            ("can_edit_all", self.can_edit_all),
            ("can_view_all", self.can_view_all),
            ("can_view_only", self.can_view_only),
            ("can_view_finance", self.can_view_finance),
            ("can_edit_finance", self.can_edit_finance),
            ("can_export", self.can_export),
            ("can_manage_employees", self.can_manage_employees),
            ("can_manage_users", self.can_manage_users),
            ("can_manage_departments", self.can_manage_departments),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.map(|v| (column, v)))
        .collect()
    }
}

pub async fn get_roles(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_user_admin()?;

    let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(HttpResponse::Ok().json(roles))
}

pub async fn create_role(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    new_role: web::Json<RoleCreate>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&new_role.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_user_admin()?;

    let caps = &new_role.capabilities;
    let role = sqlx::query_as::<_, Role>(
        r#"
        INSERT INTO roles (name, can_manage_settings, can_edit_all, can_view_all, can_view_only,
                           can_view_finance, can_edit_finance, can_export, can_manage_employees,
                           can_manage_users, can_manage_departments)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(&new_role.name)
    .bind(caps.can_manage_settings)
    .bind(caps.can_edit_all)
    .bind(caps.can_view_all)
    .bind(caps.can_view_only)
    .bind(caps.can_view_finance)
    .bind(caps.can_edit_finance)
    .bind(caps.can_export)
    .bind(caps.can_manage_employees)
    .bind(caps.can_manage_users)
    .bind(caps.can_manage_departments)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| AppError::unique_violation(err, "Role name already exists"))?;

    tx.commit().await?;

    info!("Role {} created by {}", role.name, policy.user.username);
    Ok(HttpResponse::Created().json(role))
}

pub async fn update_role(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    role_id: web::Path<i32>,
    updates: web::Json<RoleUpdate>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&updates.0)?;
    let role_id = role_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_user_admin()?;

    sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Role not found".to_string()))?;

    let mut query: sqlx::QueryBuilder<'_, sqlx::Postgres> = sqlx::QueryBuilder::new("UPDATE roles SET ");
    let mut separated = query.separated(", ");
    separated.push("id = id");
    if let Some(name) = &updates.name {
        separated.push("name = ");
        separated.push_bind_unseparated(name);
    }
    for (column, value) in updates.flag_changes() {
        separated.push(format!("{} = ", column));
        separated.push_bind_unseparated(value);
    }
    query.push(" WHERE id = ");
    query.push_bind(role_id);
    query.push(" RETURNING *");

    let role = query
        .build_query_as::<Role>()
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| AppError::unique_violation(err, "Role name already exists"))?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(role))
}

pub async fn delete_role(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    role_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let role_id = role_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_user_admin()?;

    let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Role not found".to_string()))?;

    let in_use: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role_id = $1)")
        .bind(role_id)
        .fetch_one(&mut *tx)
        .await?;
    if in_use {
        warn!("Refused to delete role {} while users reference it", role.name);
        return Err(AppError::Conflict(
            "Cannot delete role while users are assigned to it".to_string(),
        ));
    }

    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payload_defaults_missing_flags() {
        let payload: RoleCreate = serde_json::from_str(r#"{"name": "Clerk", "can_export": true}"#).unwrap();
        assert_eq!(payload.name, "Clerk");
        assert!(payload.capabilities.can_export);
        assert!(payload.capabilities.can_view_only);
        assert!(!payload.capabilities.can_manage_settings);
    }

    #[test]
    fn update_only_touches_present_flags() {
        let payload: RoleUpdate =
            serde_json::from_str(r#"{"can_view_all": true, "can_view_only": false}"#).unwrap();
        assert_eq!(payload.flag_changes(), vec![("can_view_all", true), ("can_view_only", false)]);
        assert!(RoleUpdate::default().flag_changes().is_empty());
    }
}
