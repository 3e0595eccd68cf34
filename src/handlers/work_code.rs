use actix_web::{web, HttpResponse};
use log::info;
use serde::Deserialize;
use sqlx::PgPool;
use validator::{Validate, ValidationError};

use crate::errors::AppError;
use crate::handlers::deleted;
use crate::models::work_code::WorkCode;
use crate::services::audit::{self, AuditAction, AuditRecord};
use crate::services::policy::AccessPolicy;
use crate::utils;
use crate::utils::jwt::AuthUser;

const DEFAULT_COLOR: &str = "#FFFFFF";

/// `#RRGGBB`
fn validate_color(value: &str) -> Result<(), ValidationError> {
    let hex = value.strip_prefix('#').unwrap_or("");
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::new("color_hex"))
    }
}

#[derive(Deserialize, Validate)]
pub struct NewWorkCode {
    #[validate(length(min = 1, max = 8))]
    code: String,
    #[validate(length(min = 1, max = 128))]
    label: String,
    #[validate(range(min = 0.0, max = 24.0))]
    hours_standard: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 24.0))]
    hours_night: f64,
    #[validate(custom = "validate_color")]
    color_hex: Option<String>,
    #[validate(range(min = 0.0))]
    rate_multiplier: Option<f64>,
}

#[derive(Deserialize, Validate, Default)]
pub struct WorkCodeUpdate {
    #[validate(length(min = 1, max = 8))]
    code: Option<String>,
    #[validate(length(min = 1, max = 128))]
    label: Option<String>,
    #[validate(range(min = 0.0, max = 24.0))]
    hours_standard: Option<f64>,
    #[validate(range(min = 0.0, max = 24.0))]
    hours_night: Option<f64>,
    #[validate(custom = "validate_color")]
    color_hex: Option<String>,
    #[validate(range(min = 0.0))]
    rate_multiplier: Option<f64>,
}

impl WorkCodeUpdate {
    fn apply(&self, current: &WorkCode) -> WorkCode {
        WorkCode {
            id: current.id,
            code: self.code.clone().unwrap_or_else(|| current.code.clone()),
            label: self.label.clone().unwrap_or_else(|| current.label.clone()),
            hours_standard: self.hours_standard.unwrap_or(current.hours_standard),
            hours_night: self.hours_night.unwrap_or(current.hours_night),
            color_hex: self.color_hex.clone().unwrap_or_else(|| current.color_hex.clone()),
            rate_multiplier: self.rate_multiplier.unwrap_or(current.rate_multiplier),
        }
    }
}

pub async fn get_work_codes(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    AccessPolicy::load(&mut *conn, &auth.0).await?;

    let codes = sqlx::query_as::<_, WorkCode>("SELECT * FROM work_codes ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(HttpResponse::Ok().json(codes))
}

pub async fn create_work_code(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    payload: web::Json<NewWorkCode>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&payload.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_settings()?;

    let code = sqlx::query_as::<_, WorkCode>(
        r#"
        INSERT INTO work_codes (code, label, hours_standard, hours_night, color_hex, rate_multiplier)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&payload.code)
    .bind(&payload.label)
    .bind(payload.hours_standard)
    .bind(payload.hours_night)
    .bind(payload.color_hex.as_deref().unwrap_or(DEFAULT_COLOR))
    .bind(payload.rate_multiplier.unwrap_or(1.0))
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| AppError::unique_violation(err, "Work code already exists"))?;
    tx.commit().await?;

    info!("Work code {} created by {}", code.code, policy.user.username);
    Ok(HttpResponse::Created().json(code))
}

pub async fn update_work_code(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    wc_id: web::Path<i32>,
    updates: web::Json<WorkCodeUpdate>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&updates.0)?;
    let wc_id = wc_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_settings()?;

    let current = sqlx::query_as::<_, WorkCode>("SELECT * FROM work_codes WHERE id = $1 FOR UPDATE")
        .bind(wc_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Work code not found".to_string()))?;
    let next = updates.apply(&current);

    let saved = sqlx::query_as::<_, WorkCode>(
        r#"
        UPDATE work_codes
        SET code = $1, label = $2, hours_standard = $3, hours_night = $4,
            color_hex = $5, rate_multiplier = $6
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(&next.code)
    .bind(&next.label)
    .bind(next.hours_standard)
    .bind(next.hours_night)
    .bind(&next.color_hex)
    .bind(next.rate_multiplier)
    .bind(wc_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| AppError::unique_violation(err, "Work code already exists"))?;

    if saved.rate_multiplier != current.rate_multiplier {
        audit::record(
            &mut *tx,
            &AuditRecord {
                user_id: policy.user.id,
                action: AuditAction::UpdateMultiplier,
                target: audit::work_code_target(&saved.code),
                old_value: Some(audit::format_value(current.rate_multiplier)),
                new_value: Some(audit::format_value(saved.rate_multiplier)),
            },
        )
        .await?;
    }
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(saved))
}

pub async fn delete_work_code(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    wc_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let wc_id = wc_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_settings()?;

    let in_use: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM timesheets WHERE work_code_id = $1)")
        .bind(wc_id)
        .fetch_one(&mut *tx)
        .await?;
    if in_use {
        return Err(AppError::Conflict(
            "Cannot delete work code used in timesheets".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM work_codes WHERE id = $1")
        .bind(wc_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Work code not found".to_string()));
    }
    tx.commit().await?;

    info!("Work code {} deleted by {}", wc_id, policy.user.username);
    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_shift() -> WorkCode {
        WorkCode {
            id: 1,
            code: "8".to_string(),
            label: "Day shift".to_string(),
            hours_standard: 8.0,
            hours_night: 0.0,
            color_hex: "#FFFFFF".to_string(),
            rate_multiplier: 1.0,
        }
    }

    #[test]
    fn color_must_be_hash_and_six_hex_digits() {
        assert!(validate_color("#A1b2C3").is_ok());
        assert!(validate_color("A1B2C3").is_err());
        assert!(validate_color("#12345").is_err());
        assert!(validate_color("#GGGGGG").is_err());
    }

    #[test]
    fn update_keeps_untouched_fields() {
        let updates = WorkCodeUpdate { rate_multiplier: Some(1.5), ..WorkCodeUpdate::default() };
        let next = updates.apply(&day_shift());
        assert_eq!(next.rate_multiplier, 1.5);
        assert_eq!(next.code, "8");
        assert_eq!(next.hours_standard, 8.0);
    }

    #[test]
    fn negative_multiplier_fails_validation() {
        let updates = WorkCodeUpdate { rate_multiplier: Some(-0.5), ..WorkCodeUpdate::default() };
        assert!(utils::validation::validate_payload(&updates).is_err());
        let zero = WorkCodeUpdate { rate_multiplier: Some(0.0), ..WorkCodeUpdate::default() };
        assert!(utils::validation::validate_payload(&zero).is_ok());
    }
}
