use actix_web::{web, HttpResponse};
use log::info;
use serde::Deserialize;
use sqlx::PgPool;
use validator::Validate;

use crate::errors::AppError;
use crate::handlers::{deleted, trimmed};
use crate::models::position::Position;
use crate::services::policy::AccessPolicy;
use crate::utils;
use crate::utils::jwt::AuthUser;

#[derive(Deserialize, Validate)]
pub struct PositionPayload {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 128))]
    name: String,
}

pub async fn get_positions(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    AccessPolicy::load(&mut *conn, &auth.0).await?;

    let positions = sqlx::query_as::<_, Position>("SELECT * FROM positions ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;

    Ok(HttpResponse::Ok().json(positions))
}

pub async fn create_position(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    payload: web::Json<PositionPayload>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&payload.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_settings()?;

    let position = sqlx::query_as::<_, Position>("INSERT INTO positions (name) VALUES ($1) RETURNING *")
        .bind(&payload.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| AppError::unique_violation(err, "Position name must be unique"))?;
    tx.commit().await?;

    info!("Position {} created by {}", position.name, policy.user.username);
    Ok(HttpResponse::Created().json(position))
}

pub async fn update_position(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    pos_id: web::Path<i32>,
    payload: web::Json<PositionPayload>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&payload.0)?;
    let pos_id = pos_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_settings()?;

    let position = sqlx::query_as::<_, Position>("UPDATE positions SET name = $1 WHERE id = $2 RETURNING *")
        .bind(&payload.name)
        .bind(pos_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| AppError::unique_violation(err, "Position name must be unique"))?
        .ok_or_else(|| AppError::NotFound("Position not found".to_string()))?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(position))
}

pub async fn delete_position(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    pos_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let pos_id = pos_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_settings()?;

    let (employees, rates): (bool, bool) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE position_id = $1), \
                EXISTS(SELECT 1 FROM salary_rates WHERE position_id = $1)",
    )
    .bind(pos_id)
    .fetch_one(&mut *tx)
    .await?;
    if employees {
        return Err(AppError::Conflict("Cannot delete position assigned to employees".to_string()));
    }
    if rates {
        return Err(AppError::Conflict("Cannot delete position with salary rates".to_string()));
    }

    let result = sqlx::query("DELETE FROM positions WHERE id = $1")
        .bind(pos_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Position not found".to_string()));
    }
    tx.commit().await?;

    info!("Position {} deleted by {}", pos_id, policy.user.username);
    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::handlers::test_support::*;
    use actix_web::{test as actix_test, App};

    #[test]
    fn whitespace_only_name_fails_validation() {
        let payload: PositionPayload = serde_json::from_str(r#"{"name": "   "}"#).unwrap();
        assert!(utils::validation::validate_payload(&payload).is_err());
    }

    #[actix_web::test]
    async fn create_requires_a_name() {
        let (pool, settings) = app_data();
        let header = bearer(&settings);
        let app = actix_test::init_service(App::new().app_data(pool).app_data(settings).configure(configure)).await;

        let req = actix_test::TestRequest::post()
            .uri("/api/positions")
            .insert_header(header)
            .set_json(serde_json::json!({ "name": "" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);
    }
}
