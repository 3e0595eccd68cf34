use actix_web::{web, HttpResponse};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::config::Settings;
use crate::errors::AppError;
use crate::models::role::Role;
use crate::models::user::UserWithEmployeeDept;
use crate::services::policy::AccessPolicy;
use crate::utils;
use crate::utils::jwt::AuthUser;
use crate::utils::password::verify_password;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64))]
    username: String,
    #[validate(length(min = 1, max = 128))]
    password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

fn bad_credentials() -> AppError {
    AppError::Unauthorized("Incorrect username or password".to_string())
}

pub async fn login(
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    req: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&req.0)?;

    let mut conn = pool.acquire().await?;

    let row = sqlx::query_as::<_, UserWithEmployeeDept>(
        r#"
        SELECT u.id, u.username, u.hashed_password, u.role_id, u.dept_id, u.employee_id,
               e.dept_id AS employee_dept_id
        FROM users u
        LEFT JOIN employees e ON e.id = u.employee_id
        WHERE u.username = $1
        "#,
    )
    .bind(&req.username)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(bad_credentials)?;

    if !verify_password(&req.password, &row.user.hashed_password) {
        warn!("Failed login for user {}", req.username);
        return Err(bad_credentials());
    }

    let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
        .bind(row.user.role_id)
        .fetch_one(&mut *conn)
        .await?;

    let access_token = utils::jwt::generate_token(
        &row.user.username,
        &role,
        row.active_dept_id(),
        &settings.jwt_secret,
        settings.token_ttl_minutes,
    )
    .map_err(|_| AppError::InternalServerError("Token generation error".to_string()))?;

    info!("User {} logged in", row.user.username);
    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

/// The caller's current identity as the server sees it now, which may differ
/// from the snapshot inside their token.
pub async fn me(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;

    Ok(HttpResponse::Ok().json(json!({
        "id": policy.user.id,
        "username": policy.user.username,
        "role": policy.role,
        "dept_id": policy.active_dept_id,
        "employee_id": policy.user.employee_id,
    })))
}

#[cfg(test)]
mod tests {
    use crate::handlers::configure;
    use crate::handlers::test_support::app_data;
    use actix_web::{test as actix_test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn login_validates_payload_before_querying() {
        let (pool, settings) = app_data();
        let app = actix_test::init_service(App::new().app_data(pool).app_data(settings).configure(configure)).await;

        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::post()
                .uri("/api/auth/login")
                .set_json(json!({ "username": "", "password": "" }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
    }
}
