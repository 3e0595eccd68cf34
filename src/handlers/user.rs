use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use validator::Validate;

use crate::config::Settings;
use crate::errors::AppError;
use crate::handlers::{deleted, nullable};
use crate::models::role::Role;
use crate::models::user::User;
use crate::services::policy::AccessPolicy;
use crate::utils;
use crate::utils::jwt::AuthUser;
use crate::utils::password::hash_password;

#[derive(Deserialize, Validate)]
pub struct UserCreate {
    #[validate(length(min = 1, max = 64))]
    username: String,
    #[validate(length(min = 4, max = 128))]
    password: String,
    role_id: i32,
    dept_id: Option<i32>,
    employee_id: Option<i32>,
}

#[derive(Deserialize, Validate)]
pub struct UserUpdate {
    #[validate(length(min = 1, max = 64))]
    username: Option<String>,
    #[validate(length(min = 4, max = 128))]
    password: Option<String>,
    role_id: Option<i32>,
    #[serde(default, deserialize_with = "nullable")]
    dept_id: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    employee_id: Option<Option<i32>>,
}

#[derive(Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    user: User,
    role: Option<Role>,
}

/// Which of the ids a user write points at actually exist. An id that was
/// not supplied counts as present.
#[derive(sqlx::FromRow, Debug, PartialEq)]
struct UserReferences {
    role: bool,
    department: bool,
    employee: bool,
}

impl UserReferences {
    async fn load(
        conn: &mut sqlx::PgConnection,
        role_id: Option<i32>,
        dept_id: Option<i32>,
        employee_id: Option<i32>,
    ) -> Result<UserReferences, AppError> {
        let refs = sqlx::query_as::<_, UserReferences>(
            r#"
            SELECT ($1::INT IS NULL OR EXISTS(SELECT 1 FROM roles WHERE id = $1)) AS role,
                   ($2::INT IS NULL OR EXISTS(SELECT 1 FROM departments WHERE id = $2)) AS department,
                   ($3::INT IS NULL OR EXISTS(SELECT 1 FROM employees WHERE id = $3)) AS employee
            "#,
        )
        .bind(role_id)
        .bind(dept_id)
        .bind(employee_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(refs)
    }

    fn verify(&self) -> Result<(), AppError> {
        if !self.role {
            return Err(AppError::NotFound("Role not found".to_string()));
        }
        if !self.department {
            return Err(AppError::NotFound("Department not found".to_string()));
        }
        if !self.employee {
            return Err(AppError::NotFound("Employee not found".to_string()));
        }
        Ok(())
    }
}

/// The configured admin account keeps its username, so the delete guard
/// cannot be sidestepped by renaming it first.
fn guard_admin_rename(current: &str, requested: Option<&str>, admin_username: &str) -> Result<(), AppError> {
    match requested {
        Some(name) if current == admin_username && name != admin_username => {
            Err(AppError::Conflict("Cannot rename default admin user".to_string()))
        }
        _ => Ok(()),
    }
}

fn guard_admin_delete(username: &str, admin_username: &str) -> Result<(), AppError> {
    if username == admin_username {
        Err(AppError::Conflict("Cannot delete default admin user".to_string()))
    } else {
        Ok(())
    }
}

async fn with_role(conn: &mut sqlx::PgConnection, user: User) -> Result<UserResponse, AppError> {
    let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
        .bind(user.role_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(UserResponse { user, role })
}

pub async fn get_users(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_user_admin()?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    let roles: HashMap<i32, Role> = sqlx::query_as::<_, Role>("SELECT * FROM roles")
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|r| (r.id, r))
        .collect();

    let response: Vec<UserResponse> = users
        .into_iter()
        .map(|user| {
            let role = roles.get(&user.role_id).cloned();
            UserResponse { user, role }
        })
        .collect();

    Ok(HttpResponse::Ok().json(response))
}

pub async fn create_user(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    new_user: web::Json<UserCreate>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&new_user.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_user_admin()?;
    UserReferences::load(&mut *tx, Some(new_user.role_id), new_user.dept_id, new_user.employee_id)
        .await?
        .verify()?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, hashed_password, role_id, dept_id, employee_id) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(&new_user.username)
    .bind(hash_password(&new_user.password)?)
    .bind(new_user.role_id)
    .bind(new_user.dept_id)
    .bind(new_user.employee_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| AppError::unique_violation(err, "Username already exists"))?;

    let response = with_role(&mut *tx, user).await?;
    tx.commit().await?;

    info!("User {} created by {}", response.user.username, policy.user.username);
    Ok(HttpResponse::Created().json(response))
}

pub async fn update_user(
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    auth: AuthUser,
    user_id: web::Path<i32>,
    updates: web::Json<UserUpdate>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&updates.0)?;
    let user_id = user_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_user_admin()?;

    let current = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    guard_admin_rename(&current.username, updates.username.as_deref(), &settings.admin_username)?;
    UserReferences::load(
        &mut *tx,
        updates.role_id,
        updates.dept_id.flatten(),
        updates.employee_id.flatten(),
    )
    .await?
    .verify()?;

    let mut query: sqlx::QueryBuilder<'_, sqlx::Postgres> = sqlx::QueryBuilder::new("UPDATE users SET ");
    let mut separated = query.separated(", ");
    // Keeps the statement valid when the payload is empty.
    separated.push("id = id");

    if let Some(username) = &updates.username {
        separated.push("username = ");
        separated.push_bind_unseparated(username);
    }
    if let Some(password) = &updates.password {
        separated.push("hashed_password = ");
        separated.push_bind_unseparated(hash_password(password)?);
    }
    if let Some(role_id) = updates.role_id {
        separated.push("role_id = ");
        separated.push_bind_unseparated(role_id);
    }
    if let Some(dept_id) = updates.dept_id {
        separated.push("dept_id = ");
        separated.push_bind_unseparated(dept_id);
    }
    if let Some(employee_id) = updates.employee_id {
        separated.push("employee_id = ");
        separated.push_bind_unseparated(employee_id);
    }
    query.push(" WHERE id = ");
    query.push_bind(user_id);
    query.push(" RETURNING *");

    let user = query
        .build_query_as::<User>()
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| AppError::unique_violation(err, "Username already exists"))?;

    let response = with_role(&mut *tx, user).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(response))
}

pub async fn delete_user(
    pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
    auth: AuthUser,
    user_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let user_id = user_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_user_admin()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    guard_admin_delete(&user.username, &settings.admin_username).map_err(|err| {
        warn!("Refused to delete default admin user {}", user.username);
        err
    })?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("User {} deleted by {}", user.username, policy.user.username);
    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(role: bool, department: bool, employee: bool) -> UserReferences {
        UserReferences { role, department, employee }
    }

    #[test]
    fn missing_references_are_not_found() {
        assert!(refs(true, true, true).verify().is_ok());
        for (missing, message) in [
            (refs(false, true, true), "Role not found"),
            (refs(true, false, true), "Department not found"),
            (refs(true, true, false), "Employee not found"),
        ] {
            match missing.verify() {
                Err(AppError::NotFound(msg)) => assert_eq!(msg, message),
                other => panic!("expected NotFound({}), got {:?}", message, other),
            }
        }
    }

    #[test]
    fn admin_keeps_its_username() {
        assert!(matches!(
            guard_admin_rename("admin", Some("root"), "admin"),
            Err(AppError::Conflict(_))
        ));
        assert!(guard_admin_rename("admin", Some("admin"), "admin").is_ok());
        assert!(guard_admin_rename("admin", None, "admin").is_ok());
        assert!(guard_admin_rename("olga", Some("olga.k"), "admin").is_ok());
    }

    #[test]
    fn admin_cannot_be_deleted() {
        assert!(matches!(guard_admin_delete("admin", "admin"), Err(AppError::Conflict(_))));
        assert!(guard_admin_delete("olga", "admin").is_ok());
    }
}
