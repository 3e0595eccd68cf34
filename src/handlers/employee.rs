use std::collections::BTreeSet;

use actix_web::{web, HttpResponse};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::db::loaders;
use crate::errors::AppError;
use crate::handlers::{deleted, trimmed};
use crate::models::department::DEFAULT_CATEGORY;
use crate::models::employee::Employee;
use crate::services::hierarchy::DepartmentTree;
use crate::services::policy::{AccessPolicy, Scope};
use crate::utils;
use crate::utils::jwt::AuthUser;

#[derive(Deserialize, Validate)]
pub struct EmployeePayload {
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 128))]
    full_name: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, max = 32))]
    tab_number: String,
    #[validate(range(min = 1, max = 99))]
    category: Option<i32>,
    dept_id: i32,
    position_id: Option<i32>,
}

#[derive(Deserialize)]
pub struct EmployeeQueryParams {
    dept_id: Option<i32>,
}

/// Largest purely numeric tab number plus one, zero-padded to three digits.
/// Non-numeric tab numbers are ignored.
fn next_tab_number<'a, I>(tab_numbers: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = tab_numbers
        .into_iter()
        .filter_map(|tn| tn.trim().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{:03}", max + 1)
}

/// Departments whose employees a listing returns. A requested department
/// outside the caller's read scope yields nothing rather than an error.
fn listing_scope(tree: &DepartmentTree, read_scope: &Scope, dept_id: Option<i32>) -> Scope {
    match dept_id {
        Some(dept_id) if !read_scope.allows(dept_id) => Scope::Departments(BTreeSet::new()),
        Some(dept_id) => Scope::Departments(tree.descendant_ids(dept_id)),
        None => read_scope.clone(),
    }
}

async fn check_references(conn: &mut PgConnection, payload: &EmployeePayload) -> Result<(), AppError> {
    let dept_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM departments WHERE id = $1)")
        .bind(payload.dept_id)
        .fetch_one(&mut *conn)
        .await?;
    if !dept_exists {
        return Err(AppError::NotFound("Department not found".to_string()));
    }

    if let Some(position_id) = payload.position_id {
        let pos_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM positions WHERE id = $1)")
            .bind(position_id)
            .fetch_one(&mut *conn)
            .await?;
        if !pos_exists {
            return Err(AppError::NotFound("Position not found".to_string()));
        }
    }
    Ok(())
}

pub async fn get_employees(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    query: web::Query<EmployeeQueryParams>,
) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    let tree = loaders::department_tree(&mut *conn).await?;
    let scope = policy.read_scope(&tree);

    let employees = match listing_scope(&tree, &scope, query.dept_id) {
        Scope::All => loaders::all_employees(&mut *conn).await?,
        Scope::Departments(ids) if ids.is_empty() => Vec::new(),
        Scope::Departments(ids) => loaders::employees_in(&mut *conn, &ids).await?,
    };

    Ok(HttpResponse::Ok().json(employees))
}

pub async fn get_next_tab_number(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    AccessPolicy::load(&mut *conn, &auth.0).await?;

    let tab_numbers: Vec<String> = sqlx::query_scalar("SELECT tab_number FROM employees")
        .fetch_all(&mut *conn)
        .await?;
    let next = next_tab_number(tab_numbers.iter().map(String::as_str));

    Ok(HttpResponse::Ok().json(json!({ "next_tab_number": next })))
}

pub async fn create_employee(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    new_employee: web::Json<EmployeePayload>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&new_employee.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_employee_admin()?;
    check_references(&mut *tx, &new_employee).await?;

    let employee = sqlx::query_as::<_, Employee>(
        "INSERT INTO employees (full_name, tab_number, category, dept_id, position_id) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(&new_employee.full_name)
    .bind(&new_employee.tab_number)
    .bind(new_employee.category.unwrap_or(DEFAULT_CATEGORY))
    .bind(new_employee.dept_id)
    .bind(new_employee.position_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| AppError::unique_violation(err, "Employee with that tab number already exists"))?;
    tx.commit().await?;

    info!("Employee {} ({}) created by {}", employee.full_name, employee.tab_number, policy.user.username);
    Ok(HttpResponse::Created().json(employee))
}

pub async fn update_employee(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    emp_id: web::Path<i32>,
    updates: web::Json<EmployeePayload>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&updates.0)?;
    let emp_id = emp_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_employee_admin()?;
    check_references(&mut *tx, &updates).await?;

    let employee = sqlx::query_as::<_, Employee>(
        "UPDATE employees SET full_name = $1, tab_number = $2, category = $3, dept_id = $4, position_id = $5 \
         WHERE id = $6 RETURNING *",
    )
    .bind(&updates.full_name)
    .bind(&updates.tab_number)
    .bind(updates.category.unwrap_or(DEFAULT_CATEGORY))
    .bind(updates.dept_id)
    .bind(updates.position_id)
    .bind(emp_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| AppError::unique_violation(err, "Employee with that tab number already exists"))?
    .ok_or_else(|| AppError::NotFound("Employee not found".to_string()))?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(employee))
}

pub async fn delete_employee(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    emp_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let emp_id = emp_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_employee_admin()?;

    let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
        .bind(emp_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Employee not found".to_string()))?;

    let has_marks: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM timesheets WHERE employee_id = $1)")
        .bind(emp_id)
        .fetch_one(&mut *tx)
        .await?;
    if has_marks {
        warn!("Refused to delete employee {} with timesheet records", employee.tab_number);
        return Err(AppError::Conflict(
            "Cannot delete employee with existing timesheet records".to_string(),
        ));
    }

    // Linked accounts fall back to their explicit department.
    sqlx::query("UPDATE users SET employee_id = NULL WHERE employee_id = $1")
        .bind(emp_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM employees WHERE id = $1")
        .bind(emp_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Employee {} deleted by {}", employee.tab_number, policy.user.username);
    Ok(deleted())
}
