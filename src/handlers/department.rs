use actix_web::{web, HttpResponse};
use log::{info, warn};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::db::loaders;
use crate::errors::AppError;
use crate::handlers::{deleted, nullable};
use crate::models::department::{Department, DEFAULT_CATEGORY};
use crate::services::hierarchy::DepartmentTree;
use crate::services::policy::AccessPolicy;
use crate::utils;
use crate::utils::jwt::AuthUser;

#[derive(Deserialize, Validate)]
pub struct NewDepartment {
    #[validate(length(min = 1, max = 128))]
    name: String,
    parent_id: Option<i32>,
    category: Option<i32>,
}

#[derive(Deserialize, Validate)]
pub struct DepartmentUpdate {
    #[validate(length(min = 1, max = 128))]
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    parent_id: Option<Option<i32>>,
    category: Option<i32>,
}

fn check_parent(tree: &DepartmentTree, parent_id: Option<i32>) -> Result<(), AppError> {
    match parent_id {
        Some(parent) if !tree.contains(parent) => {
            Err(AppError::BadRequest("Parent department does not exist".to_string()))
        }
        _ => Ok(()),
    }
}

/// Rows that still reference a department and block its removal.
#[derive(sqlx::FromRow, Debug, Default, Clone, Copy, PartialEq)]
struct DepartmentUsage {
    employees: bool,
    salary_rates: bool,
    users: bool,
}

impl DepartmentUsage {
    async fn load(conn: &mut PgConnection, dept_id: i32) -> Result<DepartmentUsage, AppError> {
        let usage = sqlx::query_as::<_, DepartmentUsage>(
            r#"
            SELECT EXISTS(SELECT 1 FROM employees WHERE dept_id = $1) AS employees,
                   EXISTS(SELECT 1 FROM salary_rates WHERE dept_id = $1) AS salary_rates,
                   EXISTS(SELECT 1 FROM users WHERE dept_id = $1) AS users
            "#,
        )
        .bind(dept_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(usage)
    }
}

fn check_deletable(tree: &DepartmentTree, dept_id: i32, usage: &DepartmentUsage) -> Result<(), AppError> {
    let conflict = |msg: &str| -> Result<(), AppError> { Err(AppError::Conflict(msg.to_string())) };

    if !tree.contains(dept_id) {
        return Err(AppError::NotFound("Department not found".to_string()));
    }
    if tree.has_children(dept_id) {
        return conflict("Cannot delete department with sub-departments");
    }
    if usage.employees {
        return conflict("Cannot delete department with employees");
    }
    if usage.salary_rates {
        return conflict("Cannot delete department with salary rates");
    }
    if usage.users {
        return conflict("Cannot delete department assigned to users");
    }
    Ok(())
}

pub async fn get_departments(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    let tree = loaders::department_tree(&mut *conn).await?;
    let scope = policy.read_scope(&tree);

    let mut departments: Vec<&Department> = tree
        .departments()
        .filter(|d| scope.allows(d.id))
        .collect();
    departments.sort_by_key(|d| (d.category, d.id));

    Ok(HttpResponse::Ok().json(departments))
}

pub async fn create_department(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    new_department: web::Json<NewDepartment>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&new_department.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_department_admin()?;

    let tree = loaders::department_tree(&mut *tx).await?;
    check_parent(&tree, new_department.parent_id)?;

    let department = sqlx::query_as::<_, Department>(
        "INSERT INTO departments (name, parent_id, category) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&new_department.name)
    .bind(new_department.parent_id)
    .bind(new_department.category.unwrap_or(DEFAULT_CATEGORY))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    info!("Department {} ({}) created by {}", department.name, department.id, policy.user.username);
    Ok(HttpResponse::Created().json(department))
}

pub async fn update_department(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    dept_id: web::Path<i32>,
    updates: web::Json<DepartmentUpdate>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&updates.0)?;
    let dept_id = dept_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_department_admin()?;

    let tree = loaders::department_tree(&mut *tx).await?;
    let current = tree
        .get(dept_id)
        .ok_or_else(|| AppError::NotFound("Department not found".to_string()))?;

    let parent_id = updates.parent_id.unwrap_or(current.parent_id);
    check_parent(&tree, parent_id)?;
    if tree.would_create_cycle(dept_id, parent_id) {
        warn!("Rejected cyclic parent {:?} for department {}", parent_id, dept_id);
        return Err(AppError::BadRequest(
            "A department cannot be moved under itself or its descendants".to_string(),
        ));
    }

    let department = sqlx::query_as::<_, Department>(
        "UPDATE departments SET name = $1, parent_id = $2, category = $3 WHERE id = $4 RETURNING *",
    )
    .bind(updates.name.as_deref().unwrap_or(&current.name))
    .bind(parent_id)
    .bind(updates.category.unwrap_or(current.category))
    .bind(dept_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(department))
}

pub async fn delete_department(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    dept_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let dept_id = dept_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_department_admin()?;

    let tree = loaders::department_tree(&mut *tx).await?;
    let usage = DepartmentUsage::load(&mut *tx, dept_id).await?;
    check_deletable(&tree, dept_id, &usage).map_err(|err| {
        warn!("Refused to delete department {}: {}", dept_id, err);
        err
    })?;

    sqlx::query("DELETE FROM departments WHERE id = $1")
        .bind(dept_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Department {} deleted by {}", dept_id, policy.user.username);
    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::handlers::test_support::*;
    use actix_web::{test as actix_test, App};

    fn tree() -> DepartmentTree {
        let d = |id, parent_id| Department { id, name: format!("D{}", id), parent_id, category: 99 };
        DepartmentTree::new(vec![d(1, None), d(2, Some(1))])
    }

    #[test]
    fn parent_must_exist() {
        assert!(check_parent(&tree(), None).is_ok());
        assert!(check_parent(&tree(), Some(2)).is_ok());
        assert!(matches!(check_parent(&tree(), Some(42)), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn leaf_department_without_references_can_be_deleted() {
        assert!(check_deletable(&tree(), 2, &DepartmentUsage::default()).is_ok());
    }

    #[test]
    fn department_with_children_or_references_is_kept() {
        let idle = DepartmentUsage::default();
        assert!(matches!(check_deletable(&tree(), 1, &idle), Err(AppError::Conflict(_))));
        assert!(matches!(check_deletable(&tree(), 42, &idle), Err(AppError::NotFound(_))));

        for usage in [
            DepartmentUsage { employees: true, ..idle },
            DepartmentUsage { salary_rates: true, ..idle },
            DepartmentUsage { users: true, ..idle },
        ] {
            assert!(
                matches!(check_deletable(&tree(), 2, &usage), Err(AppError::Conflict(_))),
                "{:?}",
                usage
            );
        }
    }

    #[test]
    fn update_distinguishes_root_move_from_untouched_parent() {
        let untouched: DepartmentUpdate = serde_json::from_str(r#"{"name": "Ops"}"#).unwrap();
        assert_eq!(untouched.parent_id, None);
        let to_root: DepartmentUpdate = serde_json::from_str(r#"{"parent_id": null}"#).unwrap();
        assert_eq!(to_root.parent_id, Some(None));
    }

    #[actix_web::test]
    async fn blank_name_is_rejected_before_any_query() {
        let (pool, settings) = app_data();
        let header = bearer(&settings);
        let app = actix_test::init_service(App::new().app_data(pool).app_data(settings).configure(configure)).await;

        let req = actix_test::TestRequest::post()
            .uri("/api/departments")
            .insert_header(header)
            .set_json(serde_json::json!({ "name": "" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
