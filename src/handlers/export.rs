use actix_web::{web, HttpResponse};
use log::info;
use sqlx::PgPool;

use crate::db::loaders;
use crate::errors::AppError;
use crate::handlers::xlsx_attachment;
use crate::services::policy::AccessPolicy;
use crate::services::report::{self, AttendanceInput};
use crate::utils::jwt::AuthUser;
use crate::utils::month::YearMonth;

pub async fn export_t13(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    path: web::Path<(i32, String)>,
) -> Result<HttpResponse, AppError> {
    let (dept_id, raw_month) = path.into_inner();
    let year_month = YearMonth::parse(&raw_month)?;

    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_export()?;

    let tree = loaders::department_tree(&mut *conn).await?;
    let full_name = tree
        .full_name(dept_id)
        .ok_or_else(|| AppError::NotFound("Department not found".to_string()))?;
    policy.require_in_scope(&policy.read_scope(&tree), dept_id)?;

    let dept_ids = tree.descendant_ids(dept_id);
    let employees = loaders::employees_in(&mut *conn, &dept_ids).await?;
    let employee_ids: Vec<i32> = employees.iter().map(|e| e.id).collect();
    let entries = loaders::entries_for_month(&mut *conn, &year_month, Some(&employee_ids)).await?;
    let work_codes = loaders::work_codes(&mut *conn).await?;
    let positions = loaders::position_names(&mut *conn).await?;

    let layout = report::attendance_layout(&AttendanceInput {
        year_month,
        tree: &tree,
        dept_ids: &dept_ids,
        employees: &employees,
        positions: &positions,
        work_codes: &work_codes,
        entries: &entries,
    });
    let bytes = report::render_xlsx(&layout)?;

    info!(
        "T-13 for {} ({}) exported by {}: {} employees",
        full_name, year_month, policy.user.username, employees.len()
    );
    Ok(xlsx_attachment(report::attendance_filename(&full_name, &year_month), bytes))
}

#[cfg(test)]
mod tests {
    use crate::handlers::configure;
    use crate::handlers::test_support::*;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn malformed_month_is_a_bad_request() {
        let (pool, settings) = app_data();
        let header = bearer(&settings);
        let app = actix_test::init_service(App::new().app_data(pool).app_data(settings).configure(configure)).await;

        for uri in ["/api/export/t13/1/2024-00", "/api/export/t13/1/May-2024"] {
            let req = actix_test::TestRequest::get().uri(uri).insert_header(header.clone()).to_request();
            assert_eq!(actix_test::call_service(&app, req).await.status(), 400, "{}", uri);
        }
    }
}
