use actix_web::{web, HttpResponse};
use log::info;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::db::loaders;
use crate::errors::AppError;
use crate::handlers::{deleted, xlsx_attachment};
use crate::models::salary_rate::SalaryRate;
use crate::services::audit::{self, AuditAction, AuditRecord};
use crate::services::payroll::{compute_payroll, PayrollInput, PayrollReport};
use crate::services::policy::AccessPolicy;
use crate::services::rates::RateTable;
use crate::services::report;
use crate::utils;
use crate::utils::jwt::AuthUser;
use crate::utils::month::YearMonth;

#[derive(Deserialize, Validate)]
pub struct SalaryRatePayload {
    dept_id: i32,
    position_id: i32,
    #[validate(range(min = 0.0))]
    hourly_rate: f64,
}

#[derive(Serialize)]
pub struct SalaryRateView {
    #[serde(flatten)]
    rate: SalaryRate,
    dept_name: Option<String>,
    position_name: Option<String>,
}

async fn position_name(conn: &mut PgConnection, position_id: i32) -> Result<Option<String>, AppError> {
    let name = sqlx::query_scalar("SELECT name FROM positions WHERE id = $1")
        .bind(position_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(name)
}

async fn department_name(conn: &mut PgConnection, dept_id: i32) -> Result<Option<String>, AppError> {
    let name = sqlx::query_scalar("SELECT name FROM departments WHERE id = $1")
        .bind(dept_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(name)
}

/// Loads every row the aggregation needs for `year_month` and runs it.
async fn load_payroll(conn: &mut PgConnection, year_month: YearMonth) -> Result<PayrollReport, AppError> {
    let tree = loaders::department_tree(&mut *conn).await?;
    let employees = loaders::all_employees(&mut *conn).await?;
    let entries = loaders::entries_for_month(&mut *conn, &year_month, None).await?;
    let work_codes = loaders::work_codes(&mut *conn).await?;
    let positions = loaders::position_names(&mut *conn).await?;
    let rates = RateTable::new(&loaders::salary_rates(&mut *conn).await?);

    Ok(compute_payroll(&PayrollInput {
        year_month,
        employees: &employees,
        entries: &entries,
        work_codes: &work_codes,
        positions: &positions,
        rates: &rates,
        tree: &tree,
    }))
}

pub async fn get_salary_rates(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_finance_view()?;

    let tree = loaders::department_tree(&mut *conn).await?;
    let positions = loaders::position_names(&mut *conn).await?;
    let rates: Vec<SalaryRateView> = loaders::salary_rates(&mut *conn)
        .await?
        .into_iter()
        .map(|rate| SalaryRateView {
            dept_name: tree.full_name(rate.dept_id),
            position_name: positions.get(&rate.position_id).cloned(),
            rate,
        })
        .collect();

    Ok(HttpResponse::Ok().json(rates))
}

pub async fn upsert_salary_rate(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    payload: web::Json<SalaryRatePayload>,
) -> Result<HttpResponse, AppError> {
    utils::validation::validate_payload(&payload.0)?;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_finance_edit()?;

    let dept_name = department_name(&mut *tx, payload.dept_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Department not found".to_string()))?;
    let pos_name = position_name(&mut *tx, payload.position_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Position not found".to_string()))?;
    let target = audit::rate_target(Some(&pos_name), payload.position_id, Some(&dept_name), payload.dept_id);

    let existing = sqlx::query_as::<_, SalaryRate>(
        "SELECT * FROM salary_rates WHERE dept_id = $1 AND position_id = $2 FOR UPDATE",
    )
    .bind(payload.dept_id)
    .bind(payload.position_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (rate, action, old_value) = match existing {
        Some(current) => {
            let rate = sqlx::query_as::<_, SalaryRate>(
                "UPDATE salary_rates SET hourly_rate = $1 WHERE id = $2 RETURNING *",
            )
            .bind(payload.hourly_rate)
            .bind(current.id)
            .fetch_one(&mut *tx)
            .await?;
            (rate, AuditAction::UpdateRate, Some(audit::format_value(current.hourly_rate)))
        }
        None => {
            let rate = sqlx::query_as::<_, SalaryRate>(
                "INSERT INTO salary_rates (dept_id, position_id, hourly_rate) VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(payload.dept_id)
            .bind(payload.position_id)
            .bind(payload.hourly_rate)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| AppError::unique_violation(err, "Salary rate was created concurrently, retry"))?;
            (rate, AuditAction::CreateRate, None)
        }
    };

    audit::record(
        &mut *tx,
        &AuditRecord {
            user_id: policy.user.id,
            action,
            target,
            old_value,
            new_value: Some(audit::format_value(rate.hourly_rate)),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(rate))
}

pub async fn delete_salary_rate(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    rate_id: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let rate_id = rate_id.into_inner();

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    policy.require_finance_edit()?;

    let rate = sqlx::query_as::<_, SalaryRate>("DELETE FROM salary_rates WHERE id = $1 RETURNING *")
        .bind(rate_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Rate not found".to_string()))?;

    let pos_name = position_name(&mut *tx, rate.position_id).await?;
    let dept_name = department_name(&mut *tx, rate.dept_id).await?;
    audit::record(
        &mut *tx,
        &AuditRecord {
            user_id: policy.user.id,
            action: AuditAction::DeleteRate,
            target: audit::rate_target(pos_name.as_deref(), rate.position_id, dept_name.as_deref(), rate.dept_id),
            old_value: Some(audit::format_value(rate.hourly_rate)),
            new_value: None,
        },
    )
    .await?;
    tx.commit().await?;

    Ok(deleted())
}

pub async fn get_payroll(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    year_month: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let year_month = YearMonth::parse(&year_month)?;

    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_finance_view()?;

    let report = load_payroll(&mut *conn, year_month).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn export_payroll(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    year_month: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let year_month = YearMonth::parse(&year_month)?;

    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_finance_view()?;

    let payroll = load_payroll(&mut *conn, year_month).await?;
    let bytes = report::render_xlsx(&report::payroll_layout(&payroll))?;

    info!("Payroll {} exported by {}", year_month, policy.user.username);
    Ok(xlsx_attachment(report::payroll_filename(&year_month), bytes))
}

pub async fn get_audit_log(pool: web::Data<PgPool>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    policy.require_finance_edit()?;

    let entries = audit::recent(&mut *conn).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::handlers::test_support::*;
    use actix_web::{test as actix_test, App};

    #[test]
    fn negative_rate_fails_validation() {
        let payload = SalaryRatePayload { dept_id: 1, position_id: 1, hourly_rate: -1.0 };
        assert!(utils::validation::validate_payload(&payload).is_err());
        let free = SalaryRatePayload { hourly_rate: 0.0, ..payload };
        assert!(utils::validation::validate_payload(&free).is_ok());
    }

    #[actix_web::test]
    async fn invalid_month_fails_before_database_access() {
        let (pool, settings) = app_data();
        let header = bearer(&settings);
        let app = actix_test::init_service(App::new().app_data(pool).app_data(settings).configure(configure)).await;

        for uri in ["/api/finance/payroll/2024-13", "/api/finance/payroll/24-05/export"] {
            let req = actix_test::TestRequest::get().uri(uri).insert_header(header.clone()).to_request();
            assert_eq!(actix_test::call_service(&app, req).await.status(), 400, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn negative_rate_is_rejected_before_database_access() {
        let (pool, settings) = app_data();
        let header = bearer(&settings);
        let app = actix_test::init_service(App::new().app_data(pool).app_data(settings).configure(configure)).await;

        let req = actix_test::TestRequest::post()
            .uri("/api/salary-rates")
            .insert_header(header)
            .set_json(serde_json::json!({ "dept_id": 1, "position_id": 2, "hourly_rate": -5.0 }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);
    }
}
