use std::collections::{BTreeMap, HashMap, HashSet};

use actix_web::{web, HttpResponse};
use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;

use crate::db::loaders;
use crate::errors::AppError;
use crate::models::employee::Employee;
use crate::models::timesheet::TimesheetEntry;
use crate::models::work_code::WorkCode;
use crate::services::policy::{AccessPolicy, Scope};
use crate::utils::jwt::AuthUser;
use crate::utils::month::YearMonth;

#[derive(Deserialize)]
pub struct MarkUpdate {
    employee_id: i32,
    date: NaiveDate,
    /// `None` clears the mark.
    work_code_id: Option<i32>,
}

#[derive(Deserialize)]
pub struct BulkUpdate {
    updates: Vec<MarkUpdate>,
}

#[derive(Serialize)]
pub struct TimesheetGrid {
    employees: Vec<Employee>,
    timesheet: BTreeMap<i32, BTreeMap<u32, i32>>,
    days_in_month: u32,
    month: u32,
    year: i32,
}

/// employee id -> day of month -> work code id. Every employee gets a row,
/// even one with no marks.
fn grid(employees: &[Employee], entries: &[TimesheetEntry]) -> BTreeMap<i32, BTreeMap<u32, i32>> {
    let mut rows: BTreeMap<i32, BTreeMap<u32, i32>> =
        employees.iter().map(|e| (e.id, BTreeMap::new())).collect();
    for entry in entries {
        if let Some(days) = rows.get_mut(&entry.employee_id) {
            days.insert(entry.date.day(), entry.work_code_id);
        }
    }
    rows
}

/// Accepts the batch only if every employee exists (404), sits inside
/// `scope` (403) and every non-null work code is known (400). The first
/// offending update decides the error.
fn check_updates(
    updates: &[MarkUpdate],
    employee_departments: &HashMap<i32, i32>,
    scope: &Scope,
    work_codes: &HashMap<i32, WorkCode>,
) -> Result<(), AppError> {
    for update in updates {
        let dept_id = employee_departments
            .get(&update.employee_id)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", update.employee_id)))?;
        if !scope.allows(dept_id) {
            return Err(AppError::Forbidden(format!(
                "Not authorized to edit timesheet for employee {}",
                update.employee_id
            )));
        }
        if let Some(wc_id) = update.work_code_id {
            if !work_codes.contains_key(&wc_id) {
                return Err(AppError::BadRequest(format!("Unknown work code {}", wc_id)));
            }
        }
    }
    Ok(())
}

pub async fn get_timesheet(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    path: web::Path<(i32, String)>,
) -> Result<HttpResponse, AppError> {
    let (dept_id, raw_month) = path.into_inner();
    let month = YearMonth::parse(&raw_month)?;

    let mut conn = pool.acquire().await?;
    let policy = AccessPolicy::load(&mut *conn, &auth.0).await?;
    let tree = loaders::department_tree(&mut *conn).await?;
    if !tree.contains(dept_id) {
        return Err(AppError::NotFound("Department not found".to_string()));
    }
    policy.require_in_scope(&policy.read_scope(&tree), dept_id)?;

    let employees = loaders::employees_in(&mut *conn, &tree.descendant_ids(dept_id)).await?;
    let employee_ids: Vec<i32> = employees.iter().map(|e| e.id).collect();
    let entries = loaders::entries_for_month(&mut *conn, &month, Some(&employee_ids)).await?;

    let response = TimesheetGrid {
        timesheet: grid(&employees, &entries),
        employees,
        days_in_month: month.days_in_month(),
        month: month.month,
        year: month.year,
    };
    Ok(HttpResponse::Ok().json(response))
}

pub async fn update_timesheet(
    pool: web::Data<PgPool>,
    auth: AuthUser,
    payload: web::Json<BulkUpdate>,
) -> Result<HttpResponse, AppError> {
    let updates = payload.into_inner().updates;

    let mut tx = pool.begin().await?;
    let policy = AccessPolicy::load(&mut *tx, &auth.0).await?;
    let tree = loaders::department_tree(&mut *tx).await?;
    let scope = policy.edit_scope(&tree);

    let wanted: Vec<i32> = updates
        .iter()
        .map(|u| u.employee_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let departments: HashMap<i32, i32> = sqlx::query_as::<_, (i32, i32)>(
        "SELECT id, dept_id FROM employees WHERE id = ANY($1)",
    )
    .bind(&wanted)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .collect();
    let work_codes = loaders::work_codes(&mut *tx).await?;

    // Everything is checked before the first write.
    check_updates(&updates, &departments, &scope, &work_codes).map_err(|err| {
        warn!("Rejected timesheet update by {}: {}", policy.user.username, err);
        err
    })?;

    for update in &updates {
        match update.work_code_id {
            Some(wc_id) => {
                sqlx::query(
                    "INSERT INTO timesheets (employee_id, date, work_code_id) VALUES ($1, $2, $3) \
                     ON CONFLICT (employee_id, date) DO UPDATE SET work_code_id = EXCLUDED.work_code_id",
                )
                .bind(update.employee_id)
                .bind(update.date)
                .bind(wc_id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM timesheets WHERE employee_id = $1 AND date = $2")
                    .bind(update.employee_id)
                    .bind(update.date)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }
    tx.commit().await?;

    info!("User {} applied {} timesheet updates", policy.user.username, updates.len());
    Ok(HttpResponse::Ok().json(json!({ "status": "success", "updated_count": updates.len() })))
}
