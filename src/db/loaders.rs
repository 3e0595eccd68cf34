//! Shared read queries used by several handlers. All take the request's
//! connection handle explicitly.

use std::collections::{BTreeSet, HashMap};

use sqlx::PgConnection;

use crate::errors::AppError;
use crate::models::department::Department;
use crate::models::employee::Employee;
use crate::models::position::Position;
use crate::models::salary_rate::SalaryRate;
use crate::models::timesheet::TimesheetEntry;
use crate::models::work_code::WorkCode;
use crate::services::hierarchy::DepartmentTree;
use crate::utils::month::YearMonth;

pub async fn department_tree(conn: &mut PgConnection) -> Result<DepartmentTree, AppError> {
    let departments = sqlx::query_as::<_, Department>("SELECT * FROM departments ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(DepartmentTree::new(departments))
}

pub async fn all_employees(conn: &mut PgConnection) -> Result<Vec<Employee>, AppError> {
    let employees = sqlx::query_as::<_, Employee>("SELECT * FROM employees ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(employees)
}

pub async fn employees_in(conn: &mut PgConnection, dept_ids: &BTreeSet<i32>) -> Result<Vec<Employee>, AppError> {
    let ids: Vec<i32> = dept_ids.iter().copied().collect();
    let employees = sqlx::query_as::<_, Employee>(
        "SELECT * FROM employees WHERE dept_id = ANY($1) ORDER BY id",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(employees)
}

pub async fn work_codes(conn: &mut PgConnection) -> Result<HashMap<i32, WorkCode>, AppError> {
    let codes = sqlx::query_as::<_, WorkCode>("SELECT * FROM work_codes")
        .fetch_all(&mut *conn)
        .await?;
    Ok(codes.into_iter().map(|wc| (wc.id, wc)).collect())
}

pub async fn position_names(conn: &mut PgConnection) -> Result<HashMap<i32, String>, AppError> {
    let positions = sqlx::query_as::<_, Position>("SELECT * FROM positions")
        .fetch_all(&mut *conn)
        .await?;
    Ok(positions.into_iter().map(|p| (p.id, p.name)).collect())
}

pub async fn salary_rates(conn: &mut PgConnection) -> Result<Vec<SalaryRate>, AppError> {
    let rates = sqlx::query_as::<_, SalaryRate>("SELECT * FROM salary_rates ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rates)
}

/// Marks dated within `month`, restricted to `employee_ids` when given.
pub async fn entries_for_month(
    conn: &mut PgConnection,
    month: &YearMonth,
    employee_ids: Option<&[i32]>,
) -> Result<Vec<TimesheetEntry>, AppError> {
    let entries = match employee_ids {
        Some(ids) => {
            sqlx::query_as::<_, TimesheetEntry>(
                "SELECT * FROM timesheets WHERE employee_id = ANY($1) AND date >= $2 AND date <= $3",
            )
            .bind(ids)
            .bind(month.first_day())
            .bind(month.last_day())
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, TimesheetEntry>(
                "SELECT * FROM timesheets WHERE date >= $1 AND date <= $2",
            )
            .bind(month.first_day())
            .bind(month.last_day())
            .fetch_all(&mut *conn)
            .await?
        }
    };
    Ok(entries)
}
