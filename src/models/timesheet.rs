use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single cell of the monthly grid: one mark per employee per day.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimesheetEntry {
    pub id: i32,
    pub employee_id: i32,
    pub date: NaiveDate,
    pub work_code_id: i32,
}
