use serde::{Deserialize, Serialize};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SalaryRate {
    pub id: i32,
    pub dept_id: i32,
    pub position_id: i32,
    pub hourly_rate: f64,
}
