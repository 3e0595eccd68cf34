use serde::{Deserialize, Serialize};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Employee {
    pub id: i32,
    pub full_name: String,
    pub tab_number: String,
    pub category: i32,
    pub dept_id: i32,
    pub position_id: Option<i32>,
}
