use serde::{Deserialize, Serialize};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Department {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
    pub category: i32,
}

/// Category rank that marks a top-level "service" department.
pub const SERVICE_CATEGORY: i32 = 1;
pub const DEFAULT_CATEGORY: i32 = 99;
