use serde::{Deserialize, Serialize};

/// One day's attendance mark and what it is worth.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkCode {
    pub id: i32,
    pub code: String,
    pub label: String,
    pub hours_standard: f64,
    pub hours_night: f64,
    pub color_hex: String,
    pub rate_multiplier: f64,
}

impl WorkCode {
    pub fn total_hours(&self) -> f64 {
        self.hours_standard + self.hours_night
    }
}
