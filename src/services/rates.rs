use std::collections::HashMap;

use crate::models::salary_rate::SalaryRate;

/// Hourly rates keyed by (department, position).
#[derive(Debug, Default, Clone)]
pub struct RateTable {
    rates: HashMap<(i32, i32), f64>,
}

impl RateTable {
    pub fn new(rows: &[SalaryRate]) -> Self {
        let rates = rows
            .iter()
            .map(|r| ((r.dept_id, r.position_id), r.hourly_rate))
            .collect();
        RateTable { rates }
    }

    /// Missing rates, and employees without a position, resolve to zero.
    pub fn rate_for(&self, dept_id: i32, position_id: Option<i32>) -> f64 {
        position_id
            .and_then(|pos| self.rates.get(&(dept_id, pos)).copied())
            .unwrap_or(0.0)
    }
}
