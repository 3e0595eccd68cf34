//! Monthly payroll aggregation.
//!
//! Works purely on rows already loaded for the month, so the arithmetic can
//! be tested without a database. Accumulation keeps full `f64` precision;
//! rounding happens only when a figure is written to the report.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::employee::Employee;
use crate::models::timesheet::TimesheetEntry;
use crate::models::work_code::WorkCode;
use crate::services::hierarchy::DepartmentTree;
use crate::services::rates::RateTable;
use crate::utils::month::YearMonth;

const NO_POSITION: &str = "—";
const UNKNOWN_DEPARTMENT: &str = "Unknown";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PayrollRow {
    pub employee_id: i32,
    pub full_name: String,
    pub tab_number: String,
    pub position: String,
    pub category: i32,
    pub dept_id: i32,
    pub dept_name: String,
    pub service_id: i32,
    pub service_name: String,
    pub hourly_rate: f64,
    pub std_hours: f64,
    pub night_hours: f64,
    pub total_hours: f64,
    pub gross_pay: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DepartmentSummary {
    pub dept_id: i32,
    pub dept_name: String,
    pub total_pay: f64,
    pub employees: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PayrollReport {
    pub year_month: String,
    pub employees: Vec<PayrollRow>,
    pub dept_summary: Vec<DepartmentSummary>,
    pub grand_total: f64,
    pub avg_salary: f64,
    pub top_dept: Option<String>,
    pub top_dept_pay: f64,
}

/// Everything the aggregation reads, loaded once per request.
pub struct PayrollInput<'a> {
    pub year_month: YearMonth,
    pub employees: &'a [Employee],
    pub entries: &'a [TimesheetEntry],
    pub work_codes: &'a HashMap<i32, WorkCode>,
    pub positions: &'a HashMap<i32, String>,
    pub rates: &'a RateTable,
    pub tree: &'a DepartmentTree,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Accumulated {
    pub std_hours: f64,
    pub night_hours: f64,
    pub gross_pay: f64,
}

/// Sums one employee's marks. The multiplier applies per entry, so a month
/// mixing plain and overtime codes pays each day at its own multiplier.
pub fn accumulate<'e, I>(entries: I, work_codes: &HashMap<i32, WorkCode>, hourly_rate: f64) -> Accumulated
where
    I: IntoIterator<Item = &'e TimesheetEntry>,
{
    let mut acc = Accumulated::default();
    for entry in entries {
        // Marks pointing at a removed work code contribute nothing.
        if let Some(wc) = work_codes.get(&entry.work_code_id) {
            acc.std_hours += wc.hours_standard;
            acc.night_hours += wc.hours_night;
            acc.gross_pay += wc.total_hours() * hourly_rate * wc.rate_multiplier;
        }
    }
    acc
}

pub fn compute_payroll(input: &PayrollInput<'_>) -> PayrollReport {
    let mut entries_by_employee: HashMap<i32, Vec<&TimesheetEntry>> = HashMap::new();
    for entry in input.entries.iter().filter(|e| input.year_month.contains(e.date)) {
        entries_by_employee.entry(entry.employee_id).or_default().push(entry);
    }

    let mut rows = Vec::with_capacity(input.employees.len());
    let mut summary: Vec<(DepartmentSummary, f64)> = Vec::new();
    let mut summary_index: HashMap<i32, usize> = HashMap::new();

    for emp in input.employees {
        let hourly_rate = input.rates.rate_for(emp.dept_id, emp.position_id);
        let acc = accumulate(
            entries_by_employee.get(&emp.id).into_iter().flatten().copied(),
            input.work_codes,
            hourly_rate,
        );

        let dept_name = input
            .tree
            .get(emp.dept_id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| UNKNOWN_DEPARTMENT.to_string());
        let (service_id, service_name) = match input.tree.root_service(emp.dept_id) {
            Some(service) => (service.id, service.name.clone()),
            None => (emp.dept_id, dept_name.clone()),
        };
        let position = emp
            .position_id
            .and_then(|id| input.positions.get(&id).cloned())
            .unwrap_or_else(|| NO_POSITION.to_string());

        rows.push(PayrollRow {
            employee_id: emp.id,
            full_name: emp.full_name.clone(),
            tab_number: emp.tab_number.clone(),
            position,
            category: emp.category,
            dept_id: emp.dept_id,
            dept_name: dept_name.clone(),
            service_id,
            service_name,
            hourly_rate,
            std_hours: round_to(acc.std_hours, 1),
            night_hours: round_to(acc.night_hours, 1),
            total_hours: round_to(acc.std_hours + acc.night_hours, 1),
            gross_pay: round_to(acc.gross_pay, 2),
        });

        let idx = *summary_index.entry(emp.dept_id).or_insert_with(|| {
            summary.push((
                DepartmentSummary { dept_id: emp.dept_id, dept_name, total_pay: 0.0, employees: 0 },
                0.0,
            ));
            summary.len() - 1
        });
        let (dept, raw_total) = &mut summary[idx];
        *raw_total += acc.gross_pay;
        dept.employees += 1;
    }

    // Stable: employees sharing a key keep their id order.
    rows.sort_by(|a, b| {
        a.service_name
            .cmp(&b.service_name)
            .then_with(|| a.dept_name.cmp(&b.dept_name))
            .then_with(|| a.category.cmp(&b.category))
    });

    let dept_summary: Vec<DepartmentSummary> = summary
        .into_iter()
        .map(|(mut dept, raw_total)| {
            dept.total_pay = round_to(raw_total, 2);
            dept
        })
        .collect();

    // First department wins a tie.
    let top = dept_summary.iter().fold(None::<&DepartmentSummary>, |best, dept| match best {
        Some(current) if dept.total_pay <= current.total_pay => Some(current),
        _ => Some(dept),
    });

    let grand_total: f64 = rows.iter().map(|r| r.gross_pay).sum();
    let avg_salary = if rows.is_empty() {
        0.0
    } else {
        round_to(grand_total / rows.len() as f64, 2)
    };

    PayrollReport {
        year_month: input.year_month.to_string(),
        grand_total: round_to(grand_total, 2),
        avg_salary,
        top_dept: top.map(|d| d.dept_name.clone()),
        top_dept_pay: top.map_or(0.0, |d| d.total_pay),
        employees: rows,
        dept_summary,
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::department::Department;
    use crate::models::salary_rate::SalaryRate;
    use chrono::NaiveDate;

    fn work_code(id: i32, code: &str, std: f64, night: f64, multiplier: f64) -> WorkCode {
        WorkCode {
            id,
            code: code.to_string(),
            label: code.to_string(),
            hours_standard: std,
            hours_night: night,
            color_hex: "#FFFFFF".to_string(),
            rate_multiplier: multiplier,
        }
    }

    fn employee(id: i32, name: &str, dept_id: i32, position_id: Option<i32>, category: i32) -> Employee {
        Employee {
            id,
            full_name: name.to_string(),
            tab_number: format!("{:03}", id),
            category,
            dept_id,
            position_id,
        }
    }

    fn entries(employee_id: i32, work_code_id: i32, days: std::ops::RangeInclusive<u32>) -> Vec<TimesheetEntry> {
        days.map(|day| TimesheetEntry {
            id: 0,
            employee_id,
            date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            work_code_id,
        })
        .collect()
    }

    fn tree() -> DepartmentTree {
        DepartmentTree::new(vec![
            Department { id: 1, name: "Operations".to_string(), parent_id: None, category: 1 },
            Department { id: 2, name: "Transport".to_string(), parent_id: Some(1), category: 2 },
            Department { id: 3, name: "Management".to_string(), parent_id: None, category: 99 },
        ])
    }

    fn codes() -> HashMap<i32, WorkCode> {
        [
            work_code(1, "8", 8.0, 0.0, 1.0),
            work_code(2, "Н", 8.0, 4.0, 1.5),
            work_code(3, "О", 0.0, 0.0, 1.0),
        ]
        .into_iter()
        .map(|wc| (wc.id, wc))
        .collect()
    }

    fn positions() -> HashMap<i32, String> {
        HashMap::from([(1, "Driver".to_string()), (2, "Manager".to_string())])
    }

    fn run(employees: &[Employee], entries: &[TimesheetEntry], rates: &RateTable) -> PayrollReport {
        let tree = tree();
        let codes = codes();
        let positions = positions();
        compute_payroll(&PayrollInput {
            year_month: YearMonth::parse("2024-06").unwrap(),
            employees,
            entries,
            work_codes: &codes,
            positions: &positions,
            rates,
            tree: &tree,
        })
    }

    #[test]
    fn twenty_standard_days_at_ten_per_hour() {
        let employees = [employee(1, "Smirnov Alexey", 2, Some(1), 99)];
        let rates = RateTable::new(&[SalaryRate { id: 1, dept_id: 2, position_id: 1, hourly_rate: 10.0 }]);
        let report = run(&employees, &entries(1, 1, 1..=20), &rates);

        let row = &report.employees[0];
        assert_eq!(row.std_hours, 160.0);
        assert_eq!(row.night_hours, 0.0);
        assert_eq!(row.total_hours, 160.0);
        assert_eq!(row.gross_pay, 1600.00);
        assert_eq!(row.service_name, "Operations");
        assert_eq!(row.position, "Driver");
        assert_eq!(report.grand_total, 1600.00);
        assert_eq!(report.avg_salary, 1600.00);
    }

    #[test]
    fn multiplier_applies_per_entry() {
        let employees = [employee(1, "Kuznetsov Petr", 2, Some(1), 99)];
        let rates = RateTable::new(&[SalaryRate { id: 1, dept_id: 2, position_id: 1, hourly_rate: 10.0 }]);
        let mut marks = entries(1, 1, 1..=2);
        marks.extend(entries(1, 2, 3..=3));
        let report = run(&employees, &marks, &rates);

        let row = &report.employees[0];
        // 2 × 8h × 10 × 1.0 + 1 × 12h × 10 × 1.5
        assert_eq!(row.gross_pay, 340.0);
        assert_eq!(row.std_hours, 24.0);
        assert_eq!(row.night_hours, 4.0);
        assert_eq!(row.total_hours, 28.0);
    }

    #[test]
    fn missing_rate_pays_zero_but_counts_hours() {
        let employees = [employee(1, "Popov Dmitry", 3, None, 99)];
        let report = run(&employees, &entries(1, 1, 1..=5), &RateTable::default());

        let row = &report.employees[0];
        assert_eq!(row.std_hours, 40.0);
        assert_eq!(row.gross_pay, 0.0);
        assert_eq!(row.position, "—");
        assert_eq!(row.service_name, "Management");
        assert_eq!(row.service_id, 3);
    }

    #[test]
    fn ignores_entries_outside_the_month_and_unknown_codes() {
        let employees = [employee(1, "Lebedev Sergey", 2, Some(1), 99)];
        let rates = RateTable::new(&[SalaryRate { id: 1, dept_id: 2, position_id: 1, hourly_rate: 10.0 }]);
        let mut marks = entries(1, 1, 1..=1);
        marks.push(TimesheetEntry {
            id: 0,
            employee_id: 1,
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            work_code_id: 1,
        });
        marks.extend(entries(1, 99, 2..=2));
        let report = run(&employees, &marks, &rates);
        assert_eq!(report.employees[0].gross_pay, 80.0);
    }

    #[test]
    fn totals_summary_and_top_department() {
        let employees = [
            employee(1, "A", 2, Some(1), 2),
            employee(2, "B", 3, Some(2), 1),
            employee(3, "C", 2, Some(1), 1),
        ];
        let rates = RateTable::new(&[
            SalaryRate { id: 1, dept_id: 2, position_id: 1, hourly_rate: 10.0 },
            SalaryRate { id: 2, dept_id: 3, position_id: 2, hourly_rate: 15.0 },
        ]);
        let mut marks = entries(1, 1, 1..=10);
        marks.extend(entries(2, 1, 1..=10));
        marks.extend(entries(3, 1, 1..=1));
        let report = run(&employees, &marks, &rates);

        let sum: f64 = report.employees.iter().map(|r| r.gross_pay).sum();
        assert_eq!(report.grand_total, sum);
        assert_eq!(report.grand_total, 800.0 + 1200.0 + 80.0);
        assert_eq!(report.avg_salary, round_to(2080.0 / 3.0, 2));

        assert_eq!(report.dept_summary.len(), 2);
        assert_eq!(report.dept_summary[0].dept_id, 2);
        assert_eq!(report.dept_summary[0].employees, 2);
        assert_eq!(report.dept_summary[0].total_pay, 880.0);
        assert_eq!(report.top_dept.as_deref(), Some("Management"));
        assert_eq!(report.top_dept_pay, 1200.0);
    }

    #[test]
    fn rows_are_grouped_by_service_then_department_then_category() {
        let employees = [
            employee(1, "Ops-cat2", 2, None, 2),
            employee(2, "Mgmt", 3, None, 1),
            employee(3, "Ops-cat1", 2, None, 1),
        ];
        let report = run(&employees, &[], &RateTable::default());
        let names: Vec<&str> = report.employees.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(names, ["Mgmt", "Ops-cat1", "Ops-cat2"]);
    }

    #[test]
    fn first_department_wins_a_tie() {
        let employees = [employee(1, "A", 2, None, 1), employee(2, "B", 3, None, 1)];
        let report = run(&employees, &[], &RateTable::default());
        assert_eq!(report.top_dept.as_deref(), Some("Transport"));
        assert_eq!(report.top_dept_pay, 0.0);
    }

    #[test]
    fn empty_month_yields_zeroes() {
        let report = run(&[], &[], &RateTable::default());
        assert!(report.employees.is_empty());
        assert_eq!(report.grand_total, 0.0);
        assert_eq!(report.avg_salary, 0.0);
        assert_eq!(report.top_dept, None);
        assert_eq!(report.top_dept_pay, 0.0);
        assert_eq!(report.year_month, "2024-06");
    }

    #[test]
    fn rounds_only_at_output() {
        assert_eq!(round_to(2.345678, 2), 2.35);
        assert_eq!(round_to(7.25, 1), 7.3);
        let codes = HashMap::from([(1, work_code(1, "x", 0.1, 0.0, 1.0))]);
        let acc = accumulate(&entries(1, 1, 1..=3), &codes, 1.0);
        assert!((acc.std_hours - 0.3).abs() < 1e-9);
    }
}
