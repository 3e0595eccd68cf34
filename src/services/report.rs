//! Spreadsheet exports.
//!
//! Each export is first laid out as plain rows (`SheetLayout`), which is what
//! the tests inspect, and only then encoded to `.xlsx`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Datelike;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};

use crate::errors::AppError;
use crate::models::department::Department;
use crate::models::employee::Employee;
use crate::models::timesheet::TimesheetEntry;
use crate::models::work_code::WorkCode;
use crate::services::hierarchy::{DepartmentTree, NAME_SEPARATOR};
use crate::services::payroll::{round_to, PayrollReport};
use crate::utils::month::YearMonth;

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const PAYROLL_HEADERS: [&str; 10] = [
    "#", "Tab No.", "Full Name", "Position", "Department",
    "Rate/hr", "Std Hrs", "Night Hrs", "Total Hrs", "Gross Pay",
];
const PAYROLL_WIDTHS: [f64; 10] = [4.0, 10.0, 28.0, 20.0, 20.0, 10.0, 9.0, 10.0, 10.0, 14.0];
const T13_LEADING_HEADERS: [&str; 4] = ["Employee Name", "Tab No.", "Position", "Category"];
const T13_TRAILING_HEADERS: [&str; 3] = ["Std Hrs", "Night Hrs", "Total Hrs"];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Money(f64),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetRow {
    Header(Vec<String>),
    /// Group heading merged across every column.
    Banner(String),
    Data { cells: Vec<Cell>, shaded: bool },
    Total { label: String, column: u16, amount: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Payroll,
    Attendance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub title: String,
    pub palette: Palette,
    pub column_widths: Vec<f64>,
    /// Data cells at or right of this column are centred.
    pub center_from: Option<u16>,
    pub rows: Vec<SheetRow>,
}

impl SheetLayout {
    pub fn column_count(&self) -> u16 {
        self.column_widths.len() as u16
    }
}

/// One row per employee, a banner whenever the service changes, and a
/// trailing grand total.
pub fn payroll_layout(report: &PayrollReport) -> SheetLayout {
    let mut rows = vec![SheetRow::Header(PAYROLL_HEADERS.iter().map(|h| h.to_string()).collect())];
    let mut current_service: Option<&str> = None;

    for (i, emp) in report.employees.iter().enumerate() {
        let ordinal = i + 1;
        if current_service != Some(emp.service_name.as_str()) {
            current_service = Some(emp.service_name.as_str());
            rows.push(SheetRow::Banner(format!("SERVICE: {}", emp.service_name)));
        }
        rows.push(SheetRow::Data {
            cells: vec![
                Cell::Number(ordinal as f64),
                Cell::Text(emp.tab_number.clone()),
                Cell::Text(emp.full_name.clone()),
                Cell::Text(emp.position.clone()),
                Cell::Text(emp.dept_name.clone()),
                Cell::Number(emp.hourly_rate),
                Cell::Number(emp.std_hours),
                Cell::Number(emp.night_hours),
                Cell::Number(emp.total_hours),
                Cell::Money(emp.gross_pay),
            ],
            shaded: ordinal % 2 == 0,
        });
    }

    rows.push(SheetRow::Total {
        label: "TOTAL".to_string(),
        column: (PAYROLL_HEADERS.len() - 1) as u16,
        amount: report.grand_total,
    });

    SheetLayout {
        title: format!("Payroll {}", report.year_month),
        palette: Palette::Payroll,
        column_widths: PAYROLL_WIDTHS.to_vec(),
        center_from: None,
        rows,
    }
}

pub fn payroll_filename(year_month: &YearMonth) -> String {
    format!("payroll_{}.xlsx", year_month)
}

/// Everything the T-13 attendance sheet needs for one department subtree.
pub struct AttendanceInput<'a> {
    pub year_month: YearMonth,
    pub tree: &'a DepartmentTree,
    pub dept_ids: &'a BTreeSet<i32>,
    pub employees: &'a [Employee],
    pub positions: &'a HashMap<i32, String>,
    pub work_codes: &'a HashMap<i32, WorkCode>,
    pub entries: &'a [TimesheetEntry],
}

pub fn attendance_layout(input: &AttendanceInput<'_>) -> SheetLayout {
    let days = input.year_month.days_in_month();

    let mut headers: Vec<String> = T13_LEADING_HEADERS.iter().map(|h| h.to_string()).collect();
    headers.extend((1..=days).map(|d| d.to_string()));
    headers.extend(T13_TRAILING_HEADERS.iter().map(|h| h.to_string()));

    // employee -> day -> work code
    let mut marks: HashMap<i32, BTreeMap<u32, &WorkCode>> = HashMap::new();
    for entry in input.entries.iter().filter(|e| input.year_month.contains(e.date)) {
        if let Some(wc) = input.work_codes.get(&entry.work_code_id) {
            marks.entry(entry.employee_id).or_default().insert(entry.date.day(), wc);
        }
    }

    let mut departments: Vec<&Department> = input
        .dept_ids
        .iter()
        .filter_map(|id| input.tree.get(*id))
        .collect();
    departments.sort_by_key(|d| (d.category, d.id));

    let mut rows = vec![SheetRow::Header(headers)];
    for dept in departments {
        let mut members: Vec<&Employee> = input.employees.iter().filter(|e| e.dept_id == dept.id).collect();
        if members.is_empty() {
            continue;
        }
        members.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.full_name.cmp(&b.full_name)));

        let parent_prefix = dept
            .parent_id
            .filter(|parent_id| input.dept_ids.contains(parent_id))
            .and_then(|parent_id| input.tree.get(parent_id))
            .map(|parent| format!("{}{}", parent.name, NAME_SEPARATOR))
            .unwrap_or_default();
        rows.push(SheetRow::Banner(format!("{}{}", parent_prefix, dept.name)));

        for emp in members {
            let emp_marks = marks.get(&emp.id);
            let position = emp
                .position_id
                .and_then(|id| input.positions.get(&id).cloned())
                .unwrap_or_else(|| "—".to_string());

            let mut cells = vec![
                Cell::Text(emp.full_name.clone()),
                Cell::Text(emp.tab_number.clone()),
                Cell::Text(position),
                Cell::Text(emp.category.to_string()),
            ];

            let (mut std_hours, mut night_hours) = (0.0, 0.0);
            for day in 1..=days {
                match emp_marks.and_then(|m| m.get(&day)) {
                    Some(wc) => {
                        std_hours += wc.hours_standard;
                        night_hours += wc.hours_night;
                        cells.push(Cell::Text(wc.code.clone()));
                    }
                    None => cells.push(Cell::Empty),
                }
            }
            cells.push(Cell::Number(round_to(std_hours, 1)));
            cells.push(Cell::Number(round_to(night_hours, 1)));
            cells.push(Cell::Number(round_to(std_hours + night_hours, 1)));

            rows.push(SheetRow::Data { cells, shaded: false });
        }
    }

    let mut column_widths = vec![30.0, 12.0, 20.0, 10.0];
    column_widths.extend((1..=days).map(|_| 5.0));
    column_widths.extend([10.0, 10.0, 10.0]);

    SheetLayout {
        title: format!("Timesheet {}", input.year_month),
        palette: Palette::Attendance,
        column_widths,
        center_from: Some(T13_LEADING_HEADERS.len() as u16),
        rows,
    }
}

pub fn attendance_filename(full_name: &str, year_month: &YearMonth) -> String {
    let name = full_name.replace(' ', "_").replace('»', "-");
    format!("T-13_{}_{}.xlsx", name, year_month)
}

struct Formats {
    header: Format,
    banner: Format,
    cell: Format,
    centered: Format,
    shaded: Format,
    money: Format,
    shaded_money: Format,
    total_label: Format,
    total_amount: Format,
}

impl Formats {
    fn for_palette(palette: Palette) -> Self {
        let header = match palette {
            Palette::Payroll => Format::new()
                .set_bold()
                .set_font_color(Color::RGB(0xFFFFFF))
                .set_background_color(Color::RGB(0x4F46E5)),
            Palette::Attendance => Format::new()
                .set_bold()
                .set_font_color(Color::RGB(0x1E293B))
                .set_background_color(Color::RGB(0xF8FAFC)),
        }
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);

        let banner_color = match palette {
            Palette::Payroll => Color::Black,
            Palette::Attendance => Color::RGB(0x0F172A),
        };

        let cell = Format::new().set_border(FormatBorder::Thin);
        let shaded = cell.clone().set_background_color(Color::RGB(0xF1F5F9));
        Formats {
            header,
            banner: Format::new()
                .set_bold()
                .set_font_color(banner_color)
                .set_background_color(Color::RGB(0xE2E8F0))
                .set_align(FormatAlign::Left)
                .set_border(FormatBorder::Thin),
            centered: cell.clone().set_align(FormatAlign::Center),
            money: cell.clone().set_num_format("#,##0.00"),
            shaded_money: shaded.clone().set_num_format("#,##0.00"),
            shaded,
            cell,
            total_label: Format::new().set_bold(),
            total_amount: Format::new()
                .set_bold()
                .set_num_format("#,##0.00")
                .set_background_color(Color::RGB(0xC7D2FE)),
        }
    }
}

pub fn render_xlsx(layout: &SheetLayout) -> Result<Vec<u8>, AppError> {
    write_workbook(layout).map_err(|err| {
        log::error!("Spreadsheet generation failed: {}", err);
        AppError::InternalServerError("Spreadsheet generation failed".to_string())
    })
}

fn write_workbook(layout: &SheetLayout) -> Result<Vec<u8>, XlsxError> {
    let formats = Formats::for_palette(layout.palette);
    let last_col = layout.column_count().saturating_sub(1);

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&layout.title)?;

    for (row_idx, row) in layout.rows.iter().enumerate() {
        let r = row_idx as u32;
        match row {
            SheetRow::Header(titles) => {
                for (c, title) in titles.iter().enumerate() {
                    worksheet.write_string_with_format(r, c as u16, title, &formats.header)?;
                }
            }
            SheetRow::Banner(text) => {
                worksheet.merge_range(r, 0, r, last_col, text, &formats.banner)?;
            }
            SheetRow::Data { cells, shaded } => {
                for (c, cell) in cells.iter().enumerate() {
                    let c = c as u16;
                    let centered = layout.center_from.map_or(false, |from| c >= from);
                    let plain = if *shaded {
                        &formats.shaded
                    } else if centered {
                        &formats.centered
                    } else {
                        &formats.cell
                    };
                    match cell {
                        Cell::Text(text) => {
                            worksheet.write_string_with_format(r, c, text, plain)?;
                        }
                        Cell::Number(value) => {
                            worksheet.write_number_with_format(r, c, *value, plain)?;
                        }
                        Cell::Money(value) => {
                            let money = if *shaded { &formats.shaded_money } else { &formats.money };
                            worksheet.write_number_with_format(r, c, *value, money)?;
                        }
                        Cell::Empty => {
                            worksheet.write_blank(r, c, plain)?;
                        }
                    }
                }
            }
            SheetRow::Total { label, column, amount } => {
                worksheet.write_string_with_format(r, 0, label, &formats.total_label)?;
                worksheet.write_number_with_format(r, *column, *amount, &formats.total_amount)?;
            }
        }
    }

    for (c, width) in layout.column_widths.iter().enumerate() {
        worksheet.set_column_width(c as u16, *width)?;
    }

    workbook.save_to_buffer()
}
