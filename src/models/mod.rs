pub mod audit_log;
pub mod department;
pub mod employee;
pub mod position;
pub mod role;
pub mod salary_rate;
pub mod timesheet;
pub mod user;
pub mod work_code;
