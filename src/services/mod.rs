pub mod audit;
pub mod hierarchy;
pub mod payroll;
pub mod policy;
pub mod rates;
pub mod report;
