pub mod jwt;
pub mod month;
pub mod password;
pub mod validation;
