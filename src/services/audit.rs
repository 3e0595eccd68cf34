//! Finance audit trail. Rows are only ever appended, on the caller's
//! transaction, so they commit or roll back with the change they describe.

use std::fmt;

use log::info;
use sqlx::PgConnection;

use crate::errors::AppError;
use crate::models::audit_log::AuditLogEntry;

pub const AUDIT_LOG_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CreateRate,
    UpdateRate,
    DeleteRate,
    UpdateMultiplier,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateRate => "CREATE_RATE",
            AuditAction::UpdateRate => "UPDATE_RATE",
            AuditAction::DeleteRate => "DELETE_RATE",
            AuditAction::UpdateMultiplier => "UPDATE_MULTIPLIER",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub user_id: i32,
    pub action: AuditAction,
    pub target: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// `"<position> in <department>"`, substituting the raw id for any name that
/// could not be resolved.
pub fn rate_target(
    position_name: Option<&str>,
    position_id: i32,
    dept_name: Option<&str>,
    dept_id: i32,
) -> String {
    let position = position_name.map_or_else(|| position_id.to_string(), str::to_string);
    let dept = dept_name.map_or_else(|| dept_id.to_string(), str::to_string);
    format!("{} in {}", position, dept)
}

pub fn work_code_target(code: &str) -> String {
    format!("Work code {}", code)
}

/// Money and multiplier values as stored in the log. Integral values keep a
/// trailing `.0`, so `10.0` is logged as `"10.0"`.
pub fn format_value(value: f64) -> String {
    format!("{:?}", value)
}

pub async fn record(conn: &mut PgConnection, record: &AuditRecord) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO finance_audit_log (user_id, action, target, old_value, new_value, timestamp) \
         VALUES ($1, $2, $3, $4, $5, NOW())",
    )
    .bind(record.user_id)
    .bind(record.action.as_str())
    .bind(&record.target)
    .bind(&record.old_value)
    .bind(&record.new_value)
    .execute(&mut *conn)
    .await?;

    info!(
        "Audit {} on {} by user {}: {:?} -> {:?}",
        record.action, record.target, record.user_id, record.old_value, record.new_value
    );
    Ok(())
}

/// Most recent entries first, capped at `AUDIT_LOG_LIMIT`.
pub async fn recent(conn: &mut PgConnection) -> Result<Vec<AuditLogEntry>, AppError> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(
        r#"
        SELECT a.id, COALESCE(u.username, 'system') AS username, a.action, a.target,
               a.old_value, a.new_value, a.timestamp
        FROM finance_audit_log a
        LEFT JOIN users u ON u.id = a.user_id
        ORDER BY a.timestamp DESC, a.id DESC
        LIMIT $1
        "#,
    )
    .bind(AUDIT_LOG_LIMIT)
    .fetch_all(&mut *conn)
    .await?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_uses_names_when_available() {
        assert_eq!(rate_target(Some("Driver"), 3, Some("Transport"), 7), "Driver in Transport");
    }

    #[test]
    fn target_falls_back_to_raw_ids() {
        assert_eq!(rate_target(None, 3, Some("Transport"), 7), "3 in Transport");
        assert_eq!(rate_target(Some("Driver"), 3, None, 7), "Driver in 7");
        assert_eq!(rate_target(None, 3, None, 7), "3 in 7");
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::CreateRate.to_string(), "CREATE_RATE");
        assert_eq!(AuditAction::UpdateRate.as_str(), "UPDATE_RATE");
        assert_eq!(AuditAction::DeleteRate.as_str(), "DELETE_RATE");
        assert_eq!(AuditAction::UpdateMultiplier.as_str(), "UPDATE_MULTIPLIER");
    }

    #[test]
    fn values_keep_their_decimal_form() {
        assert_eq!(format_value(12.5), "12.5");
        assert_eq!(format_value(10.0), "10.0");
        assert_eq!(format_value(0.0), "0.0");
        assert_eq!(format_value(1.25), "1.25");
        assert_eq!(work_code_target("Н"), "Work code Н");
    }
}
