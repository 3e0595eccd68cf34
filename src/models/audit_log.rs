use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Finance audit row as returned to readers, joined with the actor's username.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i32,
    pub username: Option<String>,
    pub action: String,
    pub target: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}
