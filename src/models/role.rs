use serde::{Deserialize, Serialize};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Role {
    pub id: i32,
    pub name: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub capabilities: Capabilities,
}

/// The ten independent permission flags a role carries. Also embedded in
/// access tokens as a snapshot taken at login.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Capabilities {
    pub can_manage_settings: bool,
    pub can_edit_all: bool,
    pub can_view_all: bool,
    pub can_view_only: bool,
    pub can_view_finance: bool,
    pub can_edit_finance: bool,
    pub can_export: bool,
    pub can_manage_employees: bool,
    pub can_manage_users: bool,
    pub can_manage_departments: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            can_manage_settings: false,
            can_edit_all: false,
            can_view_all: false,
            can_view_only: true,
            can_view_finance: false,
            can_edit_finance: false,
            can_export: false,
            can_manage_employees: false,
            can_manage_users: false,
            can_manage_departments: false,
        }
    }
}

impl Capabilities {
    /// Full administrator: used when seeding the initial `Admin` role.
    pub fn administrator() -> Self {
        Capabilities {
            can_manage_settings: true,
            can_edit_all: true,
            can_view_only: false,
            ..Capabilities::default()
        }
    }
}
