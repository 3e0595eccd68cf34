//! Per-request access decisions.
//!
//! An `AccessPolicy` is built once from the caller's current role and active
//! department; handlers ask it for a gate (allow/deny) or for the department
//! scope that filters what they read or write.

use std::collections::BTreeSet;

use log::warn;
use sqlx::PgConnection;

use crate::errors::AppError;
use crate::models::role::{Capabilities, Role};
use crate::models::user::{User, UserWithEmployeeDept};
use crate::services::hierarchy::DepartmentTree;
use crate::utils::jwt::Claims;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Departments(BTreeSet<i32>),
}

impl Scope {
    pub fn allows(&self, dept_id: i32) -> bool {
        match self {
            Scope::All => true,
            Scope::Departments(ids) => ids.contains(&dept_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub user: User,
    pub role: Role,
    pub active_dept_id: Option<i32>,
}

impl AccessPolicy {
    pub fn new(user: User, role: Role, active_dept_id: Option<i32>) -> Self {
        AccessPolicy { user, role, active_dept_id }
    }

    /// Resolves the token's subject against the current user and role rows,
    /// so revoked capabilities take effect before the token expires.
    pub async fn load(conn: &mut PgConnection, claims: &Claims) -> Result<AccessPolicy, AppError> {
        let row = sqlx::query_as::<_, UserWithEmployeeDept>(
            r#"
            SELECT u.id, u.username, u.hashed_password, u.role_id, u.dept_id, u.employee_id,
                   e.dept_id AS employee_dept_id
            FROM users u
            LEFT JOIN employees e ON e.id = u.employee_id
            WHERE u.username = $1
            "#,
        )
        .bind(&claims.sub)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Could not validate credentials".to_string()))?;

        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(row.user.role_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Could not validate credentials".to_string()))?;

        let active_dept_id = row.active_dept_id();
        Ok(AccessPolicy::new(row.user, role, active_dept_id))
    }

    fn caps(&self) -> &Capabilities {
        &self.role.capabilities
    }

    pub fn is_global_reader(&self) -> bool {
        let caps = self.caps();
        caps.can_view_all || caps.can_edit_all || caps.can_manage_settings
    }

    pub fn is_global_editor(&self) -> bool {
        let caps = self.caps();
        caps.can_edit_all || caps.can_manage_settings
    }

    /// Departments the caller may read: everything for global readers,
    /// otherwise the whole tree under the root of their active department.
    pub fn read_scope(&self, tree: &DepartmentTree) -> Scope {
        if self.is_global_reader() {
            return Scope::All;
        }
        match self.active_dept_id {
            Some(dept_id) => Scope::Departments(tree.descendant_ids(tree.root_ancestor(dept_id))),
            None => Scope::Departments(BTreeSet::new()),
        }
    }

    /// Departments whose timesheets the caller may change: the subtree of
    /// their own active department unless they can edit everything.
    pub fn edit_scope(&self, tree: &DepartmentTree) -> Scope {
        if self.is_global_editor() {
            return Scope::All;
        }
        match self.active_dept_id {
            Some(dept_id) => Scope::Departments(tree.descendant_ids(dept_id)),
            None => Scope::Departments(BTreeSet::new()),
        }
    }

    fn gate(&self, allowed: bool, detail: &str) -> Result<(), AppError> {
        if allowed {
            Ok(())
        } else {
            warn!("Denied {} for user {}", detail, self.user.username);
            Err(AppError::Forbidden(detail.to_string()))
        }
    }

    pub fn require_finance_view(&self) -> Result<(), AppError> {
        let caps = self.caps();
        self.gate(
            caps.can_view_finance
                || caps.can_edit_finance
                || caps.can_manage_settings
                || caps.can_view_all
                || caps.can_edit_all,
            "Finance access required",
        )
    }

    pub fn require_finance_edit(&self) -> Result<(), AppError> {
        let caps = self.caps();
        self.gate(
            caps.can_edit_finance || caps.can_edit_all || caps.can_manage_settings,
            "Finance edit permission required",
        )
    }

    pub fn require_settings(&self) -> Result<(), AppError> {
        self.gate(self.caps().can_manage_settings, "Only admins can perform this action")
    }

    pub fn require_user_admin(&self) -> Result<(), AppError> {
        let caps = self.caps();
        self.gate(
            caps.can_manage_users || caps.can_manage_settings,
            "Not authorized to manage users and roles",
        )
    }

    pub fn require_department_admin(&self) -> Result<(), AppError> {
        let caps = self.caps();
        self.gate(
            caps.can_manage_departments || caps.can_manage_settings,
            "Not authorized to manage departments",
        )
    }

    pub fn require_employee_admin(&self) -> Result<(), AppError> {
        let caps = self.caps();
        self.gate(
            caps.can_manage_employees || caps.can_manage_settings,
            "Not authorized to manage employees",
        )
    }

    pub fn require_export(&self) -> Result<(), AppError> {
        self.gate(
            self.caps().can_export || self.is_global_reader(),
            "Export permission required",
        )
    }

    pub fn require_in_scope(&self, scope: &Scope, dept_id: i32) -> Result<(), AppError> {
        self.gate(scope.allows(dept_id), "Not authorized for this department")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::department::Department;

    fn policy(caps: Capabilities, active_dept_id: Option<i32>) -> AccessPolicy {
        let user = User {
            id: 7,
            username: "tester".to_string(),
            hashed_password: String::new(),
            role_id: 3,
            dept_id: active_dept_id,
            employee_id: None,
        };
        let role = Role { id: 3, name: "Tester".to_string(), capabilities: caps };
        AccessPolicy::new(user, role, active_dept_id)
    }

    fn tree() -> DepartmentTree {
        let d = |id, parent_id| Department { id, name: format!("D{}", id), parent_id, category: 99 };
        DepartmentTree::new(vec![d(1, None), d(2, Some(1)), d(3, Some(2)), d(4, None)])
    }

    #[test]
    fn finance_view_gate() {
        assert!(policy(Capabilities::default(), None).require_finance_view().is_err());
        for caps in [
            Capabilities { can_view_finance: true, ..Capabilities::default() },
            Capabilities { can_edit_finance: true, ..Capabilities::default() },
            Capabilities { can_manage_settings: true, ..Capabilities::default() },
            Capabilities { can_view_all: true, ..Capabilities::default() },
            Capabilities { can_edit_all: true, ..Capabilities::default() },
        ] {
            assert!(policy(caps, None).require_finance_view().is_ok());
        }
    }

    #[test]
    fn finance_edit_gate() {
        let viewer = policy(Capabilities { can_view_finance: true, ..Capabilities::default() }, None);
        assert!(matches!(viewer.require_finance_edit(), Err(AppError::Forbidden(_))));

        let view_all = policy(Capabilities { can_view_all: true, ..Capabilities::default() }, None);
        assert!(view_all.require_finance_edit().is_err());

        for caps in [
            Capabilities { can_edit_finance: true, ..Capabilities::default() },
            Capabilities { can_edit_all: true, ..Capabilities::default() },
            Capabilities { can_manage_settings: true, ..Capabilities::default() },
        ] {
            assert!(policy(caps, None).require_finance_edit().is_ok());
        }
    }

    #[test]
    fn global_readers_see_everything() {
        let viewer = policy(Capabilities { can_view_all: true, ..Capabilities::default() }, Some(3));
        assert_eq!(viewer.read_scope(&tree()), Scope::All);
    }

    #[test]
    fn scoped_readers_see_their_root_subtree() {
        let clerk = policy(Capabilities::default(), Some(3));
        assert_eq!(clerk.read_scope(&tree()), Scope::Departments(BTreeSet::from([1, 2, 3])));
        assert!(!clerk.read_scope(&tree()).allows(4));
    }

    #[test]
    fn editors_are_limited_to_their_own_subtree() {
        let clerk = policy(Capabilities::default(), Some(2));
        let scope = clerk.edit_scope(&tree());
        assert!(scope.allows(2) && scope.allows(3));
        assert!(!scope.allows(1));

        let editor = policy(Capabilities { can_edit_all: true, ..Capabilities::default() }, Some(2));
        assert_eq!(editor.edit_scope(&tree()), Scope::All);
    }

    #[test]
    fn unassigned_non_global_user_has_empty_scope() {
        let clerk = policy(Capabilities::default(), None);
        assert_eq!(clerk.read_scope(&tree()), Scope::Departments(BTreeSet::new()));
        assert!(clerk.require_in_scope(&clerk.read_scope(&tree()), 1).is_err());
    }

    #[test]
    fn management_gates_accept_settings_admins() {
        let admin = policy(Capabilities::administrator(), None);
        assert!(admin.require_settings().is_ok());
        assert!(admin.require_user_admin().is_ok());
        assert!(admin.require_department_admin().is_ok());
        assert!(admin.require_employee_admin().is_ok());
        assert!(admin.require_export().is_ok());

        let hr = policy(Capabilities { can_manage_employees: true, ..Capabilities::default() }, Some(1));
        assert!(hr.require_employee_admin().is_ok());
        assert!(hr.require_department_admin().is_err());
        assert!(hr.require_settings().is_err());
        assert!(hr.require_export().is_err());
    }
}
