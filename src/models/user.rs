use serde::{Deserialize, Serialize};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub role_id: i32,
    pub dept_id: Option<i32>,
    pub employee_id: Option<i32>,
}

/// A user row joined with the department of its linked employee, if any.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct UserWithEmployeeDept {
    #[sqlx(flatten)]
    pub user: User,
    pub employee_dept_id: Option<i32>,
}

impl UserWithEmployeeDept {
    /// The linked employee's department wins over the explicit one.
    pub fn active_dept_id(&self) -> Option<i32> {
        self.employee_dept_id.or(self.user.dept_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(dept_id: Option<i32>, employee_id: Option<i32>) -> User {
        User {
            id: 1,
            username: "manager".to_string(),
            hashed_password: String::new(),
            role_id: 2,
            dept_id,
            employee_id,
        }
    }

    #[test]
    fn employee_department_overrides_explicit_department() {
        let row = UserWithEmployeeDept { user: user(Some(3), Some(9)), employee_dept_id: Some(7) };
        assert_eq!(row.active_dept_id(), Some(7));
    }

    #[test]
    fn falls_back_to_explicit_department() {
        let row = UserWithEmployeeDept { user: user(Some(3), None), employee_dept_id: None };
        assert_eq!(row.active_dept_id(), Some(3));

        let unscoped = UserWithEmployeeDept { user: user(None, None), employee_dept_id: None };
        assert_eq!(unscoped.active_dept_id(), None);
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let json = serde_json::to_value(user(None, None)).unwrap();
        assert!(json.get("hashed_password").is_none());
        assert_eq!(json["username"], "manager");
    }
}
