use log::{info, warn};
use sqlx::PgPool;

use crate::config::Settings;
use crate::errors::AppError;
use crate::models::role::Capabilities;
use crate::utils::password::hash_password;

const ADMIN_ROLE: &str = "Admin";

/// Default attendance marks: (code, label, standard hours, night hours, color).
const DEFAULT_WORK_CODES: [(&str, &str, f64, f64, &str); 5] = [
    ("8", "Standard 8h", 8.0, 0.0, "#E2E8F0"),
    ("Д", "Day 12h", 12.0, 0.0, "#FEF08A"),
    ("Н", "Night 12h", 8.0, 4.0, "#DDD6FE"),
    ("О", "Vacation", 0.0, 0.0, "#BBF7D0"),
    ("К", "Business Trip", 0.0, 0.0, "#BFDBFE"),
];

/// Bootstraps an empty database: default work codes, an `Admin` role and the
/// protected admin account. Existing data is never touched.
pub async fn seed_defaults(pool: &PgPool, settings: &Settings) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let codes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_codes")
        .fetch_one(&mut *tx)
        .await?;
    if codes == 0 {
        for (code, label, std, night, color) in DEFAULT_WORK_CODES {
            sqlx::query(
                "INSERT INTO work_codes (code, label, hours_standard, hours_night, color_hex, rate_multiplier) \
                 VALUES ($1, $2, $3, $4, $5, 1.0)",
            )
            .bind(code)
            .bind(label)
            .bind(std)
            .bind(night)
            .bind(color)
            .execute(&mut *tx)
            .await?;
        }
        info!("Seeded {} default work codes", DEFAULT_WORK_CODES.len());
    }

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    if users == 0 {
        match &settings.admin_password {
            Some(password) => {
                let caps = Capabilities::administrator();
                let role_id: i32 = sqlx::query_scalar(
                    r#"
                    INSERT INTO roles (name, can_manage_settings, can_edit_all, can_view_all, can_view_only,
                                       can_view_finance, can_edit_finance, can_export, can_manage_employees,
                                       can_manage_users, can_manage_departments)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                    RETURNING id
                    "#,
                )
                .bind(ADMIN_ROLE)
                .bind(caps.can_manage_settings)
                .bind(caps.can_edit_all)
                .bind(caps.can_view_all)
                .bind(caps.can_view_only)
                .bind(caps.can_view_finance)
                .bind(caps.can_edit_finance)
                .bind(caps.can_export)
                .bind(caps.can_manage_employees)
                .bind(caps.can_manage_users)
                .bind(caps.can_manage_departments)
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query("INSERT INTO users (username, hashed_password, role_id) VALUES ($1, $2, $3)")
                    .bind(&settings.admin_username)
                    .bind(hash_password(password)?)
                    .bind(role_id)
                    .execute(&mut *tx)
                    .await?;
                info!("Seeded admin user '{}'", settings.admin_username);
            }
            None => warn!("No users exist and ADMIN_PASSWORD is not set; skipping admin bootstrap"),
        }
    }

    tx.commit().await?;
    Ok(())
}
