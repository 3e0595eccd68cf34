use std::env;
use std::fmt;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 7;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ADMIN_USERNAME: &str = "admin";

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::Invalid(key, value) => write!(f, "{} has an invalid value: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process-wide settings, read once at start-up and shared as `web::Data`.
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub jwt_secret: String,
    pub bind_address: String,
    pub token_ttl_minutes: i64,
    pub max_db_connections: u32,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Settings, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = lookup("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("JWT_SECRET", jwt_secret));
        }

        let token_ttl_minutes = match lookup("TOKEN_TTL_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|minutes| *minutes > 0)
                .ok_or(ConfigError::Invalid("TOKEN_TTL_MINUTES", raw))?,
            None => DEFAULT_TOKEN_TTL_MINUTES,
        };

        let max_db_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", raw))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Settings {
            database_url,
            jwt_secret,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            token_ttl_minutes,
            max_db_connections,
            admin_username: lookup("ADMIN_USERNAME")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ADMIN_USERNAME.to_string()),
            admin_password: lookup("ADMIN_PASSWORD").filter(|pw| !pw.is_empty()),
        })
    }
}

#[cfg(test)]
impl Settings {
    pub fn for_tests() -> Settings {
        Settings {
            database_url: "postgres://localhost/timesheet_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES,
            max_db_connections: 1,
            admin_username: DEFAULT_ADMIN_USERNAME.to_string(),
            admin_password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn applies_defaults_for_optional_keys() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/timesheet"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(settings.bind_address, "127.0.0.1:8080");
        assert_eq!(settings.token_ttl_minutes, 10080);
        assert_eq!(settings.max_db_connections, 5);
        assert_eq!(settings.admin_username, "admin");
        assert!(settings.admin_password.is_none());
    }

    #[test]
    fn rejects_missing_and_empty_secret() {
        let missing = Settings::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db")]));
        assert!(matches!(missing, Err(ConfigError::Missing("JWT_SECRET"))));

        let empty = Settings::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("JWT_SECRET", "  "),
        ]));
        assert!(matches!(empty, Err(ConfigError::Invalid("JWT_SECRET", _))));
    }

    #[test]
    fn rejects_non_numeric_ttl() {
        let result = Settings::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("JWT_SECRET", "s3cret"),
            ("TOKEN_TTL_MINUTES", "week"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid("TOKEN_TTL_MINUTES", _))));
    }
}
