//! Application configuration

use std::env;

/// Which event store backs the analytics routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    /// In-process store, for local runs and tests
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,

    // Store
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Privacy
    pub identity_hash_salt: String,

    // Authentication
    pub jwt_secret: String,
    pub purge_secret: Option<String>,
    pub admin_roles: Vec<String>,
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_allowed_origins: parse_list(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),

            // Store
            store: match env::var("ANALYTICS_STORE")
                .unwrap_or_else(|_| "postgres".to_string())
                .trim()
                .to_lowercase()
                .as_str()
            {
                "postgres" | "" => StoreKind::Postgres,
                "memory" => StoreKind::Memory,
                _ => return Err(ConfigError::Invalid("ANALYTICS_STORE must be postgres or memory")),
            },
            // Absent means "not configured", which the routes degrade around
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            // Privacy
            identity_hash_salt: {
                let salt = non_empty_var("IDENTITY_HASH_SALT")
                    .ok_or(ConfigError::Missing("IDENTITY_HASH_SALT"))?;
                if salt.len() < 16 {
                    return Err(ConfigError::WeakSecret(
                        "IDENTITY_HASH_SALT must be at least 16 characters",
                    ));
                }
                salt
            },

            // Authentication
            jwt_secret: {
                let secret = non_empty_var("AUTH_JWT_SECRET")
                    .ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "AUTH_JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            purge_secret: match non_empty_var("PURGE_SECRET") {
                Some(secret) if secret.len() < 32 => {
                    return Err(ConfigError::WeakSecret(
                        "PURGE_SECRET must be at least 32 characters",
                    ))
                }
                other => other,
            },
            admin_roles: {
                let roles = parse_list(
                    &env::var("ADMIN_ROLES").unwrap_or_else(|_| "admin,superadmin,staff".to_string()),
                );
                roles.into_iter().map(|r| r.to_lowercase()).collect()
            },
        })
    }

    /// Whether the analytics store can be opened at all
    pub fn is_store_configured(&self) -> bool {
        match self.store {
            StoreKind::Memory => true,
            StoreKind::Postgres => self.database_url.is_some(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
