/// Database settings consumed by the persistence layer
///
/// Settings are layered: built-in defaults, then an optional TOML file, then
/// environment variables prefixed with `PRIXFIXE_`. Nested keys use a double
/// underscore (`PRIXFIXE_SEED_USER__USERNAME`). `DATABASE_URL` is honored when
/// `PRIXFIXE_CONNECTION_DETAILS` is unset.
///
/// # Environment Variables
///
/// - `PRIXFIXE_CONNECTION_DETAILS` / `DATABASE_URL`: PostgreSQL connection string
/// - `PRIXFIXE_MAX_PING_ATTEMPTS`: readiness attempts before giving up (default: 50)
/// - `PRIXFIXE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `PRIXFIXE_DEBUG`: log SQL text of every statement (default: false)
/// - `PRIXFIXE_RUN_MIGRATIONS`: apply migrations on startup (default: true)
/// - `PRIXFIXE_SEED_USER__*`: optional user created on startup
///
/// # Example
///
/// ```no_run
/// use prixfixe_shared::config::DatabaseSettings;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = DatabaseSettings::load(None)?;
/// println!("pinging at most {} times", settings.max_ping_attempts);
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::env;
use validator::Validate;

use crate::db::pool::DatabaseConfig;

/// Error raised while loading settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("no database connection details provided")]
    MissingConnectionDetails,
}

/// User created at startup when configured, mostly for test environments
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SeedUser {
    #[validate(length(min = 1))]
    pub username: String,

    #[validate(email)]
    pub email_address: String,

    /// Already hashed; this layer never hashes passwords
    #[validate(length(min = 1))]
    pub hashed_password: String,

    #[serde(default)]
    pub two_factor_secret: String,

    /// Service roles granted in addition to `service_user`
    #[serde(default)]
    pub service_roles: Vec<String>,
}

/// Settings for connecting to and preparing the database
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseSettings {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub connection_details: String,

    #[serde(default = "default_max_ping_attempts")]
    #[validate(range(min = 1))]
    pub max_ping_attempts: u8,

    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,

    #[serde(default)]
    pub seed_user: Option<SeedUser>,
}

fn default_max_ping_attempts() -> u8 {
    50
}

fn default_max_connections() -> u32 {
    10
}

fn default_run_migrations() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            connection_details: String::new(),
            max_ping_attempts: default_max_ping_attempts(),
            max_connections: default_max_connections(),
            debug: false,
            run_migrations: default_run_migrations(),
            seed_user: None,
        }
    }
}

impl DatabaseSettings {
    /// Loads settings from an optional file plus the environment
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A source cannot be parsed
    /// - No connection string is available from any source
    /// - A value fails validation (e.g. a malformed seed email)
    pub fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }

        let raw = builder
            .add_source(
                ::config::Environment::with_prefix("PRIXFIXE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("seed_user.service_roles"),
            )
            .build()?;

        let mut settings: DatabaseSettings = raw.try_deserialize()?;

        if settings.connection_details.is_empty() {
            settings.connection_details = env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingConnectionDetails)?;
        }

        settings.validated()
    }

    /// Runs field validation, including the nested seed user
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        if let Some(seed) = &self.seed_user {
            seed.validate()?;
        }
        Ok(self)
    }

    /// Pool configuration derived from these settings
    pub fn pool_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.connection_details.clone(),
            max_connections: self.max_connections,
            min_connections: self.max_connections.min(2),
            ..Default::default()
        }
    }
}
