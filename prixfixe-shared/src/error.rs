/// Error types for the persistence layer
///
/// Every querier returns [`DatabaseError`]. The variants are grouped by what
/// went wrong rather than where:
///
/// - **Input shape**: `NilInput`, `EmptyInput`, `InvalidId`. Raised before any I/O.
/// - **Not found**: `NoRows` (driver-level zero rows) and `NotFound` (semantic).
/// - **Conflict**: `UserAlreadyExists`, raised only by user creation.
/// - **State**: `InvitationNotFound`, raised when signing up with a stale invitation.
/// - **Transport**: `RowError` and `ScanError`, raised while streaming or decoding rows.
/// - **Availability**: `Unavailable`, any driver error not otherwise classified.
///
/// # Example
///
/// ```no_run
/// use prixfixe_shared::error::DatabaseError;
///
/// fn status_for(err: &DatabaseError) -> u16 {
///     if err.is_not_found() {
///         404
///     } else if err.is_input_error() {
///         400
///     } else if matches!(err, DatabaseError::UserAlreadyExists) {
///         409
///     } else {
///         500
///     }
/// }
/// ```

/// PostgreSQL SQLSTATE for `unique_violation`
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Error type returned by every database operation
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// A required input record was absent
    #[error("nil input provided")]
    NilInput,

    /// A required string input was blank
    #[error("empty input provided: {0}")]
    EmptyInput(&'static str),

    /// An identifier argument was empty
    #[error("invalid ID provided: {0}")]
    InvalidId(&'static str),

    /// An input record failed field validation
    #[error("invalid input: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    /// A write matched no rows, or a read returned none
    #[error("no rows returned")]
    NoRows,

    /// The requested record does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Username or email address is already taken
    #[error("user already exists")]
    UserAlreadyExists,

    /// No pending invitation matched the supplied email and token
    #[error("invitation not found")]
    InvitationNotFound,

    /// Iterating a result set failed
    #[error("error iterating rows for {description}")]
    RowError {
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Decoding a row into a record failed
    #[error("error scanning {description}")]
    ScanError {
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// The database rejected or failed to run a statement
    #[error("database unavailable while {description}")]
    Unavailable {
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Applying schema migrations failed
    #[error("migrating database")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Convenience alias used throughout the crate
pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

impl DatabaseError {
    pub(crate) fn unavailable(description: &'static str, source: sqlx::Error) -> Self {
        DatabaseError::Unavailable {
            description,
            source,
        }
    }

    pub(crate) fn row(description: &'static str, source: sqlx::Error) -> Self {
        DatabaseError::RowError {
            description,
            source,
        }
    }

    pub(crate) fn scan(description: &'static str, source: sqlx::Error) -> Self {
        DatabaseError::ScanError {
            description,
            source,
        }
    }

    /// True for both the semantic and the driver-level "nothing there" kinds
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_) | DatabaseError::NoRows)
    }

    /// True for errors caused by malformed arguments
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::NilInput
                | DatabaseError::EmptyInput(_)
                | DatabaseError::InvalidId(_)
                | DatabaseError::InvalidInput(_)
        )
    }

    /// Converts `NoRows` into `NotFound(entity)`, leaving other kinds alone
    pub fn or_not_found(self, entity: &'static str) -> Self {
        match self {
            DatabaseError::NoRows => DatabaseError::NotFound(entity),
            other => other,
        }
    }
}

/// Returns true if the driver reported a unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION_CODE),
        _ => false,
    }
}

/// Rejects an empty identifier before any I/O happens
pub(crate) fn require_id(value: &str, name: &'static str) -> Result<()> {
    if value.is_empty() {
        tracing::debug!(argument = name, "rejecting empty identifier");
        return Err(DatabaseError::InvalidId(name));
    }
    Ok(())
}

/// Rejects a blank string input before any I/O happens
pub(crate) fn require_non_empty(value: &str, name: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        tracing::debug!(argument = name, "rejecting empty input");
        return Err(DatabaseError::EmptyInput(name));
    }
    Ok(())
}
