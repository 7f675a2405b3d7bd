/// Password reset tokens
///
/// A token is usable once, and only before it expires. Redeeming stamps
/// `redeemed_on`; lookups ignore redeemed and expired tokens.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE password_reset_tokens (
///     id TEXT PRIMARY KEY,
///     token TEXT NOT NULL,
///     expires_at BIGINT NOT NULL,
///     redeemed_on BIGINT,
///     belongs_to_user TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
///     created_on BIGINT NOT NULL DEFAULT extract(epoch FROM NOW()),
///     last_updated_on BIGINT
/// );
/// ```

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};

use super::get_one;
use crate::db::gateway;
use crate::db::mapper::Columns;
use crate::error::{require_id, require_non_empty, Result};
use crate::queriers::Querier;

/// How long a reset token stays valid by default
pub const DEFAULT_PASSWORD_RESET_TOKEN_LIFETIME_SECONDS: u64 = 30 * 60;

macro_rules! password_reset_token_columns {
    () => {
        "password_reset_tokens.id, password_reset_tokens.token, password_reset_tokens.expires_at, \
         password_reset_tokens.redeemed_on, password_reset_tokens.belongs_to_user, \
         password_reset_tokens.created_on, password_reset_tokens.last_updated_on"
    };
}

const GET_PASSWORD_RESET_TOKEN_BY_TOKEN: &str = concat!(
    "SELECT ",
    password_reset_token_columns!(),
    " FROM password_reset_tokens WHERE password_reset_tokens.redeemed_on IS NULL \
     AND password_reset_tokens.expires_at > extract(epoch FROM NOW()) \
     AND password_reset_tokens.token = $1"
);

const GET_PASSWORD_RESET_TOKEN_BY_ID: &str = concat!(
    "SELECT ",
    password_reset_token_columns!(),
    " FROM password_reset_tokens WHERE password_reset_tokens.id = $1"
);

const CREATE_PASSWORD_RESET_TOKEN: &str = "INSERT INTO password_reset_tokens \
     (id, token, expires_at, belongs_to_user, created_on) \
     VALUES ($1, $2, $3, $4, extract(epoch FROM NOW()))";

const REDEEM_PASSWORD_RESET_TOKEN: &str = "UPDATE password_reset_tokens \
     SET redeemed_on = extract(epoch FROM NOW()), last_updated_on = extract(epoch FROM NOW()) \
     WHERE redeemed_on IS NULL AND id = $1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetToken {
    pub id: String,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub expires_at: u64,
    pub redeemed_on: Option<u64>,
    pub belongs_to_user: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
}

impl PasswordResetToken {
    fn from_row(row: &PgRow) -> Result<Self> {
        let mut cols = Columns::new(row, "password reset token");
        Ok(Self {
            id: cols.next()?,
            token: cols.next()?,
            expires_at: cols.epoch()?,
            redeemed_on: cols.optional_epoch()?,
            belongs_to_user: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
        })
    }

    pub fn is_redeemed(&self) -> bool {
        self.redeemed_on.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PasswordResetTokenCreationInput {
    pub id: String,
    /// Opaque secret, generated upstream
    pub token: String,
    pub belongs_to_user: String,
    /// Epoch seconds; defaults to half an hour after creation
    pub expires_at: Option<u64>,
}

impl Querier {
    /// Fetches a token that is neither redeemed nor expired
    #[instrument(skip(self, token))]
    pub async fn get_password_reset_token_by_token(&self, token: &str) -> Result<PasswordResetToken> {
        require_non_empty(token, "token")?;

        let query = sqlx::query(GET_PASSWORD_RESET_TOKEN_BY_TOKEN).bind(token);
        get_one(
            &self.pool,
            "fetching password reset token",
            "password reset token",
            query,
            PasswordResetToken::from_row,
        )
        .await
    }

    #[instrument(skip(self, input), fields(token_id = %input.id, user_id = %input.belongs_to_user))]
    pub async fn create_password_reset_token(
        &self,
        input: &PasswordResetTokenCreationInput,
    ) -> Result<PasswordResetToken> {
        require_id(&input.id, "password_reset_token_id")?;
        require_id(&input.belongs_to_user, "user_id")?;
        require_non_empty(&input.token, "token")?;

        let expires_at = input
            .expires_at
            .unwrap_or_else(|| self.now().saturating_add(DEFAULT_PASSWORD_RESET_TOKEN_LIFETIME_SECONDS));

        let query = sqlx::query(CREATE_PASSWORD_RESET_TOKEN)
            .bind(&input.id)
            .bind(&input.token)
            .bind(i64::try_from(expires_at).unwrap_or(i64::MAX))
            .bind(&input.belongs_to_user);
        gateway::write(&self.pool, "creating password reset token", query).await?;

        info!("password reset token created");
        let query = sqlx::query(GET_PASSWORD_RESET_TOKEN_BY_ID).bind(&input.id);
        get_one(
            &self.pool,
            "fetching password reset token by id",
            "password reset token",
            query,
            PasswordResetToken::from_row,
        )
        .await
    }

    /// Marks a token used; redeeming twice reports `NoRows`
    #[instrument(skip(self))]
    pub async fn redeem_password_reset_token(&self, password_reset_token_id: &str) -> Result<()> {
        require_id(password_reset_token_id, "password_reset_token_id")?;

        let query = sqlx::query(REDEEM_PASSWORD_RESET_TOKEN).bind(password_reset_token_id);
        gateway::write(&self.pool, "redeeming password reset token", query).await?;

        info!("password reset token redeemed");
        Ok(())
    }
}
