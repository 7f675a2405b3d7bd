/// User model
///
/// # Schema
///
/// ```sql
/// CREATE TYPE user_reputation AS ENUM ('unverified', 'good_standing', 'banned', 'terminated');
///
/// CREATE TABLE users (
///     id TEXT PRIMARY KEY,
///     username TEXT NOT NULL,
///     email_address TEXT NOT NULL,
///     avatar_src TEXT,
///     hashed_password TEXT NOT NULL,
///     requires_password_change BOOLEAN NOT NULL DEFAULT FALSE,
///     password_last_changed_on BIGINT,
///     two_factor_secret TEXT NOT NULL,
///     two_factor_secret_verified_on BIGINT,
///     service_roles TEXT NOT NULL DEFAULT 'service_user',
///     reputation user_reputation NOT NULL DEFAULT 'unverified',
///     reputation_explanation TEXT NOT NULL DEFAULT '',
///     birth_day SMALLINT,
///     birth_month SMALLINT,
///     created_on BIGINT NOT NULL,
///     last_updated_on BIGINT,
///     archived_on BIGINT
/// );
/// ```
///
/// `username` and `email_address` are unique among non-archived rows.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;

use crate::db::mapper::Columns;
use crate::error::Result;

/// Columns of `users`, in scan order
macro_rules! user_columns {
    () => {
        "users.id, users.username, users.email_address, users.avatar_src, users.hashed_password, \
         users.requires_password_change, users.password_last_changed_on, users.two_factor_secret, \
         users.two_factor_secret_verified_on, users.service_roles, users.reputation, \
         users.reputation_explanation, users.birth_day, users.birth_month, users.created_on, \
         users.last_updated_on, users.archived_on"
    };
}
pub(crate) use user_columns;

/// Account standing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_reputation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserReputation {
    /// Signed up, two-factor secret not yet verified
    Unverified,
    GoodStanding,
    Banned,
    Terminated,
}

impl UserReputation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserReputation::Unverified => "unverified",
            UserReputation::GoodStanding => "good_standing",
            UserReputation::Banned => "banned",
            UserReputation::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email_address: String,
    pub avatar_src: Option<String>,

    /// Hash produced upstream; never hashed here
    #[serde(skip_serializing)]
    pub hashed_password: String,

    pub requires_password_change: bool,
    pub password_last_changed_on: Option<u64>,

    #[serde(skip_serializing)]
    pub two_factor_secret: String,

    /// `None` until the secret is verified
    pub two_factor_secret_verified_on: Option<u64>,

    pub service_roles: Vec<String>,
    pub reputation: UserReputation,
    pub reputation_explanation: String,
    pub birth_day: Option<u8>,
    pub birth_month: Option<u8>,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl User {
    /// Reads the next 17 columns as a user
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            username: cols.next()?,
            email_address: cols.next()?,
            avatar_src: cols.next()?,
            hashed_password: cols.next()?,
            requires_password_change: cols.next()?,
            password_last_changed_on: cols.optional_epoch()?,
            two_factor_secret: cols.next()?,
            two_factor_secret_verified_on: cols.optional_epoch()?,
            service_roles: cols.list()?,
            reputation: cols.next()?,
            reputation_explanation: cols.next()?,
            birth_day: cols.optional_small()?,
            birth_month: cols.optional_small()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    pub(crate) fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "user"))
    }

    pub fn has_verified_two_factor_secret(&self) -> bool {
        self.two_factor_secret_verified_on.is_some()
    }
}

/// Input for signing up a user
///
/// When both `invitation_token` and `destination_household_id` are non-empty
/// the sign-up also accepts that invitation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDatabaseCreationInput {
    pub id: String,
    pub username: String,
    pub email_address: String,
    pub hashed_password: String,
    pub two_factor_secret: String,
    pub avatar_src: Option<String>,
    pub birth_day: Option<u8>,
    pub birth_month: Option<u8>,
    pub invitation_token: Option<String>,
    pub destination_household_id: Option<String>,
}

impl UserDatabaseCreationInput {
    /// Token and destination household, when both are present
    pub fn invitation(&self) -> Option<(&str, &str)> {
        match (
            self.invitation_token.as_deref(),
            self.destination_household_id.as_deref(),
        ) {
            (Some(token), Some(household)) if !token.is_empty() && !household.is_empty() => {
                Some((token, household))
            }
            _ => None,
        }
    }
}

/// Mutable profile columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    pub email_address: String,
    pub avatar_src: Option<String>,
    pub birth_day: Option<u8>,
    pub birth_month: Option<u8>,
}

impl From<&User> for UserUpdate {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email_address: user.email_address.clone(),
            avatar_src: user.avatar_src.clone(),
            birth_day: user.birth_day,
            birth_month: user.birth_month,
        }
    }
}

/// Input for an admin reputation change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReputationUpdateInput {
    pub target_user_id: String,
    pub new_reputation: UserReputation,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reputation_as_str() {
        assert_eq!(UserReputation::Unverified.as_str(), "unverified");
        assert_eq!(UserReputation::GoodStanding.as_str(), "good_standing");
        assert_eq!(UserReputation::Banned.as_str(), "banned");
        assert_eq!(UserReputation::Terminated.as_str(), "terminated");
    }

    #[test]
    fn test_reputation_serde_matches_database_labels() {
        let json = serde_json::to_string(&UserReputation::GoodStanding).unwrap();
        assert_eq!(json, "\"good_standing\"");
    }

    #[test]
    fn test_invitation_requires_token_and_household() {
        let mut input = UserDatabaseCreationInput::default();
        assert!(input.invitation().is_none());

        input.invitation_token = Some("token".to_string());
        assert!(input.invitation().is_none());

        input.destination_household_id = Some(String::new());
        assert!(input.invitation().is_none());

        input.destination_household_id = Some("h0".to_string());
        assert_eq!(input.invitation(), Some(("token", "h0")));

        input.invitation_token = Some(String::new());
        assert!(input.invitation().is_none());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email_address: "a@x".to_string(),
            avatar_src: None,
            hashed_password: "hash".to_string(),
            requires_password_change: false,
            password_last_changed_on: None,
            two_factor_secret: "secret".to_string(),
            two_factor_secret_verified_on: None,
            service_roles: vec!["service_user".to_string()],
            reputation: UserReputation::Unverified,
            reputation_explanation: String::new(),
            birth_day: None,
            birth_month: None,
            created_on: 1,
            last_updated_on: None,
            archived_on: None,
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hashed_password"));
        assert!(!json.contains("\"secret\""));
        assert!(json.contains("two_factor_secret_verified_on"));

        let update = UserUpdate::from(&user);
        assert_eq!(update.username, "alice");
    }
}
