/// Household membership model
///
/// Links a user to a household with a list of household roles. Among a
/// user's live memberships exactly one has `default_household = true`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE household_user_memberships (
///     id TEXT PRIMARY KEY,
///     belongs_to_household TEXT NOT NULL REFERENCES households (id),
///     belongs_to_user TEXT NOT NULL REFERENCES users (id),
///     default_household BOOLEAN NOT NULL DEFAULT FALSE,
///     household_roles TEXT NOT NULL DEFAULT 'household_member',
///     created_on BIGINT NOT NULL,
///     last_updated_on BIGINT,
///     archived_on BIGINT
/// );
///
/// CREATE UNIQUE INDEX household_user_memberships_pair_unique
///     ON household_user_memberships (belongs_to_user, belongs_to_household)
///     WHERE archived_on IS NULL;
/// ```

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;

use super::household::Household;
use super::user::User;
use crate::authorization::HouseholdRole;
use crate::db::mapper::Columns;
use crate::error::Result;

/// Columns of `household_user_memberships`, in scan order
macro_rules! membership_columns {
    () => {
        "household_user_memberships.id, household_user_memberships.belongs_to_user, \
         household_user_memberships.belongs_to_household, household_user_memberships.household_roles, \
         household_user_memberships.default_household, household_user_memberships.created_on, \
         household_user_memberships.last_updated_on, household_user_memberships.archived_on"
    };
}
pub(crate) use membership_columns;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdUserMembership {
    pub id: String,
    pub belongs_to_user: String,
    pub belongs_to_household: String,
    pub household_roles: Vec<String>,
    pub default_household: bool,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl HouseholdUserMembership {
    /// Reads the next 8 columns as a membership
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            belongs_to_user: cols.next()?,
            belongs_to_household: cols.next()?,
            household_roles: cols.list()?,
            default_household: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    pub(crate) fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "household user membership"))
    }
}

/// A membership as listed under a household, carrying the member's user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdUserMembershipWithUser {
    pub id: String,
    pub belongs_to_user: User,
    pub belongs_to_household: String,
    pub household_roles: Vec<String>,
    pub default_household: bool,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl HouseholdUserMembershipWithUser {
    pub(crate) fn new(membership: HouseholdUserMembership, user: User) -> Self {
        Self {
            id: membership.id,
            belongs_to_user: user,
            belongs_to_household: membership.belongs_to_household,
            household_roles: membership.household_roles,
            default_household: membership.default_household,
            created_on: membership.created_on,
            last_updated_on: membership.last_updated_on,
            archived_on: membership.archived_on,
        }
    }
}

/// A membership joined to the household it grants access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdUserMembershipWithHousehold {
    pub membership: HouseholdUserMembership,
    pub household: Household,
}

impl HouseholdUserMembershipWithHousehold {
    pub(crate) fn from_row(row: &PgRow) -> Result<Self> {
        let mut cols = Columns::new(row, "household user membership with household");
        Ok(Self {
            membership: HouseholdUserMembership::scan(&mut cols)?,
            household: Household::scan(&mut cols)?,
        })
    }
}

/// Input for adding a user to a household
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdUserMembershipCreationInput {
    pub id: String,
    pub user_id: String,
    pub household_id: String,
    pub household_roles: Vec<String>,
    pub default_household: bool,
}

impl HouseholdUserMembershipCreationInput {
    pub(crate) fn new(id: String, user_id: &str, household_id: &str, role: HouseholdRole, default_household: bool) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            household_id: household_id.to_string(),
            household_roles: vec![role.as_str().to_string()],
            default_household,
        }
    }
}

/// Input for replacing a member's roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyUserPermissionsInput {
    pub new_roles: Vec<String>,
    pub reason: String,
}
