/// Household model
///
/// A household is the tenant boundary. Exactly one user owns it at a time
/// (`belongs_to_user`), and that owner always holds a live membership in it.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE billing_status AS ENUM ('unpaid', 'standard');
///
/// CREATE TABLE households (
///     id TEXT PRIMARY KEY,
///     name TEXT NOT NULL,
///     billing_status billing_status NOT NULL DEFAULT 'unpaid',
///     contact_email TEXT NOT NULL DEFAULT '',
///     contact_phone TEXT NOT NULL DEFAULT '',
///     payment_processor_customer_id TEXT NOT NULL DEFAULT '',
///     subscription_plan_id TEXT,
///     time_zone TEXT NOT NULL DEFAULT 'US/Central',
///     belongs_to_user TEXT NOT NULL REFERENCES users (id),
///     created_on BIGINT NOT NULL,
///     last_updated_on BIGINT,
///     archived_on BIGINT
/// );
/// ```

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;

use super::membership::HouseholdUserMembershipWithUser;
use crate::db::mapper::Columns;
use crate::error::Result;

/// Columns of `households`, in scan order
macro_rules! household_columns {
    () => {
        "households.id, households.name, households.billing_status, households.contact_email, \
         households.contact_phone, households.payment_processor_customer_id, \
         households.subscription_plan_id, households.time_zone, households.belongs_to_user, \
         households.created_on, households.last_updated_on, households.archived_on"
    };
}
pub(crate) use household_columns;

/// Time zone assigned when none is given
pub const DEFAULT_TIME_ZONE: &str = "US/Central";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "billing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Unpaid,
    Standard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub billing_status: BillingStatus,
    pub contact_email: String,
    pub contact_phone: String,
    pub payment_processor_customer_id: String,
    pub subscription_plan_id: Option<String>,
    pub time_zone: String,
    pub belongs_to_user: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,

    /// Populated only by reads that join memberships
    #[serde(default)]
    pub members: Vec<HouseholdUserMembershipWithUser>,
}

impl Household {
    /// Reads the next 12 columns as a household without members
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            name: cols.next()?,
            billing_status: cols.next()?,
            contact_email: cols.next()?,
            contact_phone: cols.next()?,
            payment_processor_customer_id: cols.next()?,
            subscription_plan_id: cols.next()?,
            time_zone: cols.next()?,
            belongs_to_user: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
            members: Vec::new(),
        })
    }

    pub(crate) fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "household"))
    }
}

/// Input for creating a household
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HouseholdCreationInput {
    pub id: String,
    pub name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub time_zone: Option<String>,
    pub belongs_to_user: String,

    /// `None`: default only if the owner has no default household yet.
    /// `Some(true)`: becomes the default, replacing the current one.
    /// `Some(false)`: never the default.
    pub as_default: Option<bool>,
}

impl HouseholdCreationInput {
    /// Personal household synthesized for a user who would otherwise have none
    pub(crate) fn personal(id: String, user_id: &str, username: &str) -> Self {
        Self {
            id,
            name: format!("{}'s cool household", username),
            contact_email: String::new(),
            contact_phone: String::new(),
            time_zone: None,
            belongs_to_user: user_id.to_string(),
            as_default: Some(true),
        }
    }
}

/// Mutable household columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HouseholdUpdate {
    pub name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub time_zone: String,
}

impl From<&Household> for HouseholdUpdate {
    fn from(household: &Household) -> Self {
        Self {
            name: household.name.clone(),
            contact_email: household.contact_email.clone(),
            contact_phone: household.contact_phone.clone(),
            time_zone: household.time_zone.clone(),
        }
    }
}

/// Input for handing a household to another member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdOwnershipTransferInput {
    pub current_owner: String,
    pub new_owner: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personal_household_is_default() {
        let input = HouseholdCreationInput::personal("h1".to_string(), "u1", "alice");
        assert_eq!(input.id, "h1");
        assert_eq!(input.name, "alice's cool household");
        assert_eq!(input.belongs_to_user, "u1");
        assert_eq!(input.as_default, Some(true));
    }

    #[test]
    fn test_billing_status_serde() {
        let json = serde_json::to_string(&BillingStatus::Unpaid).unwrap();
        assert_eq!(json, "\"unpaid\"");
    }
}
