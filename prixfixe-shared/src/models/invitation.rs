/// Household invitation model
///
/// Invitations move through a one-way state machine:
///
/// ```text
/// pending ──► accepted
///    │
///    ├──────► rejected
///    │
///    └──────► cancelled
/// ```
///
/// Every transition out of `pending` also stamps `archived_on`, and every
/// transition statement requires `archived_on IS NULL`, so terminal states
/// are sticky.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE invitation_state AS ENUM ('pending', 'cancelled', 'accepted', 'rejected');
///
/// CREATE TABLE household_invitations (
///     id TEXT PRIMARY KEY,
///     destination_household TEXT NOT NULL REFERENCES households (id),
///     to_email TEXT NOT NULL,
///     to_user TEXT REFERENCES users (id),
///     from_user TEXT NOT NULL REFERENCES users (id),
///     status invitation_state NOT NULL DEFAULT 'pending',
///     note TEXT NOT NULL DEFAULT '',
///     status_note TEXT NOT NULL DEFAULT '',
///     token TEXT NOT NULL,
///     expires_at BIGINT NOT NULL,
///     created_on BIGINT NOT NULL,
///     last_updated_on BIGINT,
///     archived_on BIGINT
/// );
/// ```

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;

use super::household::Household;
use super::user::User;
use crate::db::mapper::Columns;
use crate::error::Result;

/// Invitation columns followed by the destination household and sender
macro_rules! invitation_columns {
    () => {
        concat!(
            "household_invitations.id, household_invitations.to_email, household_invitations.to_user, \
             household_invitations.status, household_invitations.note, household_invitations.status_note, \
             household_invitations.token, household_invitations.expires_at, household_invitations.created_on, \
             household_invitations.last_updated_on, household_invitations.archived_on, ",
            crate::models::household::household_columns!(),
            ", ",
            crate::models::user::user_columns!()
        )
    };
}
pub(crate) use invitation_columns;

/// Joins that [`invitation_columns`] reads from
macro_rules! invitation_joins {
    () => {
        " JOIN households ON household_invitations.destination_household = households.id \
         JOIN users ON household_invitations.from_user = users.id"
    };
}
pub(crate) use invitation_joins;

/// How long an invitation stays valid by default
pub const DEFAULT_INVITATION_LIFETIME_SECONDS: u64 = 60 * 60 * 24 * 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationState {
    Pending,
    Cancelled,
    Accepted,
    Rejected,
}

impl InvitationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationState::Pending => "pending",
            InvitationState::Cancelled => "cancelled",
            InvitationState::Accepted => "accepted",
            InvitationState::Rejected => "rejected",
        }
    }

    /// Every state except `pending` is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdInvitation {
    pub id: String,
    pub to_email: String,
    /// Set once the recipient has an account
    pub to_user: Option<String>,
    pub status: InvitationState,
    pub note: String,
    pub status_note: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub expires_at: u64,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
    pub destination_household: Household,
    pub from_user: User,
}

impl HouseholdInvitation {
    /// Reads an invitation followed by its household and sender
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            to_email: cols.next()?,
            to_user: cols.next()?,
            status: cols.next()?,
            note: cols.next()?,
            status_note: cols.next()?,
            token: cols.next()?,
            expires_at: cols.epoch()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
            destination_household: Household::scan(cols)?,
            from_user: User::scan(cols)?,
        })
    }

    pub(crate) fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "household invitation"))
    }
}

/// Input for inviting someone by email
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HouseholdInvitationCreationInput {
    pub id: String,
    pub from_user: String,
    /// Set when the invitee already has an account
    pub to_user: Option<String>,
    pub to_email: String,
    pub note: String,
    /// Opaque secret, generated upstream
    pub token: String,
    pub destination_household_id: String,
    /// Epoch seconds; defaults to a week after creation
    pub expires_at: Option<u64>,
}

/// Input for answering an invitation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HouseholdInvitationUpdateRequestInput {
    pub token: String,
    pub note: String,
}
