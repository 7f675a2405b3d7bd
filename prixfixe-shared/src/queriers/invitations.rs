/// Household invitations
///
/// Every state change is a single `UPDATE ... WHERE archived_on IS NULL`
/// that also stamps `archived_on`, so a second transition on the same row
/// matches nothing and reports `NoRows`. Transitions are scoped to the
/// destination household as well as the invitation id.
///
/// Token lookups only see pending, live, unexpired invitations.

use sqlx::PgConnection;
use tracing::{debug, info, instrument};

use super::{memberships, read_list, Querier};
use crate::authorization::HouseholdRole;
use crate::db::gateway;
use crate::db::query_builder::{ListQuery, ListResponse, QueryFilter};
use crate::error::{require_id, require_non_empty, DatabaseError, Result};
use crate::identifiers::new_id;
use crate::models::invitation::{
    invitation_columns, invitation_joins, HouseholdInvitation, HouseholdInvitationCreationInput,
    HouseholdInvitationUpdateRequestInput, InvitationState, DEFAULT_INVITATION_LIFETIME_SECONDS,
};
use crate::models::membership::HouseholdUserMembershipCreationInput;

macro_rules! select_invitations {
    () => {
        concat!(
            "SELECT ",
            invitation_columns!(),
            " FROM household_invitations",
            invitation_joins!()
        )
    };
}

const HOUSEHOLD_INVITATION_EXISTS: &str = "SELECT EXISTS (SELECT household_invitations.id \
     FROM household_invitations WHERE household_invitations.archived_on IS NULL \
     AND household_invitations.id = $1)";

/// Terminal invitations stay readable through their household
const GET_INVITATION_BY_HOUSEHOLD_AND_ID: &str = concat!(
    select_invitations!(),
    " WHERE household_invitations.destination_household = $1 AND household_invitations.id = $2"
);

const GET_INVITATION_BY_TOKEN_AND_ID: &str = concat!(
    select_invitations!(),
    " WHERE household_invitations.archived_on IS NULL AND household_invitations.status = 'pending' \
     AND household_invitations.expires_at > extract(epoch FROM NOW()) \
     AND household_invitations.token = $1 AND household_invitations.id = $2"
);

const GET_INVITATION_BY_EMAIL_AND_TOKEN: &str = concat!(
    select_invitations!(),
    " WHERE household_invitations.archived_on IS NULL AND household_invitations.status = 'pending' \
     AND household_invitations.expires_at > extract(epoch FROM NOW()) \
     AND household_invitations.to_email = LOWER($1) AND household_invitations.token = $2"
);

const CREATE_HOUSEHOLD_INVITATION: &str = "INSERT INTO household_invitations \
     (id, from_user, to_user, to_email, note, token, destination_household, expires_at, created_on) \
     VALUES ($1, $2, $3, LOWER($4), $5, $6, $7, $8, extract(epoch FROM NOW()))";

const SET_INVITATION_STATUS: &str = "UPDATE household_invitations SET status = $1, status_note = $2, \
     last_updated_on = extract(epoch FROM NOW()), archived_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND destination_household = $3 AND id = $4";

const ATTACH_INVITATIONS_TO_USER_ID: &str = "UPDATE household_invitations SET to_user = $1, \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND to_email = LOWER($2)";

/// The pending invitation a sign-up token refers to, if any
pub(super) async fn get_pending_invitation_by_email_and_token(
    conn: &mut PgConnection,
    email_address: &str,
    token: &str,
) -> Result<Option<HouseholdInvitation>> {
    let query = sqlx::query(GET_INVITATION_BY_EMAIL_AND_TOKEN)
        .bind(email_address)
        .bind(token);
    match gateway::get_one_row(&mut *conn, "fetching invitation by email and token", query).await {
        Ok(row) => HouseholdInvitation::from_row(&row).map(Some),
        Err(DatabaseError::NoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Moves a live invitation into a terminal state
pub(super) async fn set_invitation_status(
    conn: &mut PgConnection,
    household_id: &str,
    invitation_id: &str,
    state: InvitationState,
    note: &str,
) -> Result<()> {
    let query = sqlx::query(SET_INVITATION_STATUS)
        .bind(state)
        .bind(note)
        .bind(household_id)
        .bind(invitation_id);
    gateway::write(&mut *conn, "setting invitation status", query).await?;

    debug!(invitation_id, status = state.as_str(), "invitation status changed");
    Ok(())
}

/// Points every live invitation sent to `email_address` at `user_id`
pub(super) async fn attach_invitations_in(conn: &mut PgConnection, email_address: &str, user_id: &str) -> Result<u64> {
    let description = "attaching invitations to user";
    let query = sqlx::query(ATTACH_INVITATIONS_TO_USER_ID)
        .bind(user_id)
        .bind(email_address);
    gateway::write_raw(&mut *conn, description, query)
        .await
        .map_err(|e| DatabaseError::unavailable(description, e))
}

async fn accept_invitation_in(
    conn: &mut PgConnection,
    household_id: &str,
    invitation_id: &str,
    input: &HouseholdInvitationUpdateRequestInput,
) -> Result<()> {
    let query = sqlx::query(GET_INVITATION_BY_TOKEN_AND_ID)
        .bind(&input.token)
        .bind(invitation_id);
    let row = gateway::get_one_row(&mut *conn, "fetching invitation by token and id", query)
        .await
        .map_err(|e| match e {
            DatabaseError::NoRows => DatabaseError::InvitationNotFound,
            other => other,
        })?;
    let invitation = HouseholdInvitation::from_row(&row)?;

    if invitation.destination_household.id != household_id {
        debug!("invitation belongs to another household");
        return Err(DatabaseError::InvitationNotFound);
    }
    let to_user = invitation.to_user.ok_or_else(|| {
        debug!("invitation has no recipient account");
        DatabaseError::InvitationNotFound
    })?;

    set_invitation_status(conn, household_id, invitation_id, InvitationState::Accepted, &input.note).await?;

    let membership = HouseholdUserMembershipCreationInput::new(
        new_id(),
        &to_user,
        household_id,
        HouseholdRole::HouseholdMember,
        false,
    );
    memberships::insert_membership(conn, &membership).await?;
    memberships::swap_default_household(conn, &to_user, household_id).await
}

impl Querier {
    /// True if a live invitation with this id exists
    #[instrument(skip(self))]
    pub async fn household_invitation_exists(&self, invitation_id: &str) -> Result<bool> {
        require_id(invitation_id, "invitation_id")?;

        let query = sqlx::query(HOUSEHOLD_INVITATION_EXISTS).bind(invitation_id);
        gateway::exists(&self.pool, "checking invitation existence", query).await
    }

    /// Fetches an invitation in any state, scoped to its household
    #[instrument(skip(self))]
    pub async fn get_household_invitation_by_household_and_id(
        &self,
        household_id: &str,
        invitation_id: &str,
    ) -> Result<HouseholdInvitation> {
        require_id(household_id, "household_id")?;
        require_id(invitation_id, "invitation_id")?;

        let query = sqlx::query(GET_INVITATION_BY_HOUSEHOLD_AND_ID)
            .bind(household_id)
            .bind(invitation_id);
        let row = gateway::get_one_row(&self.pool, "fetching invitation by household and id", query)
            .await
            .map_err(|e| e.or_not_found("household invitation"))?;
        HouseholdInvitation::from_row(&row)
    }

    /// Fetches a pending invitation by its token and id
    #[instrument(skip(self, token))]
    pub async fn get_household_invitation_by_token_and_id(
        &self,
        token: &str,
        invitation_id: &str,
    ) -> Result<HouseholdInvitation> {
        require_non_empty(token, "token")?;
        require_id(invitation_id, "invitation_id")?;

        let query = sqlx::query(GET_INVITATION_BY_TOKEN_AND_ID)
            .bind(token)
            .bind(invitation_id);
        let row = gateway::get_one_row(&self.pool, "fetching invitation by token and id", query)
            .await
            .map_err(|e| e.or_not_found("household invitation"))?;
        HouseholdInvitation::from_row(&row)
    }

    /// Fetches a pending invitation by recipient email and token
    #[instrument(skip(self, email_address, token))]
    pub async fn get_household_invitation_by_email_and_token(
        &self,
        email_address: &str,
        token: &str,
    ) -> Result<HouseholdInvitation> {
        require_non_empty(email_address, "email_address")?;
        require_non_empty(token, "token")?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::unavailable("acquiring connection", e))?;
        get_pending_invitation_by_email_and_token(&mut conn, email_address, token)
            .await?
            .ok_or(DatabaseError::NotFound("household invitation"))
    }

    /// Creates a pending invitation
    ///
    /// `to_email` is stored lowercased. Without an explicit `expires_at` the
    /// invitation lapses a week from now.
    #[instrument(skip(self, input), fields(invitation_id = %input.id, household_id = %input.destination_household_id))]
    pub async fn create_household_invitation(
        &self,
        input: &HouseholdInvitationCreationInput,
    ) -> Result<HouseholdInvitation> {
        require_id(&input.id, "invitation_id")?;
        require_id(&input.from_user, "from_user")?;
        require_id(&input.destination_household_id, "destination_household_id")?;
        require_non_empty(&input.to_email, "to_email")?;
        require_non_empty(&input.token, "token")?;

        let expires_at = input
            .expires_at
            .unwrap_or_else(|| self.now().saturating_add(DEFAULT_INVITATION_LIFETIME_SECONDS));

        let query = sqlx::query(CREATE_HOUSEHOLD_INVITATION)
            .bind(&input.id)
            .bind(&input.from_user)
            .bind(&input.to_user)
            .bind(&input.to_email)
            .bind(&input.note)
            .bind(&input.token)
            .bind(&input.destination_household_id)
            .bind(i64::try_from(expires_at).unwrap_or(i64::MAX));
        gateway::write(&self.pool, "creating household invitation", query).await?;

        info!("household invitation created");
        self.get_household_invitation_by_household_and_id(&input.destination_household_id, &input.id)
            .await
    }

    /// Pending invitations sent by `user_id`
    #[instrument(skip(self, filter))]
    pub async fn get_pending_household_invitations_from_user(
        &self,
        user_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<HouseholdInvitation>> {
        require_id(user_id, "user_id")?;

        let list = pending_invitations()
            .where_eq("household_invitations.from_user", user_id)
            .with_filter(filter);
        read_list(&self.pool, "fetching sent invitations", list, filter, HouseholdInvitation::scan).await
    }

    /// Pending invitations addressed to `user_id`
    #[instrument(skip(self, filter))]
    pub async fn get_pending_household_invitations_for_user(
        &self,
        user_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<HouseholdInvitation>> {
        require_id(user_id, "user_id")?;

        let list = pending_invitations()
            .where_eq("household_invitations.to_user", user_id)
            .with_filter(filter);
        read_list(&self.pool, "fetching received invitations", list, filter, HouseholdInvitation::scan).await
    }

    /// Withdraws a pending invitation
    #[instrument(skip(self, note))]
    pub async fn cancel_household_invitation(&self, household_id: &str, invitation_id: &str, note: &str) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(invitation_id, "invitation_id")?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::unavailable("acquiring connection", e))?;
        set_invitation_status(&mut conn, household_id, invitation_id, InvitationState::Cancelled, note).await?;

        info!("household invitation cancelled");
        Ok(())
    }

    /// Declines a pending invitation
    #[instrument(skip(self, note))]
    pub async fn reject_household_invitation(&self, household_id: &str, invitation_id: &str, note: &str) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(invitation_id, "invitation_id")?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::unavailable("acquiring connection", e))?;
        set_invitation_status(&mut conn, household_id, invitation_id, InvitationState::Rejected, note).await?;

        info!("household invitation rejected");
        Ok(())
    }

    /// Accepts a pending invitation on behalf of its recipient
    ///
    /// The token must match. The recipient joins the household as a
    /// `household_member` and it becomes their default household.
    ///
    /// # Errors
    ///
    /// `InvitationNotFound` if no pending invitation matches the token, id and
    /// household, or if the invitation has no recipient account yet.
    #[instrument(skip(self, input))]
    pub async fn accept_household_invitation(
        &self,
        household_id: &str,
        invitation_id: &str,
        input: &HouseholdInvitationUpdateRequestInput,
    ) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(invitation_id, "invitation_id")?;
        require_non_empty(&input.token, "token")?;

        let mut tx = gateway::begin(&self.pool, "accepting household invitation").await?;
        let outcome = accept_invitation_in(&mut tx, household_id, invitation_id, input).await;
        gateway::finish(tx, "accepting household invitation", outcome).await?;

        info!("household invitation accepted");
        Ok(())
    }

    /// Points live invitations sent to `email_address` at an existing user
    #[instrument(skip(self, email_address))]
    pub async fn attach_invitations_to_user_id(&self, email_address: &str, user_id: &str) -> Result<()> {
        require_non_empty(email_address, "email_address")?;
        require_id(user_id, "user_id")?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::unavailable("acquiring connection", e))?;
        let attached = attach_invitations_in(&mut conn, email_address, user_id).await?;

        info!(attached, "invitations attached to user");
        Ok(())
    }
}

fn pending_invitations() -> ListQuery {
    ListQuery::new("household_invitations", invitation_columns!())
    .join("households ON household_invitations.destination_household = households.id")
    .join("users ON household_invitations.from_user = users.id")
    .where_raw("household_invitations.status = 'pending'")
    .order_by("household_invitations.created_on")
}
