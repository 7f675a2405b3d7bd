/// Membership lifecycle
///
/// Every user keeps exactly one live default membership. The only statement
/// that sets a default is the swap in [`swap_default_household`], which
/// rewrites all of a user's live memberships at once. Removal and ownership
/// transfer finish with [`reconcile_default_household`], which promotes a
/// remaining household or synthesizes a personal one.

use sqlx::PgConnection;
use tracing::{debug, info, instrument};

use super::{households, users, Querier};
use crate::db::gateway;
use crate::db::mapper::{join_list, Columns};
use crate::error::{require_id, DatabaseError, Result};
use crate::identifiers::new_id;
use crate::models::household::{household_columns, HouseholdCreationInput};
use crate::models::membership::{
    membership_columns, HouseholdUserMembershipCreationInput, HouseholdUserMembershipWithHousehold,
    ModifyUserPermissionsInput,
};

const USER_IS_MEMBER: &str = "SELECT EXISTS (SELECT household_user_memberships.id \
     FROM household_user_memberships WHERE household_user_memberships.archived_on IS NULL \
     AND household_user_memberships.belongs_to_household = $1 \
     AND household_user_memberships.belongs_to_user = $2)";

const USER_HAS_DEFAULT_HOUSEHOLD: &str = "SELECT EXISTS (SELECT household_user_memberships.id \
     FROM household_user_memberships WHERE household_user_memberships.archived_on IS NULL \
     AND household_user_memberships.belongs_to_user = $1 \
     AND household_user_memberships.default_household = TRUE)";

const USER_OWNS_HOUSEHOLD: &str = "SELECT EXISTS (SELECT households.id FROM households \
     WHERE households.archived_on IS NULL AND households.id = $1 AND households.belongs_to_user = $2)";

const ADD_USER_TO_HOUSEHOLD: &str = "INSERT INTO household_user_memberships \
     (id, belongs_to_user, belongs_to_household, household_roles, default_household, created_on) \
     VALUES ($1, $2, $3, $4, $5, extract(epoch FROM NOW()))";

const MODIFY_USER_PERMISSIONS: &str = "UPDATE household_user_memberships SET household_roles = $1, \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_household = $2 AND belongs_to_user = $3";

/// Exactly the `(user, household)` row ends up default. Matches nothing
/// unless the user is a live member of the household.
const MARK_HOUSEHOLD_AS_USER_DEFAULT: &str = "UPDATE household_user_memberships \
     SET default_household = (belongs_to_household = $2), last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_user = $1 \
     AND EXISTS (SELECT 1 FROM household_user_memberships AS target \
     WHERE target.archived_on IS NULL AND target.belongs_to_user = $1 AND target.belongs_to_household = $2)";

const GET_DEFAULT_HOUSEHOLD_ID_FOR_USER: &str = "SELECT household_user_memberships.belongs_to_household \
     FROM household_user_memberships WHERE household_user_memberships.archived_on IS NULL \
     AND household_user_memberships.belongs_to_user = $1 \
     AND household_user_memberships.default_household = TRUE";

const GET_DEFAULT_FLAG: &str = "SELECT household_user_memberships.default_household \
     FROM household_user_memberships WHERE household_user_memberships.archived_on IS NULL \
     AND household_user_memberships.belongs_to_user = $1 \
     AND household_user_memberships.belongs_to_household = $2";

const REMOVE_USER_FROM_HOUSEHOLD: &str = "UPDATE household_user_memberships \
     SET archived_on = extract(epoch FROM NOW()), default_household = FALSE \
     WHERE archived_on IS NULL AND belongs_to_household = $1 AND belongs_to_user = $2";

const REASSIGN_MEMBERSHIP: &str = "UPDATE household_user_memberships \
     SET belongs_to_user = $1, default_household = $2, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_household = $3 AND belongs_to_user = $4";

const ARCHIVE_MEMBERSHIPS_FOR_USER: &str = "UPDATE household_user_memberships \
     SET archived_on = extract(epoch FROM NOW()), default_household = FALSE \
     WHERE archived_on IS NULL AND belongs_to_user = $1";

/// A user's live memberships in live households, oldest household first
const GET_REMAINING_HOUSEHOLDS: &str = "SELECT household_user_memberships.belongs_to_household, \
     household_user_memberships.default_household \
     FROM household_user_memberships \
     JOIN households ON households.id = household_user_memberships.belongs_to_household \
     WHERE household_user_memberships.archived_on IS NULL AND households.archived_on IS NULL \
     AND household_user_memberships.belongs_to_user = $1 \
     ORDER BY households.created_on ASC, households.id ASC";

const GET_MEMBERSHIPS_FOR_USER: &str = concat!(
    "SELECT ",
    membership_columns!(),
    ", ",
    household_columns!(),
    " FROM household_user_memberships \
     JOIN households ON households.id = household_user_memberships.belongs_to_household \
     WHERE household_user_memberships.archived_on IS NULL AND households.archived_on IS NULL \
     AND household_user_memberships.belongs_to_user = $1 \
     ORDER BY households.created_on ASC, households.id ASC"
);

pub(super) async fn insert_membership(
    conn: &mut PgConnection,
    input: &HouseholdUserMembershipCreationInput,
) -> Result<()> {
    let query = sqlx::query(ADD_USER_TO_HOUSEHOLD)
        .bind(&input.id)
        .bind(&input.user_id)
        .bind(&input.household_id)
        .bind(join_list(&input.household_roles))
        .bind(input.default_household);
    gateway::write(&mut *conn, "adding user to household", query).await
}

pub(super) async fn has_default_household(conn: &mut PgConnection, user_id: &str) -> Result<bool> {
    let query = sqlx::query(USER_HAS_DEFAULT_HOUSEHOLD).bind(user_id);
    gateway::exists(&mut *conn, "checking for default household", query).await
}

/// The atomic default swap
///
/// # Errors
///
/// `NoRows` if the user has no live membership in `household_id`.
pub(super) async fn swap_default_household(conn: &mut PgConnection, user_id: &str, household_id: &str) -> Result<()> {
    let query = sqlx::query(MARK_HOUSEHOLD_AS_USER_DEFAULT)
        .bind(user_id)
        .bind(household_id);
    gateway::write(&mut *conn, "marking household as default", query).await
}

/// The default flag of a live membership, or `None` when there is none
pub(super) async fn default_flag(conn: &mut PgConnection, user_id: &str, household_id: &str) -> Result<Option<bool>> {
    let query = sqlx::query(GET_DEFAULT_FLAG).bind(user_id).bind(household_id);
    match gateway::get_one_row(&mut *conn, "fetching membership default flag", query).await {
        Ok(row) => Ok(Some(Columns::new(&row, "membership default flag").next()?)),
        Err(DatabaseError::NoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// True if `user_id` owns the live household `household_id`
pub(super) async fn owns_household(conn: &mut PgConnection, user_id: &str, household_id: &str) -> Result<bool> {
    let query = sqlx::query(USER_OWNS_HOUSEHOLD).bind(household_id).bind(user_id);
    gateway::exists(&mut *conn, "checking household ownership", query).await
}

/// Archives a live membership and clears its default flag
pub(super) async fn archive_membership(conn: &mut PgConnection, household_id: &str, user_id: &str) -> Result<()> {
    let query = sqlx::query(REMOVE_USER_FROM_HOUSEHOLD)
        .bind(household_id)
        .bind(user_id);
    gateway::write(&mut *conn, "removing user from household", query).await
}

/// Moves a live membership from one user to another
pub(super) async fn reassign_membership(
    conn: &mut PgConnection,
    household_id: &str,
    from_user: &str,
    to_user: &str,
    default_household: bool,
) -> Result<()> {
    let query = sqlx::query(REASSIGN_MEMBERSHIP)
        .bind(to_user)
        .bind(default_household)
        .bind(household_id)
        .bind(from_user);
    gateway::write(&mut *conn, "reassigning household membership", query)
        .await
        .map_err(|e| e.or_not_found("household user membership"))
}

/// Archives every live membership of a user; having none is fine
pub(super) async fn archive_memberships_for_user(conn: &mut PgConnection, user_id: &str) -> Result<()> {
    let description = "archiving memberships for user";
    let query = sqlx::query(ARCHIVE_MEMBERSHIPS_FOR_USER).bind(user_id);
    let archived = gateway::write_raw(&mut *conn, description, query)
        .await
        .map_err(|e| DatabaseError::unavailable(description, e))?;

    debug!(user_id, archived, "memberships archived");
    Ok(())
}

/// Restores the one-default invariant for a user after a membership left
///
/// A remaining default is kept. Otherwise the oldest remaining household is
/// promoted, and with nothing left a personal household is created.
pub(super) async fn reconcile_default_household(conn: &mut PgConnection, user_id: &str) -> Result<()> {
    let mut remaining: Vec<(String, bool)> = Vec::new();
    let query = sqlx::query(GET_REMAINING_HOUSEHOLDS).bind(user_id);
    gateway::for_each_row(&mut *conn, "fetching remaining households", query, |row| {
        let mut cols = Columns::new(row, "remaining household");
        remaining.push((cols.next()?, cols.next()?));
        Ok(())
    })
    .await?;

    if remaining.iter().any(|(_, is_default)| *is_default) {
        return Ok(());
    }

    match remaining.first() {
        Some((household_id, _)) => {
            debug!(user_id, household_id = %household_id, "promoting remaining household to default");
            swap_default_household(conn, user_id, household_id).await
        }
        None => {
            let user = users::get_user_in(conn, user_id).await?;
            let personal = HouseholdCreationInput::personal(new_id(), user_id, &user.username);
            info!(user_id, household_id = %personal.id, "user left their last household, creating a new one");
            households::create_household_in(conn, &personal).await.map(|_| ())
        }
    }
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn user_is_member_of_household(&self, user_id: &str, household_id: &str) -> Result<bool> {
        require_id(user_id, "user_id")?;
        require_id(household_id, "household_id")?;

        let query = sqlx::query(USER_IS_MEMBER).bind(household_id).bind(user_id);
        gateway::exists(&self.pool, "checking household membership", query).await
    }

    /// Adds a user to a household
    ///
    /// An empty `input.id` gets a generated one. A membership created as
    /// default replaces the user's current default in the same transaction.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, household_id = %input.household_id))]
    pub async fn add_user_to_household(&self, input: &HouseholdUserMembershipCreationInput) -> Result<()> {
        require_id(&input.user_id, "user_id")?;
        require_id(&input.household_id, "household_id")?;

        let generated;
        let input = if input.id.is_empty() {
            generated = HouseholdUserMembershipCreationInput {
                id: new_id(),
                ..input.clone()
            };
            &generated
        } else {
            input
        };

        if !input.default_household {
            let query = sqlx::query(ADD_USER_TO_HOUSEHOLD)
                .bind(&input.id)
                .bind(&input.user_id)
                .bind(&input.household_id)
                .bind(join_list(&input.household_roles))
                .bind(false);
            gateway::write(&self.pool, "adding user to household", query).await?;
        } else {
            let mut tx = gateway::begin(&self.pool, "adding user to household").await?;
            let outcome = async {
                insert_membership(&mut tx, input).await?;
                swap_default_household(&mut tx, &input.user_id, &input.household_id).await
            }
            .await;
            gateway::finish(tx, "adding user to household", outcome).await?;
        }

        info!("user added to household");
        Ok(())
    }

    /// Replaces a member's roles; matching no membership is not an error
    #[instrument(skip(self, input), fields(roles = ?input.new_roles))]
    pub async fn modify_user_permissions(
        &self,
        household_id: &str,
        user_id: &str,
        input: &ModifyUserPermissionsInput,
    ) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(user_id, "user_id")?;

        let description = "modifying user permissions";
        let query = sqlx::query(MODIFY_USER_PERMISSIONS)
            .bind(join_list(&input.new_roles))
            .bind(household_id)
            .bind(user_id);
        let updated = gateway::write_raw(&self.pool, description, query)
            .await
            .map_err(|e| DatabaseError::unavailable(description, e))?;

        info!(updated, reason = %input.reason, "user permissions modified");
        Ok(())
    }

    /// Makes `household_id` the user's only default household
    ///
    /// # Errors
    ///
    /// `NotFound` if the user is not a live member of the household; nothing
    /// changes in that case.
    #[instrument(skip(self))]
    pub async fn mark_household_as_user_default(&self, user_id: &str, household_id: &str) -> Result<()> {
        require_id(user_id, "user_id")?;
        require_id(household_id, "household_id")?;

        let query = sqlx::query(MARK_HOUSEHOLD_AS_USER_DEFAULT)
            .bind(user_id)
            .bind(household_id);
        gateway::write(&self.pool, "marking household as default", query)
            .await
            .map_err(|e| e.or_not_found("household user membership"))?;

        info!("default household changed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_default_household_id_for_user(&self, user_id: &str) -> Result<String> {
        require_id(user_id, "user_id")?;

        let query = sqlx::query(GET_DEFAULT_HOUSEHOLD_ID_FOR_USER).bind(user_id);
        let row = gateway::get_one_row(&self.pool, "fetching default household id", query)
            .await
            .map_err(|e| e.or_not_found("default household"))?;

        Columns::new(&row, "default household id").next()
    }

    /// Removes a user from a household
    ///
    /// If that leaves the user without a default household, the oldest
    /// remaining household is promoted; if none remain, a personal household
    /// is created and made default.
    ///
    /// # Errors
    ///
    /// `InvalidId("user_id")` if the user owns the household. Ownership has to
    /// be transferred before the owner can leave.
    #[instrument(skip(self))]
    pub async fn remove_user_from_household(&self, user_id: &str, household_id: &str) -> Result<()> {
        require_id(user_id, "user_id")?;
        require_id(household_id, "household_id")?;

        let mut tx = gateway::begin(&self.pool, "removing user from household").await?;
        let outcome = async {
            if owns_household(&mut tx, user_id, household_id).await? {
                debug!("owner cannot leave their own household");
                return Err(DatabaseError::InvalidId("user_id"));
            }
            archive_membership(&mut tx, household_id, user_id)
                .await
                .map_err(|e| e.or_not_found("household user membership"))?;
            reconcile_default_household(&mut tx, user_id).await
        }
        .await;
        gateway::finish(tx, "removing user from household", outcome).await?;

        info!("user removed from household");
        Ok(())
    }

    /// Live memberships of a user, each with its household
    #[instrument(skip(self))]
    pub async fn get_household_user_memberships_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<HouseholdUserMembershipWithHousehold>> {
        require_id(user_id, "user_id")?;

        let query = sqlx::query(GET_MEMBERSHIPS_FOR_USER).bind(user_id);
        gateway::read_rows(
            &self.pool,
            "fetching memberships for user",
            query,
            HouseholdUserMembershipWithHousehold::from_row,
        )
        .await
    }
}
