/// User lifecycle
///
/// Sign-up inserts the user and a personal household in one transaction,
/// optionally consuming an invitation and attaching any other pending
/// invitations addressed to the new email. Seeding reuses sign-up and then
/// promotes the user inside the same transaction. Archival cascades to
/// memberships. Every other operation is a single statement.

use sqlx::PgConnection;
use tracing::{info, instrument};

use super::{households, invitations, memberships, read_list, Querier};
use crate::authorization::{HouseholdRole, ServiceRole};
use crate::config::SeedUser;
use crate::db::gateway;
use crate::db::mapper::{join_list, Columns};
use crate::db::query_builder::{wrap_query_for_ilike, ListQuery, ListResponse, QueryFilter, SEARCH_LIMIT};
use crate::error::{is_unique_violation, require_id, require_non_empty, DatabaseError, Result};
use crate::identifiers::new_id;
use crate::models::household::HouseholdCreationInput;
use crate::models::invitation::InvitationState;
use crate::models::membership::HouseholdUserMembershipCreationInput;
use crate::models::user::{
    user_columns, User, UserDatabaseCreationInput, UserReputation, UserReputationUpdateInput, UserUpdate,
};

const USER_CREATION: &str = "INSERT INTO users \
     (id, username, email_address, hashed_password, two_factor_secret, avatar_src, reputation, \
      reputation_explanation, service_roles, birth_day, birth_month, created_on) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, '', $8, $9, $10, extract(epoch FROM NOW()))";

const GET_USER: &str = concat!(
    "SELECT ",
    user_columns!(),
    " FROM users WHERE users.archived_on IS NULL AND users.id = $1"
);

const GET_USER_WITH_UNVERIFIED_TWO_FACTOR_SECRET: &str = concat!(
    "SELECT ",
    user_columns!(),
    " FROM users WHERE users.archived_on IS NULL AND users.two_factor_secret_verified_on IS NULL AND users.id = $1"
);

const GET_USER_BY_USERNAME: &str = concat!(
    "SELECT ",
    user_columns!(),
    " FROM users WHERE users.archived_on IS NULL AND users.username = $1"
);

const GET_USER_BY_EMAIL: &str = concat!(
    "SELECT ",
    user_columns!(),
    " FROM users WHERE users.archived_on IS NULL AND users.email_address = $1"
);

const GET_ADMIN_USER_BY_USERNAME: &str = concat!(
    "SELECT ",
    user_columns!(),
    " FROM users WHERE users.archived_on IS NULL AND users.service_roles ILIKE '%service_admin%' \
     AND users.username = $1 AND users.two_factor_secret_verified_on IS NOT NULL"
);

const GET_USER_ID_BY_EMAIL: &str = "SELECT users.id FROM users WHERE users.archived_on IS NULL \
     AND users.email_address = $1 AND users.two_factor_secret_verified_on IS NOT NULL";

const SEARCH_FOR_USERS_BY_USERNAME: &str = concat!(
    "SELECT ",
    user_columns!(),
    " FROM users WHERE users.username ILIKE $1 AND users.archived_on IS NULL \
     AND users.two_factor_secret_verified_on IS NOT NULL ORDER BY users.username LIMIT $2"
);

const GET_ALL_USERS_COUNT: &str = "SELECT COUNT(users.id) FROM users WHERE users.archived_on IS NULL";

const UPDATE_USER: &str = "UPDATE users SET username = $1, email_address = $2, avatar_src = $3, \
     birth_day = $4, birth_month = $5, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $6";

const UPDATE_USER_PASSWORD: &str = "UPDATE users SET hashed_password = $1, requires_password_change = FALSE, \
     password_last_changed_on = extract(epoch FROM NOW()), last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $2";

const UPDATE_USER_TWO_FACTOR_SECRET: &str = "UPDATE users SET two_factor_secret_verified_on = NULL, \
     two_factor_secret = $1, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $2";

const MARK_TWO_FACTOR_SECRET_AS_VERIFIED: &str = "UPDATE users \
     SET two_factor_secret_verified_on = extract(epoch FROM NOW()), reputation = $1, \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $2";

const UPDATE_USER_REPUTATION: &str = "UPDATE users SET reputation = $1, reputation_explanation = $2, \
     last_updated_on = extract(epoch FROM NOW()) WHERE archived_on IS NULL AND id = $3";

const PROMOTE_SEEDED_USER: &str = "UPDATE users \
     SET two_factor_secret_verified_on = extract(epoch FROM NOW()), reputation = $1, service_roles = $2, \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $3";

const ARCHIVE_USER: &str = "UPDATE users SET archived_on = extract(epoch FROM NOW()), \
     last_updated_on = extract(epoch FROM NOW()) WHERE archived_on IS NULL AND id = $1";

fn validate_creation_input(input: &UserDatabaseCreationInput) -> Result<()> {
    require_id(&input.id, "user_id")?;
    require_non_empty(&input.username, "username")?;
    require_non_empty(&input.email_address, "email_address")?;
    require_non_empty(&input.hashed_password, "hashed_password")?;
    Ok(())
}

/// Reads a user inside an open transaction
pub(super) async fn get_user_in(conn: &mut PgConnection, user_id: &str) -> Result<User> {
    let row = gateway::get_one_row(&mut *conn, "fetching user", sqlx::query(GET_USER).bind(user_id))
        .await
        .map_err(|e| e.or_not_found("user"))?;
    User::from_row(&row)
}

async fn insert_user(conn: &mut PgConnection, input: &UserDatabaseCreationInput) -> Result<()> {
    let query = sqlx::query(USER_CREATION)
        .bind(&input.id)
        .bind(&input.username)
        .bind(&input.email_address)
        .bind(&input.hashed_password)
        .bind(&input.two_factor_secret)
        .bind(&input.avatar_src)
        .bind(UserReputation::Unverified)
        .bind(join_list(&[ServiceRole::ServiceUser.as_str()]))
        .bind(input.birth_day.map(i16::from))
        .bind(input.birth_month.map(i16::from));

    match gateway::write_raw(&mut *conn, "creating user", query).await {
        Ok(0) => Err(DatabaseError::NoRows),
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            info!(username = %input.username, "user already exists");
            Err(DatabaseError::UserAlreadyExists)
        }
        Err(e) => Err(DatabaseError::unavailable("creating user", e)),
    }
}

/// `service_user` followed by any extra roles, without repeats
fn seeded_service_roles(extra: &[String]) -> Vec<String> {
    let mut roles = vec![ServiceRole::ServiceUser.as_str().to_string()];
    for role in extra {
        let role = role.trim();
        if !role.is_empty() && !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
    }
    roles
}

async fn create_user_in(conn: &mut PgConnection, input: &UserDatabaseCreationInput) -> Result<User> {
    insert_user(conn, input).await?;

    let invitation = input.invitation();

    let personal = HouseholdCreationInput {
        as_default: Some(invitation.is_none()),
        ..HouseholdCreationInput::personal(new_id(), &input.id, &input.username)
    };
    households::create_household_in(conn, &personal).await?;

    if let Some((token, destination_household_id)) = invitation {
        let pending = invitations::get_pending_invitation_by_email_and_token(conn, &input.email_address, token)
            .await?
            .filter(|inv| inv.destination_household.id == destination_household_id)
            .ok_or(DatabaseError::InvitationNotFound)?;

        let membership = HouseholdUserMembershipCreationInput::new(
            new_id(),
            &input.id,
            destination_household_id,
            HouseholdRole::HouseholdMember,
            true,
        );
        memberships::insert_membership(conn, &membership).await?;

        invitations::set_invitation_status(
            conn,
            destination_household_id,
            &pending.id,
            InvitationState::Accepted,
            "",
        )
        .await?;
    }

    invitations::attach_invitations_in(conn, &input.email_address, &input.id).await?;

    get_user_in(conn, &input.id).await
}

impl Querier {
    /// Signs up a user
    ///
    /// Creates the user, a personal household with an admin membership, and,
    /// when the input carries an invitation token and destination household,
    /// a default membership in that household while marking the invitation
    /// accepted. Other pending invitations sent to the same email are
    /// attached to the new user.
    ///
    /// # Errors
    ///
    /// - `UserAlreadyExists` if the username or email is taken
    /// - `InvitationNotFound` if the token matches no pending invitation
    ///   for this email and household
    ///
    /// Nothing is written when any step fails.
    #[instrument(skip(self, input), fields(user_id = %input.id, username = %input.username))]
    pub async fn create_user(&self, input: &UserDatabaseCreationInput) -> Result<User> {
        validate_creation_input(input)?;

        let mut tx = gateway::begin(&self.pool, "creating user").await?;
        let outcome = create_user_in(&mut tx, input).await;
        let user = gateway::finish(tx, "creating user", outcome).await?;

        info!("user created");
        Ok(user)
    }

    /// Fetches a non-archived user by id
    #[instrument(skip(self))]
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        require_id(user_id, "user_id")?;

        let row = gateway::get_one_row(&self.pool, "fetching user", sqlx::query(GET_USER).bind(user_id))
            .await
            .map_err(|e| e.or_not_found("user"))?;
        User::from_row(&row)
    }

    /// Fetches a user whose two-factor secret has not been verified yet
    #[instrument(skip(self))]
    pub async fn get_user_with_unverified_two_factor_secret(&self, user_id: &str) -> Result<User> {
        require_id(user_id, "user_id")?;

        let query = sqlx::query(GET_USER_WITH_UNVERIFIED_TWO_FACTOR_SECRET).bind(user_id);
        let row = gateway::get_one_row(&self.pool, "fetching user with unverified secret", query)
            .await
            .map_err(|e| e.or_not_found("user"))?;
        User::from_row(&row)
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_username(&self, username: &str) -> Result<User> {
        require_non_empty(username, "username")?;

        let query = sqlx::query(GET_USER_BY_USERNAME).bind(username);
        let row = gateway::get_one_row(&self.pool, "fetching user by username", query)
            .await
            .map_err(|e| e.or_not_found("user"))?;
        User::from_row(&row)
    }

    #[instrument(skip(self, email_address))]
    pub async fn get_user_by_email(&self, email_address: &str) -> Result<User> {
        require_non_empty(email_address, "email_address")?;

        let query = sqlx::query(GET_USER_BY_EMAIL).bind(email_address);
        let row = gateway::get_one_row(&self.pool, "fetching user by email", query)
            .await
            .map_err(|e| e.or_not_found("user"))?;
        User::from_row(&row)
    }

    /// Fetches a service admin with a verified two-factor secret
    #[instrument(skip(self))]
    pub async fn get_admin_user_by_username(&self, username: &str) -> Result<User> {
        require_non_empty(username, "username")?;

        let query = sqlx::query(GET_ADMIN_USER_BY_USERNAME).bind(username);
        let row = gateway::get_one_row(&self.pool, "fetching admin user by username", query)
            .await
            .map_err(|e| e.or_not_found("user"))?;
        User::from_row(&row)
    }

    /// Resolves an email address to the id of a verified user
    #[instrument(skip(self, email_address))]
    pub async fn get_user_id_by_email(&self, email_address: &str) -> Result<String> {
        require_non_empty(email_address, "email_address")?;

        let query = sqlx::query(GET_USER_ID_BY_EMAIL).bind(email_address);
        let row = gateway::get_one_row(&self.pool, "fetching user id by email", query)
            .await
            .map_err(|e| e.or_not_found("user"))?;

        let mut cols = Columns::new(&row, "user id");
        cols.next()
    }

    /// Case-insensitive substring search over usernames of verified users
    #[instrument(skip(self))]
    pub async fn search_for_users_by_username(&self, username_query: &str) -> Result<Vec<User>> {
        require_non_empty(username_query, "username_query")?;

        let query = sqlx::query(SEARCH_FOR_USERS_BY_USERNAME)
            .bind(wrap_query_for_ilike(username_query))
            .bind(SEARCH_LIMIT);
        gateway::read_rows(&self.pool, "searching users by username", query, User::from_row).await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_users(&self, filter: &QueryFilter) -> Result<ListResponse<User>> {
        let list = ListQuery::new("users", user_columns!())
            .order_by("users.username")
            .with_filter(filter);
        read_list(&self.pool, "fetching users", list, filter, User::scan).await
    }

    #[instrument(skip(self))]
    pub async fn get_all_users_count(&self) -> Result<u64> {
        gateway::count(&self.pool, "counting users", sqlx::query(GET_ALL_USERS_COUNT)).await
    }

    /// Writes the mutable profile columns
    #[instrument(skip(self, update))]
    pub async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<()> {
        require_id(user_id, "user_id")?;
        require_non_empty(&update.username, "username")?;
        require_non_empty(&update.email_address, "email_address")?;

        let query = sqlx::query(UPDATE_USER)
            .bind(&update.username)
            .bind(&update.email_address)
            .bind(&update.avatar_src)
            .bind(update.birth_day.map(i16::from))
            .bind(update.birth_month.map(i16::from))
            .bind(user_id);
        gateway::write(&self.pool, "updating user", query).await?;

        info!("user updated");
        Ok(())
    }

    /// Replaces the password hash and clears `requires_password_change`
    #[instrument(skip(self, new_hash))]
    pub async fn update_user_password(&self, user_id: &str, new_hash: &str) -> Result<()> {
        require_id(user_id, "user_id")?;
        require_non_empty(new_hash, "new_hash")?;

        let query = sqlx::query(UPDATE_USER_PASSWORD).bind(new_hash).bind(user_id);
        gateway::write(&self.pool, "updating user password", query).await?;

        info!("user password updated");
        Ok(())
    }

    /// Stores a new two-factor secret and marks it unverified
    #[instrument(skip(self, new_secret))]
    pub async fn update_user_two_factor_secret(&self, user_id: &str, new_secret: &str) -> Result<()> {
        require_id(user_id, "user_id")?;
        require_non_empty(new_secret, "new_secret")?;

        let query = sqlx::query(UPDATE_USER_TWO_FACTOR_SECRET).bind(new_secret).bind(user_id);
        gateway::write(&self.pool, "updating user two factor secret", query).await?;

        info!("user two factor secret updated");
        Ok(())
    }

    /// Stamps the secret as verified and puts the user in good standing
    #[instrument(skip(self))]
    pub async fn mark_user_two_factor_secret_as_verified(&self, user_id: &str) -> Result<()> {
        require_id(user_id, "user_id")?;

        let query = sqlx::query(MARK_TWO_FACTOR_SECRET_AS_VERIFIED)
            .bind(UserReputation::GoodStanding)
            .bind(user_id);
        gateway::write(&self.pool, "marking two factor secret as verified", query).await?;

        info!("user two factor secret verified");
        Ok(())
    }

    #[instrument(skip(self, input), fields(user_id = %input.target_user_id, reputation = input.new_reputation.as_str()))]
    pub async fn update_user_reputation(&self, input: &UserReputationUpdateInput) -> Result<()> {
        require_id(&input.target_user_id, "target_user_id")?;

        let query = sqlx::query(UPDATE_USER_REPUTATION)
            .bind(input.new_reputation)
            .bind(&input.reason)
            .bind(&input.target_user_id);
        gateway::write(&self.pool, "updating user reputation", query).await?;

        info!("user reputation updated");
        Ok(())
    }

    /// Creates the configured seed user with a verified secret and its service roles
    ///
    /// # Errors
    ///
    /// `NilInput` when no seed user is configured; otherwise the errors of
    /// [`Querier::create_user`].
    #[instrument(skip(self, seed))]
    pub async fn seed_user(&self, seed: Option<&SeedUser>) -> Result<User> {
        let seed = seed.ok_or(DatabaseError::NilInput)?;
        let input = UserDatabaseCreationInput {
            id: new_id(),
            username: seed.username.clone(),
            email_address: seed.email_address.clone(),
            hashed_password: seed.hashed_password.clone(),
            two_factor_secret: seed.two_factor_secret.clone(),
            ..Default::default()
        };
        validate_creation_input(&input)?;

        let roles = seeded_service_roles(&seed.service_roles);
        let mut tx = gateway::begin(&self.pool, "seeding user").await?;
        let outcome = async {
            create_user_in(&mut tx, &input).await?;
            let query = sqlx::query(PROMOTE_SEEDED_USER)
                .bind(UserReputation::GoodStanding)
                .bind(join_list(&roles))
                .bind(&input.id);
            gateway::write(&mut *tx, "promoting seeded user", query).await?;
            get_user_in(&mut tx, &input.id).await
        }
        .await;
        let user = gateway::finish(tx, "seeding user", outcome).await?;

        info!(user_id = %user.id, roles = %join_list(&roles), "seed user created");
        Ok(user)
    }

    /// Archives the user and every live membership they hold
    #[instrument(skip(self))]
    pub async fn archive_user(&self, user_id: &str) -> Result<()> {
        require_id(user_id, "user_id")?;

        let mut tx = gateway::begin(&self.pool, "archiving user").await?;
        let outcome = async {
            gateway::write(&mut *tx, "archiving user", sqlx::query(ARCHIVE_USER).bind(user_id)).await?;
            memberships::archive_memberships_for_user(&mut tx, user_id).await
        }
        .await;
        gateway::finish(tx, "archiving user", outcome).await?;

        info!("user archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queriers::test_support::offline_querier;

    fn creation_input() -> UserDatabaseCreationInput {
        UserDatabaseCreationInput {
            id: "u1".to_string(),
            username: "chef".to_string(),
            email_address: "chef@example.com".to_string(),
            hashed_password: "hash".to_string(),
            two_factor_secret: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_seeded_roles_always_include_service_user() {
        assert_eq!(seeded_service_roles(&[]), vec!["service_user"]);
        assert_eq!(
            seeded_service_roles(&[
                "service_admin".to_string(),
                "service_user".to_string(),
                " ".to_string(),
            ]),
            vec!["service_user", "service_admin"]
        );
    }

    #[tokio::test]
    async fn test_seed_user_requires_configuration() {
        let querier = offline_querier();
        assert!(matches!(querier.seed_user(None).await, Err(DatabaseError::NilInput)));
    }

    #[test]
    fn test_creation_input_validation() {
        assert!(validate_creation_input(&creation_input()).is_ok());

        let missing_id = UserDatabaseCreationInput {
            id: String::new(),
            ..creation_input()
        };
        assert!(matches!(
            validate_creation_input(&missing_id),
            Err(DatabaseError::InvalidId("user_id"))
        ));

        let blank_email = UserDatabaseCreationInput {
            email_address: "  ".to_string(),
            ..creation_input()
        };
        assert!(matches!(
            validate_creation_input(&blank_email),
            Err(DatabaseError::EmptyInput("email_address"))
        ));
    }

    #[test]
    fn test_admin_lookup_requires_role_and_verified_secret() {
        assert!(GET_ADMIN_USER_BY_USERNAME.contains("ILIKE '%service_admin%'"));
        assert!(GET_ADMIN_USER_BY_USERNAME.contains("two_factor_secret_verified_on IS NOT NULL"));
        assert!(GET_USER_WITH_UNVERIFIED_TWO_FACTOR_SECRET.contains("two_factor_secret_verified_on IS NULL"));
    }

    #[tokio::test]
    async fn test_empty_ids_rejected_before_io() {
        let querier = offline_querier();

        assert!(matches!(querier.get_user("").await, Err(DatabaseError::InvalidId(_))));
        assert!(matches!(querier.archive_user("").await, Err(DatabaseError::InvalidId(_))));
        assert!(matches!(
            querier.get_user_by_username("").await,
            Err(DatabaseError::EmptyInput(_))
        ));
        assert!(matches!(
            querier.get_user_id_by_email("").await,
            Err(DatabaseError::EmptyInput(_))
        ));
        assert!(matches!(
            querier.update_user_password("u1", "").await,
            Err(DatabaseError::EmptyInput(_))
        ));
        assert!(matches!(
            querier.mark_user_two_factor_secret_as_verified("").await,
            Err(DatabaseError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_create_user_rejects_blank_username() {
        let querier = offline_querier();
        let input = UserDatabaseCreationInput {
            username: String::new(),
            ..creation_input()
        };

        let err = querier.create_user(&input).await.unwrap_err();
        assert!(err.is_input_error());
    }
}
