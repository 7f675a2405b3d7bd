/// Household lifecycle
///
/// Reads that return households always carry their live members. The
/// statements select household, membership and user columns for every
/// member, ordered so one household's rows are contiguous, and the rows
/// stream through an [`Aggregator`] into one [`Household`] per group.
///
/// List reads page over households first (an inner [`ListQuery`] selecting
/// ids plus counts) and then join members onto that page, so `limit`
/// counts households rather than member rows.

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

use super::{memberships, read_counts, Querier};
use crate::authorization::HouseholdRole;
use crate::db::gateway::{self, PgQuery};
use crate::db::mapper::{Aggregator, Columns};
use crate::db::query_builder::{ListQuery, ListResponse, Pagination, QueryFilter, SortBy};
use crate::error::{require_id, require_non_empty, DatabaseError, Result};
use crate::identifiers::new_id;
use crate::models::household::{
    household_columns, BillingStatus, Household, HouseholdCreationInput, HouseholdOwnershipTransferInput,
    HouseholdUpdate, DEFAULT_TIME_ZONE,
};
use crate::models::membership::{
    membership_columns, HouseholdUserMembership, HouseholdUserMembershipCreationInput,
    HouseholdUserMembershipWithUser,
};
use crate::models::user::{user_columns, User};

/// Household, member and member-user columns, joined
macro_rules! household_with_members {
    () => {
        concat!(
            "SELECT ",
            household_columns!(),
            ", ",
            membership_columns!(),
            ", ",
            user_columns!(),
            " FROM households \
             JOIN household_user_memberships ON household_user_memberships.belongs_to_household = households.id \
             JOIN users ON household_user_memberships.belongs_to_user = users.id \
             WHERE households.archived_on IS NULL AND household_user_memberships.archived_on IS NULL \
             AND households.id = $1"
        )
    };
}

const GET_HOUSEHOLD: &str = concat!(
    household_with_members!(),
    " AND households.belongs_to_user = $2",
    " ORDER BY household_user_memberships.created_on, household_user_memberships.id"
);

const GET_HOUSEHOLD_BY_ID: &str = concat!(
    household_with_members!(),
    " ORDER BY household_user_memberships.created_on, household_user_memberships.id"
);

const HOUSEHOLD_CREATION: &str = "INSERT INTO households \
     (id, name, billing_status, contact_email, contact_phone, time_zone, belongs_to_user, created_on) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, extract(epoch FROM NOW()))";

const UPDATE_HOUSEHOLD: &str = "UPDATE households SET name = $1, contact_email = $2, contact_phone = $3, \
     time_zone = $4, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_user = $5 AND id = $6";

const ARCHIVE_HOUSEHOLD: &str = "UPDATE households SET archived_on = extract(epoch FROM NOW()), \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_user = $1 AND id = $2";

const TRANSFER_HOUSEHOLD_OWNERSHIP: &str = "UPDATE households SET belongs_to_user = $1, \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_user = $2 AND id = $3";

const GET_ALL_HOUSEHOLDS_COUNT: &str =
    "SELECT COUNT(households.id) FROM households WHERE households.archived_on IS NULL";

/// Joins members onto a page of household ids
const PAGE_MEMBERS: &str = ") AS page \
     JOIN households ON households.id = page.id \
     JOIN household_user_memberships ON household_user_memberships.belongs_to_household = households.id \
     AND household_user_memberships.archived_on IS NULL \
     JOIN users ON household_user_memberships.belongs_to_user = users.id";

/// Streams household-with-member rows into households
struct HouseholdRows {
    aggregator: Aggregator<Household, HouseholdUserMembershipWithUser>,
    counts: Option<(u64, u64)>,
}

impl HouseholdRows {
    fn new() -> Self {
        Self {
            aggregator: Aggregator::new(),
            counts: None,
        }
    }

    fn push(&mut self, row: &PgRow, with_counts: bool) -> Result<()> {
        let mut cols = Columns::new(row, "household with members");
        let household = Household::scan(&mut cols)?;
        let membership = HouseholdUserMembership::scan(&mut cols)?;
        let user = User::scan(&mut cols)?;
        if with_counts {
            self.counts = Some((cols.count()?, cols.count()?));
        }

        let id = household.id.clone();
        self.aggregator.push(
            &id,
            || Ok(household),
            Some(HouseholdUserMembershipWithUser::new(membership, user)),
        )
    }

    fn finish(self) -> (Vec<Household>, Option<(u64, u64)>) {
        let households = self
            .aggregator
            .finish()
            .into_iter()
            .map(|(mut household, members)| {
                household.members = members;
                household
            })
            .collect();
        (households, self.counts)
    }
}

async fn read_household<'q>(
    conn: &mut PgConnection,
    description: &'static str,
    query: PgQuery<'q>,
) -> Result<Household> {
    let mut rows = HouseholdRows::new();
    gateway::for_each_row(&mut *conn, description, query, |row| rows.push(row, false)).await?;

    rows.finish()
        .0
        .into_iter()
        .next()
        .ok_or(DatabaseError::NotFound("household"))
}

fn validate_creation_input(input: &HouseholdCreationInput) -> Result<()> {
    require_id(&input.id, "household_id")?;
    require_id(&input.belongs_to_user, "belongs_to_user")?;
    require_non_empty(&input.name, "name")?;
    Ok(())
}

/// Inserts a household and its owner's admin membership
///
/// The membership becomes the owner's default when `as_default` says so, or,
/// when it is `None`, when the owner has no default household yet.
pub(super) async fn create_household_in(
    conn: &mut PgConnection,
    input: &HouseholdCreationInput,
) -> Result<Household> {
    let query = sqlx::query(HOUSEHOLD_CREATION)
        .bind(&input.id)
        .bind(&input.name)
        .bind(BillingStatus::Unpaid)
        .bind(&input.contact_email)
        .bind(&input.contact_phone)
        .bind(input.time_zone.as_deref().unwrap_or(DEFAULT_TIME_ZONE))
        .bind(&input.belongs_to_user);
    gateway::write(&mut *conn, "creating household", query).await?;

    let make_default = match input.as_default {
        Some(flag) => flag,
        None => !memberships::has_default_household(conn, &input.belongs_to_user).await?,
    };

    let membership = HouseholdUserMembershipCreationInput::new(
        new_id(),
        &input.belongs_to_user,
        &input.id,
        HouseholdRole::HouseholdAdmin,
        false,
    );
    memberships::insert_membership(conn, &membership).await?;

    if make_default {
        memberships::swap_default_household(conn, &input.belongs_to_user, &input.id).await?;
    }

    debug!(household_id = %input.id, default = make_default, "household created");
    get_household_by_id_in(conn, &input.id).await
}

async fn get_household_by_id_in(conn: &mut PgConnection, household_id: &str) -> Result<Household> {
    read_household(
        conn,
        "fetching household by id",
        sqlx::query(GET_HOUSEHOLD_BY_ID).bind(household_id),
    )
    .await
}

async fn transfer_ownership_in(
    conn: &mut PgConnection,
    household_id: &str,
    input: &HouseholdOwnershipTransferInput,
) -> Result<()> {
    let query = sqlx::query(TRANSFER_HOUSEHOLD_OWNERSHIP)
        .bind(&input.new_owner)
        .bind(&input.current_owner)
        .bind(household_id);
    gateway::write(&mut *conn, "transferring household ownership", query)
        .await
        .map_err(|e| e.or_not_found("household"))?;

    // The new owner may already be a member; the pair must stay unique.
    let carried_default = memberships::default_flag(conn, &input.new_owner, household_id).await?;
    if carried_default.is_some() {
        memberships::archive_membership(conn, household_id, &input.new_owner).await?;
    }

    memberships::reassign_membership(
        conn,
        household_id,
        &input.current_owner,
        &input.new_owner,
        carried_default.unwrap_or(false),
    )
    .await?;

    memberships::reconcile_default_household(conn, &input.current_owner).await
}

impl Querier {
    /// Creates a household owned by `input.belongs_to_user`
    ///
    /// The owner gets a `household_admin` membership in the same transaction.
    #[instrument(skip(self, input), fields(household_id = %input.id, user_id = %input.belongs_to_user))]
    pub async fn create_household(&self, input: &HouseholdCreationInput) -> Result<Household> {
        validate_creation_input(input)?;

        let mut tx = gateway::begin(&self.pool, "creating household").await?;
        let outcome = create_household_in(&mut tx, input).await;
        let household = gateway::finish(tx, "creating household", outcome).await?;

        info!("household created");
        Ok(household)
    }

    /// Fetches a household owned by `user_id`, with its members
    #[instrument(skip(self))]
    pub async fn get_household(&self, household_id: &str, user_id: &str) -> Result<Household> {
        require_id(household_id, "household_id")?;
        require_id(user_id, "user_id")?;

        let mut rows = HouseholdRows::new();
        let query = sqlx::query(GET_HOUSEHOLD).bind(household_id).bind(user_id);
        gateway::for_each_row(&self.pool, "fetching household", query, |row| rows.push(row, false)).await?;

        rows.finish()
            .0
            .into_iter()
            .next()
            .ok_or(DatabaseError::NotFound("household"))
    }

    /// Fetches any non-archived household, with its members
    #[instrument(skip(self))]
    pub async fn get_household_by_id(&self, household_id: &str) -> Result<Household> {
        require_id(household_id, "household_id")?;

        let mut rows = HouseholdRows::new();
        let query = sqlx::query(GET_HOUSEHOLD_BY_ID).bind(household_id);
        gateway::for_each_row(&self.pool, "fetching household by id", query, |row| rows.push(row, false)).await?;

        rows.finish()
            .0
            .into_iter()
            .next()
            .ok_or(DatabaseError::NotFound("household"))
    }

    /// Households owned by `user_id`
    #[instrument(skip(self, filter))]
    pub async fn get_households(&self, user_id: &str, filter: &QueryFilter) -> Result<ListResponse<Household>> {
        require_id(user_id, "user_id")?;

        let page = ListQuery::new("households", "households.id")
            .owned_by("households.belongs_to_user", user_id, false);
        self.list_households("fetching households", page, filter).await
    }

    /// Every household, regardless of owner
    #[instrument(skip(self, filter))]
    pub async fn get_households_for_admin(&self, filter: &QueryFilter) -> Result<ListResponse<Household>> {
        let page = ListQuery::new("households", "households.id");
        self.list_households("fetching households for admin", page, filter).await
    }

    /// Households where `user_id` holds a live membership
    #[instrument(skip(self, filter))]
    pub async fn get_households_for_user(
        &self,
        user_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<Household>> {
        require_id(user_id, "user_id")?;

        let page = ListQuery::new("households", "households.id")
            .join("household_user_memberships ON household_user_memberships.belongs_to_household = households.id")
            .where_null("household_user_memberships.archived_on")
            .where_eq("household_user_memberships.belongs_to_user", user_id);
        self.list_households("fetching households for user", page, filter).await
    }

    async fn list_households(
        &self,
        description: &'static str,
        page: ListQuery,
        filter: &QueryFilter,
    ) -> Result<ListResponse<Household>> {
        let mut qb = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            household_columns!(),
            ", ",
            membership_columns!(),
            ", ",
            user_columns!(),
            ", page.filtered_count, page.total_count FROM ("
        ));
        let page = page.order_by("households.id").with_filter(filter);
        let mut count_query = page.counts();
        page.push_into(&mut qb);
        qb.push(PAGE_MEMBERS);
        qb.push(" ORDER BY ");
        qb.push(match filter.sort_by {
            Some(SortBy::Desc) => "households.created_on DESC, ",
            Some(SortBy::Asc) => "households.created_on ASC, ",
            None => "",
        });
        qb.push("households.id, household_user_memberships.created_on, household_user_memberships.id");

        let mut rows = HouseholdRows::new();
        gateway::for_each_row(&self.pool, description, qb.build(), |row| rows.push(row, true)).await?;

        let (items, counts) = rows.finish();
        let mut pagination = Pagination::from_filter(filter);
        (pagination.filtered_count, pagination.total_count) = match counts {
            Some(counts) => counts,
            None => read_counts(&self.pool, description, &mut count_query).await?,
        };

        Ok(ListResponse { items, pagination })
    }

    #[instrument(skip(self))]
    pub async fn get_all_households_count(&self) -> Result<u64> {
        gateway::count(&self.pool, "counting households", sqlx::query(GET_ALL_HOUSEHOLDS_COUNT)).await
    }

    /// Writes the mutable columns of a household owned by `user_id`
    #[instrument(skip(self, update))]
    pub async fn update_household(&self, household_id: &str, user_id: &str, update: &HouseholdUpdate) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(user_id, "user_id")?;
        require_non_empty(&update.name, "name")?;

        let query = sqlx::query(UPDATE_HOUSEHOLD)
            .bind(&update.name)
            .bind(&update.contact_email)
            .bind(&update.contact_phone)
            .bind(&update.time_zone)
            .bind(user_id)
            .bind(household_id);
        gateway::write(&self.pool, "updating household", query).await?;

        info!("household updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn archive_household(&self, household_id: &str, user_id: &str) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(user_id, "user_id")?;

        let query = sqlx::query(ARCHIVE_HOUSEHOLD).bind(user_id).bind(household_id);
        gateway::write(&self.pool, "archiving household", query).await?;

        info!("household archived");
        Ok(())
    }

    /// Hands a household to another user
    ///
    /// The household row and the former owner's membership move to the new
    /// owner together. If the new owner was already a member, that membership
    /// is archived first and its default flag carries over. The former owner
    /// keeps a default household: a remaining one is promoted, or a personal
    /// household is created when none remain.
    #[instrument(skip(self, input), fields(from = %input.current_owner, to = %input.new_owner))]
    pub async fn transfer_household_ownership(
        &self,
        household_id: &str,
        input: &HouseholdOwnershipTransferInput,
    ) -> Result<()> {
        require_id(household_id, "household_id")?;
        require_id(&input.current_owner, "current_owner")?;
        require_id(&input.new_owner, "new_owner")?;
        if input.current_owner == input.new_owner {
            debug!("new owner is the current owner");
            return Err(DatabaseError::InvalidId("new_owner"));
        }

        let mut tx = gateway::begin(&self.pool, "transferring household ownership").await?;
        let outcome = transfer_ownership_in(&mut tx, household_id, input).await;
        gateway::finish(tx, "transferring household ownership", outcome).await?;

        info!(reason = %input.reason, "household ownership transferred");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queriers::test_support::offline_querier;

    const MEMBER_ORDER: &str = " ORDER BY household_user_memberships.created_on, household_user_memberships.id";

    #[test]
    fn test_household_reads_order_members() {
        assert!(GET_HOUSEHOLD.ends_with(MEMBER_ORDER));
        assert!(GET_HOUSEHOLD_BY_ID.ends_with(MEMBER_ORDER));
        assert!(GET_HOUSEHOLD.contains("households.belongs_to_user = $2"));
        assert!(!GET_HOUSEHOLD_BY_ID.contains("$2"));
    }

    #[test]
    fn test_creation_input_validation() {
        let input = HouseholdCreationInput {
            id: "h1".to_string(),
            name: "home".to_string(),
            belongs_to_user: "u1".to_string(),
            ..Default::default()
        };
        assert!(validate_creation_input(&input).is_ok());

        let unnamed = HouseholdCreationInput {
            name: String::new(),
            ..input.clone()
        };
        assert!(matches!(
            validate_creation_input(&unnamed),
            Err(DatabaseError::EmptyInput("name"))
        ));

        let ownerless = HouseholdCreationInput {
            belongs_to_user: String::new(),
            ..input
        };
        assert!(matches!(
            validate_creation_input(&ownerless),
            Err(DatabaseError::InvalidId("belongs_to_user"))
        ));
    }

    #[tokio::test]
    async fn test_transfer_to_self_rejected() {
        let querier = offline_querier();
        let input = HouseholdOwnershipTransferInput {
            current_owner: "u1".to_string(),
            new_owner: "u1".to_string(),
            reason: String::new(),
        };

        let err = querier.transfer_household_ownership("h1", &input).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidId("new_owner")));
    }

    #[tokio::test]
    async fn test_empty_ids_rejected_before_io() {
        let querier = offline_querier();

        assert!(querier.get_household("", "u1").await.unwrap_err().is_input_error());
        assert!(querier.get_household_by_id("").await.unwrap_err().is_input_error());
        assert!(querier.archive_household("h1", "").await.unwrap_err().is_input_error());
        assert!(querier
            .get_households("", &QueryFilter::default())
            .await
            .unwrap_err()
            .is_input_error());
    }
}
