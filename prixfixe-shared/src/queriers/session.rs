/// Session context assembly
///
/// Request authenticators call this on every request, so it is two reads
/// and no transaction: the user, then their live memberships in live
/// households in creation order.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::Querier;
use crate::db::gateway;
use crate::db::mapper::Columns;
use crate::error::{require_id, DatabaseError, Result};
use crate::models::session::{SessionContextBuilder, SessionContextData};

const GET_MEMBERSHIPS_FOR_SESSION: &str = "SELECT household_user_memberships.belongs_to_household, \
     household_user_memberships.household_roles, household_user_memberships.default_household \
     FROM household_user_memberships \
     JOIN households ON households.id = household_user_memberships.belongs_to_household \
     WHERE household_user_memberships.archived_on IS NULL AND households.archived_on IS NULL \
     AND household_user_memberships.belongs_to_user = $1 \
     ORDER BY household_user_memberships.created_on, household_user_memberships.id";

/// Anything that can resolve a user id into session context
///
/// Authenticators depend on this rather than on [`Querier`] so they can be
/// tested without a database.
#[async_trait]
pub trait SessionContextSource: Send + Sync {
    async fn build_session_context_data_for_user(&self, user_id: &str) -> Result<SessionContextData>;
}

/// Every read failure other than a missing user is reported as `Unavailable`
fn as_unavailable(err: DatabaseError) -> DatabaseError {
    match err {
        DatabaseError::RowError { description, source } | DatabaseError::ScanError { description, source } => {
            DatabaseError::Unavailable { description, source }
        }
        other => other,
    }
}

impl Querier {
    /// Resolves who the caller is and what they may do in each household
    ///
    /// # Errors
    ///
    /// `NotFound` if the user does not exist or is archived; `Unavailable`
    /// for any failed read.
    #[instrument(skip(self))]
    pub async fn build_session_context_data_for_user(&self, user_id: &str) -> Result<SessionContextData> {
        require_id(user_id, "user_id")?;

        let user = self.get_user(user_id).await.map_err(as_unavailable)?;
        let mut builder = SessionContextBuilder::new(&user);

        let query = sqlx::query(GET_MEMBERSHIPS_FOR_SESSION).bind(user_id);
        gateway::for_each_row(&self.pool, "fetching memberships for session", query, |row| {
            let mut cols = Columns::new(row, "session membership");
            let household_id: String = cols.next()?;
            let roles = cols.list()?;
            let is_default: bool = cols.next()?;
            builder.add_membership(&household_id, roles, is_default);
            Ok(())
        })
        .await
        .map_err(as_unavailable)?;

        let session = builder.build();
        debug!(
            households = session.household_permissions.len(),
            active_household_id = %session.active_household_id,
            "session context built"
        );
        Ok(session)
    }
}

#[async_trait]
impl SessionContextSource for Querier {
    async fn build_session_context_data_for_user(&self, user_id: &str) -> Result<SessionContextData> {
        Querier::build_session_context_data_for_user(self, user_id).await
    }
}
