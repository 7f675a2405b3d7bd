/// Catalog queriers
///
/// Thin CRUD over the tables outside identity and tenancy. Each family
/// defines its record, its inputs, and its operations as methods on
/// [`Querier`](crate::Querier). All of them follow the same rules:
///
/// - ids are checked before any I/O
/// - reads skip archived rows
/// - writes that match nothing report `NoRows`
/// - lists page through [`ListQuery`](crate::db::query_builder::ListQuery)
///   and carry filtered/total counts
///
/// # Families
///
/// - `webhooks`: household-scoped HTTP callbacks
/// - `api_clients`: user-scoped client credentials
/// - `password_reset_tokens`: single-use, expiring reset tokens
/// - `valid_instruments`, `valid_preparations`, `valid_ingredients`: recipe vocabulary
/// - `valid_ingredient_preparations`, `valid_preparation_instruments`: vocabulary pairings

pub mod api_clients;
pub mod password_reset_tokens;
pub mod valid_ingredient_preparations;
pub mod valid_ingredients;
pub mod valid_instruments;
pub mod valid_preparation_instruments;
pub mod valid_preparations;
pub mod webhooks;

use sqlx::postgres::PgRow;
use sqlx::PgPool;

use crate::db::gateway::{self, PgQuery};
use crate::error::Result;

/// Fetches one row and decodes it, reporting a missing row as `NotFound(entity)`
pub(crate) async fn get_one<T>(
    pool: &PgPool,
    description: &'static str,
    entity: &'static str,
    query: PgQuery<'_>,
    from_row: fn(&PgRow) -> Result<T>,
) -> Result<T> {
    let row = gateway::get_one_row(pool, description, query)
        .await
        .map_err(|e| e.or_not_found(entity))?;
    from_row(&row)
}
