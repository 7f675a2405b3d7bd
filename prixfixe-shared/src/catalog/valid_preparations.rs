/// Valid preparations
///
/// Things that can be done to an ingredient: dice, sear, fold. Names are
/// unique among live rows.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};
use validator::Validate;

use super::get_one;
use crate::db::gateway;
use crate::db::mapper::Columns;
use crate::db::query_builder::{wrap_query_for_ilike, ListQuery, ListResponse, QueryFilter, SEARCH_LIMIT};
use crate::error::{require_id, require_non_empty, Result};
use crate::queriers::{read_list, Querier};

macro_rules! valid_preparation_columns {
    () => {
        "valid_preparations.id, valid_preparations.name, valid_preparations.description, \
         valid_preparations.icon_path, valid_preparations.created_on, \
         valid_preparations.last_updated_on, valid_preparations.archived_on"
    };
}
pub(crate) use valid_preparation_columns;

const VALID_PREPARATION_EXISTS: &str = "SELECT EXISTS (SELECT valid_preparations.id FROM valid_preparations \
     WHERE valid_preparations.archived_on IS NULL AND valid_preparations.id = $1)";

const GET_VALID_PREPARATION: &str = concat!(
    "SELECT ",
    valid_preparation_columns!(),
    " FROM valid_preparations WHERE valid_preparations.archived_on IS NULL AND valid_preparations.id = $1"
);

const GET_RANDOM_VALID_PREPARATION: &str = concat!(
    "SELECT ",
    valid_preparation_columns!(),
    " FROM valid_preparations WHERE valid_preparations.archived_on IS NULL ORDER BY random() LIMIT 1"
);

const SEARCH_FOR_VALID_PREPARATIONS: &str = concat!(
    "SELECT ",
    valid_preparation_columns!(),
    " FROM valid_preparations WHERE valid_preparations.archived_on IS NULL \
     AND valid_preparations.name ILIKE $1 LIMIT $2"
);

const CREATE_VALID_PREPARATION: &str = "INSERT INTO valid_preparations \
     (id, name, description, icon_path, created_on) \
     VALUES ($1, $2, $3, $4, extract(epoch FROM NOW()))";

const UPDATE_VALID_PREPARATION: &str = "UPDATE valid_preparations SET name = $1, description = $2, \
     icon_path = $3, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $4";

const ARCHIVE_VALID_PREPARATION: &str = "UPDATE valid_preparations SET last_updated_on = extract(epoch FROM NOW()), \
     archived_on = extract(epoch FROM NOW()) WHERE archived_on IS NULL AND id = $1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidPreparation {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon_path: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl ValidPreparation {
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            name: cols.next()?,
            description: cols.next()?,
            icon_path: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "valid preparation"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ValidPreparationCreationInput {
    pub id: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub description: String,
    pub icon_path: String,
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn valid_preparation_exists(&self, valid_preparation_id: &str) -> Result<bool> {
        require_id(valid_preparation_id, "valid_preparation_id")?;

        let query = sqlx::query(VALID_PREPARATION_EXISTS).bind(valid_preparation_id);
        gateway::exists(&self.pool, "checking valid preparation existence", query).await
    }

    #[instrument(skip(self))]
    pub async fn get_valid_preparation(&self, valid_preparation_id: &str) -> Result<ValidPreparation> {
        require_id(valid_preparation_id, "valid_preparation_id")?;

        let query = sqlx::query(GET_VALID_PREPARATION).bind(valid_preparation_id);
        get_one(
            &self.pool,
            "fetching valid preparation",
            "valid preparation",
            query,
            ValidPreparation::from_row,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_random_valid_preparation(&self) -> Result<ValidPreparation> {
        let query = sqlx::query(GET_RANDOM_VALID_PREPARATION);
        get_one(
            &self.pool,
            "fetching random valid preparation",
            "valid preparation",
            query,
            ValidPreparation::from_row,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn search_for_valid_preparations(&self, query: &str) -> Result<Vec<ValidPreparation>> {
        require_non_empty(query, "query")?;

        let query = sqlx::query(SEARCH_FOR_VALID_PREPARATIONS)
            .bind(wrap_query_for_ilike(query))
            .bind(SEARCH_LIMIT);
        gateway::read_rows(&self.pool, "searching valid preparations", query, ValidPreparation::from_row).await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_preparations(&self, filter: &QueryFilter) -> Result<ListResponse<ValidPreparation>> {
        let list = ListQuery::new("valid_preparations", valid_preparation_columns!())
            .order_by("valid_preparations.name")
            .with_filter(filter);
        read_list(&self.pool, "fetching valid preparations", list, filter, ValidPreparation::scan).await
    }

    #[instrument(skip(self, input), fields(valid_preparation_id = %input.id))]
    pub async fn create_valid_preparation(&self, input: &ValidPreparationCreationInput) -> Result<ValidPreparation> {
        require_id(&input.id, "valid_preparation_id")?;
        input.validate()?;

        let query = sqlx::query(CREATE_VALID_PREPARATION)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.icon_path);
        gateway::write(&self.pool, "creating valid preparation", query).await?;

        info!("valid preparation created");
        self.get_valid_preparation(&input.id).await
    }

    #[instrument(skip(self, updated), fields(valid_preparation_id = %updated.id))]
    pub async fn update_valid_preparation(&self, updated: &ValidPreparation) -> Result<()> {
        require_id(&updated.id, "valid_preparation_id")?;
        require_non_empty(&updated.name, "name")?;

        let query = sqlx::query(UPDATE_VALID_PREPARATION)
            .bind(&updated.name)
            .bind(&updated.description)
            .bind(&updated.icon_path)
            .bind(&updated.id);
        gateway::write(&self.pool, "updating valid preparation", query).await?;

        info!("valid preparation updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn archive_valid_preparation(&self, valid_preparation_id: &str) -> Result<()> {
        require_id(valid_preparation_id, "valid_preparation_id")?;

        let query = sqlx::query(ARCHIVE_VALID_PREPARATION).bind(valid_preparation_id);
        gateway::write(&self.pool, "archiving valid preparation", query).await?;

        info!("valid preparation archived");
        Ok(())
    }
}
