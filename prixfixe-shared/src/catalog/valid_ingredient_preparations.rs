/// Valid ingredient preparations
///
/// Which preparations make sense for which ingredients. Every read joins
/// both sides, so a pairing whose ingredient or preparation has been
/// archived disappears with it.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};

use super::get_one;
use super::valid_ingredients::{valid_ingredient_columns, ValidIngredient};
use super::valid_preparations::{valid_preparation_columns, ValidPreparation};
use crate::db::gateway;
use crate::db::mapper::Columns;
use crate::db::query_builder::{ListQuery, ListResponse, QueryFilter};
use crate::error::{require_id, Result};
use crate::queriers::{read_list, Querier};

macro_rules! valid_ingredient_preparation_columns {
    () => {
        concat!(
            "valid_ingredient_preparations.id, valid_ingredient_preparations.notes, ",
            valid_ingredient_columns!(),
            ", ",
            valid_preparation_columns!(),
            ", valid_ingredient_preparations.created_on, valid_ingredient_preparations.last_updated_on, \
             valid_ingredient_preparations.archived_on"
        )
    };
}

macro_rules! valid_ingredient_preparation_joins {
    () => {
        " JOIN valid_ingredients ON valid_ingredients.id = valid_ingredient_preparations.valid_ingredient_id \
         JOIN valid_preparations ON valid_preparations.id = valid_ingredient_preparations.valid_preparation_id"
    };
}

const INGREDIENT_JOIN: &str =
    "valid_ingredients ON valid_ingredients.id = valid_ingredient_preparations.valid_ingredient_id";
const PREPARATION_JOIN: &str =
    "valid_preparations ON valid_preparations.id = valid_ingredient_preparations.valid_preparation_id";

const VALID_INGREDIENT_PREPARATION_EXISTS: &str = concat!(
    "SELECT EXISTS (SELECT valid_ingredient_preparations.id FROM valid_ingredient_preparations",
    valid_ingredient_preparation_joins!(),
    " WHERE valid_ingredient_preparations.archived_on IS NULL AND valid_ingredients.archived_on IS NULL \
     AND valid_preparations.archived_on IS NULL AND valid_ingredient_preparations.id = $1)"
);

const GET_VALID_INGREDIENT_PREPARATION: &str = concat!(
    "SELECT ",
    valid_ingredient_preparation_columns!(),
    " FROM valid_ingredient_preparations",
    valid_ingredient_preparation_joins!(),
    " WHERE valid_ingredient_preparations.archived_on IS NULL AND valid_ingredients.archived_on IS NULL \
     AND valid_preparations.archived_on IS NULL AND valid_ingredient_preparations.id = $1"
);

const CREATE_VALID_INGREDIENT_PREPARATION: &str = "INSERT INTO valid_ingredient_preparations \
     (id, notes, valid_ingredient_id, valid_preparation_id, created_on) \
     VALUES ($1, $2, $3, $4, extract(epoch FROM NOW()))";

const UPDATE_VALID_INGREDIENT_PREPARATION: &str = "UPDATE valid_ingredient_preparations SET notes = $1, \
     valid_ingredient_id = $2, valid_preparation_id = $3, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $4";

const ARCHIVE_VALID_INGREDIENT_PREPARATION: &str = "UPDATE valid_ingredient_preparations \
     SET last_updated_on = extract(epoch FROM NOW()), archived_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidIngredientPreparation {
    pub id: String,
    pub notes: String,
    pub ingredient: ValidIngredient,
    pub preparation: ValidPreparation,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl ValidIngredientPreparation {
    fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            notes: cols.next()?,
            ingredient: ValidIngredient::scan(cols)?,
            preparation: ValidPreparation::scan(cols)?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "valid ingredient preparation"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidIngredientPreparationCreationInput {
    pub id: String,
    pub notes: String,
    pub valid_ingredient_id: String,
    pub valid_preparation_id: String,
}

/// Replacement values for an existing pairing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidIngredientPreparationUpdate {
    pub notes: String,
    pub valid_ingredient_id: String,
    pub valid_preparation_id: String,
}

impl From<&ValidIngredientPreparation> for ValidIngredientPreparationUpdate {
    fn from(pairing: &ValidIngredientPreparation) -> Self {
        Self {
            notes: pairing.notes.clone(),
            valid_ingredient_id: pairing.ingredient.id.clone(),
            valid_preparation_id: pairing.preparation.id.clone(),
        }
    }
}

fn pairing_list() -> ListQuery {
    ListQuery::new("valid_ingredient_preparations", valid_ingredient_preparation_columns!())
        .join(INGREDIENT_JOIN)
        .join(PREPARATION_JOIN)
        .where_null("valid_ingredients.archived_on")
        .where_null("valid_preparations.archived_on")
        .order_by("valid_ingredient_preparations.created_on, valid_ingredient_preparations.id")
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn valid_ingredient_preparation_exists(&self, pairing_id: &str) -> Result<bool> {
        require_id(pairing_id, "valid_ingredient_preparation_id")?;

        let query = sqlx::query(VALID_INGREDIENT_PREPARATION_EXISTS).bind(pairing_id);
        gateway::exists(&self.pool, "checking valid ingredient preparation existence", query).await
    }

    #[instrument(skip(self))]
    pub async fn get_valid_ingredient_preparation(&self, pairing_id: &str) -> Result<ValidIngredientPreparation> {
        require_id(pairing_id, "valid_ingredient_preparation_id")?;

        let query = sqlx::query(GET_VALID_INGREDIENT_PREPARATION).bind(pairing_id);
        get_one(
            &self.pool,
            "fetching valid ingredient preparation",
            "valid ingredient preparation",
            query,
            ValidIngredientPreparation::from_row,
        )
        .await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_ingredient_preparations(
        &self,
        filter: &QueryFilter,
    ) -> Result<ListResponse<ValidIngredientPreparation>> {
        let list = pairing_list().with_filter(filter);
        read_list(
            &self.pool,
            "fetching valid ingredient preparations",
            list,
            filter,
            ValidIngredientPreparation::scan,
        )
        .await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_ingredient_preparations_for_ingredient(
        &self,
        valid_ingredient_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<ValidIngredientPreparation>> {
        require_id(valid_ingredient_id, "valid_ingredient_id")?;

        let list = pairing_list()
            .where_eq("valid_ingredient_preparations.valid_ingredient_id", valid_ingredient_id)
            .with_filter(filter);
        read_list(
            &self.pool,
            "fetching valid ingredient preparations for ingredient",
            list,
            filter,
            ValidIngredientPreparation::scan,
        )
        .await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_ingredient_preparations_for_preparation(
        &self,
        valid_preparation_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<ValidIngredientPreparation>> {
        require_id(valid_preparation_id, "valid_preparation_id")?;

        let list = pairing_list()
            .where_eq("valid_ingredient_preparations.valid_preparation_id", valid_preparation_id)
            .with_filter(filter);
        read_list(
            &self.pool,
            "fetching valid ingredient preparations for preparation",
            list,
            filter,
            ValidIngredientPreparation::scan,
        )
        .await
    }

    #[instrument(skip(self, input), fields(valid_ingredient_preparation_id = %input.id))]
    pub async fn create_valid_ingredient_preparation(
        &self,
        input: &ValidIngredientPreparationCreationInput,
    ) -> Result<ValidIngredientPreparation> {
        require_id(&input.id, "valid_ingredient_preparation_id")?;
        require_id(&input.valid_ingredient_id, "valid_ingredient_id")?;
        require_id(&input.valid_preparation_id, "valid_preparation_id")?;

        let query = sqlx::query(CREATE_VALID_INGREDIENT_PREPARATION)
            .bind(&input.id)
            .bind(&input.notes)
            .bind(&input.valid_ingredient_id)
            .bind(&input.valid_preparation_id);
        gateway::write(&self.pool, "creating valid ingredient preparation", query).await?;

        info!("valid ingredient preparation created");
        self.get_valid_ingredient_preparation(&input.id).await
    }

    #[instrument(skip(self, update))]
    pub async fn update_valid_ingredient_preparation(
        &self,
        pairing_id: &str,
        update: &ValidIngredientPreparationUpdate,
    ) -> Result<()> {
        require_id(pairing_id, "valid_ingredient_preparation_id")?;
        require_id(&update.valid_ingredient_id, "valid_ingredient_id")?;
        require_id(&update.valid_preparation_id, "valid_preparation_id")?;

        let query = sqlx::query(UPDATE_VALID_INGREDIENT_PREPARATION)
            .bind(&update.notes)
            .bind(&update.valid_ingredient_id)
            .bind(&update.valid_preparation_id)
            .bind(pairing_id);
        gateway::write(&self.pool, "updating valid ingredient preparation", query).await?;

        info!("valid ingredient preparation updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn archive_valid_ingredient_preparation(&self, pairing_id: &str) -> Result<()> {
        require_id(pairing_id, "valid_ingredient_preparation_id")?;

        let query = sqlx::query(ARCHIVE_VALID_INGREDIENT_PREPARATION).bind(pairing_id);
        gateway::write(&self.pool, "archiving valid ingredient preparation", query).await?;

        info!("valid ingredient preparation archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::queriers::test_support::offline_querier;

    #[test]
    fn test_reads_hide_pairings_with_archived_sides() {
        assert!(GET_VALID_INGREDIENT_PREPARATION.contains("valid_ingredients.archived_on IS NULL"));
        assert!(GET_VALID_INGREDIENT_PREPARATION.contains("valid_preparations.archived_on IS NULL"));

        let sql = pairing_list()
            .where_eq("valid_ingredient_preparations.valid_ingredient_id", "i1")
            .build()
            .sql()
            .to_string();
        assert!(sql.contains(" JOIN valid_ingredients ON"));
        assert!(sql.contains("AND valid_preparations.archived_on IS NULL"));
        assert!(sql.contains("valid_ingredient_preparations.valid_ingredient_id = $"));
    }

    #[test]
    fn test_columns_cover_both_sides() {
        let columns = valid_ingredient_preparation_columns!();
        assert!(columns.starts_with("valid_ingredient_preparations.id, valid_ingredient_preparations.notes, "));
        assert!(columns.contains("valid_ingredients.restrict_to_preparations"));
        assert!(columns.contains("valid_preparations.icon_path"));
        assert!(columns.ends_with("valid_ingredient_preparations.archived_on"));
    }

    #[tokio::test]
    async fn test_create_requires_both_sides() {
        let querier = offline_querier();
        let input = ValidIngredientPreparationCreationInput {
            id: "p1".to_string(),
            valid_ingredient_id: "i1".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            querier.create_valid_ingredient_preparation(&input).await,
            Err(DatabaseError::InvalidId("valid_preparation_id"))
        ));
    }
}
