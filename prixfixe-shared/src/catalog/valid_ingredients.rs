/// Valid ingredients
///
/// Ingredient vocabulary with allergen and diet flags. `(name, variant)` is
/// unique among live rows.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};
use validator::Validate;

use super::get_one;
use crate::db::gateway::{self, PgQuery};
use crate::db::mapper::Columns;
use crate::db::query_builder::{wrap_query_for_ilike, ListQuery, ListResponse, QueryFilter, SEARCH_LIMIT};
use crate::error::{require_id, require_non_empty, Result};
use crate::queriers::{read_list, Querier};

macro_rules! valid_ingredient_columns {
    () => {
        "valid_ingredients.id, valid_ingredients.name, valid_ingredients.variant, \
         valid_ingredients.description, valid_ingredients.warning, valid_ingredients.contains_egg, \
         valid_ingredients.contains_dairy, valid_ingredients.contains_peanut, \
         valid_ingredients.contains_tree_nut, valid_ingredients.contains_soy, \
         valid_ingredients.contains_wheat, valid_ingredients.contains_shellfish, \
         valid_ingredients.contains_sesame, valid_ingredients.contains_fish, \
         valid_ingredients.contains_gluten, valid_ingredients.animal_flesh, \
         valid_ingredients.animal_derived, valid_ingredients.volumetric, \
         valid_ingredients.restrict_to_preparations, valid_ingredients.icon_path, \
         valid_ingredients.created_on, valid_ingredients.last_updated_on, valid_ingredients.archived_on"
    };
}
pub(crate) use valid_ingredient_columns;

const VALID_INGREDIENT_EXISTS: &str = "SELECT EXISTS (SELECT valid_ingredients.id FROM valid_ingredients \
     WHERE valid_ingredients.archived_on IS NULL AND valid_ingredients.id = $1)";

const GET_VALID_INGREDIENT: &str = concat!(
    "SELECT ",
    valid_ingredient_columns!(),
    " FROM valid_ingredients WHERE valid_ingredients.archived_on IS NULL AND valid_ingredients.id = $1"
);

const GET_RANDOM_VALID_INGREDIENT: &str = concat!(
    "SELECT ",
    valid_ingredient_columns!(),
    " FROM valid_ingredients WHERE valid_ingredients.archived_on IS NULL ORDER BY random() LIMIT 1"
);

const SEARCH_FOR_VALID_INGREDIENTS: &str = concat!(
    "SELECT ",
    valid_ingredient_columns!(),
    " FROM valid_ingredients WHERE valid_ingredients.archived_on IS NULL \
     AND valid_ingredients.name ILIKE $1 LIMIT $2"
);

const CREATE_VALID_INGREDIENT: &str = "INSERT INTO valid_ingredients \
     (id, name, variant, description, warning, contains_egg, contains_dairy, contains_peanut, \
     contains_tree_nut, contains_soy, contains_wheat, contains_shellfish, contains_sesame, \
     contains_fish, contains_gluten, animal_flesh, animal_derived, volumetric, \
     restrict_to_preparations, icon_path, created_on) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, \
     extract(epoch FROM NOW()))";

const UPDATE_VALID_INGREDIENT: &str = "UPDATE valid_ingredients SET name = $2, variant = $3, \
     description = $4, warning = $5, contains_egg = $6, contains_dairy = $7, contains_peanut = $8, \
     contains_tree_nut = $9, contains_soy = $10, contains_wheat = $11, contains_shellfish = $12, \
     contains_sesame = $13, contains_fish = $14, contains_gluten = $15, animal_flesh = $16, \
     animal_derived = $17, volumetric = $18, restrict_to_preparations = $19, icon_path = $20, \
     last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $1";

const ARCHIVE_VALID_INGREDIENT: &str = "UPDATE valid_ingredients SET last_updated_on = extract(epoch FROM NOW()), \
     archived_on = extract(epoch FROM NOW()) WHERE archived_on IS NULL AND id = $1";

/// Allergen and diet markers carried by every ingredient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientFlags {
    pub contains_egg: bool,
    pub contains_dairy: bool,
    pub contains_peanut: bool,
    pub contains_tree_nut: bool,
    pub contains_soy: bool,
    pub contains_wheat: bool,
    pub contains_shellfish: bool,
    pub contains_sesame: bool,
    pub contains_fish: bool,
    pub contains_gluten: bool,
    pub animal_flesh: bool,
    pub animal_derived: bool,
    pub volumetric: bool,
    pub restrict_to_preparations: bool,
}

impl IngredientFlags {
    fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            contains_egg: cols.next()?,
            contains_dairy: cols.next()?,
            contains_peanut: cols.next()?,
            contains_tree_nut: cols.next()?,
            contains_soy: cols.next()?,
            contains_wheat: cols.next()?,
            contains_shellfish: cols.next()?,
            contains_sesame: cols.next()?,
            contains_fish: cols.next()?,
            contains_gluten: cols.next()?,
            animal_flesh: cols.next()?,
            animal_derived: cols.next()?,
            volumetric: cols.next()?,
            restrict_to_preparations: cols.next()?,
        })
    }

    /// Binds the flags in column order
    fn bind<'q>(&self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.contains_egg)
            .bind(self.contains_dairy)
            .bind(self.contains_peanut)
            .bind(self.contains_tree_nut)
            .bind(self.contains_soy)
            .bind(self.contains_wheat)
            .bind(self.contains_shellfish)
            .bind(self.contains_sesame)
            .bind(self.contains_fish)
            .bind(self.contains_gluten)
            .bind(self.animal_flesh)
            .bind(self.animal_derived)
            .bind(self.volumetric)
            .bind(self.restrict_to_preparations)
    }

    /// True when none of the common allergens are present
    pub fn is_allergen_free(&self) -> bool {
        !(self.contains_egg
            || self.contains_dairy
            || self.contains_peanut
            || self.contains_tree_nut
            || self.contains_soy
            || self.contains_wheat
            || self.contains_shellfish
            || self.contains_sesame
            || self.contains_fish
            || self.contains_gluten)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidIngredient {
    pub id: String,
    pub name: String,
    pub variant: String,
    pub description: String,
    pub warning: String,
    #[serde(flatten)]
    pub flags: IngredientFlags,
    pub icon_path: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl ValidIngredient {
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            name: cols.next()?,
            variant: cols.next()?,
            description: cols.next()?,
            warning: cols.next()?,
            flags: IngredientFlags::scan(cols)?,
            icon_path: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "valid ingredient"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ValidIngredientCreationInput {
    pub id: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub variant: String,
    pub description: String,
    pub warning: String,
    #[serde(flatten)]
    pub flags: IngredientFlags,
    pub icon_path: String,
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn valid_ingredient_exists(&self, valid_ingredient_id: &str) -> Result<bool> {
        require_id(valid_ingredient_id, "valid_ingredient_id")?;

        let query = sqlx::query(VALID_INGREDIENT_EXISTS).bind(valid_ingredient_id);
        gateway::exists(&self.pool, "checking valid ingredient existence", query).await
    }

    #[instrument(skip(self))]
    pub async fn get_valid_ingredient(&self, valid_ingredient_id: &str) -> Result<ValidIngredient> {
        require_id(valid_ingredient_id, "valid_ingredient_id")?;

        let query = sqlx::query(GET_VALID_INGREDIENT).bind(valid_ingredient_id);
        get_one(&self.pool, "fetching valid ingredient", "valid ingredient", query, ValidIngredient::from_row).await
    }

    #[instrument(skip(self))]
    pub async fn get_random_valid_ingredient(&self) -> Result<ValidIngredient> {
        let query = sqlx::query(GET_RANDOM_VALID_INGREDIENT);
        get_one(
            &self.pool,
            "fetching random valid ingredient",
            "valid ingredient",
            query,
            ValidIngredient::from_row,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn search_for_valid_ingredients(&self, query: &str) -> Result<Vec<ValidIngredient>> {
        require_non_empty(query, "query")?;

        let query = sqlx::query(SEARCH_FOR_VALID_INGREDIENTS)
            .bind(wrap_query_for_ilike(query))
            .bind(SEARCH_LIMIT);
        gateway::read_rows(&self.pool, "searching valid ingredients", query, ValidIngredient::from_row).await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_ingredients(&self, filter: &QueryFilter) -> Result<ListResponse<ValidIngredient>> {
        let list = ListQuery::new("valid_ingredients", valid_ingredient_columns!())
            .order_by("valid_ingredients.name, valid_ingredients.variant")
            .with_filter(filter);
        read_list(&self.pool, "fetching valid ingredients", list, filter, ValidIngredient::scan).await
    }

    #[instrument(skip(self, input), fields(valid_ingredient_id = %input.id))]
    pub async fn create_valid_ingredient(&self, input: &ValidIngredientCreationInput) -> Result<ValidIngredient> {
        require_id(&input.id, "valid_ingredient_id")?;
        input.validate()?;

        let query = sqlx::query(CREATE_VALID_INGREDIENT)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.variant)
            .bind(&input.description)
            .bind(&input.warning);
        let query = input.flags.bind(query).bind(&input.icon_path);
        gateway::write(&self.pool, "creating valid ingredient", query).await?;

        info!("valid ingredient created");
        self.get_valid_ingredient(&input.id).await
    }

    #[instrument(skip(self, updated), fields(valid_ingredient_id = %updated.id))]
    pub async fn update_valid_ingredient(&self, updated: &ValidIngredient) -> Result<()> {
        require_id(&updated.id, "valid_ingredient_id")?;
        require_non_empty(&updated.name, "name")?;

        let query = sqlx::query(UPDATE_VALID_INGREDIENT)
            .bind(&updated.id)
            .bind(&updated.name)
            .bind(&updated.variant)
            .bind(&updated.description)
            .bind(&updated.warning);
        let query = updated.flags.bind(query).bind(&updated.icon_path);
        gateway::write(&self.pool, "updating valid ingredient", query).await?;

        info!("valid ingredient updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn archive_valid_ingredient(&self, valid_ingredient_id: &str) -> Result<()> {
        require_id(valid_ingredient_id, "valid_ingredient_id")?;

        let query = sqlx::query(ARCHIVE_VALID_INGREDIENT).bind(valid_ingredient_id);
        gateway::write(&self.pool, "archiving valid ingredient", query).await?;

        info!("valid ingredient archived");
        Ok(())
    }
}
