/// Valid instruments
///
/// The shared vocabulary of kitchen tools recipes may call for. Rows are
/// global rather than household-scoped; `(name, variant)` is unique among
/// live rows.

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

macro_rules! valid_instrument_columns {
    () => {
        "valid_instruments.id, valid_instruments.name, valid_instruments.variant, \
         valid_instruments.description, valid_instruments.icon_path, valid_instruments.created_on, \
         valid_instruments.last_updated_on, valid_instruments.archived_on"
    };
}
pub(crate) use valid_instrument_columns;

const VALID_INSTRUMENT_EXISTS: &str = "SELECT EXISTS (SELECT valid_instruments.id FROM valid_instruments \
     WHERE valid_instruments.archived_on IS NULL AND valid_instruments.id = $1)";

const GET_VALID_INSTRUMENT: &str = concat!(
    "SELECT ",
    valid_instrument_columns!(),
    " FROM valid_instruments WHERE valid_instruments.archived_on IS NULL AND valid_instruments.id = $1"
);

const GET_RANDOM_VALID_INSTRUMENT: &str = concat!(
    "SELECT ",
    valid_instrument_columns!(),
    " FROM valid_instruments WHERE valid_instruments.archived_on IS NULL ORDER BY random() LIMIT 1"
);

const SEARCH_FOR_VALID_INSTRUMENTS: &str = concat!(
    "SELECT ",
    valid_instrument_columns!(),
    " FROM valid_instruments WHERE valid_instruments.archived_on IS NULL \
     AND valid_instruments.name ILIKE $1 LIMIT $2"
);

const CREATE_VALID_INSTRUMENT: &str = "INSERT INTO valid_instruments \
     (id, name, variant, description, icon_path, created_on) \
     VALUES ($1, $2, $3, $4, $5, extract(epoch FROM NOW()))";

const UPDATE_VALID_INSTRUMENT: &str = "UPDATE valid_instruments SET name = $1, variant = $2, \
     description = $3, icon_path = $4, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $5";

const ARCHIVE_VALID_INSTRUMENT: &str = "UPDATE valid_instruments SET last_updated_on = extract(epoch FROM NOW()), \
     archived_on = extract(epoch FROM NOW()) WHERE archived_on IS NULL AND id = $1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidInstrument {
    pub id: String,
    pub name: String,
    pub variant: String,
    pub description: String,
    pub icon_path: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl ValidInstrument {
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            name: cols.next()?,
            variant: cols.next()?,
            description: cols.next()?,
            icon_path: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "valid instrument"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ValidInstrumentCreationInput {
    pub id: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub variant: String,
    pub description: String,
    pub icon_path: String,
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn valid_instrument_exists(&self, valid_instrument_id: &str) -> Result<bool> {
        require_id(valid_instrument_id, "valid_instrument_id")?;

        let query = sqlx::query(VALID_INSTRUMENT_EXISTS).bind(valid_instrument_id);
        gateway::exists(&self.pool, "checking valid instrument existence", query).await
    }

    #[instrument(skip(self))]
    pub async fn get_valid_instrument(&self, valid_instrument_id: &str) -> Result<ValidInstrument> {
        require_id(valid_instrument_id, "valid_instrument_id")?;

        let query = sqlx::query(GET_VALID_INSTRUMENT).bind(valid_instrument_id);
        get_one(&self.pool, "fetching valid instrument", "valid instrument", query, ValidInstrument::from_row).await
    }

    #[instrument(skip(self))]
    pub async fn get_random_valid_instrument(&self) -> Result<ValidInstrument> {
        let query = sqlx::query(GET_RANDOM_VALID_INSTRUMENT);
        get_one(
            &self.pool,
            "fetching random valid instrument",
            "valid instrument",
            query,
            ValidInstrument::from_row,
        )
        .await
    }

    /// Case-insensitive substring match on name
    #[instrument(skip(self))]
    pub async fn search_for_valid_instruments(&self, query: &str) -> Result<Vec<ValidInstrument>> {
        require_non_empty(query, "query")?;

        let query = sqlx::query(SEARCH_FOR_VALID_INSTRUMENTS)
            .bind(wrap_query_for_ilike(query))
            .bind(SEARCH_LIMIT);
        gateway::read_rows(&self.pool, "searching valid instruments", query, ValidInstrument::from_row).await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_instruments(&self, filter: &QueryFilter) -> Result<ListResponse<ValidInstrument>> {
        let list = ListQuery::new("valid_instruments", valid_instrument_columns!())
            .order_by("valid_instruments.name, valid_instruments.variant")
            .with_filter(filter);
        read_list(&self.pool, "fetching valid instruments", list, filter, ValidInstrument::scan).await
    }

    #[instrument(skip(self, input), fields(valid_instrument_id = %input.id))]
    pub async fn create_valid_instrument(&self, input: &ValidInstrumentCreationInput) -> Result<ValidInstrument> {
        require_id(&input.id, "valid_instrument_id")?;
        input.validate()?;

        let query = sqlx::query(CREATE_VALID_INSTRUMENT)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.variant)
            .bind(&input.description)
            .bind(&input.icon_path);
        gateway::write(&self.pool, "creating valid instrument", query).await?;

        info!("valid instrument created");
        self.get_valid_instrument(&input.id).await
    }

    /// Persists the descriptive fields of an existing instrument
    #[instrument(skip(self, updated), fields(valid_instrument_id = %updated.id))]
    pub async fn update_valid_instrument(&self, updated: &ValidInstrument) -> Result<()> {
        require_id(&updated.id, "valid_instrument_id")?;
        require_non_empty(&updated.name, "name")?;

        let query = sqlx::query(UPDATE_VALID_INSTRUMENT)
            .bind(&updated.name)
            .bind(&updated.variant)
            .bind(&updated.description)
            .bind(&updated.icon_path)
            .bind(&updated.id);
        gateway::write(&self.pool, "updating valid instrument", query).await?;

        info!("valid instrument updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn archive_valid_instrument(&self, valid_instrument_id: &str) -> Result<()> {
        require_id(valid_instrument_id, "valid_instrument_id")?;

        let query = sqlx::query(ARCHIVE_VALID_INSTRUMENT).bind(valid_instrument_id);
        gateway::write(&self.pool, "archiving valid instrument", query).await?;

        info!("valid instrument archived");
        Ok(())
    }
}
