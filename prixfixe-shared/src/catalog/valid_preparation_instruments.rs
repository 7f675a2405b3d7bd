/// Valid preparation instruments
///
/// Which instruments a preparation can be performed with. Reads join the
/// preparation and the instrument.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};

use super::get_one;
use super::valid_instruments::{valid_instrument_columns, ValidInstrument};
use super::valid_preparations::{valid_preparation_columns, ValidPreparation};
use crate::db::gateway;
use crate::db::mapper::Columns;
use crate::db::query_builder::{ListQuery, ListResponse, QueryFilter};
use crate::error::{require_id, Result};
use crate::queriers::{read_list, Querier};

macro_rules! valid_preparation_instrument_columns {
    () => {
        concat!(
            "valid_preparation_instruments.id, valid_preparation_instruments.notes, ",
            valid_preparation_columns!(),
            ", ",
            valid_instrument_columns!(),
            ", valid_preparation_instruments.created_on, valid_preparation_instruments.last_updated_on, \
             valid_preparation_instruments.archived_on"
        )
    };
}

const PREPARATION_JOIN: &str =
    "valid_preparations ON valid_preparations.id = valid_preparation_instruments.valid_preparation_id";
const INSTRUMENT_JOIN: &str =
    "valid_instruments ON valid_instruments.id = valid_preparation_instruments.valid_instrument_id";

const VALID_PREPARATION_INSTRUMENT_EXISTS: &str = "SELECT EXISTS (SELECT valid_preparation_instruments.id \
     FROM valid_preparation_instruments \
     JOIN valid_preparations ON valid_preparations.id = valid_preparation_instruments.valid_preparation_id \
     JOIN valid_instruments ON valid_instruments.id = valid_preparation_instruments.valid_instrument_id \
     WHERE valid_preparation_instruments.archived_on IS NULL AND valid_preparations.archived_on IS NULL \
     AND valid_instruments.archived_on IS NULL AND valid_preparation_instruments.id = $1)";

const GET_VALID_PREPARATION_INSTRUMENT: &str = concat!(
    "SELECT ",
    valid_preparation_instrument_columns!(),
    " FROM valid_preparation_instruments \
     JOIN valid_preparations ON valid_preparations.id = valid_preparation_instruments.valid_preparation_id \
     JOIN valid_instruments ON valid_instruments.id = valid_preparation_instruments.valid_instrument_id \
     WHERE valid_preparation_instruments.archived_on IS NULL AND valid_preparations.archived_on IS NULL \
     AND valid_instruments.archived_on IS NULL AND valid_preparation_instruments.id = $1"
);

const CREATE_VALID_PREPARATION_INSTRUMENT: &str = "INSERT INTO valid_preparation_instruments \
     (id, notes, valid_preparation_id, valid_instrument_id, created_on) \
     VALUES ($1, $2, $3, $4, extract(epoch FROM NOW()))";

const UPDATE_VALID_PREPARATION_INSTRUMENT: &str = "UPDATE valid_preparation_instruments SET notes = $1, \
     valid_preparation_id = $2, valid_instrument_id = $3, last_updated_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $4";

const ARCHIVE_VALID_PREPARATION_INSTRUMENT: &str = "UPDATE valid_preparation_instruments \
     SET last_updated_on = extract(epoch FROM NOW()), archived_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND id = $1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidPreparationInstrument {
    pub id: String,
    pub notes: String,
    pub preparation: ValidPreparation,
    pub instrument: ValidInstrument,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl ValidPreparationInstrument {
    fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            notes: cols.next()?,
            preparation: ValidPreparation::scan(cols)?,
            instrument: ValidInstrument::scan(cols)?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "valid preparation instrument"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidPreparationInstrumentCreationInput {
    pub id: String,
    pub notes: String,
    pub valid_preparation_id: String,
    pub valid_instrument_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidPreparationInstrumentUpdate {
    pub notes: String,
    pub valid_preparation_id: String,
    pub valid_instrument_id: String,
}

impl From<&ValidPreparationInstrument> for ValidPreparationInstrumentUpdate {
    fn from(pairing: &ValidPreparationInstrument) -> Self {
        Self {
            notes: pairing.notes.clone(),
            valid_preparation_id: pairing.preparation.id.clone(),
            valid_instrument_id: pairing.instrument.id.clone(),
        }
    }
}

fn pairing_list() -> ListQuery {
    ListQuery::new("valid_preparation_instruments", valid_preparation_instrument_columns!())
        .join(PREPARATION_JOIN)
        .join(INSTRUMENT_JOIN)
        .where_null("valid_preparations.archived_on")
        .where_null("valid_instruments.archived_on")
        .order_by("valid_preparation_instruments.created_on, valid_preparation_instruments.id")
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn valid_preparation_instrument_exists(&self, pairing_id: &str) -> Result<bool> {
        require_id(pairing_id, "valid_preparation_instrument_id")?;

        let query = sqlx::query(VALID_PREPARATION_INSTRUMENT_EXISTS).bind(pairing_id);
        gateway::exists(&self.pool, "checking valid preparation instrument existence", query).await
    }

    #[instrument(skip(self))]
    pub async fn get_valid_preparation_instrument(&self, pairing_id: &str) -> Result<ValidPreparationInstrument> {
        require_id(pairing_id, "valid_preparation_instrument_id")?;

        let query = sqlx::query(GET_VALID_PREPARATION_INSTRUMENT).bind(pairing_id);
        get_one(
            &self.pool,
            "fetching valid preparation instrument",
            "valid preparation instrument",
            query,
            ValidPreparationInstrument::from_row,
        )
        .await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_preparation_instruments(
        &self,
        filter: &QueryFilter,
    ) -> Result<ListResponse<ValidPreparationInstrument>> {
        let list = pairing_list().with_filter(filter);
        read_list(
            &self.pool,
            "fetching valid preparation instruments",
            list,
            filter,
            ValidPreparationInstrument::scan,
        )
        .await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_preparation_instruments_for_preparation(
        &self,
        valid_preparation_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<ValidPreparationInstrument>> {
        require_id(valid_preparation_id, "valid_preparation_id")?;

        let list = pairing_list()
            .where_eq("valid_preparation_instruments.valid_preparation_id", valid_preparation_id)
            .with_filter(filter);
        read_list(
            &self.pool,
            "fetching valid preparation instruments for preparation",
            list,
            filter,
            ValidPreparationInstrument::scan,
        )
        .await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_valid_preparation_instruments_for_instrument(
        &self,
        valid_instrument_id: &str,
        filter: &QueryFilter,
    ) -> Result<ListResponse<ValidPreparationInstrument>> {
        require_id(valid_instrument_id, "valid_instrument_id")?;

        let list = pairing_list()
            .where_eq("valid_preparation_instruments.valid_instrument_id", valid_instrument_id)
            .with_filter(filter);
        read_list(
            &self.pool,
            "fetching valid preparation instruments for instrument",
            list,
            filter,
            ValidPreparationInstrument::scan,
        )
        .await
    }

    #[instrument(skip(self, input), fields(valid_preparation_instrument_id = %input.id))]
    pub async fn create_valid_preparation_instrument(
        &self,
        input: &ValidPreparationInstrumentCreationInput,
    ) -> Result<ValidPreparationInstrument> {
        require_id(&input.id, "valid_preparation_instrument_id")?;
        require_id(&input.valid_preparation_id, "valid_preparation_id")?;
        require_id(&input.valid_instrument_id, "valid_instrument_id")?;

        let query = sqlx::query(CREATE_VALID_PREPARATION_INSTRUMENT)
            .bind(&input.id)
            .bind(&input.notes)
            .bind(&input.valid_preparation_id)
            .bind(&input.valid_instrument_id);
        gateway::write(&self.pool, "creating valid preparation instrument", query).await?;

        info!("valid preparation instrument created");
        self.get_valid_preparation_instrument(&input.id).await
    }

    #[instrument(skip(self, update))]
    pub async fn update_valid_preparation_instrument(
        &self,
        pairing_id: &str,
        update: &ValidPreparationInstrumentUpdate,
    ) -> Result<()> {
        require_id(pairing_id, "valid_preparation_instrument_id")?;
        require_id(&update.valid_preparation_id, "valid_preparation_id")?;
        require_id(&update.valid_instrument_id, "valid_instrument_id")?;

        let query = sqlx::query(UPDATE_VALID_PREPARATION_INSTRUMENT)
            .bind(&update.notes)
            .bind(&update.valid_preparation_id)
            .bind(&update.valid_instrument_id)
            .bind(pairing_id);
        gateway::write(&self.pool, "updating valid preparation instrument", query).await?;

        info!("valid preparation instrument updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn archive_valid_preparation_instrument(&self, pairing_id: &str) -> Result<()> {
        require_id(pairing_id, "valid_preparation_instrument_id")?;

        let query = sqlx::query(ARCHIVE_VALID_PREPARATION_INSTRUMENT).bind(pairing_id);
        gateway::write(&self.pool, "archiving valid preparation instrument", query).await?;

        info!("valid preparation instrument archived");
        Ok(())
    }
}
