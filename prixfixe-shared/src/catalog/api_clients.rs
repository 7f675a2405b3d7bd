/// API client credentials
///
/// An API client is a `client_id`/secret pair a user issues for programmatic
/// access. The secret arrives already generated and is stored as raw bytes;
/// it is never serialized.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE api_clients (
///     id TEXT PRIMARY KEY,
///     name TEXT NOT NULL DEFAULT '',
///     client_id TEXT NOT NULL,
///     secret_key BYTEA NOT NULL,
///     belongs_to_user TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
///     created_on BIGINT NOT NULL DEFAULT extract(epoch FROM NOW()),
///     last_updated_on BIGINT,
///     archived_on BIGINT
/// );
/// ```

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};

use super::get_one;
use crate::db::gateway;
use crate::db::mapper::Columns;
use crate::db::query_builder::{ListQuery, ListResponse, QueryFilter};
use crate::error::{require_id, require_non_empty, DatabaseError, Result};
use crate::queriers::{read_list, Querier};

macro_rules! api_client_columns {
    () => {
        "api_clients.id, api_clients.name, api_clients.client_id, api_clients.secret_key, \
         api_clients.belongs_to_user, api_clients.created_on, api_clients.last_updated_on, \
         api_clients.archived_on"
    };
}

const GET_API_CLIENT_BY_CLIENT_ID: &str = concat!(
    "SELECT ",
    api_client_columns!(),
    " FROM api_clients WHERE api_clients.archived_on IS NULL AND api_clients.client_id = $1"
);

const GET_API_CLIENT_BY_DATABASE_ID: &str = concat!(
    "SELECT ",
    api_client_columns!(),
    " FROM api_clients WHERE api_clients.archived_on IS NULL \
     AND api_clients.belongs_to_user = $1 AND api_clients.id = $2"
);

const CREATE_API_CLIENT: &str = "INSERT INTO api_clients \
     (id, name, client_id, secret_key, belongs_to_user, created_on) \
     VALUES ($1, $2, $3, $4, $5, extract(epoch FROM NOW()))";

const ARCHIVE_API_CLIENT: &str = "UPDATE api_clients SET last_updated_on = extract(epoch FROM NOW()), \
     archived_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_user = $1 AND id = $2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiClient {
    pub id: String,
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub client_secret: Vec<u8>,
    pub belongs_to_user: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl ApiClient {
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            name: cols.next()?,
            client_id: cols.next()?,
            client_secret: cols.next()?,
            belongs_to_user: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "api client"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiClientCreationInput {
    pub id: String,
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: Vec<u8>,
    pub belongs_to_user: String,
}

impl Querier {
    /// Looks up a live client by its public client id
    #[instrument(skip(self))]
    pub async fn get_api_client_by_client_id(&self, client_id: &str) -> Result<ApiClient> {
        require_non_empty(client_id, "client_id")?;

        let query = sqlx::query(GET_API_CLIENT_BY_CLIENT_ID).bind(client_id);
        get_one(&self.pool, "fetching api client by client id", "api client", query, ApiClient::from_row).await
    }

    #[instrument(skip(self))]
    pub async fn get_api_client_by_database_id(&self, api_client_id: &str, user_id: &str) -> Result<ApiClient> {
        require_id(api_client_id, "api_client_id")?;
        require_id(user_id, "user_id")?;

        let query = sqlx::query(GET_API_CLIENT_BY_DATABASE_ID)
            .bind(user_id)
            .bind(api_client_id);
        get_one(&self.pool, "fetching api client by id", "api client", query, ApiClient::from_row).await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_api_clients(&self, user_id: &str, filter: &QueryFilter) -> Result<ListResponse<ApiClient>> {
        require_id(user_id, "user_id")?;

        let list = ListQuery::new("api_clients", api_client_columns!())
            .owned_by("api_clients.belongs_to_user", user_id, false)
            .order_by("api_clients.created_on")
            .with_filter(filter);
        read_list(&self.pool, "fetching api clients", list, filter, ApiClient::scan).await
    }

    #[instrument(skip(self, input), fields(api_client_id = %input.id, user_id = %input.belongs_to_user))]
    pub async fn create_api_client(&self, input: &ApiClientCreationInput) -> Result<ApiClient> {
        require_id(&input.id, "api_client_id")?;
        require_id(&input.belongs_to_user, "user_id")?;
        require_non_empty(&input.client_id, "client_id")?;
        if input.client_secret.is_empty() {
            return Err(DatabaseError::EmptyInput("client_secret"));
        }

        let query = sqlx::query(CREATE_API_CLIENT)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.client_id)
            .bind(&input.client_secret)
            .bind(&input.belongs_to_user);
        gateway::write(&self.pool, "creating api client", query).await?;

        info!("api client created");
        self.get_api_client_by_database_id(&input.id, &input.belongs_to_user).await
    }

    #[instrument(skip(self))]
    pub async fn archive_api_client(&self, api_client_id: &str, user_id: &str) -> Result<()> {
        require_id(api_client_id, "api_client_id")?;
        require_id(user_id, "user_id")?;

        let query = sqlx::query(ARCHIVE_API_CLIENT).bind(user_id).bind(api_client_id);
        gateway::write(&self.pool, "archiving api client", query).await?;

        info!("api client archived");
        Ok(())
    }
}
