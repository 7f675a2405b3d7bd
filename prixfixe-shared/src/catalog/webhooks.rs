/// Webhook model and database operations
///
/// Webhooks let a household receive HTTP callbacks when data changes. Each
/// one names the events, data types and topics it cares about; those lists
/// are stored comma-joined.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE webhooks (
///     id TEXT PRIMARY KEY,
///     name TEXT NOT NULL,
///     content_type TEXT NOT NULL,
///     url TEXT NOT NULL,
///     method TEXT NOT NULL,
///     events TEXT NOT NULL DEFAULT '',
///     data_types TEXT NOT NULL DEFAULT '',
///     topics TEXT NOT NULL DEFAULT '',
///     belongs_to_household TEXT NOT NULL REFERENCES households (id) ON DELETE CASCADE,
///     created_on BIGINT NOT NULL DEFAULT extract(epoch FROM NOW()),
///     last_updated_on BIGINT,
///     archived_on BIGINT
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use prixfixe_shared::catalog::webhooks::WebhookCreationInput;
/// use prixfixe_shared::identifiers::new_id;
/// use prixfixe_shared::Querier;
///
/// # async fn example(querier: Querier, household_id: String) -> Result<(), Box<dyn std::error::Error>> {
/// let webhook = querier
///     .create_webhook(&WebhookCreationInput {
///         id: new_id(),
///         name: "meal plan updates".to_string(),
///         content_type: "application/json".to_string(),
///         url: "https://example.com/hooks/prixfixe".to_string(),
///         method: "POST".to_string(),
///         events: vec!["meal_plan.created".to_string()],
///         data_types: vec!["meal_plan".to_string()],
///         topics: vec![],
///         belongs_to_household: household_id,
///     })
///     .await?;
///
/// assert_eq!(webhook.events, vec!["meal_plan.created".to_string()]);
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use tracing::{info, instrument};
use validator::Validate;

use super::get_one;
use crate::db::gateway;
use crate::db::mapper::{join_list, Columns};
use crate::db::query_builder::{ListQuery, ListResponse, QueryFilter};
use crate::error::{require_id, Result};
use crate::queriers::{read_list, Querier};

macro_rules! webhook_columns {
    () => {
        "webhooks.id, webhooks.name, webhooks.content_type, webhooks.url, webhooks.method, \
         webhooks.events, webhooks.data_types, webhooks.topics, webhooks.belongs_to_household, \
         webhooks.created_on, webhooks.last_updated_on, webhooks.archived_on"
    };
}

const WEBHOOK_EXISTS: &str = "SELECT EXISTS (SELECT webhooks.id FROM webhooks \
     WHERE webhooks.archived_on IS NULL AND webhooks.belongs_to_household = $1 AND webhooks.id = $2)";

const GET_WEBHOOK: &str = concat!(
    "SELECT ",
    webhook_columns!(),
    " FROM webhooks WHERE webhooks.archived_on IS NULL \
     AND webhooks.belongs_to_household = $1 AND webhooks.id = $2"
);

const CREATE_WEBHOOK: &str = "INSERT INTO webhooks \
     (id, name, content_type, url, method, events, data_types, topics, belongs_to_household, created_on) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, extract(epoch FROM NOW()))";

const ARCHIVE_WEBHOOK: &str = "UPDATE webhooks SET last_updated_on = extract(epoch FROM NOW()), \
     archived_on = extract(epoch FROM NOW()) \
     WHERE archived_on IS NULL AND belongs_to_household = $1 AND id = $2";

/// An HTTP callback registered by a household
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub method: String,
    pub events: Vec<String>,
    pub data_types: Vec<String>,
    pub topics: Vec<String>,
    pub belongs_to_household: String,
    pub created_on: u64,
    pub last_updated_on: Option<u64>,
    pub archived_on: Option<u64>,
}

impl Webhook {
    pub(crate) fn scan(cols: &mut Columns<'_>) -> Result<Self> {
        Ok(Self {
            id: cols.next()?,
            name: cols.next()?,
            content_type: cols.next()?,
            url: cols.next()?,
            method: cols.next()?,
            events: cols.list()?,
            data_types: cols.list()?,
            topics: cols.list()?,
            belongs_to_household: cols.next()?,
            created_on: cols.epoch()?,
            last_updated_on: cols.optional_epoch()?,
            archived_on: cols.optional_epoch()?,
        })
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Self::scan(&mut Columns::new(row, "webhook"))
    }
}

/// Input for registering a webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct WebhookCreationInput {
    pub id: String,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub content_type: String,
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1))]
    pub method: String,
    pub events: Vec<String>,
    pub data_types: Vec<String>,
    pub topics: Vec<String>,
    pub belongs_to_household: String,
}

impl Querier {
    #[instrument(skip(self))]
    pub async fn webhook_exists(&self, webhook_id: &str, household_id: &str) -> Result<bool> {
        require_id(webhook_id, "webhook_id")?;
        require_id(household_id, "household_id")?;

        let query = sqlx::query(WEBHOOK_EXISTS).bind(household_id).bind(webhook_id);
        gateway::exists(&self.pool, "checking webhook existence", query).await
    }

    #[instrument(skip(self))]
    pub async fn get_webhook(&self, webhook_id: &str, household_id: &str) -> Result<Webhook> {
        require_id(webhook_id, "webhook_id")?;
        require_id(household_id, "household_id")?;

        let query = sqlx::query(GET_WEBHOOK).bind(household_id).bind(webhook_id);
        get_one(&self.pool, "fetching webhook", "webhook", query, Webhook::from_row).await
    }

    #[instrument(skip(self, filter))]
    pub async fn get_webhooks(&self, household_id: &str, filter: &QueryFilter) -> Result<ListResponse<Webhook>> {
        require_id(household_id, "household_id")?;

        let list = ListQuery::new("webhooks", webhook_columns!())
            .owned_by("webhooks.belongs_to_household", household_id, false)
            .order_by("webhooks.created_on")
            .with_filter(filter);
        read_list(&self.pool, "fetching webhooks", list, filter, Webhook::scan).await
    }

    #[instrument(skip(self, input), fields(webhook_id = %input.id, household_id = %input.belongs_to_household))]
    pub async fn create_webhook(&self, input: &WebhookCreationInput) -> Result<Webhook> {
        require_id(&input.id, "webhook_id")?;
        require_id(&input.belongs_to_household, "household_id")?;
        input.validate()?;

        let query = sqlx::query(CREATE_WEBHOOK)
            .bind(&input.id)
            .bind(&input.name)
            .bind(&input.content_type)
            .bind(&input.url)
            .bind(&input.method)
            .bind(join_list(&input.events))
            .bind(join_list(&input.data_types))
            .bind(join_list(&input.topics))
            .bind(&input.belongs_to_household);
        gateway::write(&self.pool, "creating webhook", query).await?;

        info!("webhook created");
        self.get_webhook(&input.id, &input.belongs_to_household).await
    }

    #[instrument(skip(self))]
    pub async fn archive_webhook(&self, webhook_id: &str, household_id: &str) -> Result<()> {
        require_id(webhook_id, "webhook_id")?;
        require_id(household_id, "household_id")?;

        let query = sqlx::query(ARCHIVE_WEBHOOK).bind(household_id).bind(webhook_id);
        gateway::write(&self.pool, "archiving webhook", query).await?;

        info!("webhook archived");
        Ok(())
    }
}
