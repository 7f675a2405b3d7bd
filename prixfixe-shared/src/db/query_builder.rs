/// Paginated list queries
///
/// [`ListQuery`] composes one parameterised `SELECT` over a table with
/// optional joins, equality conditions, an ownership scope, the
/// created/updated windows and paging from a [`QueryFilter`], and two trailing
/// scalar subqueries:
///
/// - `filtered_count`: rows matching every condition and window
/// - `total_count`: non-archived rows in the same ownership scope
///
/// Both counts are the last two columns of every returned row.
///
/// # Example
///
/// ```
/// use prixfixe_shared::db::query_builder::{ListQuery, QueryFilter};
///
/// let mut filter = QueryFilter::default();
/// filter.page = 2;
/// filter.limit = 10;
///
/// let qb = ListQuery::new("webhooks", "webhooks.id, webhooks.name")
///     .owned_by("webhooks.belongs_to_household", "h1", false)
///     .with_filter(&filter)
///     .build();
///
/// assert!(qb.sql().ends_with("LIMIT 10 OFFSET 10"));
/// ```

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};

/// Largest page size a caller may request
pub const MAX_LIMIT: u8 = 250;

/// Rows returned by username and catalog searches
pub const SEARCH_LIMIT: i64 = 50;

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Asc,
    Desc,
}

/// Paging and window filters for list reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub page: u64,
    pub limit: u8,
    pub created_after: Option<u64>,
    pub created_before: Option<u64>,
    pub updated_after: Option<u64>,
    pub updated_before: Option<u64>,
    pub include_archived: bool,
    pub sort_by: Option<SortBy>,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: MAX_LIMIT,
            created_after: None,
            created_before: None,
            updated_after: None,
            updated_before: None,
            include_archived: false,
            sort_by: None,
        }
    }
}

impl QueryFilter {
    /// Page below 1 becomes 1; a zero limit becomes [`MAX_LIMIT`]; larger limits are clamped
    pub fn normalized(&self) -> Self {
        let limit = match self.limit {
            0 => MAX_LIMIT,
            l if l > MAX_LIMIT => MAX_LIMIT,
            l => l,
        };

        Self {
            page: self.page.max(1),
            limit,
            ..self.clone()
        }
    }

    /// `(page - 1) * limit`, computed on the normalized filter
    pub fn offset(&self) -> u64 {
        let n = self.normalized();
        (n.page - 1).saturating_mul(u64::from(n.limit))
    }
}

/// Paging metadata attached to every list response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u8,
    pub filtered_count: u64,
    pub total_count: u64,
}

impl Pagination {
    pub fn from_filter(filter: &QueryFilter) -> Self {
        let n = filter.normalized();
        Self {
            page: n.page,
            limit: n.limit,
            filtered_count: 0,
            total_count: 0,
        }
    }
}

/// A page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

/// Wraps a search term for a substring `ILIKE`
pub fn wrap_query_for_ilike(query: &str) -> String {
    format!("%{}%", query)
}

#[derive(Debug, Clone)]
enum Condition {
    Equals(&'static str, String),
    IsNull(&'static str),
    Raw(&'static str),
}

/// Builder for a list `SELECT` with counts
#[derive(Debug, Clone)]
pub struct ListQuery {
    table: &'static str,
    columns: &'static str,
    joins: Vec<&'static str>,
    conditions: Vec<Condition>,
    owner: Option<(&'static str, String)>,
    group_by: Option<&'static str>,
    order_by: Option<&'static str>,
    with_counts: bool,
    filter: QueryFilter,
}

impl ListQuery {
    pub fn new(table: &'static str, columns: &'static str) -> Self {
        Self {
            table,
            columns,
            joins: Vec::new(),
            conditions: Vec::new(),
            owner: None,
            group_by: None,
            order_by: None,
            with_counts: true,
            filter: QueryFilter::default(),
        }
    }

    /// Adds `JOIN <clause>`
    pub fn join(mut self, clause: &'static str) -> Self {
        self.joins.push(clause);
        self
    }

    /// Adds `column = $n`
    pub fn where_eq(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Equals(column, value.into()));
        self
    }

    /// Adds `column IS NULL`
    pub fn where_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNull(column));
        self
    }

    /// Adds a literal predicate such as `household_invitations.status = 'pending'`
    pub fn where_raw(mut self, predicate: &'static str) -> Self {
        self.conditions.push(Condition::Raw(predicate));
        self
    }

    /// Restricts rows to `column = owner` unless the caller is an admin
    pub fn owned_by(mut self, column: &'static str, owner: impl Into<String>, for_admin: bool) -> Self {
        if !for_admin {
            self.owner = Some((column, owner.into()));
        }
        self
    }

    pub fn group_by(mut self, clause: &'static str) -> Self {
        self.group_by = Some(clause);
        self
    }

    /// Ordering used when the filter does not ask for one
    pub fn order_by(mut self, clause: &'static str) -> Self {
        self.order_by = Some(clause);
        self
    }

    pub fn without_counts(mut self) -> Self {
        self.with_counts = false;
        self
    }

    pub fn with_filter(mut self, filter: &QueryFilter) -> Self {
        self.filter = filter.normalized();
        self
    }

    fn push_scope(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        for condition in &self.conditions {
            match condition {
                Condition::Equals(column, value) => {
                    qb.push(" AND ").push(column).push(" = ").push_bind(value.clone());
                }
                Condition::IsNull(column) => {
                    qb.push(" AND ").push(column).push(" IS NULL");
                }
                Condition::Raw(predicate) => {
                    qb.push(" AND ").push(predicate);
                }
            }
        }

        if let Some((column, owner)) = &self.owner {
            qb.push(" AND ").push(column).push(" = ").push_bind(owner.clone());
        }
    }

    fn push_windows(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        let windows = [
            ("created_on", " >= ", self.filter.created_after),
            ("created_on", " <= ", self.filter.created_before),
            ("last_updated_on", " >= ", self.filter.updated_after),
            ("last_updated_on", " <= ", self.filter.updated_before),
        ];

        for (column, op, bound) in windows {
            if let Some(bound) = bound {
                qb.push(" AND ")
                    .push(self.table)
                    .push(".")
                    .push(column)
                    .push(op)
                    .push_bind(bound as i64);
            }
        }
    }

    fn push_from(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" FROM ").push(self.table);
        for join in &self.joins {
            qb.push(" JOIN ").push(join);
        }
    }

    /// The filtered count follows `include_archived`; the total never does.
    fn push_count(&self, qb: &mut QueryBuilder<'static, Postgres>, filtered: bool) {
        qb.push("(SELECT COUNT(DISTINCT ")
            .push(self.table)
            .push(".id)");
        self.push_from(qb);
        if filtered && self.filter.include_archived {
            qb.push(" WHERE TRUE");
        } else {
            qb.push(" WHERE ").push(self.table).push(".archived_on IS NULL");
        }
        self.push_scope(qb);
        if filtered {
            self.push_windows(qb);
        }
        qb.push(")");
    }

    /// Renders just the two counts, for pages that come back empty
    pub fn counts(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        self.push_count(&mut qb, true);
        qb.push(" AS filtered_count, ");
        self.push_count(&mut qb, false);
        qb.push(" AS total_count");
        qb
    }

    /// Renders the statement
    pub fn build(self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("");
        self.push_into(&mut qb);
        qb
    }

    /// Renders the statement into an enclosing builder, e.g. as a subquery
    pub fn push_into(self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push("SELECT ");
        qb.push(self.columns);

        if self.with_counts {
            qb.push(", ");
            self.push_count(qb, true);
            qb.push(" AS filtered_count, ");
            self.push_count(qb, false);
            qb.push(" AS total_count");
        }

        self.push_from(qb);

        qb.push(" WHERE TRUE");
        if !self.filter.include_archived {
            qb.push(" AND ").push(self.table).push(".archived_on IS NULL");
        }
        self.push_scope(qb);
        self.push_windows(qb);

        if let Some(group_by) = self.group_by {
            qb.push(" GROUP BY ").push(group_by);
        }

        match (self.filter.sort_by, self.order_by) {
            (Some(SortBy::Desc), _) => {
                qb.push(" ORDER BY ").push(self.table).push(".created_on DESC");
            }
            (Some(SortBy::Asc), _) => {
                qb.push(" ORDER BY ").push(self.table).push(".created_on ASC");
            }
            (None, Some(order_by)) => {
                qb.push(" ORDER BY ").push(order_by);
            }
            (None, None) => {}
        }

        qb.push(" LIMIT ")
            .push(self.filter.limit)
            .push(" OFFSET ")
            .push(self.filter.offset());
    }
}
