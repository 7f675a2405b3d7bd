/// Row decoding helpers
///
/// Statements select columns in a fixed order (see the `*_columns!` macros in
/// each model). [`Columns`] walks a row left to right, so a record that spans
/// several joined tables is decoded by handing the same cursor to each
/// record's scanner in turn. Any mismatch in column count, order, or type
/// surfaces as `ScanError` carrying the driver error.
///
/// List-valued columns (roles, webhook events, ...) are stored as a single
/// comma-separated string. [`split_list`] and [`join_list`] convert between
/// the two and never produce `[""]`.

use sqlx::postgres::{PgRow, Postgres};
use sqlx::{Decode, Row, Type};

use crate::error::{DatabaseError, Result};

/// Separator used by every list-valued column
pub const LIST_SEPARATOR: char = ',';

/// Splits a stored list column; the empty string is the empty list
pub fn split_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(LIST_SEPARATOR).map(str::to_string).collect()
}

/// Joins a list for storage
pub fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

/// Positional cursor over one row
pub struct Columns<'r> {
    row: &'r PgRow,
    index: usize,
    description: &'static str,
}

impl<'r> Columns<'r> {
    pub fn new(row: &'r PgRow, description: &'static str) -> Self {
        Self {
            row,
            index: 0,
            description,
        }
    }

    /// Decodes the next column
    pub fn next<T>(&mut self) -> Result<T>
    where
        T: Decode<'r, Postgres> + Type<Postgres>,
    {
        let value = self
            .row
            .try_get::<T, _>(self.index)
            .map_err(|e| DatabaseError::scan(self.description, e))?;
        self.index += 1;
        Ok(value)
    }

    /// Decodes an epoch-seconds `BIGINT`
    pub fn epoch(&mut self) -> Result<u64> {
        let value: i64 = self.next()?;
        Ok(value.max(0) as u64)
    }

    pub fn optional_epoch(&mut self) -> Result<Option<u64>> {
        let value: Option<i64> = self.next()?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    /// Decodes a `COUNT(...)` column
    pub fn count(&mut self) -> Result<u64> {
        self.epoch()
    }

    /// Decodes a nullable `SMALLINT` holding a day or month number
    pub fn optional_small(&mut self) -> Result<Option<u8>> {
        let value: Option<i16> = self.next()?;
        Ok(value.and_then(|v| u8::try_from(v).ok()))
    }

    /// Decodes a comma-separated list column
    pub fn list(&mut self) -> Result<Vec<String>> {
        let raw: String = self.next()?;
        Ok(split_list(&raw))
    }

    /// Columns consumed so far
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn row(&self) -> &'r PgRow {
        self.row
    }
}

/// Groups rows that share a leading parent id into one parent with children
///
/// Rows must arrive with all children of a parent contiguous. A parent is
/// emitted as soon as a row with a different id shows up, so only one
/// parent is held in memory at a time.
pub struct Aggregator<P, C> {
    current: Option<(String, P, Vec<C>)>,
    finished: Vec<(P, Vec<C>)>,
}

impl<P, C> Default for Aggregator<P, C> {
    fn default() -> Self {
        Self {
            current: None,
            finished: Vec::new(),
        }
    }
}

impl<P, C> Aggregator<P, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one row. `parent` is only built when `id` starts a new group.
    pub fn push<F>(&mut self, id: &str, parent: F, child: Option<C>) -> Result<()>
    where
        F: FnOnce() -> Result<P>,
    {
        let starts_new_group = match &self.current {
            Some((current_id, _, _)) => current_id != id,
            None => true,
        };

        if starts_new_group {
            if let Some((_, p, children)) = self.current.take() {
                self.finished.push((p, children));
            }
            self.current = Some((id.to_string(), parent()?, Vec::new()));
        }

        if let (Some(child), Some((_, _, children))) = (child, self.current.as_mut()) {
            children.push(child);
        }

        Ok(())
    }

    /// Number of parents seen so far
    pub fn len(&self) -> usize {
        self.finished.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes the last group and returns all parents in arrival order
    pub fn finish(mut self) -> Vec<(P, Vec<C>)> {
        if let Some((_, p, children)) = self.current.take() {
            self.finished.push((p, children));
        }
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_empty_is_empty_list() {
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_split_join_round_trip() {
        let roles = vec!["household_admin".to_string(), "household_member".to_string()];
        let joined = join_list(&roles);
        assert_eq!(joined, "household_admin,household_member");
        assert_eq!(split_list(&joined), roles);
    }

    #[test]
    fn test_join_empty_list() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(join_list(&empty), "");
        assert!(split_list(&join_list(&empty)).is_empty());
    }

    #[test]
    fn test_single_item() {
        assert_eq!(split_list("service_user"), vec!["service_user"]);
        assert_eq!(join_list(&["service_user"]), "service_user");
    }

    #[test]
    fn test_aggregator_groups_contiguous_rows() {
        let rows = vec![("h1", "a"), ("h1", "b"), ("h2", "c"), ("h3", "d"), ("h3", "e")];

        let mut agg: Aggregator<String, &str> = Aggregator::new();
        for (id, member) in rows {
            agg.push(id, || Ok(id.to_string()), Some(member)).unwrap();
        }
        assert_eq!(agg.len(), 3);

        let out = agg.finish();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], ("h1".to_string(), vec!["a", "b"]));
        assert_eq!(out[1], ("h2".to_string(), vec!["c"]));
        assert_eq!(out[2], ("h3".to_string(), vec!["d", "e"]));
    }

    #[test]
    fn test_aggregator_builds_parent_once_per_group() {
        let mut built = 0;
        let mut agg: Aggregator<u32, u32> = Aggregator::new();
        for child in 0..4 {
            agg.push(
                "h1",
                || {
                    built += 1;
                    Ok(7)
                },
                Some(child),
            )
            .unwrap();
        }
        assert_eq!(built, 1);
        assert_eq!(agg.finish(), vec![(7, vec![0, 1, 2, 3])]);
    }

    #[test]
    fn test_aggregator_parent_without_children() {
        let mut agg: Aggregator<&str, u8> = Aggregator::new();
        agg.push("h1", || Ok("h1"), None).unwrap();
        assert_eq!(agg.finish(), vec![("h1", vec![])]);
    }

    #[test]
    fn test_aggregator_propagates_parent_errors() {
        let mut agg: Aggregator<u8, u8> = Aggregator::new();
        let result = agg.push("h1", || Err(DatabaseError::NoRows), Some(1));
        assert!(matches!(result, Err(DatabaseError::NoRows)));
        assert!(agg.is_empty());
    }

    #[test]
    fn test_empty_aggregator() {
        let agg: Aggregator<u8, u8> = Aggregator::new();
        assert!(agg.is_empty());
        assert!(agg.finish().is_empty());
    }
}
