/// Domain records for the identity and tenancy tables
///
/// Each model owns its column list (a `*_columns!` macro usable inside
/// `concat!`) and a positional scanner, so any statement that selects those
/// columns in that order can decode them. Catalog records live next to their
/// queriers in [`crate::catalog`].
///
/// # Models
///
/// - `user`: accounts, reputation, two-factor state
/// - `household`: tenants and their ownership
/// - `membership`: user ↔ household links with roles and the default flag
/// - `invitation`: household invitations and their state machine
/// - `session`: per-request session context assembled from the above

pub mod household;
pub mod invitation;
pub mod membership;
pub mod session;
pub mod user;

pub use crate::db::query_builder::{ListResponse, Pagination, QueryFilter, SortBy};
