/// Database layer for Prixfixe
///
/// # Modules
///
/// - `pool`: PostgreSQL connection pool management with readiness probing
/// - `migrations`: embedded schema migrations, applied at most once per process
/// - `gateway`: the only place statements are executed
/// - `query_builder`: paginated list statements with counts
/// - `mapper`: positional row decoding and parent/child grouping
///
/// Queriers reach the database only through `gateway`; the other modules
/// build statements, decode rows, or manage the pool itself.

pub mod gateway;
pub mod mapper;
pub mod migrations;
pub mod pool;
pub mod query_builder;
