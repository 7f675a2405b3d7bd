//! # Prixfixe Shared Library
//!
//! Persistence layer for the Prixfixe recipe service: the PostgreSQL schema,
//! the statements that read and write it, and the records they produce.
//!
//! ## Module Organization
//!
//! - `db`: connection pool, migrations, SQL gateway, query builder, row mapper
//! - `models`: users, households, memberships, invitations, session context
//! - `queriers`: the [`Querier`] handle and identity/tenancy operations
//! - `catalog`: webhooks, API clients, password reset tokens, recipe vocabulary
//! - `authorization`: service and household roles and permission checks
//! - `config`: database settings loaded from files and the environment
//! - `error`: the database error kinds
//! - `identifiers`: id generation and the time source

pub mod authorization;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod identifiers;
pub mod models;
pub mod queriers;

pub use error::{DatabaseError, Result};
pub use queriers::{Querier, SessionContextSource};

/// Current version of the Prixfixe shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
