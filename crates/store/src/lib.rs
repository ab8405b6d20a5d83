//! `commons-store` — persistence for the authorization engine.
//!
//! The [`AuthzStore`] trait covers the grant store (both shapes), the entity
//! registry the engine needs for referential integrity and containment, the
//! group membership ledger, and the set-valued read paths the resolver's
//! permission sources consume. The in-memory implementation is the default
//! (tests/dev); a Postgres implementation lives behind the `postgres`
//! feature.

pub mod memory;
pub mod sources;
pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod integration_tests;

pub use memory::InMemoryAuthzStore;
pub use sources::{
    GrantDirectSource, GrantGroupSource, LegacyDirectSource, LegacyGroupSource, resolver_for,
    standard_sources,
};
pub use store::{AuthzStore, StoreError, StoreResult};

#[cfg(feature = "postgres")]
pub use postgres::PostgresAuthzStore;
