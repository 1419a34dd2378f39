//! Periodic full-table synchronization from a source database into a target database.
//!
//! Each configured table pair is owned by a [`workers::table_sync::TableSyncWorker`] which runs the
//! [`engine::SyncEngine`] on a schedule and on manual request. Runs truncate the target table and
//! reload it from the source inside one transaction. The [`coordinator::Coordinator`] starts the
//! workers, routes manual triggers to them and publishes the outcome of every run.

pub mod concurrency;
pub mod coordinator;
pub mod database;
pub mod engine;
pub mod error;
mod macros;
pub mod schema;
pub mod sql;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod typemap;
pub mod types;
pub mod workers;
