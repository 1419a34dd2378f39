pub mod base;
pub mod table_sync;
