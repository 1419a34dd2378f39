pub mod base;
pub mod memory;
pub mod mssql;
pub mod postgres;
