//! Configuration management for the table synchronization service.
//!
//! Provides environment detection, hierarchical configuration loading from YAML files and
//! environment variables, secret handling, and the shared configuration types consumed by the
//! synchronization engine and the service binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
