mod base;
mod connection;
mod policy;
mod service;
mod table;

pub use base::*;
pub use connection::*;
pub use policy::*;
pub use service::*;
pub use table::*;
