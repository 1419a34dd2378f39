mod cell;
mod numeric;
mod outcome;
mod table_row;

pub use cell::*;
pub use numeric::*;
pub use outcome::*;
pub use table_row::*;
