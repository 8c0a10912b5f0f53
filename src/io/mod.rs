//! Input/output helpers.
//!
//! - observation table loading, filtering and CSV export (`table`)
//! - centile results written by the external fitter (`centiles`)

pub mod centiles;
pub mod table;

pub use centiles::*;
pub use table::*;
