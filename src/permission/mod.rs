//! Permission mediation for tool actions the CLI asks about.

mod manager;
mod pattern;
mod types;

pub use manager::*;
pub use pattern::*;
pub use types::*;
