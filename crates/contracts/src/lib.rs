//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Index Model
//! - Each data type owns an independent index space (u64, strictly increasing)
//! - `Missing` / `End` markers occupy an index but carry no payload

mod blueprint;
mod check;
mod delivery;
mod error;
mod frame;
mod limits;
mod report;
mod results;
mod selection;
mod sink;

pub use blueprint::*;
pub use check::*;
pub use delivery::*;
pub use error::*;
pub use frame::*;
pub use limits::*;
pub use report::*;
pub use results::*;
pub use selection::*;
pub use sink::*;
