//! # bouquine-shared
//!
//! Types shared by every Bouquine crate: id newtypes, domain enums,
//! application constants and the id-validation error type.
//!
//! Nothing in this crate touches the store or the network; it exists so
//! that `bouquine-store` and `bouquine-engine` agree on ids and enums
//! without depending on each other.

pub mod constants;
pub mod types;

mod error;

pub use error::IdError;
pub use types::*;
