//! Ratebook Common Types
//!
//! This crate contains shared types used across the Ratebook engine,
//! including identifiers, monetary types, pagination and the error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod page;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use page::*;
pub use error::*;
