//! Common utilities shared across storage backends

pub mod error;

pub use error::{DatabaseError, DatabaseResult};
