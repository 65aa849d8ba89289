//! Global Register Allocator - Common Types and Errors
//!
//! This crate contains the identifiers, data types and error definitions
//! shared by the IR model and the allocator backend.

pub mod error;
pub mod types;

pub use error::{AllocResult, AllocatorError};
pub use types::*;
