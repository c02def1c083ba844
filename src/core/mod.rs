/// Core Module for Quarry
///
/// This module contains the fundamental components shared by every layer
/// of the crate: the error taxonomy and the crate-wide Result alias.

pub mod error;

// Re-export commonly used types for convenience
pub use error::{ConstraintKind, ConstraintViolation, QuarryError, Result};
