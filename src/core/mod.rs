//! Core types shared across the spool codebase.
//!
//! Currently this is the error system; see [`error`].

pub mod error;

pub use error::{user_friendly_error, ErrorContext, SpoolError};
