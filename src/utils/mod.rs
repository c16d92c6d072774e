//! Cross-platform utilities and helpers.

pub mod fs;
