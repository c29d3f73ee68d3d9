//! PE/COFF file format handling.
//!
//! This module provides types and utilities for parsing and modifying PE
//! images, the executable format used for Windows DLLs and Python extension
//! modules (`.pyd`).

mod constants;
mod context;
mod structs;

#[cfg(test)]
pub(crate) mod fixture;

pub use constants::*;
pub use context::*;
pub use structs::*;
