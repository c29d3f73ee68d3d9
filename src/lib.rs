//! wheelfix - Vendor native library dependencies into Python wheels.
//!
//! A wheel built against native libraries only works on machines that happen
//! to have those libraries installed. This library makes a Windows wheel
//! self-contained: it finds the DLLs its extension module loads, gives each
//! one a content-hashed name, rewrites the import tables to the new names and
//! writes a new wheel with the libraries inside.
//!
//! # Features
//!
//! - PE32 and PE32+ import and delay-load import table parsing
//! - Transitive dependency discovery with exclusion patterns
//! - Import renaming that preserves every existing byte offset
//! - Raw pass-through of unchanged wheel members
//! - Wrappers for `auditwheel` and `delocate` on Linux and macOS
//!
//! # Example
//!
//! ```no_run
//! use wheelfix::{repair_wheel, RepairOptions};
//!
//! fn main() -> wheelfix::Result<()> {
//!     let report = repair_wheel(
//!         "dist/pkg-1.0-cp311-cp311-win_amd64.whl",
//!         "C:/deps/bin",
//!         &RepairOptions::default(),
//!     )?;
//!     println!("repaired wheel: {}", report.output.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pe;
pub mod platform;
pub mod repair;
pub mod util;

// Re-export main types
pub use error::{Error, Result};
pub use pe::PeContext;
pub use repair::{
    discover, repair_wheel, repair_wheel_with_progress, Action, DependencyGraph, Exclusions,
    FsModuleSource, ModuleSource, PlannedAction, RenameMap, RepairOptions, RepairReport,
};
