//! Error types for wheel repair.
//!
//! Every stage of the repair pipeline reports failures through [`Error`].
//! PE parsing problems are wrapped into a stage error ([`Error::Discovery`]
//! or [`Error::Rewrite`]) that names the binary being processed, so the
//! message printed by the CLI identifies both the stage and the binary.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// The main error type for wheel repair operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== PE Format Errors ====================
    #[error("invalid DOS magic: expected 'MZ', got {0:#06x}")]
    InvalidDosMagic(u16),

    #[error("invalid PE signature at offset {offset:#x}")]
    InvalidPeSignature { offset: usize },

    #[error("unsupported optional header magic: {0:#06x}")]
    UnsupportedOptionalHeader(u16),

    #[error("invalid {field} {value:#x} (must be a non-zero power of two)")]
    InvalidAlignment { field: &'static str, value: u32 },

    #[error("RVA {rva:#x} is not mapped by any section")]
    RvaNotMapped { rva: u32 },

    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    // ==================== Discovery Errors ====================
    #[error("dependency discovery failed for '{module}': {source}")]
    Discovery {
        module: String,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidExcludePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("hash length {value} out of range (must be 1..={max})")]
    InvalidHashLength { value: usize, max: usize },

    // ==================== Rewrite Errors ====================
    #[error("failed to rewrite imports of '{module}': {source}")]
    Rewrite {
        module: String,
        #[source]
        source: Box<Error>,
    },

    #[error("mapped library '{name}' is not referenced by the import table")]
    MappedNameNotFound { name: String },

    #[error("replacement library name '{name}' is not a valid ASCII DLL name")]
    InvalidReplacementName { name: String },

    #[error("dependency '{name}' has no canonical name")]
    MissingCanonicalName { name: String },

    #[error("no room for a new section header (need {needed} bytes, have {available})")]
    NoSectionHeaderSpace { needed: usize, available: usize },

    // ==================== Archive Errors ====================
    #[error("expected exactly one primary module in '{archive}', found {}", candidates.len())]
    PrimaryModuleCardinality {
        archive: PathBuf,
        candidates: Vec<String>,
    },

    #[error("archive error for '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("I/O error on member '{member}' of '{path}': {source}")]
    ArchiveMember {
        path: PathBuf,
        member: String,
        #[source]
        source: std::io::Error,
    },

    #[error("renamed dependency '{member}' collides with an existing archive member")]
    MemberCollision { member: String },

    // ==================== External Tool Errors ====================
    #[error("failed to launch '{tool}': {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool}' exited with {status}")]
    ExternalTool { tool: String, status: ExitStatus },
}

/// A specialized Result type for wheel repair operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the name of the pipeline stage this error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Discovery { .. } => "discovery",
            Error::Rewrite { .. }
            | Error::MappedNameNotFound { .. }
            | Error::InvalidReplacementName { .. }
            | Error::MissingCanonicalName { .. }
            | Error::NoSectionHeaderSpace { .. } => "rewrite",
            Error::PrimaryModuleCardinality { .. } => "cardinality",
            Error::Archive { .. }
            | Error::ArchiveMember { .. }
            | Error::MemberCollision { .. } => "archive",
            Error::InvalidExcludePattern { .. } | Error::InvalidHashLength { .. } => "config",
            Error::ToolLaunch { .. } | Error::ExternalTool { .. } => "external",
            Error::InvalidDosMagic(_)
            | Error::InvalidPeSignature { .. }
            | Error::UnsupportedOptionalHeader(_)
            | Error::InvalidAlignment { .. }
            | Error::RvaNotMapped { .. }
            | Error::Parse { .. }
            | Error::BufferTooSmall { .. } => "parse",
            Error::Io(_) | Error::FileOpen { .. } | Error::FileWrite { .. } => "io",
        }
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }

    /// Wraps an error as a discovery failure for `module`.
    pub fn discovery(module: impl Into<String>, source: Error) -> Self {
        Error::Discovery {
            module: module.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an error as a rewrite failure for `module`.
    pub fn rewrite(module: impl Into<String>, source: Error) -> Self {
        Error::Rewrite {
            module: module.into(),
            source: Box::new(source),
        }
    }

    /// Wraps a zip error raised while reading or writing `path`.
    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Error::Archive {
            path: path.into(),
            source,
        }
    }

    /// Wraps an I/O error raised while streaming `member` of `path`.
    pub fn archive_member(
        path: impl Into<PathBuf>,
        member: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::ArchiveMember {
            path: path.into(),
            member: member.into(),
            source,
        }
    }
}
