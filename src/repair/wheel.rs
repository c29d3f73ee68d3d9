//! Wheel archive reading and repackaging.
//!
//! The repaired wheel is assembled member by member: the primary module is
//! written with its new content at its original position, every other member
//! is copied raw (without recompression), and the renamed dependencies are
//! appended next to the primary module.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Prefix of the scratch directory created inside the output directory.
const SCRATCH_PREFIX: &str = ".wheelfix-";

/// An opened wheel.
pub struct WheelArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl std::fmt::Debug for WheelArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelArchive")
            .field("path", &self.path)
            .field("members", &self.archive.len())
            .finish()
    }
}

impl WheelArchive {
    /// Opens a wheel for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;
        let archive = ZipArchive::new(file).map_err(|e| Error::archive(&path, e))?;
        debug!("opened {} ({} members)", path.display(), archive.len());
        Ok(Self { path, archive })
    }

    /// Returns the path the wheel was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the wheel's file name.
    pub fn file_name(&self) -> Result<&str> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("'{}' has no file name", self.path.display()),
                ))
            })
    }

    /// Returns every member's name in archive order, with directory flags.
    pub fn members(&mut self) -> Result<Vec<(String, bool)>> {
        (0..self.archive.len())
            .map(|i| {
                let file = self
                    .archive
                    .by_index_raw(i)
                    .map_err(|e| Error::archive(&self.path, e))?;
                Ok((file.name().to_string(), file.is_dir()))
            })
            .collect()
    }

    /// Finds the single file member whose name ends in `suffix`.
    pub fn find_primary_module(&mut self, suffix: &str) -> Result<String> {
        let suffix = suffix.to_ascii_lowercase();
        let mut candidates: Vec<String> = self
            .members()?
            .into_iter()
            .filter(|(name, is_dir)| !is_dir && name.to_ascii_lowercase().ends_with(&suffix))
            .map(|(name, _)| name)
            .collect();

        if candidates.len() != 1 {
            return Err(Error::PrimaryModuleCardinality {
                archive: self.path.clone(),
                candidates,
            });
        }
        Ok(candidates.remove(0))
    }

    /// Reads and decompresses a member.
    pub fn read_member(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut file = self
            .archive
            .by_name(name)
            .map_err(|e| Error::archive(&self.path, e))?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| Error::archive_member(&self.path, name, e))?;
        Ok(data)
    }
}

/// Returns the directory part of a member path, without the trailing slash.
pub fn member_dir(member: &str) -> &str {
    member.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Returns the file name part of a member path.
pub fn member_basename(member: &str) -> &str {
    member.rsplit_once('/').map(|(_, name)| name).unwrap_or(member)
}

/// Joins a member directory and a file name.
pub fn member_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// The contents of the repaired wheel that differ from the original.
#[derive(Debug, Clone, Default)]
pub struct RepackagePlan {
    /// Primary module member path and its new content
    pub primary: (String, Vec<u8>),
    /// New dependency members, in insertion order
    pub dependencies: Vec<(String, Vec<u8>)>,
}

impl RepackagePlan {
    /// Creates a plan replacing the primary module's content.
    pub fn new(primary: String, content: Vec<u8>) -> Self {
        Self {
            primary: (primary, content),
            dependencies: Vec::new(),
        }
    }

    /// Adds a dependency member; repeated member paths are ignored.
    pub fn add_dependency(&mut self, member: String, content: Vec<u8>) -> bool {
        if self.dependencies.iter().any(|(m, _)| *m == member) {
            return false;
        }
        self.dependencies.push((member, content));
        true
    }
}

fn new_member_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Writes the repaired wheel to `output`.
pub fn write_wheel(wheel: &mut WheelArchive, plan: &RepackagePlan, output: &Path) -> Result<()> {
    let existing: HashSet<String> = wheel.members()?.into_iter().map(|(n, _)| n).collect();
    for (member, _) in &plan.dependencies {
        if existing.contains(member) {
            return Err(Error::MemberCollision {
                member: member.clone(),
            });
        }
    }

    let file = File::create(output).map_err(|e| Error::FileWrite {
        path: output.to_path_buf(),
        source: e,
    })?;
    let mut writer = ZipWriter::new(file);
    let write_err = |e| Error::archive(output, e);

    let (primary, primary_content) = &plan.primary;
    for i in 0..wheel.archive.len() {
        let member = wheel
            .archive
            .by_index_raw(i)
            .map_err(|e| Error::archive(&wheel.path, e))?;
        if member.name() == primary.as_str() {
            drop(member);
            writer
                .start_file(primary.as_str(), new_member_options())
                .map_err(write_err)?;
            writer
                .write_all(primary_content)
                .map_err(|e| Error::archive_member(output, primary.as_str(), e))?;
        } else {
            writer.raw_copy_file(member).map_err(write_err)?;
        }
    }

    for (member, content) in &plan.dependencies {
        writer
            .start_file(member.as_str(), new_member_options())
            .map_err(write_err)?;
        writer
            .write_all(content)
            .map_err(|e| Error::archive_member(output, member.as_str(), e))?;
    }

    let mut file = writer.finish().map_err(write_err)?;
    file.flush().map_err(|e| Error::FileWrite {
        path: output.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Writes the repaired wheel into `output_dir` under the original file name.
///
/// The archive is staged in a scratch directory inside `output_dir` and moved
/// into place only once complete, so a failure never leaves a partial wheel
/// at the destination. The scratch directory is removed on every path.
pub fn repackage(wheel: &mut WheelArchive, plan: &RepackagePlan, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).map_err(|e| Error::FileWrite {
        path: output_dir.to_path_buf(),
        source: e,
    })?;
    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(output_dir)
        .map_err(|e| Error::FileWrite {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

    let file_name = wheel.file_name()?.to_string();
    let staged = scratch.path().join(&file_name);
    write_wheel(wheel, plan, &staged)?;

    let destination = output_dir.join(&file_name);
    fs::rename(&staged, &destination).map_err(|e| Error::FileWrite {
        path: destination.clone(),
        source: e,
    })?;
    info!(
        "wrote {} ({} new members)",
        destination.display(),
        plan.dependencies.len()
    );
    Ok(destination)
}
