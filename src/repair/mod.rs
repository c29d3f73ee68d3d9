//! The Windows wheel repair pipeline.
//!
//! A wheel holding one compiled extension module is made self-contained by
//! vendoring the native libraries it loads from a candidate directory.
//!
//! # Repair Pipeline
//!
//! 1. **Discovery** - Walks PE import tables from the primary module to build
//!    the local dependency graph
//! 2. **Naming** - Gives each dependency a content-hashed name so two wheels
//!    vendoring different builds of a library never clash in one process
//! 3. **Mangling** - Rewrites every binary's import table to the new names
//! 4. **Repackaging** - Writes the new wheel with the dependencies next to the
//!    primary module

mod graph;
mod mangle;
mod naming;
mod wheel;

pub use graph::*;
pub use mangle::*;
pub use naming::*;
pub use wheel::*;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

/// Options for wheel repair.
#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// Library names that are never vendored
    pub exclusions: Exclusions,
    /// Directory the repaired wheel is written to
    pub output_dir: PathBuf,
    /// File name suffix identifying the primary module
    pub primary_suffix: String,
    /// Number of digest hex digits in renamed libraries
    pub hash_len: usize,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            exclusions: Exclusions::windows_defaults(),
            output_dir: PathBuf::from("wheelhouse"),
            primary_suffix: ".pyd".to_string(),
            hash_len: DEFAULT_HASH_LEN,
        }
    }
}

/// Outcome of a successful repair.
#[derive(Debug, Clone)]
pub struct RepairReport {
    /// Path of the repaired wheel
    pub output: PathBuf,
    /// Member path of the primary module
    pub primary: String,
    /// Every binary processed, dependencies first
    pub actions: Vec<PlannedAction>,
    /// Names given to the vendored libraries
    pub renames: RenameMap,
}

/// Repairs a wheel using libraries from `dll_dir`.
pub fn repair_wheel<P: AsRef<Path>, Q: AsRef<Path>>(
    wheel: P,
    dll_dir: Q,
    options: &RepairOptions,
) -> Result<RepairReport> {
    repair_wheel_with_progress(wheel, dll_dir, options, |_| {})
}

/// Repairs a wheel, reporting each binary before it is processed.
pub fn repair_wheel_with_progress<P, Q, F>(
    wheel: P,
    dll_dir: Q,
    options: &RepairOptions,
    mut progress: F,
) -> Result<RepairReport>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: FnMut(&PlannedAction),
{
    let hash_len = check_hash_len(options.hash_len)?;
    let mut archive = WheelArchive::open(wheel)?;
    let primary = archive.find_primary_module(&options.primary_suffix)?;
    let primary_basename = member_basename(&primary).to_string();
    let primary_dir = member_dir(&primary).to_string();
    info!("primary module: {}", primary);

    let primary_data = archive.read_member(&primary)?;
    let source = FsModuleSource::open(dll_dir)?;
    let root = read_module(
        &primary_basename,
        member_location(archive.path(), &primary),
        &primary_data,
    )?;
    let graph = discover(root, &source, &options.exclusions)?;

    let (renames, contents) = RenameMap::load(&graph, &source, hash_len)?;
    info!("vendoring {} libraries", renames.len());

    let mut actions = Vec::with_capacity(graph.len());
    let mut plan = RepackagePlan::default();
    for (node, data) in graph.dependency_nodes().zip(contents) {
        let planned = dependency_action(node, &renames, &primary_dir)?;
        progress(&planned);

        let output = planned.action.apply(&node.module.basename, data)?;
        plan.add_dependency(planned.destination.clone(), output);
        actions.push(planned);
    }

    let root = graph.root_node();
    let planned = PlannedAction {
        source: root.module.path.clone(),
        destination: primary.clone(),
        action: Action::for_mapping(renames.mapping_for(&root.dependencies)),
    };
    progress(&planned);
    plan.primary = (
        primary.clone(),
        planned.action.apply(&root.module.basename, primary_data)?,
    );
    actions.push(planned);

    let output = repackage(&mut archive, &plan, &options.output_dir)?;

    Ok(RepairReport {
        output,
        primary,
        actions,
        renames,
    })
}

/// Names a member inside an archive as `<archive>!<member>`.
fn member_location(archive: &Path, member: &str) -> PathBuf {
    PathBuf::from(format!("{}!{}", archive.display(), member))
}

/// Plans the output member and rewrite for one vendored dependency.
fn dependency_action(
    node: &GraphNode,
    renames: &RenameMap,
    primary_dir: &str,
) -> Result<PlannedAction> {
    let name = &node.module.basename;
    let canonical = renames
        .get(name)
        .ok_or_else(|| Error::MissingCanonicalName { name: name.clone() })?;
    Ok(PlannedAction {
        source: node.module.path.clone(),
        destination: member_path(primary_dir, canonical),
        action: Action::for_mapping(renames.mapping_for(&node.dependencies)),
    })
}
