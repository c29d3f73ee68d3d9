//! Dependency discovery over PE import tables.
//!
//! Discovery starts at the primary module and walks import tables depth-first,
//! following only libraries that exist in the candidate directory and do not
//! match an exclusion pattern. An edge is recorded every time a dependency is
//! referenced; its own import table is parsed only the first time it is seen.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pe::PeContext;

// =============================================================================
// Module Source
// =============================================================================

/// Read access to the candidate dependency directory.
///
/// Discovery and naming only go through this trait, so tests can supply
/// synthetic binaries without touching the filesystem.
pub trait ModuleSource {
    /// Returns true if a library with exactly this basename is available.
    fn contains(&self, name: &str) -> bool;

    /// Returns the path a library would be read from.
    fn path_of(&self, name: &str) -> PathBuf;

    /// Reads the full contents of a library.
    fn read(&self, name: &str) -> Result<Vec<u8>>;
}

/// A [`ModuleSource`] backed by a directory on disk.
///
/// The directory listing is taken once, when the source is opened.
#[derive(Debug, Clone)]
pub struct FsModuleSource {
    dir: PathBuf,
    names: HashSet<String>,
}

impl FsModuleSource {
    /// Snapshots the regular files in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = fs::read_dir(&dir).map_err(|e| Error::FileOpen {
            path: dir.clone(),
            source: e,
        })?;

        let mut names = HashSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.insert(name.to_string());
            }
        }

        debug!("{} candidate files in {}", names.len(), dir.display());
        Ok(Self { dir, names })
    }

    /// Returns the candidate directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ModuleSource for FsModuleSource {
    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name);
        fs::read(&path).map_err(|e| Error::FileOpen { path, source: e })
    }
}

// =============================================================================
// Exclusions
// =============================================================================

/// Default exclusions for Windows wheels: the Python runtime itself and the
/// universal CRT forwarders found in conda environments.
pub const DEFAULT_WINDOWS_EXCLUDES: &[&str] = &[r"python3.*\.dll", r"api-ms-win-crt-.*\.dll"];

/// Library-name patterns that are never vendored.
///
/// Each pattern is a regular expression anchored at the start of the name.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    patterns: Vec<Regex>,
}

impl Exclusions {
    /// An empty exclusion set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Compiles a set of patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let pattern = p.as_ref();
                let anchored = format!("^(?:{})", pattern.trim_start_matches('^'));
                Regex::new(&anchored).map_err(|source| Error::InvalidExcludePattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self { patterns })
    }

    /// The default Windows exclusions.
    pub fn windows_defaults() -> Self {
        Self::new(DEFAULT_WINDOWS_EXCLUDES).expect("default exclusion patterns compile")
    }

    /// Adds more patterns to this set.
    pub fn extend<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.patterns.extend(Self::new(patterns)?.patterns);
        Ok(self)
    }

    /// Returns true if `name` matches any pattern.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Returns the number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if there are no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// =============================================================================
// Graph
// =============================================================================

/// A native binary found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryModule {
    /// File name of the binary
    pub basename: String,
    /// Where the binary was read from
    pub path: PathBuf,
    /// Library names from the import tables, in table order
    pub imports: Vec<String>,
}

/// A node of the dependency graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// The binary this node represents
    pub module: BinaryModule,
    /// Local dependency basenames, in first-reference order
    pub dependencies: Vec<String>,
}

/// Local dependency graph rooted at the primary module.
///
/// Nodes are kept in discovery order; the root is always first.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    fn with_root(module: BinaryModule) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        };
        graph.insert(module);
        graph
    }

    fn insert(&mut self, module: BinaryModule) -> usize {
        let idx = self.nodes.len();
        self.index.insert(module.basename.clone(), idx);
        self.nodes.push(GraphNode {
            module,
            dependencies: Vec::new(),
        });
        idx
    }

    fn add_edge(&mut self, from: usize, to: &str) {
        let deps = &mut self.nodes[from].dependencies;
        if !deps.iter().any(|d| d == to) {
            deps.push(to.to_string());
        }
    }

    /// Returns the primary module.
    pub fn root(&self) -> &BinaryModule {
        &self.nodes[0].module
    }

    /// Returns the primary module's node.
    pub fn root_node(&self) -> &GraphNode {
        &self.nodes[0]
    }

    /// Returns true if `name` is a node of the graph.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the node for `name`.
    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.index.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Returns the local dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.node(name).map(|n| n.dependencies.as_slice())
    }

    /// Iterates all nodes in discovery order, root first.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    /// Iterates the dependency nodes (every node except the root).
    pub fn dependency_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().skip(1)
    }

    /// Returns the number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a graph has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Parses the import table of a binary.
pub fn read_module(basename: &str, path: PathBuf, data: &[u8]) -> Result<BinaryModule> {
    let pe = PeContext::new(data).map_err(|e| Error::discovery(basename, e))?;
    Ok(BinaryModule {
        basename: basename.to_string(),
        path,
        imports: pe.dependencies(),
    })
}

/// Builds the local dependency graph of `root`.
///
/// Names missing from `source` are external and silently skipped, as are
/// names matching `exclusions` and references back to the root. Any
/// dependency that fails to parse aborts discovery.
pub fn discover(
    root: BinaryModule,
    source: &dyn ModuleSource,
    exclusions: &Exclusions,
) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::with_root(root);
    visit(&mut graph, 0, source, exclusions)?;
    debug!(
        "discovered {} local dependencies of {}",
        graph.len() - 1,
        graph.root().basename
    );
    Ok(graph)
}

fn visit(
    graph: &mut DependencyGraph,
    node: usize,
    source: &dyn ModuleSource,
    exclusions: &Exclusions,
) -> Result<()> {
    let imports = graph.nodes[node].module.imports.clone();
    let root_name = graph.root().basename.clone();

    for name in imports {
        if !source.contains(&name) {
            continue;
        }
        if exclusions.is_excluded(&name) {
            debug!("excluding {}", name);
            continue;
        }
        if name == root_name {
            continue;
        }

        graph.add_edge(node, &name);
        if graph.contains(&name) {
            continue;
        }

        let data = source.read(&name).map_err(|e| Error::discovery(&name, e))?;
        let module = read_module(&name, source.path_of(&name), &data)?;
        debug!(
            "{} -> {} ({} imports)",
            graph.nodes[node].module.basename,
            name,
            module.imports.len()
        );
        let child = graph.insert(module);
        visit(graph, child, source, exclusions)?;
    }

    Ok(())
}

// =============================================================================
// In-memory source for tests
// =============================================================================

#[cfg(test)]
pub(crate) mod memory {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::ModuleSource;
    use crate::error::{Error, Result};

    /// A [`ModuleSource`] over canned binaries that counts reads.
    #[derive(Debug, Default)]
    pub struct MemorySource {
        files: HashMap<String, Vec<u8>>,
        reads: RefCell<HashMap<String, usize>>,
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, name: &str, data: Vec<u8>) -> Self {
            self.files.insert(name.to_string(), data);
            self
        }

        pub fn reads_of(&self, name: &str) -> usize {
            self.reads.borrow().get(name).copied().unwrap_or(0)
        }
    }

    impl ModuleSource for MemorySource {
        fn contains(&self, name: &str) -> bool {
            self.files.contains_key(name)
        }

        fn path_of(&self, name: &str) -> PathBuf {
            PathBuf::from("/candidates").join(name)
        }

        fn read(&self, name: &str) -> Result<Vec<u8>> {
            *self.reads.borrow_mut().entry(name.to_string()).or_default() += 1;
            self.files.get(name).cloned().ok_or_else(|| Error::FileOpen {
                path: self.path_of(name),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySource;
    use super::*;
    use crate::pe::fixture::PeFixture;

    fn root(imports: &[&str]) -> BinaryModule {
        let mut fixture = PeFixture::new();
        for name in imports {
            fixture = fixture.import(name);
        }
        read_module("ext.pyd", PathBuf::from("/wheel/pkg/ext.pyd"), &fixture.build()).unwrap()
    }

    fn dll(imports: &[&str]) -> Vec<u8> {
        imports
            .iter()
            .fold(PeFixture::new(), |f, name| f.import(name))
            .build()
    }

    #[test]
    fn test_scenario_a_graph() {
        let source = MemorySource::new()
            .with("dep1.dll", dll(&["dep2.dll", "KERNEL32.dll"]))
            .with("dep2.dll", dll(&[]));
        let graph = discover(
            root(&["dep1.dll", "dep2.dll", "SYS.dll"]),
            &source,
            &Exclusions::none(),
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("ext.pyd").unwrap(), ["dep1.dll", "dep2.dll"]);
        assert_eq!(graph.dependencies("dep1.dll").unwrap(), ["dep2.dll"]);
        assert!(graph.dependencies("dep2.dll").unwrap().is_empty());
        assert!(!graph.contains("SYS.dll"));
        assert!(!graph.contains("KERNEL32.dll"));

        let order: Vec<_> = graph.nodes().map(|n| n.module.basename.as_str()).collect();
        assert_eq!(order, ["ext.pyd", "dep1.dll", "dep2.dll"]);
        assert_eq!(
            graph.node("dep1.dll").unwrap().module.path,
            PathBuf::from("/candidates/dep1.dll")
        );
    }

    #[test]
    fn test_diamond_records_every_edge_but_parses_once() {
        let source = MemorySource::new()
            .with("left.dll", dll(&["shared.dll"]))
            .with("right.dll", dll(&["shared.dll"]))
            .with("shared.dll", dll(&[]));
        let graph = discover(
            root(&["left.dll", "right.dll"]),
            &source,
            &Exclusions::none(),
        )
        .unwrap();

        assert_eq!(graph.dependencies("left.dll").unwrap(), ["shared.dll"]);
        assert_eq!(graph.dependencies("right.dll").unwrap(), ["shared.dll"]);
        assert_eq!(source.reads_of("shared.dll"), 1);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_cycles_terminate() {
        let source = MemorySource::new()
            .with("a.dll", dll(&["b.dll"]))
            .with("b.dll", dll(&["a.dll"]));
        let graph = discover(root(&["a.dll"]), &source, &Exclusions::none()).unwrap();

        assert_eq!(graph.dependencies("a.dll").unwrap(), ["b.dll"]);
        assert_eq!(graph.dependencies("b.dll").unwrap(), ["a.dll"]);
        assert_eq!(source.reads_of("a.dll"), 1);
    }

    #[test]
    fn test_root_is_never_a_dependency() {
        let source = MemorySource::new()
            .with("dep1.dll", dll(&["ext.pyd"]))
            .with("ext.pyd", dll(&[]));
        let graph = discover(root(&["dep1.dll"]), &source, &Exclusions::none()).unwrap();

        assert!(graph.dependencies("dep1.dll").unwrap().is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_excluded_names_never_become_nodes() {
        let source = MemorySource::new()
            .with("python311.dll", dll(&[]))
            .with("api-ms-win-crt-runtime-l1-1-0.dll", dll(&[]))
            .with("dep1.dll", dll(&["python311.dll"]));
        let graph = discover(
            root(&["python311.dll", "api-ms-win-crt-runtime-l1-1-0.dll", "dep1.dll"]),
            &source,
            &Exclusions::windows_defaults(),
        )
        .unwrap();

        assert_eq!(graph.dependencies("ext.pyd").unwrap(), ["dep1.dll"]);
        assert!(!graph.contains("python311.dll"));
        assert!(!graph.contains("api-ms-win-crt-runtime-l1-1-0.dll"));
        assert_eq!(source.reads_of("python311.dll"), 0);
    }

    #[test]
    fn test_unparseable_dependency_is_fatal() {
        let source = MemorySource::new()
            .with("dep1.dll", dll(&["broken.dll"]))
            .with("broken.dll", b"definitely not a PE image, but long enough to have a DOS header region at all".to_vec());
        let err = discover(root(&["dep1.dll"]), &source, &Exclusions::none()).unwrap_err();

        match err {
            Error::Discovery { module, .. } => assert_eq!(module, "broken.dll"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_candidate_lookup_is_exact() {
        let source = MemorySource::new().with("dep1.dll", dll(&[]));
        let graph = discover(root(&["DEP1.DLL"]), &source, &Exclusions::none()).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_exclusions_anchor_at_start() {
        let excl = Exclusions::new(["python3.*\\.dll"]).unwrap();
        assert!(excl.is_excluded("python311.dll"));
        assert!(!excl.is_excluded("libpython311.dll"));

        let excl = Exclusions::new(["^vcruntime"]).unwrap();
        assert!(excl.is_excluded("vcruntime140.dll"));

        assert!(matches!(
            Exclusions::new(["("]),
            Err(Error::InvalidExcludePattern { .. })
        ));
    }

    #[test]
    fn test_windows_defaults_keep_every_pattern() {
        let excl = Exclusions::windows_defaults();
        assert_eq!(excl.len(), DEFAULT_WINDOWS_EXCLUDES.len());
        assert!(excl.is_excluded("python3.dll"));
        assert!(excl.is_excluded("python311.dll"));
        assert!(excl.is_excluded("api-ms-win-crt-runtime-l1-1-0.dll"));
        assert!(!excl.is_excluded("zlib1.dll"));
    }

    #[test]
    fn test_fs_module_source_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dep1.dll"), dll(&[])).unwrap();
        fs::create_dir(dir.path().join("subdir.dll")).unwrap();

        let source = FsModuleSource::open(dir.path()).unwrap();
        assert!(source.contains("dep1.dll"));
        assert!(!source.contains("subdir.dll"));
        assert_eq!(source.path_of("dep1.dll"), dir.path().join("dep1.dll"));
        assert_eq!(source.read("dep1.dll").unwrap(), dll(&[]));
    }
}
