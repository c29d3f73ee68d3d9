//! Content-hashed names for vendored libraries.

use sha2::{Digest, Sha256};

use super::graph::{DependencyGraph, ModuleSource};
use crate::error::{Error, Result};

/// Default number of hex digits of the digest kept in a canonical name.
pub const DEFAULT_HASH_LEN: usize = 8;

/// Hex digits in a full SHA-256 digest.
pub const MAX_HASH_LEN: usize = 64;

/// Checks that `hash_len` selects between one digit and the whole digest.
pub fn check_hash_len(hash_len: usize) -> Result<usize> {
    if hash_len == 0 || hash_len > MAX_HASH_LEN {
        return Err(Error::InvalidHashLength {
            value: hash_len,
            max: MAX_HASH_LEN,
        });
    }
    Ok(hash_len)
}

/// Splits a basename into stem and extension (including the dot).
///
/// A leading dot does not start an extension, so `.hidden` has no extension.
pub fn split_extension(basename: &str) -> (&str, &str) {
    match basename.rfind('.') {
        Some(0) | None => (basename, ""),
        Some(idx) => basename.split_at(idx),
    }
}

/// Computes `<stem>-<sha256 prefix><ext>` for a library.
///
/// `hash_len` is expected to have passed [`check_hash_len`].
pub fn canonical_name(basename: &str, content: &[u8], hash_len: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(content));
    let hash = &digest[..hash_len.clamp(1, digest.len())];
    let (stem, ext) = split_extension(basename);
    format!("{stem}-{hash}{ext}")
}

/// Original dependency basename to canonical name, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameMap {
    entries: Vec<(String, String)>,
}

impl RenameMap {
    /// Names every dependency of the graph; the primary module is left out.
    pub fn compute(
        graph: &DependencyGraph,
        source: &dyn ModuleSource,
        hash_len: usize,
    ) -> Result<Self> {
        Self::load(graph, source, hash_len).map(|(map, _)| map)
    }

    /// Reads every dependency of the graph and names it.
    ///
    /// The contents are returned in the order of
    /// [`DependencyGraph::dependency_nodes`].
    pub fn load(
        graph: &DependencyGraph,
        source: &dyn ModuleSource,
        hash_len: usize,
    ) -> Result<(Self, Vec<Vec<u8>>)> {
        check_hash_len(hash_len)?;
        let contents = graph
            .dependency_nodes()
            .map(|node| {
                let name = &node.module.basename;
                source.read(name).map_err(|e| Error::discovery(name, e))
            })
            .collect::<Result<Vec<_>>>()?;
        let map = Self::from_contents(
            graph
                .dependency_nodes()
                .zip(&contents)
                .map(|(node, data)| (node.module.basename.as_str(), data.as_slice())),
            hash_len,
        );
        Ok((map, contents))
    }

    /// Names libraries whose contents are already loaded.
    pub fn from_contents<'a, I>(libraries: I, hash_len: usize) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let entries = libraries
            .into_iter()
            .map(|(name, content)| (name.to_string(), canonical_name(name, content, hash_len)))
            .collect();
        Self { entries }
    }

    /// Returns the canonical name for `original`.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(from, _)| from == original)
            .map(|(_, to)| to.as_str())
    }

    /// Restricts the map to `names`, keeping the order of `names`.
    pub fn mapping_for(&self, names: &[String]) -> Vec<(String, String)> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|to| (name.clone(), to.to_string())))
            .collect()
    }

    /// Iterates `(original, canonical)` pairs in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    /// Returns the number of renamed libraries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is renamed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
