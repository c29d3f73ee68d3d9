//! Import table rewriting.
//!
//! Renamed libraries always have longer names than the originals, so the
//! new names cannot be written over the old strings. Instead a small section
//! holding the new names is appended to the image and each matching import
//! descriptor is pointed at its new string. Nothing else in the image moves.

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::pe::{
    PeContext, SectionFlags, IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT, RENAMED_NAMES_SECTION,
};

// =============================================================================
// Actions
// =============================================================================

/// What happens to one binary on its way into the repaired wheel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The binary references no renamed library and is copied verbatim.
    Copy,
    /// The binary's import table is rewritten with this `(old, new)` mapping.
    Mangle(Vec<(String, String)>),
}

impl Action {
    /// Selects the action for a binary given the renames relevant to it.
    pub fn for_mapping(mapping: Vec<(String, String)>) -> Self {
        if mapping.is_empty() {
            Action::Copy
        } else {
            Action::Mangle(mapping)
        }
    }

    /// Returns the verb printed for this action.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Copy => "copy",
            Action::Mangle(_) => "mangle",
        }
    }

    /// Produces the output bytes for `module`.
    pub fn apply(&self, module: &str, data: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Action::Copy => Ok(data),
            Action::Mangle(mapping) => {
                mangle_binary(&data, mapping).map_err(|e| Error::rewrite(module, e))
            }
        }
    }
}

/// An [`Action`] bound to a concrete binary.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Where the original bytes come from
    pub source: PathBuf,
    /// Archive member path the output is written to
    pub destination: String,
    /// How the bytes are transformed
    pub action: Action,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.action.verb(),
            self.source.display(),
            self.destination
        )
    }
}

// =============================================================================
// Mangling
// =============================================================================

fn validate_replacement(name: &str) -> Result<()> {
    if name.is_empty() || !name.is_ascii() || name.contains('\0') {
        return Err(Error::InvalidReplacementName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Rewrites the import and delay-load tables of a PE image.
///
/// Every `old` name in `mapping` must be referenced by at least one
/// descriptor (compared ASCII case-insensitively). Names outside the
/// mapping keep pointing at their original strings.
pub fn mangle_binary(data: &[u8], mapping: &[(String, String)]) -> Result<Vec<u8>> {
    for (_, new) in mapping {
        validate_replacement(new)?;
    }

    let mut pe = PeContext::new(data)?;

    // For each descriptor, the index of the mapping entry that renames it.
    let mut patches: Vec<(usize, usize)> = Vec::new();
    for (idx, (old, _)) in mapping.iter().enumerate() {
        let before = patches.len();
        for (entry_idx, entry) in pe.imports.iter().enumerate() {
            if entry.name.eq_ignore_ascii_case(old) {
                patches.push((entry_idx, idx));
            }
        }
        if patches.len() == before {
            return Err(Error::MappedNameNotFound { name: old.clone() });
        }
    }

    clear_bound_imports(&mut pe)?;

    let mut blob = Vec::new();
    let mut string_offsets = Vec::with_capacity(mapping.len());
    for (_, new) in mapping {
        string_offsets.push(blob.len() as u32);
        blob.extend_from_slice(new.as_bytes());
        blob.push(0);
    }

    let section_rva = pe.append_section(
        RENAMED_NAMES_SECTION,
        &blob,
        SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ,
    )?;

    let image_base = pe.optional.image_base;
    for (entry_idx, map_idx) in patches {
        let entry = &pe.imports[entry_idx];
        let rva = section_rva + string_offsets[map_idx];
        let value = if entry.va_based {
            u32::try_from(image_base + rva as u64).map_err(|_| {
                Error::parse(entry.name_field_offset, "delay-load name VA overflows 32 bits")
            })?
        } else {
            rva
        };
        debug!(
            "{} -> {} at {:#x}",
            entry.name, mapping[map_idx].1, entry.name_field_offset
        );
        let offset = entry.name_field_offset;
        pe.write_u32(offset, value)?;
    }

    pe.clear_checksum()?;
    Ok(pe.into_bytes())
}

/// Drops the bound import table; its entries are keyed by the old names.
fn clear_bound_imports(pe: &mut PeContext) -> Result<()> {
    let Some(dir) = pe.optional.directory(IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT) else {
        return Ok(());
    };

    let start = dir.virtual_address as usize;
    let end = start + dir.size as usize;
    if end <= pe.optional.size_of_headers as usize && end <= pe.data.len() {
        pe.data[start..end].fill(0);
    }
    pe.clear_directory(IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT)
}
