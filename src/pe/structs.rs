//! PE/COFF binary structures.
//!
//! These structures match the on-disk format of PE images. Only the fixed
//! layout records are modelled here; the optional header differs between
//! PE32 and PE32+ and is read field by field in [`super::PeContext`].

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::constants::*;

// =============================================================================
// DOS / COFF Headers
// =============================================================================

/// Legacy MS-DOS header prefix.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DosHeader {
    /// Magic number (IMAGE_DOS_SIGNATURE)
    pub e_magic: u16,
    /// Fields of the DOS stub header that PE loaders ignore
    pub e_reserved: [u16; 29],
    /// File offset of the PE signature
    pub e_lfanew: u32,
}

impl DosHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 64;

    /// Returns true if the magic is "MZ".
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.e_magic == IMAGE_DOS_SIGNATURE
    }
}

/// COFF file header, following the PE signature.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct CoffHeader {
    /// Target machine
    pub machine: u16,
    /// Number of entries in the section table
    pub number_of_sections: u16,
    /// Link time stamp
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table (deprecated)
    pub pointer_to_symbol_table: u32,
    /// Number of COFF symbols (deprecated)
    pub number_of_symbols: u32,
    /// Size of the optional header that follows
    pub size_of_optional_header: u16,
    /// Image characteristics
    pub characteristics: u16,
}

impl CoffHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 20;
}

/// One entry of the optional header's data directory array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DataDirectory {
    /// RVA of the table (a file offset for the certificate table)
    pub virtual_address: u32,
    /// Size of the table in bytes
    pub size: u32,
}

impl DataDirectory {
    /// Size of a data directory entry.
    pub const SIZE: usize = 8;

    /// Returns true if the directory is absent.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0
    }
}

// =============================================================================
// Section Header
// =============================================================================

/// Section table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SectionHeader {
    /// Section name (8 bytes, null-padded)
    pub name: [u8; 8],
    /// Size of the section when loaded
    pub virtual_size: u32,
    /// RVA of the section
    pub virtual_address: u32,
    /// Size of the initialized data on disk
    pub size_of_raw_data: u32,
    /// File offset of the section data
    pub pointer_to_raw_data: u32,
    /// File offset of relocations (object files only)
    pub pointer_to_relocations: u32,
    /// File offset of line numbers (deprecated)
    pub pointer_to_linenumbers: u32,
    /// Number of relocations
    pub number_of_relocations: u16,
    /// Number of line numbers
    pub number_of_linenumbers: u16,
    /// Section characteristics
    pub characteristics: u32,
}

impl SectionHeader {
    /// Size of a section header.
    pub const SIZE: usize = 40;

    /// Returns the section name as a string.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Sets the section name from a string (truncated to 8 bytes).
    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; 8];
        let bytes = name.as_bytes();
        let len = bytes.len().min(8);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    /// Returns the parsed characteristic flags.
    #[inline]
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_retain(self.characteristics)
    }

    /// Returns true if `rva` falls inside the loaded extent of the section.
    #[inline]
    pub fn contains_rva(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && (rva - self.virtual_address) < extent
    }
}

impl Default for SectionHeader {
    fn default() -> Self {
        Self {
            name: [0u8; 8],
            virtual_size: 0,
            virtual_address: 0,
            size_of_raw_data: 0,
            pointer_to_raw_data: 0,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: 0,
        }
    }
}

// =============================================================================
// Import Descriptors
// =============================================================================

/// IMAGE_IMPORT_DESCRIPTOR: one entry per imported DLL.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ImportDescriptor {
    /// RVA of the import lookup table
    pub original_first_thunk: u32,
    /// Bind time stamp (0 if not bound)
    pub time_date_stamp: u32,
    /// Index of the first forwarder reference
    pub forwarder_chain: u32,
    /// RVA of the NUL-terminated DLL name
    pub name: u32,
    /// RVA of the import address table
    pub first_thunk: u32,
}

impl ImportDescriptor {
    /// Size of an import descriptor.
    pub const SIZE: usize = 20;

    /// Returns true for the all-zero terminator entry.
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.original_first_thunk == 0
            && self.time_date_stamp == 0
            && self.forwarder_chain == 0
            && self.name == 0
            && self.first_thunk == 0
    }
}

/// IMAGE_DELAYLOAD_DESCRIPTOR: one entry per delay-loaded DLL.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DelayImportDescriptor {
    /// Attribute flags (bit 0 set: fields are RVAs)
    pub attributes: u32,
    /// RVA (or VA) of the NUL-terminated DLL name
    pub dll_name_rva: u32,
    /// RVA of the module handle slot
    pub module_handle_rva: u32,
    /// RVA of the delay import address table
    pub import_address_table_rva: u32,
    /// RVA of the delay import name table
    pub import_name_table_rva: u32,
    /// RVA of the bound delay import table
    pub bound_import_address_table_rva: u32,
    /// RVA of the unload delay import table
    pub unload_information_table_rva: u32,
    /// Bind time stamp
    pub time_date_stamp: u32,
}

impl DelayImportDescriptor {
    /// Size of a delay-load descriptor.
    pub const SIZE: usize = 32;

    /// Returns true for the all-zero terminator entry.
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.attributes == 0 && self.dll_name_rva == 0 && self.import_address_table_rva == 0
    }

    /// Returns true if the descriptor uses RVAs rather than VAs.
    #[inline]
    pub fn is_rva_based(&self) -> bool {
        self.attributes & DELAY_ATTRIBUTE_RVA_BASED != 0
    }
}
