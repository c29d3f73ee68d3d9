//! PE/COFF constants and flags.

use bitflags::bitflags;

// =============================================================================
// Magic Numbers
// =============================================================================

/// DOS header magic ("MZ")
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;

/// PE signature ("PE\0\0")
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

/// Optional header magic for 32-bit images
pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10B;

/// Optional header magic for 64-bit images
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20B;

/// Offset of `e_lfanew` within the DOS header.
pub const DOS_LFANEW_OFFSET: usize = 0x3C;

// =============================================================================
// Machine Types
// =============================================================================

/// x86
pub const IMAGE_FILE_MACHINE_I386: u16 = 0x014C;
/// x86-64
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
/// ARM64
pub const IMAGE_FILE_MACHINE_ARM64: u16 = 0xAA64;

// =============================================================================
// Data Directory Indices
// =============================================================================

/// Export table
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
/// Import table
pub const IMAGE_DIRECTORY_ENTRY_IMPORT: usize = 1;
/// Certificate table (file offset, not an RVA)
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;
/// Bound import table
pub const IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT: usize = 11;
/// Delay-load import descriptors
pub const IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT: usize = 13;

/// Number of data directories in a standard optional header.
pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;

// =============================================================================
// Optional Header Field Offsets
// =============================================================================
//
// Offsets are relative to the start of the optional header. Fields before
// ImageBase share a layout across PE32 and PE32+.

/// SizeOfInitializedData
pub const OPT_SIZE_OF_INITIALIZED_DATA: usize = 8;
/// ImageBase (u32) in PE32
pub const OPT_IMAGE_BASE_PE32: usize = 28;
/// ImageBase (u64) in PE32+
pub const OPT_IMAGE_BASE_PE32_PLUS: usize = 24;
/// SectionAlignment
pub const OPT_SECTION_ALIGNMENT: usize = 32;
/// FileAlignment
pub const OPT_FILE_ALIGNMENT: usize = 36;
/// SizeOfImage
pub const OPT_SIZE_OF_IMAGE: usize = 56;
/// SizeOfHeaders
pub const OPT_SIZE_OF_HEADERS: usize = 60;
/// CheckSum
pub const OPT_CHECKSUM: usize = 64;
/// NumberOfRvaAndSizes in PE32
pub const OPT_NUMBER_OF_RVA_AND_SIZES_PE32: usize = 92;
/// NumberOfRvaAndSizes in PE32+
pub const OPT_NUMBER_OF_RVA_AND_SIZES_PE32_PLUS: usize = 108;
/// First data directory in PE32
pub const OPT_DATA_DIRECTORIES_PE32: usize = 96;
/// First data directory in PE32+
pub const OPT_DATA_DIRECTORIES_PE32_PLUS: usize = 112;

// =============================================================================
// COFF Header Field Offsets
// =============================================================================

/// NumberOfSections within the COFF file header
pub const COFF_NUMBER_OF_SECTIONS: usize = 2;

// =============================================================================
// Import Descriptor Field Offsets
// =============================================================================

/// Name RVA within IMAGE_IMPORT_DESCRIPTOR
pub const IMPORT_DESCRIPTOR_NAME: usize = 12;

/// DllNameRVA within IMAGE_DELAYLOAD_DESCRIPTOR
pub const DELAY_DESCRIPTOR_DLL_NAME: usize = 4;

/// Delay-load attribute: descriptor fields are RVAs rather than VAs.
pub const DELAY_ATTRIBUTE_RVA_BASED: u32 = 0x1;

/// Upper bound on descriptors walked in one table; real images stay far below.
pub const MAX_IMPORT_DESCRIPTORS: usize = 0x4000;

// =============================================================================
// Section Characteristics
// =============================================================================

bitflags! {
    /// Section characteristic flags (`IMAGE_SCN_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// Section contains executable code
        const CNT_CODE = 0x0000_0020;
        /// Section contains initialized data
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        /// Section contains uninitialized data
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        /// Section can be discarded as needed
        const MEM_DISCARDABLE = 0x0200_0000;
        /// Section can be shared in memory
        const MEM_SHARED = 0x1000_0000;
        /// Section can be executed as code
        const MEM_EXECUTE = 0x2000_0000;
        /// Section can be read
        const MEM_READ = 0x4000_0000;
        /// Section can be written to
        const MEM_WRITE = 0x8000_0000;
    }
}

/// Name of the section appended by the mangler to hold renamed DLL names.
pub const RENAMED_NAMES_SECTION: &str = ".dllnm";

/// Returns a human readable machine name.
pub fn machine_name(machine: u16) -> &'static str {
    match machine {
        IMAGE_FILE_MACHINE_I386 => "x86",
        IMAGE_FILE_MACHINE_AMD64 => "x86_64",
        IMAGE_FILE_MACHINE_ARM64 => "arm64",
        _ => "unknown",
    }
}
