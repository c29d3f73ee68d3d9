//! Synthetic PE images for unit tests.
//!
//! The images have a single `.idata` section holding the import and
//! delay-load descriptors followed by the DLL name strings. Thunk tables are
//! left empty; nothing in this crate reads them.

use zerocopy::IntoBytes;

use super::constants::*;
use super::structs::*;
use crate::util::{align_up, write_u16_le_at, write_u32_le_at};

const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x1000;
const IDATA_RVA: u32 = 0x1000;
const PE_OFFSET: usize = 0x40;
const IMAGE_BASE: u64 = 0x1_8000_0000;
const IMAGE_BASE_PE32: u32 = 0x1000_0000;

/// Builder for a minimal PE image with a configurable import table.
#[derive(Debug, Clone, Default)]
pub struct PeFixture {
    pe32: bool,
    imports: Vec<String>,
    delay_imports: Vec<String>,
    va_based_delay: bool,
    bound_imports: bool,
    crowd_headers: bool,
    overlay: Vec<u8>,
}

impl PeFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a PE32 image instead of PE32+.
    pub fn pe32(mut self) -> Self {
        self.pe32 = true;
        self
    }

    pub fn import(mut self, name: &str) -> Self {
        self.imports.push(name.to_string());
        self
    }

    pub fn delay_import(mut self, name: &str) -> Self {
        self.delay_imports.push(name.to_string());
        self
    }

    /// Emits delay descriptors in the legacy VA-based form.
    pub fn va_based_delay(mut self) -> Self {
        self.va_based_delay = true;
        self
    }

    /// Places a bound import table in the header slack.
    pub fn bound_imports(mut self) -> Self {
        self.bound_imports = true;
        self
    }

    /// Fills the header slack with non-zero bytes.
    pub fn crowd_headers(mut self) -> Self {
        self.crowd_headers = true;
        self
    }

    /// Appends trailing data after the last section.
    pub fn overlay(mut self, bytes: &[u8]) -> Self {
        self.overlay = bytes.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let optional_size: usize = if self.pe32 { 224 } else { 240 };
        let optional_offset = PE_OFFSET + 4 + CoffHeader::SIZE;
        let section_table = optional_offset + optional_size;
        let headers_end = section_table + SectionHeader::SIZE;
        let size_of_headers = align_up(headers_end as u64, FILE_ALIGNMENT as u64) as u32;

        let idata = self.build_idata();
        let raw_size = align_up(idata.len().max(1) as u64, FILE_ALIGNMENT as u64) as u32;
        let raw_ptr = size_of_headers;

        let mut data = vec![0u8; (raw_ptr + raw_size) as usize];

        // DOS header
        let dos = DosHeader {
            e_magic: IMAGE_DOS_SIGNATURE,
            e_reserved: [0u16; 29],
            e_lfanew: PE_OFFSET as u32,
        };
        data[..DosHeader::SIZE].copy_from_slice(dos.as_bytes());

        // PE signature + COFF header
        write_u32_le_at(&mut data, PE_OFFSET, IMAGE_NT_SIGNATURE);
        let coff = CoffHeader {
            machine: if self.pe32 {
                IMAGE_FILE_MACHINE_I386
            } else {
                IMAGE_FILE_MACHINE_AMD64
            },
            number_of_sections: 1,
            time_date_stamp: 0x6500_0000,
            pointer_to_symbol_table: 0,
            number_of_symbols: 0,
            size_of_optional_header: optional_size as u16,
            characteristics: 0x2022,
        };
        data[PE_OFFSET + 4..optional_offset].copy_from_slice(coff.as_bytes());

        // Optional header
        let opt = optional_offset;
        let magic = if self.pe32 {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC
        } else {
            IMAGE_NT_OPTIONAL_HDR64_MAGIC
        };
        write_u16_le_at(&mut data, opt, magic);
        write_u32_le_at(&mut data, opt + OPT_SIZE_OF_INITIALIZED_DATA, raw_size);
        if self.pe32 {
            write_u32_le_at(&mut data, opt + OPT_IMAGE_BASE_PE32, IMAGE_BASE_PE32);
        } else {
            data[opt + OPT_IMAGE_BASE_PE32_PLUS..opt + OPT_IMAGE_BASE_PE32_PLUS + 8]
                .copy_from_slice(&IMAGE_BASE.to_le_bytes());
        }
        write_u32_le_at(&mut data, opt + OPT_SECTION_ALIGNMENT, SECTION_ALIGNMENT);
        write_u32_le_at(&mut data, opt + OPT_FILE_ALIGNMENT, FILE_ALIGNMENT);
        write_u32_le_at(&mut data, opt + OPT_SIZE_OF_IMAGE, IDATA_RVA + SECTION_ALIGNMENT);
        write_u32_le_at(&mut data, opt + OPT_SIZE_OF_HEADERS, size_of_headers);
        write_u32_le_at(&mut data, opt + OPT_CHECKSUM, 0xDEAD_BEEF);
        let (count_offset, dirs_offset) = if self.pe32 {
            (OPT_NUMBER_OF_RVA_AND_SIZES_PE32, OPT_DATA_DIRECTORIES_PE32)
        } else {
            (
                OPT_NUMBER_OF_RVA_AND_SIZES_PE32_PLUS,
                OPT_DATA_DIRECTORIES_PE32_PLUS,
            )
        };
        write_u32_le_at(
            &mut data,
            opt + count_offset,
            IMAGE_NUMBEROF_DIRECTORY_ENTRIES as u32,
        );

        let dir = |index: usize| opt + dirs_offset + index * DataDirectory::SIZE;
        if !self.imports.is_empty() {
            let size = ((self.imports.len() + 1) * ImportDescriptor::SIZE) as u32;
            write_u32_le_at(&mut data, dir(IMAGE_DIRECTORY_ENTRY_IMPORT), IDATA_RVA);
            write_u32_le_at(&mut data, dir(IMAGE_DIRECTORY_ENTRY_IMPORT) + 4, size);
        }
        if !self.delay_imports.is_empty() {
            let size = ((self.delay_imports.len() + 1) * DelayImportDescriptor::SIZE) as u32;
            let rva = IDATA_RVA + self.delay_table_offset() as u32;
            write_u32_le_at(&mut data, dir(IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT), rva);
            write_u32_le_at(&mut data, dir(IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT) + 4, size);
        }

        // Section table
        let mut idata_header = SectionHeader {
            virtual_size: idata.len() as u32,
            virtual_address: IDATA_RVA,
            size_of_raw_data: raw_size,
            pointer_to_raw_data: raw_ptr,
            characteristics: (SectionFlags::CNT_INITIALIZED_DATA
                | SectionFlags::MEM_READ
                | SectionFlags::MEM_WRITE)
                .bits(),
            ..Default::default()
        };
        idata_header.set_name(".idata");
        data[section_table..headers_end].copy_from_slice(idata_header.as_bytes());

        if self.bound_imports {
            // IMAGE_BOUND_IMPORT_DESCRIPTOR stand-in: non-zero bytes keyed by old names.
            let bound = [0x5Au8; 16];
            data[headers_end..headers_end + bound.len()].copy_from_slice(&bound);
            write_u32_le_at(
                &mut data,
                dir(IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT),
                headers_end as u32,
            );
            write_u32_le_at(
                &mut data,
                dir(IMAGE_DIRECTORY_ENTRY_BOUND_IMPORT) + 4,
                bound.len() as u32,
            );
        }
        if self.crowd_headers {
            data[headers_end..size_of_headers as usize].fill(0xCC);
        }

        let start = raw_ptr as usize;
        data[start..start + idata.len()].copy_from_slice(&idata);
        data.extend_from_slice(&self.overlay);
        data
    }

    fn delay_table_offset(&self) -> usize {
        if self.imports.is_empty() {
            0
        } else {
            (self.imports.len() + 1) * ImportDescriptor::SIZE
        }
    }

    fn build_idata(&self) -> Vec<u8> {
        let delay_table = self.delay_table_offset();
        let names_offset = delay_table
            + if self.delay_imports.is_empty() {
                0
            } else {
                (self.delay_imports.len() + 1) * DelayImportDescriptor::SIZE
            };

        let mut names = Vec::new();
        let mut name_rva = |name: &str| {
            let rva = IDATA_RVA + (names_offset + names.len()) as u32;
            names.extend_from_slice(name.as_bytes());
            names.push(0);
            rva
        };

        let mut tables = Vec::new();
        for name in &self.imports {
            let desc = ImportDescriptor {
                original_first_thunk: 0,
                time_date_stamp: 0,
                forwarder_chain: 0,
                name: name_rva(name),
                first_thunk: IDATA_RVA,
            };
            tables.extend_from_slice(desc.as_bytes());
        }
        if !self.imports.is_empty() {
            tables.extend_from_slice(&[0u8; ImportDescriptor::SIZE]);
        }

        let image_base = if self.pe32 { IMAGE_BASE_PE32 as u64 } else { IMAGE_BASE };
        for name in &self.delay_imports {
            let rva = name_rva(name);
            let (attributes, dll_name_rva) = if self.va_based_delay {
                (0, (image_base + rva as u64) as u32)
            } else {
                (DELAY_ATTRIBUTE_RVA_BASED, rva)
            };
            let desc = DelayImportDescriptor {
                attributes,
                dll_name_rva,
                module_handle_rva: 0,
                import_address_table_rva: IDATA_RVA,
                import_name_table_rva: 0,
                bound_import_address_table_rva: 0,
                unload_information_table_rva: 0,
                time_date_stamp: 0,
            };
            tables.extend_from_slice(desc.as_bytes());
        }
        if !self.delay_imports.is_empty() {
            tables.extend_from_slice(&[0u8; DelayImportDescriptor::SIZE]);
        }

        debug_assert_eq!(tables.len(), names_offset);
        tables.extend_from_slice(&names);
        tables
    }
}
