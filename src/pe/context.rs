//! PE context for reading and modifying PE images.

use zerocopy::{FromBytes, Immutable, IntoBytes};

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::{align_up, read_cstr_at, read_u16_le_at, read_u32_le_at, read_u64_le_at};

// =============================================================================
// Optional Header Info
// =============================================================================

/// Optional header flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeKind {
    /// 32-bit image (PE32)
    Pe32,
    /// 64-bit image (PE32+)
    Pe32Plus,
}

impl PeKind {
    fn from_magic(magic: u16) -> Result<Self> {
        match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => Ok(PeKind::Pe32),
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => Ok(PeKind::Pe32Plus),
            other => Err(Error::UnsupportedOptionalHeader(other)),
        }
    }

    fn rva_count_offset(self) -> usize {
        match self {
            PeKind::Pe32 => OPT_NUMBER_OF_RVA_AND_SIZES_PE32,
            PeKind::Pe32Plus => OPT_NUMBER_OF_RVA_AND_SIZES_PE32_PLUS,
        }
    }

    fn data_directories_offset(self) -> usize {
        match self {
            PeKind::Pe32 => OPT_DATA_DIRECTORIES_PE32,
            PeKind::Pe32Plus => OPT_DATA_DIRECTORIES_PE32_PLUS,
        }
    }
}

/// The optional header fields the repair pipeline relies on.
#[derive(Debug, Clone)]
pub struct OptionalHeaderInfo {
    /// PE32 or PE32+
    pub kind: PeKind,
    /// File offset of the optional header
    pub offset: usize,
    /// Preferred load address
    pub image_base: u64,
    /// Section alignment in memory
    pub section_alignment: u32,
    /// Raw data alignment on disk
    pub file_alignment: u32,
    /// Size of the loaded image
    pub size_of_image: u32,
    /// Combined size of all headers, rounded to the file alignment
    pub size_of_headers: u32,
    /// Data directory entries
    pub data_directories: Vec<DataDirectory>,
}

impl OptionalHeaderInfo {
    /// Returns the data directory at `index`, if present and non-empty.
    pub fn directory(&self, index: usize) -> Option<DataDirectory> {
        self.data_directories
            .get(index)
            .copied()
            .filter(|dir| !dir.is_empty())
    }

    /// File offset of the data directory entry at `index`.
    pub fn directory_offset(&self, index: usize) -> usize {
        self.offset + self.kind.data_directories_offset() + index * DataDirectory::SIZE
    }
}

// =============================================================================
// Section / Import Info
// =============================================================================

/// Parsed section information.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    /// The section header
    pub header: SectionHeader,
    /// Offset of the section header in the file
    pub header_offset: usize,
}

impl SectionInfo {
    /// Returns the section name.
    pub fn name(&self) -> &str {
        self.header.name()
    }
}

/// Which import table an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Regular import directory
    Normal,
    /// Delay-load import directory
    Delay,
}

/// One imported DLL reference.
#[derive(Debug, Clone)]
pub struct ImportEntry {
    /// The DLL name as stored in the image
    pub name: String,
    /// Which import directory holds the descriptor
    pub kind: ImportKind,
    /// File offset of the descriptor's name field
    pub name_field_offset: usize,
    /// True if the name field holds a VA instead of an RVA
    pub va_based: bool,
}

// =============================================================================
// PE Context
// =============================================================================

/// Context for working with a PE image.
///
/// This provides a high-level interface for reading and modifying PE
/// images: headers, sections, and the import/delay-import descriptors.
#[derive(Debug)]
pub struct PeContext {
    /// The COFF file header
    pub coff: CoffHeader,
    /// File offset of the COFF file header
    pub coff_offset: usize,
    /// Parsed optional header fields
    pub optional: OptionalHeaderInfo,
    /// Parsed sections in table order
    pub sections: Vec<SectionInfo>,
    /// Imported DLLs, regular imports first, in descriptor order
    pub imports: Vec<ImportEntry>,
    /// Mutable copy of the image data
    pub data: Vec<u8>,
}

impl PeContext {
    /// Parses a PE image from raw data (the data is copied).
    pub fn new(data: &[u8]) -> Result<Self> {
        if data.len() < DosHeader::SIZE {
            return Err(Error::buffer_too_small(DosHeader::SIZE, data.len()));
        }

        let dos = DosHeader::read_from_prefix(data)
            .map_err(|_| Error::parse(0, "failed to parse DOS header"))?
            .0;
        if !dos.is_valid() {
            return Err(Error::InvalidDosMagic(dos.e_magic));
        }

        let pe_offset = dos.e_lfanew as usize;
        let coff_offset = pe_offset + 4;
        if coff_offset + CoffHeader::SIZE > data.len() {
            return Err(Error::buffer_too_small(
                coff_offset + CoffHeader::SIZE,
                data.len(),
            ));
        }
        if read_u32_le_at(data, pe_offset) != IMAGE_NT_SIGNATURE {
            return Err(Error::InvalidPeSignature { offset: pe_offset });
        }

        let coff = CoffHeader::read_from_prefix(&data[coff_offset..])
            .map_err(|_| Error::parse(coff_offset, "failed to parse COFF header"))?
            .0;

        let optional_offset = coff_offset + CoffHeader::SIZE;
        let optional = parse_optional_header(data, optional_offset, coff.size_of_optional_header)?;

        let mut ctx = Self {
            coff,
            coff_offset,
            optional,
            sections: Vec::new(),
            imports: Vec::new(),
            data: data.to_vec(),
        };

        ctx.parse_sections()?;
        ctx.parse_imports()?;

        Ok(ctx)
    }

    /// File offset of the first section header.
    pub fn section_table_offset(&self) -> usize {
        self.coff_offset + CoffHeader::SIZE + self.coff.size_of_optional_header as usize
    }

    fn parse_sections(&mut self) -> Result<()> {
        let table = self.section_table_offset();
        let count = self.coff.number_of_sections as usize;
        let end = table + count * SectionHeader::SIZE;
        if end > self.data.len() {
            return Err(Error::buffer_too_small(end, self.data.len()));
        }

        self.sections = (0..count)
            .map(|i| {
                let header_offset = table + i * SectionHeader::SIZE;
                SectionHeader::read_from_prefix(&self.data[header_offset..])
                    .map(|(header, _)| SectionInfo {
                        header,
                        header_offset,
                    })
                    .map_err(|_| Error::parse(header_offset, "failed to parse section header"))
            })
            .collect::<Result<_>>()?;

        Ok(())
    }

    fn parse_imports(&mut self) -> Result<()> {
        let mut imports = Vec::new();

        if let Some(dir) = self.optional.directory(IMAGE_DIRECTORY_ENTRY_IMPORT) {
            let mut offset = self.rva_to_offset(dir.virtual_address)?;
            for _ in 0..MAX_IMPORT_DESCRIPTORS {
                let desc = self.read_struct::<ImportDescriptor>(offset)?;
                if desc.is_terminator() {
                    break;
                }
                // Some linkers emit a trailing descriptor with only thunks set.
                if desc.name != 0 {
                    imports.push(ImportEntry {
                        name: self.read_dll_name(desc.name)?,
                        kind: ImportKind::Normal,
                        name_field_offset: offset + IMPORT_DESCRIPTOR_NAME,
                        va_based: false,
                    });
                }
                offset += ImportDescriptor::SIZE;
            }
        }

        if let Some(dir) = self.optional.directory(IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT) {
            let mut offset = self.rva_to_offset(dir.virtual_address)?;
            for _ in 0..MAX_IMPORT_DESCRIPTORS {
                let desc = self.read_struct::<DelayImportDescriptor>(offset)?;
                if desc.is_terminator() {
                    break;
                }
                let va_based = !desc.is_rva_based();
                let rva = if va_based {
                    self.va_to_rva(desc.dll_name_rva as u64)?
                } else {
                    desc.dll_name_rva
                };
                imports.push(ImportEntry {
                    name: self.read_dll_name(rva)?,
                    kind: ImportKind::Delay,
                    name_field_offset: offset + DELAY_DESCRIPTOR_DLL_NAME,
                    va_based,
                });
                offset += DelayImportDescriptor::SIZE;
            }
        }

        self.imports = imports;
        Ok(())
    }

    fn read_dll_name(&self, rva: u32) -> Result<String> {
        let offset = self.rva_to_offset(rva)?;
        let bytes = read_cstr_at(&self.data, offset)
            .ok_or_else(|| Error::parse(offset, "unterminated DLL name"))?;
        if !bytes.is_ascii() {
            return Err(Error::parse(offset, "DLL name is not ASCII"));
        }
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn va_to_rva(&self, va: u64) -> Result<u32> {
        va.checked_sub(self.optional.image_base)
            .and_then(|rva| u32::try_from(rva).ok())
            .ok_or_else(|| Error::parse(0, format!("VA {va:#x} is below the image base")))
    }

    /// Returns the imported DLL names in table order, without duplicates.
    pub fn dependencies(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.imports.len());
        for entry in &self.imports {
            if !names.iter().any(|n| n == &entry.name) {
                names.push(entry.name.clone());
            }
        }
        names
    }

    /// Converts an RVA to a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        if rva < self.optional.size_of_headers {
            return Ok(rva as usize);
        }
        let sect = self
            .sections
            .iter()
            .find(|s| s.header.contains_rva(rva))
            .ok_or(Error::RvaNotMapped { rva })?;

        let delta = rva - sect.header.virtual_address;
        if delta >= sect.header.size_of_raw_data {
            // Inside the zero-filled tail; there are no bytes on disk to read.
            return Err(Error::RvaNotMapped { rva });
        }
        Ok(sect.header.pointer_to_raw_data as usize + delta as usize)
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|s| s.name() == name)
    }

    /// Returns the machine name of the image.
    pub fn machine_name(&self) -> &'static str {
        machine_name(self.coff.machine)
    }

    /// Reads data at the specified offset.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if offset + len > self.data.len() {
            return Err(Error::buffer_too_small(offset + len, self.data.len()));
        }
        Ok(&self.data[offset..offset + len])
    }

    /// Reads a u32 at the specified offset.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes = self.read_at(offset, 4)?;
        Ok(read_u32_le_at(bytes, 0))
    }

    /// Reads a structure at the specified offset.
    pub fn read_struct<T: FromBytes>(&self, offset: usize) -> Result<T> {
        let bytes = self.read_at(offset, std::mem::size_of::<T>())?;
        T::read_from_prefix(bytes)
            .map(|(value, _)| value)
            .map_err(|_| Error::parse(offset, "failed to parse structure"))
    }

    /// Writes data at the specified offset.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.data.len() {
            return Err(Error::buffer_too_small(offset + data.len(), self.data.len()));
        }
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Writes a u16 at the specified offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Writes a u32 at the specified offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Writes a structure at the specified offset.
    pub fn write_struct<T: IntoBytes + Immutable>(&mut self, offset: usize, value: &T) -> Result<()> {
        self.write_at(offset, value.as_bytes())
    }

    /// Clears a data directory entry.
    pub fn clear_directory(&mut self, index: usize) -> Result<()> {
        if index >= self.optional.data_directories.len() {
            return Ok(());
        }
        let offset = self.optional.directory_offset(index);
        self.write_struct(offset, &DataDirectory::default())?;
        self.optional.data_directories[index] = DataDirectory::default();
        Ok(())
    }

    /// Zeroes the CheckSum field.
    ///
    /// The loader only verifies the checksum for drivers and boot images.
    pub fn clear_checksum(&mut self) -> Result<()> {
        self.write_u32(self.optional.offset + OPT_CHECKSUM, 0)
    }

    /// Returns the number of bytes free for new section headers.
    ///
    /// The slack runs from the end of the section table to the first byte
    /// that is either past `SizeOfHeaders`, the start of section data, or
    /// non-zero.
    pub fn section_header_slack(&self) -> usize {
        let start = self.section_table_offset() + self.sections.len() * SectionHeader::SIZE;
        let first_raw = self
            .sections
            .iter()
            .map(|s| s.header.pointer_to_raw_data as usize)
            .filter(|&p| p != 0)
            .min()
            .unwrap_or(usize::MAX);
        let limit = (self.optional.size_of_headers as usize)
            .min(first_raw)
            .min(self.data.len());
        if start >= limit {
            return 0;
        }
        self.data[start..limit]
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(limit - start)
    }

    /// Appends a new section holding `contents` and returns its RVA.
    ///
    /// The section data goes at the file-aligned end of the image so every
    /// existing byte keeps its offset. The header goes into the zero slack
    /// after the section table.
    pub fn append_section(
        &mut self,
        name: &str,
        contents: &[u8],
        flags: SectionFlags,
    ) -> Result<u32> {
        let available = self.section_header_slack();
        if available < SectionHeader::SIZE {
            return Err(Error::NoSectionHeaderSpace {
                needed: SectionHeader::SIZE,
                available,
            });
        }

        let section_alignment = self.optional.section_alignment as u64;
        let file_alignment = self.optional.file_alignment as u64;

        let va_end = self
            .sections
            .iter()
            .map(|s| {
                let extent = s.header.virtual_size.max(s.header.size_of_raw_data) as u64;
                align_up(s.header.virtual_address as u64 + extent, section_alignment)
            })
            .max()
            .unwrap_or_else(|| align_up(self.optional.size_of_headers as u64, section_alignment));
        let raw_end = self
            .sections
            .iter()
            .map(|s| s.header.pointer_to_raw_data as u64 + s.header.size_of_raw_data as u64)
            .max()
            .unwrap_or(0)
            .max(self.data.len() as u64);

        let virtual_address = align_up(va_end, section_alignment);
        let pointer_to_raw_data = align_up(raw_end, file_alignment);
        let size_of_raw_data = align_up(contents.len() as u64, file_alignment);
        let size_of_image = align_up(virtual_address + contents.len() as u64, section_alignment);

        let to_u32 = |value: u64, what: &str| {
            u32::try_from(value)
                .map_err(|_| Error::parse(0, format!("{what} {value:#x} overflows 32 bits")))
        };

        let mut header = SectionHeader {
            virtual_size: to_u32(contents.len() as u64, "section size")?,
            virtual_address: to_u32(virtual_address, "section RVA")?,
            size_of_raw_data: to_u32(size_of_raw_data, "raw size")?,
            pointer_to_raw_data: to_u32(pointer_to_raw_data, "raw offset")?,
            characteristics: flags.bits(),
            ..Default::default()
        };
        header.set_name(name);
        let size_of_image = to_u32(size_of_image, "image size")?;

        self.data.resize(pointer_to_raw_data as usize, 0);
        self.data.extend_from_slice(contents);
        self.data
            .resize((pointer_to_raw_data + size_of_raw_data) as usize, 0);

        let header_offset = self.section_table_offset() + self.sections.len() * SectionHeader::SIZE;
        self.write_struct(header_offset, &header)?;
        self.sections.push(SectionInfo {
            header,
            header_offset,
        });

        self.coff.number_of_sections += 1;
        self.write_u16(
            self.coff_offset + COFF_NUMBER_OF_SECTIONS,
            self.coff.number_of_sections,
        )?;

        self.optional.size_of_image = size_of_image;
        self.write_u32(self.optional.offset + OPT_SIZE_OF_IMAGE, size_of_image)?;

        let init_offset = self.optional.offset + OPT_SIZE_OF_INITIALIZED_DATA;
        let init = self.read_u32(init_offset)?;
        self.write_u32(init_offset, init.wrapping_add(header.size_of_raw_data))?;

        Ok(header.virtual_address)
    }

    /// Returns the raw data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the context and returns the image data.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

fn parse_optional_header(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeaderInfo> {
    let size = size as usize;
    if size < 2 || offset + size > data.len() {
        return Err(Error::buffer_too_small(offset + size.max(2), data.len()));
    }
    let opt = &data[offset..offset + size];

    let kind = PeKind::from_magic(read_u16_le_at(opt, 0))?;
    let dirs_offset = kind.data_directories_offset();
    if size < dirs_offset {
        return Err(Error::parse(offset, "optional header truncated"));
    }

    let image_base = match kind {
        PeKind::Pe32 => read_u32_le_at(opt, OPT_IMAGE_BASE_PE32) as u64,
        PeKind::Pe32Plus => read_u64_le_at(opt, OPT_IMAGE_BASE_PE32_PLUS),
    };

    let section_alignment = read_u32_le_at(opt, OPT_SECTION_ALIGNMENT);
    let file_alignment = read_u32_le_at(opt, OPT_FILE_ALIGNMENT);
    for (field, value) in [
        ("section alignment", section_alignment),
        ("file alignment", file_alignment),
    ] {
        if !value.is_power_of_two() {
            return Err(Error::InvalidAlignment { field, value });
        }
    }

    // Clamp to what actually fits in the declared header size.
    let declared = read_u32_le_at(opt, kind.rva_count_offset()) as usize;
    let fits = (size - dirs_offset) / DataDirectory::SIZE;
    let count = declared.min(fits).min(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);

    let data_directories = (0..count)
        .map(|i| {
            let at = dirs_offset + i * DataDirectory::SIZE;
            DataDirectory {
                virtual_address: read_u32_le_at(opt, at),
                size: read_u32_le_at(opt, at + 4),
            }
        })
        .collect();

    Ok(OptionalHeaderInfo {
        kind,
        offset,
        image_base,
        section_alignment,
        file_alignment,
        size_of_image: read_u32_le_at(opt, OPT_SIZE_OF_IMAGE),
        size_of_headers: read_u32_le_at(opt, OPT_SIZE_OF_HEADERS),
        data_directories,
    })
}
