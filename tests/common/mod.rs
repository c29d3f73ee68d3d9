//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builds a minimal PE32+ DLL whose import table names `imports`.
pub fn pe_with_imports(imports: &[&str]) -> Vec<u8> {
    const OPT: usize = 0x58;
    const SECTION_TABLE: usize = OPT + 240;
    const IDATA_RVA: u32 = 0x1000;
    const IDATA_RAW: usize = 0x200;

    let mut data = vec![0u8; 0x400];
    data[0..2].copy_from_slice(b"MZ");
    put_u32(&mut data, 0x3C, 0x40);
    data[0x40..0x44].copy_from_slice(b"PE\0\0");

    // COFF header
    put_u16(&mut data, 0x44, 0x8664);
    put_u16(&mut data, 0x46, 1);
    put_u16(&mut data, 0x54, 240);
    put_u16(&mut data, 0x56, 0x2022);

    // Optional header
    put_u16(&mut data, OPT, 0x20B);
    data[OPT + 24..OPT + 32].copy_from_slice(&0x1_8000_0000u64.to_le_bytes());
    put_u32(&mut data, OPT + 32, 0x1000);
    put_u32(&mut data, OPT + 36, 0x200);
    put_u32(&mut data, OPT + 56, 0x2000);
    put_u32(&mut data, OPT + 60, 0x200);
    put_u32(&mut data, OPT + 108, 16);

    // Import descriptors, then the names
    let table_len = if imports.is_empty() { 0 } else { (imports.len() + 1) * 20 };
    let mut names_at = table_len;
    for (i, name) in imports.iter().enumerate() {
        let desc = IDATA_RAW + i * 20;
        put_u32(&mut data, desc + 12, IDATA_RVA + names_at as u32);
        put_u32(&mut data, desc + 16, IDATA_RVA);
        let start = IDATA_RAW + names_at;
        data[start..start + name.len()].copy_from_slice(name.as_bytes());
        names_at += name.len() + 1;
    }
    assert!(names_at <= 0x200, "too many imports for the test image");
    if !imports.is_empty() {
        put_u32(&mut data, OPT + 120, IDATA_RVA);
        put_u32(&mut data, OPT + 124, table_len as u32);
    }

    // Section table
    data[SECTION_TABLE..SECTION_TABLE + 6].copy_from_slice(b".idata");
    put_u32(&mut data, SECTION_TABLE + 8, names_at.max(1) as u32);
    put_u32(&mut data, SECTION_TABLE + 12, IDATA_RVA);
    put_u32(&mut data, SECTION_TABLE + 16, 0x200);
    put_u32(&mut data, SECTION_TABLE + 20, IDATA_RAW as u32);
    put_u32(&mut data, SECTION_TABLE + 36, 0xC000_0040);

    data
}

/// Writes a wheel with the given members.
pub fn write_wheel(path: &Path, members: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).expect("create wheel"));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in members {
        writer.start_file(*name, options).expect("start member");
        writer.write_all(content).expect("write member");
    }
    writer.finish().expect("finish wheel");
}

/// Reads the member names of a wheel in archive order.
pub fn member_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).expect("open wheel")).expect("read wheel");
    archive.file_names().map(str::to_string).collect()
}
