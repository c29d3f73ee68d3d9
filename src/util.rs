//! Utility functions for binary data processing.
//!
//! This module provides the small primitives the PE reader and the mangler
//! share:
//! - Unaligned little-endian reads and writes (using byteorder)
//! - NUL-terminated string scanning (via memchr)
//! - Power-of-two alignment helpers

use byteorder::{ByteOrder, LittleEndian};

// =============================================================================
// Fast Unaligned Reads
// =============================================================================

/// Reads a little-endian u16 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 2 > data.len()`.
#[inline(always)]
pub fn read_u16_le_at(data: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&data[offset..])
}

/// Reads a little-endian u32 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&data[offset..])
}

/// Reads a little-endian u64 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 8 > data.len()`.
#[inline(always)]
pub fn read_u64_le_at(data: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&data[offset..])
}

/// Writes a little-endian u16 at the given offset.
#[inline(always)]
pub fn write_u16_le_at(data: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut data[offset..], value);
}

/// Writes a little-endian u32 at the given offset.
#[inline(always)]
pub fn write_u32_le_at(data: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut data[offset..], value);
}

// =============================================================================
// Byte Search
// =============================================================================

/// Returns the NUL-terminated string starting at `offset`, without the
/// terminator, or `None` if no terminator is found before the end of `data`.
pub fn read_cstr_at(data: &[u8], offset: usize) -> Option<&[u8]> {
    let tail = data.get(offset..)?;
    let end = memchr::memchr(0, tail)?;
    Some(&tail[..end])
}

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Aligns a value up to the given power-of-two alignment.
///
/// # Panics
///
/// Debug assertion fails if `alignment` is not a power of 2.
#[inline(always)]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
