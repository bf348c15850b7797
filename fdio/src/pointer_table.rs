// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pointer/header table layout.
//!
//! A fixed 392-byte little-endian block written once per core, after every
//! region body on that core has been written:
//!
//! ```text
//! word 0:  magic    (0xAD130AD6)
//! word 1:  version  (0x00010000)
//! for region i in 0..32:
//!   word 2+3i: base pointer
//!   word 3+3i: checksum
//!   word 4+3i: word count
//! ```
//!
//! A region triple is all zeros when the region is absent or a dangling
//! reference.

use crate::config::{POINTER_TABLE_BYTES, POINTER_TABLE_MAGIC, POINTER_TABLE_VERSION, REGIONS_PER_CORE};

/// One row of the pointer table: `(base, checksum, word_count)`. All-zero
/// means "region absent".
pub type RegionTriple = (u32, u32, u32);

/// Builds the 392-byte pointer table for one core from its region triples,
/// indexed by region index `0..REGIONS_PER_CORE`.
pub fn build(regions: &[Option<RegionTriple>; REGIONS_PER_CORE]) -> Vec<u8> {
    let mut buf = vec![0u8; POINTER_TABLE_BYTES];
    buf[0..4].copy_from_slice(&POINTER_TABLE_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&POINTER_TABLE_VERSION.to_le_bytes());

    for (i, triple) in regions.iter().enumerate() {
        let (base, checksum, words) = triple.unwrap_or((0, 0, 0));
        let offset = 8 + i * 12;
        buf[offset..offset + 4].copy_from_slice(&base.to_le_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&checksum.to_le_bytes());
        buf[offset + 8..offset + 12].copy_from_slice(&words.to_le_bytes());
    }

    buf
}

/// Parses a 392-byte pointer table back into its triples. Used by tests to
/// verify round-trip fidelity and by diagnostics tooling.
pub fn parse(bytes: &[u8]) -> Result<(u32, u32, [Option<RegionTriple>; REGIONS_PER_CORE]), String> {
    if bytes.len() != POINTER_TABLE_BYTES {
        return Err(format!(
            "pointer table must be {POINTER_TABLE_BYTES} bytes, got {}",
            bytes.len()
        ));
    }

    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());

    let mut regions: [Option<RegionTriple>; REGIONS_PER_CORE] = [None; REGIONS_PER_CORE];
    for (i, slot) in regions.iter_mut().enumerate() {
        let offset = 8 + i * 12;
        let base = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        let checksum = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap());
        let words = u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap());
        *slot = if base == 0 && checksum == 0 && words == 0 {
            None
        } else {
            Some((base, checksum, words))
        };
    }

    Ok((magic, version, regions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_has_magic_and_version_only() {
        let regions = [None; REGIONS_PER_CORE];
        let table = build(&regions);
        assert_eq!(table.len(), POINTER_TABLE_BYTES);
        let (magic, version, parsed) = parse(&table).unwrap();
        assert_eq!(magic, POINTER_TABLE_MAGIC);
        assert_eq!(version, POINTER_TABLE_VERSION);
        assert!(parsed.iter().all(Option::is_none));
    }

    #[test]
    fn round_trips_populated_regions() {
        let mut regions = [None; REGIONS_PER_CORE];
        regions[0] = Some((0x7000_0010, 0xDEAD_BEEF, 4));
        regions[31] = Some((0x7000_1000, 1, 1));
        let table = build(&regions);
        let (_, _, parsed) = parse(&table).unwrap();
        assert_eq!(parsed[0], Some((0x7000_0010, 0xDEAD_BEEF, 4)));
        assert_eq!(parsed[31], Some((0x7000_1000, 1, 1)));
        assert!(parsed[1..31].iter().all(Option::is_none));
    }

    #[test]
    fn rejects_wrong_size() {
        assert!(parse(&[0u8; 10]).is_err());
    }
}
