// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage backend contract and an in-memory reference
//! implementation: a small trait of plain accessors, one `MemStorage` test
//! double backed by a `parking_lot::Mutex<HashMap<..>>`.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::{FdioError, Result};
use crate::types::{BoardDescriptor, CoreAddress, MemoryLocation, RegionIndex};

/// Key-value interface persisting region metadata and contents, keyed by
/// core + region. Implementations must either be internally thread-safe or
/// be serialized by a single writer thread.
pub trait Storage: Send + Sync {
    fn get_app_id(&self) -> Result<u8>;

    fn list_ethernets_to_load(&self) -> Result<Vec<BoardDescriptor>>;

    fn list_cores_to_load(&self, board: &BoardDescriptor, system_only: bool) -> Result<Vec<CoreAddress>>;

    /// Declared size, in bytes, of every region on `core`, in region-index
    /// order.
    fn get_region_sizes(&self, core: CoreAddress) -> Result<BTreeMap<RegionIndex, u32>>;

    fn set_start_address(&self, core: CoreAddress, addr: MemoryLocation) -> Result<()>;

    fn set_region_pointer(&self, core: CoreAddress, region: RegionIndex, addr: MemoryLocation) -> Result<()>;

    /// Pointer and, where present, content bytes for every populated region
    /// on `core`. Used by the downloader to know what to fetch and where to
    /// write it.
    fn get_region_pointers_and_content(
        &self,
        core: CoreAddress,
    ) -> Result<BTreeMap<RegionIndex, (MemoryLocation, Option<Vec<u8>>)>>;

    /// Replaces a region's recorded content wholesale.
    fn store_region_contents(&self, core: CoreAddress, region: RegionIndex, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
struct CoreRecord {
    start_address: Option<MemoryLocation>,
    region_sizes: BTreeMap<RegionIndex, u32>,
    region_pointers: BTreeMap<RegionIndex, MemoryLocation>,
    region_contents: BTreeMap<RegionIndex, Vec<u8>>,
}

/// In-memory `Storage` implementation used by tests and by `fdio-loader`
/// when no real catalog backend is configured.
#[derive(Debug, Default)]
pub struct MemStorage {
    app_id: u8,
    boards: Mutex<Vec<BoardDescriptor>>,
    cores: Mutex<BTreeMap<String, Vec<CoreAddress>>>,
    records: Mutex<std::collections::HashMap<CoreAddress, CoreRecord>>,
}

impl MemStorage {
    pub fn new(app_id: u8) -> Self {
        Self {
            app_id,
            ..Default::default()
        }
    }

    pub fn add_board(&self, board: BoardDescriptor) {
        self.boards.lock().push(board);
    }

    pub fn add_cores(&self, board_key: impl Into<String>, cores: Vec<CoreAddress>) {
        self.cores.lock().insert(board_key.into(), cores);
    }

    pub fn set_region_sizes(&self, core: CoreAddress, sizes: BTreeMap<RegionIndex, u32>) {
        self.records.lock().entry(core).or_default().region_sizes = sizes;
    }

    /// Reads back whatever content has been recorded for `core`/`region`
    /// (used by tests to assert the final SDRAM image after an upload or the
    /// final captured buffer after a download).
    pub fn region_contents(&self, core: CoreAddress, region: RegionIndex) -> Option<Vec<u8>> {
        self.records
            .lock()
            .get(&core)
            .and_then(|r| r.region_contents.get(&region).cloned())
    }

    fn board_key(board: &BoardDescriptor) -> String {
        board.ethernet_ip.to_string()
    }
}

impl Storage for MemStorage {
    fn get_app_id(&self) -> Result<u8> {
        Ok(self.app_id)
    }

    fn list_ethernets_to_load(&self) -> Result<Vec<BoardDescriptor>> {
        Ok(self.boards.lock().clone())
    }

    fn list_cores_to_load(&self, board: &BoardDescriptor, _system_only: bool) -> Result<Vec<CoreAddress>> {
        Ok(self
            .cores
            .lock()
            .get(&Self::board_key(board))
            .cloned()
            .unwrap_or_default())
    }

    fn get_region_sizes(&self, core: CoreAddress) -> Result<BTreeMap<RegionIndex, u32>> {
        Ok(self
            .records
            .lock()
            .get(&core)
            .map(|r| r.region_sizes.clone())
            .unwrap_or_default())
    }

    fn set_start_address(&self, core: CoreAddress, addr: MemoryLocation) -> Result<()> {
        self.records.lock().entry(core).or_default().start_address = Some(addr);
        Ok(())
    }

    fn set_region_pointer(&self, core: CoreAddress, region: RegionIndex, addr: MemoryLocation) -> Result<()> {
        self.records
            .lock()
            .entry(core)
            .or_default()
            .region_pointers
            .insert(region, addr);
        Ok(())
    }

    fn get_region_pointers_and_content(
        &self,
        core: CoreAddress,
    ) -> Result<BTreeMap<RegionIndex, (MemoryLocation, Option<Vec<u8>>)>> {
        let records = self.records.lock();
        let Some(record) = records.get(&core) else {
            return Ok(BTreeMap::new());
        };
        Ok(record
            .region_pointers
            .iter()
            .map(|(idx, addr)| (*idx, (*addr, record.region_contents.get(idx).cloned())))
            .collect())
    }

    fn store_region_contents(&self, core: CoreAddress, region: RegionIndex, bytes: &[u8]) -> Result<()> {
        self.records
            .lock()
            .entry(core)
            .or_default()
            .region_contents
            .insert(region, bytes.to_vec());
        Ok(())
    }
}

/// Wraps a storage error with the operation name for `FdioError::StorageError`.
pub fn storage_err(op: &str, err: impl std::fmt::Display) -> FdioError {
    FdioError::StorageError(format!("{op}: {err}"))
}
