// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Board worker: binds one board's throttled endpoint, gatherer, monitors,
//! router/no-drop scopes, and per-core upload loop.
//!
//! Scope nesting, outermost first: endpoint, system-router-tables, no-drop,
//! execution-context. Teardown runs in reverse, and every step always runs
//! regardless of an earlier failure — the first error encountered anywhere
//! in the run is what the caller sees; everything after it still executes
//! so resources are never leaked.

use std::collections::BTreeMap;

use crate::adapters::{DataSpecExecutor, ReinjectionTypes, Storage, Transceiver};
use crate::config::{Config, POINTER_TABLE_BYTES};
use crate::download::Downloader;
use crate::error::Result;
use crate::exec::ExecutionContext;
use crate::transport::ThrottledEndpoint;
use crate::types::{BoardDescriptor, CoreAddress, MemoryLocation, TransactionCounter};
use crate::upload::Uploader;

/// Binds one board's resources for the duration of an upload run.
pub struct BoardWorker<'a> {
    storage: &'a dyn Storage,
    transceiver: &'a dyn Transceiver,
    executor: &'a dyn DataSpecExecutor,
    config: &'a Config,
}

const NO_DROP_TIMEOUT_MS: u32 = 0xFFFF_FFFF;
const NO_DROP_TYPES: ReinjectionTypes = ReinjectionTypes {
    multicast: false,
    point_to_point: false,
    fixed_route: false,
    nearest_neighbour: false,
};

impl<'a> BoardWorker<'a> {
    pub fn new(
        storage: &'a dyn Storage,
        transceiver: &'a dyn Transceiver,
        executor: &'a dyn DataSpecExecutor,
        config: &'a Config,
    ) -> Self {
        Self {
            storage,
            transceiver,
            executor,
            config,
        }
    }

    /// Runs the full upload sequence for one board and returns the first
    /// error encountered, if any.
    pub fn run_upload(&self, board: &BoardDescriptor) -> Result<()> {
        let endpoint = ThrottledEndpoint::connect(board.ethernet_ip, self.config)?;
        let mut first_error = None;

        if let Err(e) = endpoint.reprogram_tag(self.transceiver, board.ip_tag, self.config) {
            first_error.get_or_insert(e);
        }

        if first_error.is_none() {
            if let Err(e) = self.upload_with_scopes(board, &endpoint) {
                first_error.get_or_insert(e);
            }
        }

        endpoint.close(self.config);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn upload_with_scopes(&self, board: &BoardDescriptor, endpoint: &ThrottledEndpoint) -> Result<()> {
        let cores = self.storage.list_cores_to_load(board, false)?;
        let app_id = self.storage.get_app_id()?;
        let mut starts: BTreeMap<CoreAddress, MemoryLocation> = BTreeMap::new();
        let mut sizes_by_core: BTreeMap<CoreAddress, BTreeMap<u8, u32>> = BTreeMap::new();

        for &core in &cores {
            let sizes = self.storage.get_region_sizes(core)?;
            let total: u32 = sizes.values().sum::<u32>() + POINTER_TABLE_BYTES as u32;
            let start = self
                .transceiver
                .malloc_sdram(core.chip(), total, app_id, board.ip_tag)?;
            self.storage.set_start_address(core, start)?;
            self.transceiver.write_user_0(core, start)?;
            starts.insert(core, start);
            sizes_by_core.insert(core, sizes);
        }

        let mut first_error = None;
        let reinjection_snapshot = self.enter_no_drop_scope(board);

        if let Err(e) = self.run_cores(board, endpoint, &cores, &starts, &sizes_by_core) {
            first_error.get_or_insert(e);
        }

        if let Err(e) = self.exit_no_drop_scope(board, reinjection_snapshot) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn run_cores(
        &self,
        board: &BoardDescriptor,
        endpoint: &ThrottledEndpoint,
        cores: &[CoreAddress],
        starts: &BTreeMap<CoreAddress, MemoryLocation>,
        sizes_by_core: &BTreeMap<CoreAddress, BTreeMap<u8, u32>>,
    ) -> Result<()> {
        let mut counter = TransactionCounter::new();
        let mut ctx = ExecutionContext::new();
        let uploader = Uploader::new(endpoint, self.config);

        for &core in cores {
            let start = starts[&core];
            let sizes = &sizes_by_core[&core];
            let executed = self.executor.execute(core, start, sizes)?;

            for (index, region) in &executed.regions {
                self.storage.set_region_pointer(core, *index, region.region.base)?;
            }

            ctx.execute(core, &executed.regions, |_index, region| {
                let Some(content) = &region.content else {
                    return Ok(());
                };
                let txid = counter.next();
                let (delta_x, delta_y) = board.delta_for(core.chip());
                uploader.upload(self.transceiver, core.chip(), txid, region.base, delta_y, delta_x, content)
            })?;
        }

        let (headers, dangling) = ctx.close();
        for (core, bytes) in headers {
            self.transceiver.write_memory(core.chip(), starts[&core], &bytes)?;
        }
        match dangling {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs the full download sequence for one board: scheduler hands a
    /// board to this worker, which runs a downloader for each
    /// (monitor, placement, region) and appends the result to storage.
    /// Unlike upload, this never touches router tables or reinjection
    /// state — the download path only reads already-resident SDRAM through
    /// a monitor, so there is nothing to quiesce.
    pub fn run_download(&self, board: &BoardDescriptor) -> Result<()> {
        let endpoint = ThrottledEndpoint::connect(board.ethernet_ip, self.config)?;
        let mut first_error = None;

        if let Err(e) = endpoint.reprogram_tag(self.transceiver, board.ip_tag, self.config) {
            first_error.get_or_insert(e);
        }

        if first_error.is_none() {
            if let Err(e) = self.download_cores(board, &endpoint) {
                first_error.get_or_insert(e);
            }
        }

        endpoint.close(self.config);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn download_cores(&self, board: &BoardDescriptor, endpoint: &ThrottledEndpoint) -> Result<()> {
        let cores = self.storage.list_cores_to_load(board, false)?;
        let downloader = Downloader::new(endpoint, self.config);
        let mut counter = TransactionCounter::new();
        let mut first_error = None;

        for &core in &cores {
            let sizes = self.storage.get_region_sizes(core)?;
            let pointers = self.storage.get_region_pointers_and_content(core)?;

            for (&index, &size) in &sizes {
                let Some((addr, _)) = pointers.get(&index) else {
                    continue;
                };
                let txid = counter.next();
                match downloader.download(self.transceiver, core.chip(), txid, *addr, size as usize) {
                    Ok(bytes) => {
                        if let Err(e) = self.storage.store_region_contents(core, index, &bytes) {
                            first_error.get_or_insert(e);
                        }
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn enter_no_drop_scope(&self, board: &BoardDescriptor) -> Vec<(CoreAddress, crate::adapters::ReinjectionStatus)> {
        if let Err(e) = self.transceiver.set_router_tables_to_system(&board.monitors) {
            log::warn!("[fdio/board] set_router_tables_to_system failed: {e}");
        }

        let mut snapshot = Vec::with_capacity(board.monitors.len());
        for &monitor in &board.monitors {
            match self.transceiver.get_reinjection_status(monitor) {
                Ok(status) => snapshot.push((monitor, status)),
                Err(e) => log::warn!("[fdio/board] get_reinjection_status({monitor}) failed: {e}"),
            }
        }

        if let Err(e) = self.transceiver.set_reinjection_timeout(&board.monitors, NO_DROP_TIMEOUT_MS) {
            log::warn!("[fdio/board] set_reinjection_timeout failed: {e}");
        }
        if let Err(e) = self
            .transceiver
            .set_reinjection_emergency_timeout(&board.monitors, NO_DROP_TIMEOUT_MS)
        {
            log::warn!("[fdio/board] set_reinjection_emergency_timeout failed: {e}");
        }
        if let Err(e) = self.transceiver.set_reinjection_types(&board.monitors, NO_DROP_TYPES) {
            log::warn!("[fdio/board] set_reinjection_types failed: {e}");
        }
        if let Err(e) = self.transceiver.clear_reinjection_queues(&board.monitors) {
            log::warn!("[fdio/board] clear_reinjection_queues failed: {e}");
        }

        snapshot
    }

    fn exit_no_drop_scope(
        &self,
        board: &BoardDescriptor,
        snapshot: Vec<(CoreAddress, crate::adapters::ReinjectionStatus)>,
    ) -> Result<()> {
        let mut restore_error = None;
        for (monitor, status) in snapshot {
            if let Err(e) = self.transceiver.set_reinjection_timeout(&[monitor], status.timeout_ms) {
                restore_error.get_or_insert(e);
            }
            if let Err(e) = self
                .transceiver
                .set_reinjection_emergency_timeout(&[monitor], status.emergency_timeout_ms)
            {
                restore_error.get_or_insert(e);
            }
            if let Err(e) = self.transceiver.set_reinjection_types(&[monitor], status.packet_types) {
                restore_error.get_or_insert(e);
            }
        }

        if let Some(ref e) = restore_error {
            log::error!("[fdio/board] reinjection status restore failed: {e}");
            for &monitor in &board.monitors {
                match self.transceiver.get_cpu_state(monitor) {
                    Ok(crate::adapters::CpuState::Running) => {}
                    Ok(crate::adapters::CpuState::Other) => {
                        log::error!("[fdio/board] monitor {monitor} is not RUNNING after teardown fault");
                    }
                    Err(diag_err) => {
                        log::error!("[fdio/board] could not read cpu state for {monitor}: {diag_err}");
                    }
                }
            }
        }

        if let Err(e) = self.transceiver.restore_router_tables(&board.monitors) {
            restore_error.get_or_insert(e);
        }

        match restore_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for BoardWorker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardWorker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ExecutedCore, ExecutedRegion, FixedRegionExecutor, MemStorage, MockTransceiver};
    use crate::types::{ChipAddress, Region};
    use std::net::UdpSocket;

    fn board(ip: std::net::SocketAddr) -> BoardDescriptor {
        BoardDescriptor {
            ethernet_ip: ip,
            root_chip: ChipAddress::new(0, 0),
            ip_tag: 3,
            max_chip: ChipAddress::new(7, 7),
            monitors: vec![CoreAddress::new(0, 0, 1)],
            gatherer: CoreAddress::new(0, 0, 1),
        }
    }

    #[test]
    fn run_upload_writes_small_region_and_emits_pointer_table() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sink_addr = sink.local_addr().unwrap();
        let board = board(sink_addr);

        let storage = MemStorage::new(30);
        storage.add_board(board.clone());
        let core = CoreAddress::new(0, 0, 2);
        storage.add_cores(board.ethernet_ip.to_string(), vec![core]);
        storage.set_region_sizes(core, BTreeMap::from([(0u8, 4u32)]));

        let mut executor = FixedRegionExecutor::new();
        let mut executed = ExecutedCore::default();
        executed.regions.insert(
            0,
            ExecutedRegion {
                region: Region {
                    base: 0,
                    content: Some(vec![1, 2, 3, 4]),
                    size: 4,
                    reference: None,
                },
                declares_ref: None,
                consumes_ref: None,
            },
        );
        executor.set(core, executed);

        let transceiver = MockTransceiver::new();
        let config = Config {
            upload_receive_timeout: std::time::Duration::from_millis(100),
            very_small_write_threshold: 256,
            ..Config::default()
        };

        let worker = BoardWorker::new(&storage, &transceiver, &executor, &config);
        worker.run_upload(&board).unwrap();

        assert_eq!(transceiver.memory_at(core.chip(), 0), Some(vec![1, 2, 3, 4]));
        assert!(transceiver.calls().iter().any(|c| c.starts_with("write_memory")));
    }

    #[test]
    fn run_upload_propagates_dangling_reference() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let board = board(sink.local_addr().unwrap());

        let storage = MemStorage::new(30);
        storage.add_board(board.clone());
        let consumer = CoreAddress::new(1, 1, 2);
        storage.add_cores(board.ethernet_ip.to_string(), vec![consumer]);
        storage.set_region_sizes(consumer, BTreeMap::from([(0u8, 0u32)]));

        let mut executor = FixedRegionExecutor::new();
        let mut executed = ExecutedCore::default();
        executed.regions.insert(
            0,
            ExecutedRegion {
                region: Region {
                    base: 0,
                    content: None,
                    size: 0,
                    reference: None,
                },
                declares_ref: None,
                consumes_ref: Some(99),
            },
        );
        executor.set(consumer, executed);

        let transceiver = MockTransceiver::new();
        let config = Config::default();
        let worker = BoardWorker::new(&storage, &transceiver, &executor, &config);

        let err = worker.run_upload(&board).unwrap_err();
        assert!(matches!(err, crate::error::FdioError::DanglingReference { ref_id: 99 }));
    }

    #[test]
    fn run_download_pulls_each_recorded_region() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let board = board(sink.local_addr().unwrap());

        let storage = MemStorage::new(30);
        storage.add_board(board.clone());
        let core = CoreAddress::new(0, 0, 3);
        storage.add_cores(board.ethernet_ip.to_string(), vec![core]);
        storage.set_region_sizes(core, BTreeMap::from([(0u8, 3u32)]));
        storage.set_region_pointer(core, 0, 0x7000_0000).unwrap();

        let transceiver = MockTransceiver::new();
        transceiver.write_memory(core.chip(), 0x7000_0000, &[7, 8, 9]).unwrap();

        let executor = FixedRegionExecutor::new();
        let config = Config {
            small_retrieve_threshold: 256,
            ..Config::default()
        };
        let worker = BoardWorker::new(&storage, &transceiver, &executor, &config);
        worker.run_download(&board).unwrap();

        assert_eq!(storage.region_contents(core, 0), Some(vec![7, 8, 9]));
    }
}
