// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transceiver contract and a mock implementation used to drive
//! the board-worker scope-teardown tests.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{ChipAddress, CoreAddress, MemoryLocation};

/// Reinjection fields captured at scope-entry and compared at scope-exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinjectionStatus {
    pub timeout_ms: u32,
    pub emergency_timeout_ms: u32,
    pub packet_types: ReinjectionTypes,
}

/// Packet-type mask for router reinjection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinjectionTypes {
    pub multicast: bool,
    pub point_to_point: bool,
    pub fixed_route: bool,
    pub nearest_neighbour: bool,
}

/// The CPU execution state of a core, as reported by an SCP `var` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Other,
}

/// Low-level SCP/SDP and router/IP-tag control surface.
pub trait Transceiver: Send + Sync {
    fn malloc_sdram(&self, chip: ChipAddress, size: u32, app_id: u8, tag: u8) -> Result<MemoryLocation>;

    fn write_user_0(&self, core: CoreAddress, addr: MemoryLocation) -> Result<()>;

    fn write_memory(&self, chip: ChipAddress, addr: MemoryLocation, bytes: &[u8]) -> Result<()>;

    fn read_memory(&self, chip: ChipAddress, addr: MemoryLocation, len: usize) -> Result<Vec<u8>>;

    fn set_ip_tag(&self, tag: u8, endpoint: SocketAddr) -> Result<()>;

    fn get_reinjection_status(&self, core: CoreAddress) -> Result<ReinjectionStatus>;

    fn set_reinjection_timeout(&self, cores: &[CoreAddress], timeout_ms: u32) -> Result<()>;

    fn set_reinjection_emergency_timeout(&self, cores: &[CoreAddress], timeout_ms: u32) -> Result<()>;

    fn set_reinjection_types(&self, cores: &[CoreAddress], types: ReinjectionTypes) -> Result<()>;

    fn clear_reinjection_queues(&self, cores: &[CoreAddress]) -> Result<()>;

    fn set_router_tables_to_system(&self, cores: &[CoreAddress]) -> Result<()>;

    fn restore_router_tables(&self, cores: &[CoreAddress]) -> Result<()>;

    /// CPU execution state, used by the board worker to diagnose a failed
    /// reinjection-status restore.
    fn get_cpu_state(&self, core: CoreAddress) -> Result<CpuState>;
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<String>,
    memory: HashMap<(ChipAddress, MemoryLocation), Vec<u8>>,
    next_sdram: u32,
    reinjection: HashMap<CoreAddress, ReinjectionStatus>,
    cpu_states: HashMap<CoreAddress, CpuState>,
    restore_fault: Option<String>,
}

/// Records every call and lets tests inject faults or pre-seed memory;
/// a plain hand-rolled test double rather than a mocking framework.
pub struct MockTransceiver {
    state: Mutex<MockState>,
}

impl Default for MockTransceiver {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_sdram: 0x7000_0000,
                ..Default::default()
            }),
        }
    }
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn seed_reinjection(&self, core: CoreAddress, status: ReinjectionStatus) {
        self.state.lock().reinjection.insert(core, status);
    }

    pub fn set_cpu_state(&self, core: CoreAddress, state: CpuState) {
        self.state.lock().cpu_states.insert(core, state);
    }

    /// Makes the next `restore_router_tables` call fail, simulating the
    /// mid-upload fault of §8 scenario 6.
    pub fn fail_next_restore(&self, reason: impl Into<String>) {
        self.state.lock().restore_fault = Some(reason.into());
    }

    pub fn memory_at(&self, chip: ChipAddress, addr: MemoryLocation) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&(chip, addr)).cloned()
    }
}

impl Transceiver for MockTransceiver {
    fn malloc_sdram(&self, _chip: ChipAddress, size: u32, _app_id: u8, _tag: u8) -> Result<MemoryLocation> {
        let mut state = self.state.lock();
        state.calls.push(format!("malloc_sdram({size})"));
        let addr = state.next_sdram;
        state.next_sdram = state.next_sdram.wrapping_add(size.max(4));
        Ok(addr)
    }

    fn write_user_0(&self, core: CoreAddress, addr: MemoryLocation) -> Result<()> {
        self.state.lock().calls.push(format!("write_user_0({core}, {addr:#x})"));
        Ok(())
    }

    fn write_memory(&self, chip: ChipAddress, addr: MemoryLocation, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("write_memory({chip}, {addr:#x}, {}B)", bytes.len()));
        state.memory.entry((chip, addr)).or_default();
        let entry = state.memory.get_mut(&(chip, addr)).unwrap();
        if entry.len() < bytes.len() {
            entry.resize(bytes.len(), 0);
        }
        entry[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_memory(&self, chip: ChipAddress, addr: MemoryLocation, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let mut out = state
            .memory
            .get(&(chip, addr))
            .cloned()
            .unwrap_or_default();
        out.resize(len, 0);
        Ok(out)
    }

    fn set_ip_tag(&self, tag: u8, endpoint: SocketAddr) -> Result<()> {
        self.state.lock().calls.push(format!("set_ip_tag({tag}, {endpoint})"));
        Ok(())
    }

    fn get_reinjection_status(&self, core: CoreAddress) -> Result<ReinjectionStatus> {
        Ok(self
            .state
            .lock()
            .reinjection
            .get(&core)
            .copied()
            .unwrap_or(ReinjectionStatus {
                timeout_ms: 1,
                emergency_timeout_ms: 1,
                packet_types: ReinjectionTypes {
                    multicast: true,
                    point_to_point: true,
                    fixed_route: true,
                    nearest_neighbour: true,
                },
            }))
    }

    fn set_reinjection_timeout(&self, cores: &[CoreAddress], timeout_ms: u32) -> Result<()> {
        let mut state = self.state.lock();
        for core in cores {
            state.reinjection.entry(*core).or_insert(ReinjectionStatus {
                timeout_ms,
                emergency_timeout_ms: timeout_ms,
                packet_types: ReinjectionTypes {
                    multicast: true,
                    point_to_point: true,
                    fixed_route: true,
                    nearest_neighbour: true,
                },
            });
            if let Some(status) = state.reinjection.get_mut(core) {
                status.timeout_ms = timeout_ms;
            }
        }
        Ok(())
    }

    fn set_reinjection_emergency_timeout(&self, cores: &[CoreAddress], timeout_ms: u32) -> Result<()> {
        let mut state = self.state.lock();
        for core in cores {
            if let Some(status) = state.reinjection.get_mut(core) {
                status.emergency_timeout_ms = timeout_ms;
            }
        }
        Ok(())
    }

    fn set_reinjection_types(&self, cores: &[CoreAddress], types: ReinjectionTypes) -> Result<()> {
        let mut state = self.state.lock();
        for core in cores {
            if let Some(status) = state.reinjection.get_mut(core) {
                status.packet_types = types;
            }
        }
        Ok(())
    }

    fn clear_reinjection_queues(&self, cores: &[CoreAddress]) -> Result<()> {
        self.state.lock().calls.push(format!("clear_reinjection_queues({} cores)", cores.len()));
        Ok(())
    }

    fn set_router_tables_to_system(&self, cores: &[CoreAddress]) -> Result<()> {
        self.state.lock().calls.push(format!("set_router_tables_to_system({} cores)", cores.len()));
        Ok(())
    }

    fn restore_router_tables(&self, cores: &[CoreAddress]) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("restore_router_tables({} cores)", cores.len()));
        if let Some(reason) = state.restore_fault.take() {
            return Err(crate::error::FdioError::CoreRejected(reason));
        }
        Ok(())
    }

    fn get_cpu_state(&self, core: CoreAddress) -> Result<CpuState> {
        Ok(self.state.lock().cpu_states.get(&core).copied().unwrap_or(CpuState::Running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> CoreAddress {
        CoreAddress::new(0, 0, 1)
    }

    fn chip() -> ChipAddress {
        ChipAddress::new(0, 0)
    }

    #[test]
    fn write_then_read_round_trips() {
        let xcvr = MockTransceiver::new();
        xcvr.write_memory(chip(), 0x7000_0000, &[1, 2, 3, 4]).unwrap();
        assert_eq!(xcvr.read_memory(chip(), 0x7000_0000, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn reinjection_status_defaults_then_reflects_writes() {
        let xcvr = MockTransceiver::new();
        let cores = [core()];
        xcvr.set_reinjection_timeout(&cores, 5).unwrap();
        xcvr.set_reinjection_emergency_timeout(&cores, 9).unwrap();
        let status = xcvr.get_reinjection_status(core()).unwrap();
        assert_eq!(status.timeout_ms, 5);
        assert_eq!(status.emergency_timeout_ms, 9);
    }

    #[test]
    fn fail_next_restore_surfaces_once() {
        let xcvr = MockTransceiver::new();
        xcvr.fail_next_restore("router wedged");
        assert!(xcvr.restore_router_tables(&[core()]).is_err());
        assert!(xcvr.restore_router_tables(&[core()]).is_ok());
    }

    #[test]
    fn cpu_state_defaults_to_running() {
        let xcvr = MockTransceiver::new();
        assert_eq!(xcvr.get_cpu_state(core()).unwrap(), CpuState::Running);
        xcvr.set_cpu_state(core(), CpuState::Other);
        assert_eq!(xcvr.get_cpu_state(core()).unwrap(), CpuState::Other);
    }
}
