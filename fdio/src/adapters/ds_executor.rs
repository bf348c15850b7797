// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-specification executor contract: interprets a core's
//! data-specification bytecode into concrete region content and cross-core
//! reference bookkeeping, without committing anything to the target —
//! `ExecutionContext` does the commit.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{CoreAddress, MemoryLocation, RefId, Region, RegionIndex};

/// One region produced by executing a core's data specification.
#[derive(Debug, Clone)]
pub struct ExecutedRegion {
    pub region: Region,
    /// This region declares a reference other cores may consume.
    pub declares_ref: Option<RefId>,
    /// This region's pointer is not yet known; it must be patched once
    /// `consumes_ref` resolves (same chip: immediately; cross-chip: never,
    /// a hard `DanglingReference` error).
    pub consumes_ref: Option<RefId>,
}

/// The full result of executing one core's data specification.
#[derive(Debug, Clone, Default)]
pub struct ExecutedCore {
    pub regions: BTreeMap<RegionIndex, ExecutedRegion>,
}

/// Interprets a core's data-specification bytecode. Real implementations
/// parse and run the bytecode against `region_sizes`; this crate only
/// consumes the trait.
pub trait DataSpecExecutor: Send + Sync {
    fn execute(
        &self,
        core: CoreAddress,
        start: MemoryLocation,
        region_sizes: &BTreeMap<RegionIndex, u32>,
    ) -> Result<ExecutedCore>;
}

/// Test double that returns a pre-supplied `ExecutedCore` for every core,
/// ignoring the data-specification bytecode entirely. Grounded in the
/// teacher's `FixedRoute`-style fixture objects used to drive routing tests
/// without a real discovery backend.
#[derive(Debug, Default)]
pub struct FixedRegionExecutor {
    fixed: BTreeMap<CoreAddress, ExecutedCore>,
}

impl FixedRegionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, core: CoreAddress, executed: ExecutedCore) {
        self.fixed.insert(core, executed);
    }
}

impl DataSpecExecutor for FixedRegionExecutor {
    fn execute(
        &self,
        core: CoreAddress,
        _start: MemoryLocation,
        _region_sizes: &BTreeMap<RegionIndex, u32>,
    ) -> Result<ExecutedCore> {
        Ok(self.fixed.get(&core).cloned().unwrap_or_default())
    }
}
