// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Execution context: resolves cross-core region references
//! within one board and emits each core's pointer table once every
//! reference it depends on has resolved.
//!
//! References only resolve within a chip. A region on chip A that consumes
//! a reference declared on chip B is a hard `DanglingReference` error at
//! `close()`, not at the point of declaration — the declaring core may not
//! have executed yet.

use std::collections::HashMap;

use crate::adapters::{DataSpecExecutor, ExecutedRegion};
use crate::config::REGIONS_PER_CORE;
use crate::error::{FdioError, Result};
use crate::pointer_table::{self, RegionTriple};
use crate::types::{CoreAddress, MemoryLocation, RefId, Region, RegionIndex};

struct PendingCore {
    table: [Option<RegionTriple>; REGIONS_PER_CORE],
    needs: Vec<(RegionIndex, RefId)>,
}

/// Tracks declared/consumed cross-core references for one board and emits
/// each core's pointer table as its dependencies resolve.
#[derive(Default)]
pub struct ExecutionContext {
    declared: HashMap<RefId, (CoreAddress, MemoryLocation)>,
    pending: HashMap<CoreAddress, PendingCore>,
    emitted: Vec<(CoreAddress, Vec<u8>)>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `core`'s executed regions, uploading each region's content
    /// via `upload_region` and resolving same-chip references immediately.
    /// Cores with unresolved cross-core references are parked until
    /// `close()`.
    pub fn execute(
        &mut self,
        core: CoreAddress,
        regions: &std::collections::BTreeMap<RegionIndex, ExecutedRegion>,
        mut upload_region: impl FnMut(RegionIndex, &Region) -> Result<()>,
    ) -> Result<()> {
        let mut table: [Option<RegionTriple>; REGIONS_PER_CORE] = [None; REGIONS_PER_CORE];
        let mut needs = Vec::new();

        for (&index, executed) in regions {
            if let Some(content) = executed.region.content.as_ref() {
                let _ = content;
                upload_region(index, &executed.region)?;
            }

            if let Some(ref_id) = executed.declares_ref {
                if self.declared.contains_key(&ref_id) {
                    return Err(FdioError::ProtocolError(format!(
                        "reference id {ref_id} declared more than once"
                    )));
                }
                self.declared.insert(ref_id, (core, executed.region.base));
            }

            table[index as usize] = Some(if let Some(ref_id) = executed.consumes_ref {
                match self.declared.get(&ref_id) {
                    Some((declarer, base)) if declarer.chip() == core.chip() => (*base, 0, 0),
                    _ => {
                        needs.push((index, ref_id));
                        (0, 0, 0)
                    }
                }
            } else {
                (
                    executed.region.base,
                    executed.region.checksum(),
                    executed.region.word_count(),
                )
            });
        }

        if needs.is_empty() {
            self.emit(core, table);
        } else {
            self.pending.insert(core, PendingCore { table, needs });
        }
        Ok(())
    }

    fn emit(&mut self, core: CoreAddress, table: [Option<RegionTriple>; REGIONS_PER_CORE]) {
        self.emitted.push((core, pointer_table::build(&table)));
    }

    /// Resolves every still-pending core, returning the first
    /// `DanglingReference` encountered (if any) while still emitting
    /// headers for cores whose references do resolve.
    pub fn close(mut self) -> (Vec<(CoreAddress, Vec<u8>)>, Option<FdioError>) {
        let mut first_error = None;
        let pending = std::mem::take(&mut self.pending);

        for (core, mut entry) in pending {
            let mut failed = None;
            for (index, ref_id) in &entry.needs {
                match self.declared.get(ref_id) {
                    Some((declarer, base)) if declarer.chip() == core.chip() => {
                        entry.table[*index as usize] = Some((*base, 0, 0));
                    }
                    _ => {
                        log::warn!("[fdio/exec] core {core} has an unresolved reference {ref_id} at close");
                        failed.get_or_insert(FdioError::DanglingReference { ref_id: *ref_id });
                    }
                }
            }

            match failed {
                Some(err) => {
                    first_error.get_or_insert(err);
                }
                None => self.emit(core, entry.table),
            }
        }

        (self.emitted, first_error)
    }
}
