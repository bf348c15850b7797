// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `fdio-loader`: drives Fast Data-In/-Out runs against a fleet of boards
//! described by machine, gatherer, and placement descriptor files.
//!
//! No real SCP/SDP hardware driver crate exists in this workspace, so a run
//! always operates in simulate mode: a [`fdio::adapters::MockTransceiver`]
//! stands in for the board fleet and a [`fdio::adapters::FixedRegionExecutor`]
//! stands in for a real data-specification interpreter, seeded from the
//! placement file's region content. This keeps the CLI's orchestration,
//! descriptor parsing, and reporting exercised end to end without a target.

mod config;
mod descriptors;
mod error;
mod report;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use fdio::adapters::{FixedRegionExecutor, MemStorage, Storage};
use fdio::types::{CoreAddress, Region};
use fdio::{BoardWorker, ParallelScheduler};
use tracing::{info, warn};

use crate::config::LoaderConfig;
use crate::descriptors::{build_boards, GathererDescriptor, MachineDescriptor, PlacementDescriptor};
use crate::error::LoaderError;
use crate::report::{Direction, RunReport, RunRow};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliDirection {
    Upload,
    Download,
}

/// Loads data onto, or retrieves data from, a many-core accelerator fleet
/// over Fast Data-In/-Out.
#[derive(Debug, Parser)]
#[command(name = "fdio-loader", version, about)]
struct Args {
    /// Machine topology descriptor (board Ethernet IPs, chip extents).
    #[arg(long)]
    machine: PathBuf,

    /// Gatherer and monitor placement per board.
    #[arg(long)]
    gatherer: PathBuf,

    /// Per-core region layout and content.
    #[arg(long)]
    placement: PathBuf,

    /// Optional TOML file overriding the library's default timing knobs.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Whether to run the upload or download protocol.
    #[arg(long, value_enum)]
    direction: CliDirection,

    /// Where to write the per-core TSV report.
    #[arg(long, default_value = "fdio-report.tsv")]
    report: PathBuf,
}

fn init_logging() {
    tracing_log::LogTracer::init().expect("tracing-log bridge installs exactly once");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn build_storage_and_executor(
    placement: &PlacementDescriptor,
) -> Result<(MemStorage, FixedRegionExecutor), LoaderError> {
    let storage = MemStorage::new(placement.app_id);
    let mut executor = FixedRegionExecutor::new();

    for board in &placement.boards {
        let mut cores = Vec::with_capacity(board.cores.len());
        for core_placement in &board.cores {
            let (x, y, p) = core_placement.core;
            let core = CoreAddress::new(x, y, p);
            cores.push(core);

            let mut executed = fdio::adapters::ExecutedCore::default();
            let mut sizes = std::collections::BTreeMap::new();
            for region in &core_placement.regions {
                sizes.insert(region.index, region.size);

                let content = match &region.content_file {
                    Some(path) => Some(std::fs::read(path).map_err(|source| LoaderError::Read {
                        path: path.clone(),
                        source,
                    })?),
                    None => None,
                };

                executed.regions.insert(
                    region.index,
                    fdio::adapters::ExecutedRegion {
                        region: Region {
                            base: 0,
                            content,
                            size: region.size,
                            reference: region.consumes_ref,
                        },
                        declares_ref: region.declares_ref,
                        consumes_ref: region.consumes_ref,
                    },
                );
            }
            storage.set_region_sizes(core, sizes);
            executor.set(core, executed);
        }
        storage.add_cores(board.ethernet_ip.to_string(), cores);
    }

    Ok((storage, executor))
}

fn run(args: Args) -> anyhow::Result<()> {
    let machine = MachineDescriptor::load(&args.machine)?;
    let gatherer = GathererDescriptor::load(&args.gatherer)?;
    let placement = PlacementDescriptor::load(&args.placement)?;
    let boards = build_boards(&machine, &gatherer)?;

    let loader_config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    let config = loader_config.resolve();

    let (storage, executor) = build_storage_and_executor(&placement)?;
    for board in &boards {
        storage.add_board(board.clone());
    }
    let transceiver = fdio::adapters::MockTransceiver::new();
    let worker = BoardWorker::new(&storage, &transceiver, &executor, &config);

    let direction = match args.direction {
        CliDirection::Upload => Direction::Upload,
        CliDirection::Download => Direction::Download,
    };

    info!(boards = boards.len(), direction = ?args.direction, "starting fdio-loader run");

    let scheduler = ParallelScheduler::new(config.parallel_size);
    let report = std::sync::Mutex::new(RunReport::new());

    let result = scheduler.run_all(boards.clone(), |board| {
        let cores = storage.list_cores_to_load(board, false).unwrap_or_default();
        let start = Instant::now();
        let outcome = match direction {
            Direction::Upload => worker.run_upload(board),
            Direction::Download => worker.run_download(board),
        };
        let elapsed = start.elapsed();

        let mut report = report.lock().expect("report mutex is never poisoned");
        for core in cores {
            report.push(RunRow {
                board: board.ethernet_ip,
                core,
                direction,
                elapsed,
                outcome: outcome.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            });
        }
        outcome
    });

    let report = report.into_inner().expect("report mutex is never poisoned");
    if let Err(e) = report.write_tsv(&args.report) {
        warn!(error = %e, "failed to write run report");
    }

    match result {
        Ok(()) => {
            info!(cores = report.len(), "run finished with no failures");
            Ok(())
        }
        Err(joined) => {
            warn!(
                failed = report.failure_count(),
                total = report.len(),
                "run finished with failures"
            );
            Err(LoaderError::Fleet {
                count: joined.suppressed.len() + 1,
                total: boards.len(),
                first: joined.primary,
            }
            .into())
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    run(args)
}
