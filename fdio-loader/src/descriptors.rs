// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON descriptor shapes for machine topology, gatherer/monitor placement,
//! and per-core region content.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use fdio::types::{BoardDescriptor, ChipAddress, CoreAddress};

use crate::error::LoaderError;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoaderError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LoaderError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// One board's network and topology facts, excluding its gatherer/monitor
/// assignment — that lives in
/// [`GathererDescriptor`] so a machine layout can be reused across gatherer
/// placements.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineBoard {
    pub ethernet_ip: SocketAddr,
    pub root_chip: (u8, u8),
    pub max_chip: (u8, u8),
    pub ip_tag: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineDescriptor {
    pub boards: Vec<MachineBoard>,
}

impl MachineDescriptor {
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        read_json(path)
    }
}

/// Gatherer and monitor assignment for one board, keyed by its Ethernet IP
/// so it can be joined against a [`MachineDescriptor`].
#[derive(Debug, Clone, Deserialize)]
pub struct GathererBoard {
    pub ethernet_ip: SocketAddr,
    pub gatherer: (u8, u8, u8),
    pub monitors: Vec<(u8, u8, u8)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GathererDescriptor {
    pub boards: Vec<GathererBoard>,
}

impl GathererDescriptor {
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        read_json(path)
    }
}

/// One region to place on a core: its declared size, optional content file,
/// and optional cross-core reference bookkeeping.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionPlacement {
    pub index: u8,
    pub size: u32,
    #[serde(default)]
    pub content_file: Option<PathBuf>,
    #[serde(default)]
    pub declares_ref: Option<u32>,
    #[serde(default)]
    pub consumes_ref: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorePlacement {
    pub core: (u8, u8, u8),
    pub regions: Vec<RegionPlacement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardPlacement {
    pub ethernet_ip: SocketAddr,
    pub cores: Vec<CorePlacement>,
}

/// Per-core region layout for every board in a run, fed to the DS executor /
/// storage backend in a real deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementDescriptor {
    pub app_id: u8,
    pub boards: Vec<BoardPlacement>,
}

impl PlacementDescriptor {
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        read_json(path)
    }
}

/// Joins a machine board with its gatherer assignment into the
/// `fdio::types::BoardDescriptor` the library expects.
pub fn join_board(machine: &MachineBoard, gatherer: &GathererBoard) -> BoardDescriptor {
    BoardDescriptor {
        ethernet_ip: machine.ethernet_ip,
        root_chip: ChipAddress::new(machine.root_chip.0, machine.root_chip.1),
        ip_tag: machine.ip_tag,
        max_chip: ChipAddress::new(machine.max_chip.0, machine.max_chip.1),
        monitors: gatherer
            .monitors
            .iter()
            .map(|&(x, y, p)| CoreAddress::new(x, y, p))
            .collect(),
        gatherer: CoreAddress::new(gatherer.gatherer.0, gatherer.gatherer.1, gatherer.gatherer.2),
    }
}

/// Builds the full set of boards for a run by joining a machine descriptor
/// against a gatherer descriptor on Ethernet IP. Errors if a gatherer entry
/// names a board absent from the machine file.
pub fn build_boards(
    machine: &MachineDescriptor,
    gatherer: &GathererDescriptor,
) -> Result<Vec<BoardDescriptor>, LoaderError> {
    let mut boards = Vec::with_capacity(gatherer.boards.len());
    for g in &gatherer.boards {
        let m = machine
            .boards
            .iter()
            .find(|m| m.ethernet_ip == g.ethernet_ip)
            .ok_or_else(|| LoaderError::UnknownBoard(g.ethernet_ip.to_string()))?;
        boards.push(join_board(m, g));
    }
    Ok(boards)
}
