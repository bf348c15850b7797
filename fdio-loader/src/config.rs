// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TOML-backed overrides for `fdio::Config`: a thin, all-optional `serde`
//! struct merged onto the library's defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fdio::Config;

use crate::error::LoaderError;

/// Every field is optional so a run can override just the knobs it cares
/// about; anything absent falls back to `fdio::Config::default()`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub throttle_ns: Option<u64>,
    pub upload_receive_timeout_ms: Option<u64>,
    pub upload_timeout_retry_limit: Option<u32>,
    pub download_receive_timeout_ms: Option<u64>,
    pub download_timeout_retry_limit: Option<u32>,
    pub delay_per_send_ms: Option<u64>,
    pub very_small_write_threshold: Option<usize>,
    pub small_retrieve_threshold: Option<usize>,
    pub parallel_size: Option<usize>,
    pub ip_tag_reprogram_attempts: Option<u32>,
    pub ip_tag_reprogram_backoff_ms: Option<u64>,
    pub endpoint_close_grace_ms: Option<u64>,
}

impl LoaderConfig {
    pub fn from_file(path: &Path) -> Result<Self, LoaderError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| LoaderError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies every `Some` field onto a fresh `fdio::Config::default()`.
    pub fn resolve(&self) -> Config {
        let mut config = Config::default();
        if let Some(v) = self.throttle_ns {
            config.throttle = Duration::from_nanos(v);
        }
        if let Some(v) = self.upload_receive_timeout_ms {
            config.upload_receive_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.upload_timeout_retry_limit {
            config.upload_timeout_retry_limit = v;
        }
        if let Some(v) = self.download_receive_timeout_ms {
            config.download_receive_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.download_timeout_retry_limit {
            config.download_timeout_retry_limit = v;
        }
        if let Some(v) = self.delay_per_send_ms {
            config.delay_per_send = Duration::from_millis(v);
        }
        if let Some(v) = self.very_small_write_threshold {
            config.very_small_write_threshold = v;
        }
        if let Some(v) = self.small_retrieve_threshold {
            config.small_retrieve_threshold = v;
        }
        if let Some(v) = self.parallel_size {
            config.parallel_size = v;
        }
        if let Some(v) = self.ip_tag_reprogram_attempts {
            config.ip_tag_reprogram_attempts = v;
        }
        if let Some(v) = self.ip_tag_reprogram_backoff_ms {
            config.ip_tag_reprogram_backoff = Duration::from_millis(v);
        }
        if let Some(v) = self.endpoint_close_grace_ms {
            config.endpoint_close_grace = Duration::from_millis(v);
        }
        config
    }
}
