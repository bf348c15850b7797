// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CLI-specific error type. The `fdio` library crate hand-rolls `FdioError`
//! with no `thiserror` dependency; this binary is a CLI front end, so it
//! pulls in `thiserror` the way this repo's other CLI crates do.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is not valid TOML: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("placement file references unknown board '{0}'")]
    UnknownBoard(String),

    #[error("{count} of {total} boards failed; first failure: {first}")]
    Fleet {
        count: usize,
        total: usize,
        first: fdio::FdioError,
    },
}
