// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by every `fdio` subsystem.
//!
//! One enum, one variant per error kind named in the protocol design rather
//! than one type per module: callers (the board worker, the scheduler) need
//! to match on "did this escape as `TimeoutExhausted`, `DanglingReference`,
//! `StorageError`, or `CoreRejected`" without caring which layer raised it.

use std::fmt;
use std::io;

/// Unified error type for upload, download, execution-context, and board
/// worker operations.
#[derive(Debug)]
pub enum FdioError {
    /// Network or file I/O failure, generally retriable up to a local limit.
    Io(io::Error),

    /// A single receive deadline elapsed with no matching reply.
    Timeout,

    /// The per-stream retry budget was exhausted; terminates the board task.
    TimeoutExhausted {
        /// How many consecutive timeouts were observed before giving up.
        attempts: u32,
    },

    /// Wire payload violates the codec: unknown command, malformed seq
    /// number, oversize offset, or (outside txid-filtered contexts) an
    /// unexpected transaction id.
    ProtocolError(String),

    /// A cross-core region reference could not be resolved, or crossed a
    /// chip boundary.
    DanglingReference {
        /// The symbolic reference id that could not be resolved.
        ref_id: u32,
    },

    /// The storage backend rejected a read or write.
    StorageError(String),

    /// The machine refused an SCP request.
    CoreRejected(String),

    /// A blocking wait was interrupted before it could complete.
    Cancelled,

    /// A scheduler worker thread panicked while running a board task.
    WorkerPanicked,
}

impl fmt::Display for FdioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::TimeoutExhausted { attempts } => {
                write!(f, "timeout retry budget exhausted after {attempts} attempts")
            }
            Self::ProtocolError(msg) => write!(f, "protocol error: {msg}"),
            Self::DanglingReference { ref_id } => {
                write!(f, "dangling reference: ref_id {ref_id} never resolved")
            }
            Self::StorageError(msg) => write!(f, "storage error: {msg}"),
            Self::CoreRejected(msg) => write!(f, "core rejected request: {msg}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::WorkerPanicked => write!(f, "scheduler worker thread panicked"),
        }
    }
}

impl std::error::Error for FdioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FdioError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
            Self::Timeout
        } else if e.kind() == io::ErrorKind::Interrupted {
            Self::Cancelled
        } else {
            Self::Io(e)
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FdioError>;

/// A board task's outcome after the parallel scheduler joins it: the first
/// error observed, with every subsequent board's error attached as context
/// rather than dropped.
#[derive(Debug)]
pub struct JoinedError {
    /// The first error observed, in submission order.
    pub primary: FdioError,
    /// Errors from every other failed board task, in submission order.
    pub suppressed: Vec<FdioError>,
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} more board(s) failed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}
