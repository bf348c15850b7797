// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded-parallelism board scheduler: up to
//! `Config::parallel_size` OS threads pull boards off a shared queue; the
//! first error observed is returned with the rest attached as suppressed.
//! Ordering across boards is unconstrained by design.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::{FdioError, JoinedError};

/// Runs `task` once per item in `items`, across up to `parallel_size`
/// concurrent worker threads.
pub struct ParallelScheduler {
    parallel_size: usize,
}

impl ParallelScheduler {
    pub fn new(parallel_size: usize) -> Self {
        Self {
            parallel_size: parallel_size.max(1),
        }
    }

    /// Runs `task` for every item, returning `Ok(())` if all succeeded or a
    /// `JoinedError` aggregating every failure otherwise.
    pub fn run_all<T, F>(&self, items: Vec<T>, task: F) -> Result<(), JoinedError>
    where
        T: Send,
        F: Fn(&T) -> Result<(), FdioError> + Sync,
    {
        if items.is_empty() {
            return Ok(());
        }
        let worker_count = self.parallel_size.min(items.len());
        let queue = Mutex::new(VecDeque::from(items));
        let errors: Mutex<Vec<FdioError>> = Mutex::new(Vec::new());

        let scope_result = crossbeam::thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|_| loop {
                    let next = queue.lock().pop_front();
                    let Some(item) = next else { break };
                    if let Err(e) = task(&item) {
                        log::warn!("[fdio/scheduler] board task failed: {e}");
                        errors.lock().push(e);
                    }
                });
            }
        });
        if scope_result.is_err() {
            log::error!("[fdio/scheduler] a board worker thread panicked");
            errors.lock().push(FdioError::WorkerPanicked);
        }

        let mut errs = errors.into_inner();
        if errs.is_empty() {
            Ok(())
        } else {
            let primary = errs.remove(0);
            Err(JoinedError {
                primary,
                suppressed: errs,
            })
        }
    }
}
