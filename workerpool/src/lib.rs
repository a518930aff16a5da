//! Worker pool (C3, spec §4.3).
//!
//! A lazily sized pool of `n'` worker "slots" that fan a single task
//! function out over `[0, n')` in parallel and block until every worker
//! completes, each worker writing only its own return-code slot. Grounded
//! on `renderer/src/util.rs`'s `SyncArena` (a `Mutex`-guarded shared
//! structure with no cross-worker aliasing) and `render-gl/src/backend.rs`'s
//! pattern of guarding shared backend state with a single `Mutex`.
//!
//! Unlike the teacher's long-lived GL context thread, a dispatch here is a
//! one-shot fan-out: there is no queue of heterogeneous jobs to keep
//! threads alive for between calls, so `run` spawns `n'` scoped threads per
//! call instead of parking a persistent pool of worker threads on a job
//! channel. `init`/`shutdown` still exist as named operations, matching the
//! lifecycle spec.md specifies, but `shutdown` has nothing to join beyond
//! whatever `run` already joined.

mod error;

pub use error::{Error, Result};

/// A sized worker pool. Holds only the task count `n'`; see module docs for
/// why no threads are parked between calls.
pub struct WorkerPool {
    size: usize,
    shut_down: bool,
}

impl WorkerPool {
    /// `n = 0` means "use the logical core count" (§4.3).
    pub fn init(n: usize) -> WorkerPool {
        let size = if n == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            n
        };
        log::debug!("worker pool initialized with {size} worker(s)");
        WorkerPool {
            size,
            shut_down: false,
        }
    }

    /// The `n'` the pool actually created; dispatch callers pass this back
    /// into `run` as the task count for multi-core plug-ins.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `task_fn(n', idx, user_ctx)` for every `idx` in `[0, n')`,
    /// blocking until all workers complete. Ordering across workers is
    /// unspecified; `task_fn` must confine its effects on shared state to
    /// the region implied by `idx`.
    pub fn run<C, F>(&self, user_ctx: &C, task_fn: F) -> Result<Vec<i32>>
    where
        C: Sync,
        F: Fn(usize, usize, &C) -> i32 + Sync,
    {
        if self.shut_down {
            return Err(Error::PoolShutDown);
        }
        let n = self.size;
        let mut returns = vec![0i32; n];
        let task_fn = &task_fn;
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(n);
            for idx in 0..n {
                handles.push(scope.spawn(move || task_fn(n, idx, user_ctx)));
            }
            for (idx, handle) in handles.into_iter().enumerate() {
                returns[idx] = handle.join().map_err(|_| Error::WorkerPanicked)?;
            }
            Ok(())
        })?;
        Ok(returns)
    }

    /// Drains and joins. Since `run` spawns and joins its own scoped
    /// threads per call, there is nothing left outstanding by the time
    /// `shutdown` is called; it exists to mark the pool as no longer usable.
    pub fn shutdown(&mut self) {
        log::debug!("worker pool with {} worker(s) shut down", self.size);
        self.shut_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn init_zero_uses_logical_cores() {
        let pool = WorkerPool::init(0);
        assert!(pool.size() >= 1);
    }

    #[test]
    fn init_explicit_n_is_exact() {
        let pool = WorkerPool::init(4);
        assert_eq!(pool.size(), 4);
    }

    #[test]
    fn run_invokes_every_index_exactly_once() {
        let pool = WorkerPool::init(8);
        let seen = (0..8).map(|_| AtomicI32::new(0)).collect::<Vec<_>>();
        let returns = pool
            .run(&seen, |n, idx, seen| {
                assert_eq!(n, 8);
                seen[idx].fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap();
        assert_eq!(returns, vec![0; 8]);
        assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn run_collects_per_task_return_codes() {
        let pool = WorkerPool::init(4);
        let returns = pool.run(&(), |_n, idx, _ctx| idx as i32).unwrap();
        assert_eq!(returns, vec![0, 1, 2, 3]);
    }

    #[test]
    fn run_after_shutdown_errors() {
        let mut pool = WorkerPool::init(2);
        pool.shutdown();
        let err = pool.run(&(), |_, _, _| 0).unwrap_err();
        assert!(matches!(err, Error::PoolShutDown));
    }
}
