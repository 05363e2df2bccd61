// Copyright © 2024 Pathway

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{Config, Error, Result};

/// Where partition-level work runs.
///
/// [`Session::execute`] submits every task and only returns once all of them
/// finished, with results in submission order. A panicking task yields
/// [`Error::WorkerPanic`] in its slot instead of tearing down the caller.
pub trait Session: Send + Sync {
    fn workers(&self) -> usize;

    fn execute<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send;

    /// Runs `f` once on every worker.
    fn run_on_all_workers<F>(&self, f: F)
    where
        F: Fn() + Sync;
}

fn run_task<T>(task: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(task))
        .unwrap_or_else(|payload| Err(Error::from_panic_payload(payload)))
}

/// In-process fallback: tasks run one after another on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousSession;

impl Session for SynchronousSession {
    fn workers(&self) -> usize {
        1
    }

    fn execute<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        tasks.into_iter().map(|task| run_task(task)).collect()
    }

    fn run_on_all_workers<F>(&self, f: F)
    where
        F: Fn() + Sync,
    {
        f();
    }
}

/// Runs tasks on a dedicated rayon thread pool.
pub struct RayonSession {
    pool: ThreadPool,
}

impl RayonSession {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("dagframe-worker-{index}"))
            .build()
            .map_err(|err| Error::Other(Box::new(err)))?;
        debug!("Started a session with {} workers", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.threads())
    }
}

impl fmt::Debug for RayonSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonSession")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Session for RayonSession {
    fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn execute<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| run_task(task))
                .collect()
        })
    }

    fn run_on_all_workers<F>(&self, f: F)
    where
        F: Fn() + Sync,
    {
        self.pool.broadcast(|_| f());
    }
}
