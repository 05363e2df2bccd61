// Copyright © 2024 Pathway

use log::warn;

use crate::env::{parse_env_flag, parse_env_var, Error as EnvError};

pub const MAX_THREADS: usize = if cfg!(feature = "unlimited-workers") {
    usize::MAX
} else {
    8
};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("can't run with no threads")]
    NeedsThreads,

    #[error("can't split a table into zero partitions")]
    NeedsPartitions,

    #[error(transparent)]
    EnvError(#[from] EnvError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    threads: usize,
    partitions: usize,
    strict_dtypes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 1,
            partitions: 1,
            strict_dtypes: false,
        }
    }
}

impl Config {
    pub fn new(threads: usize) -> Result<Self, Error> {
        let threads = clamp_threads(threads)?;
        Ok(Self {
            threads,
            partitions: threads,
            strict_dtypes: false,
        })
    }

    pub fn with_partitions(mut self, partitions: usize) -> Result<Self, Error> {
        if partitions == 0 {
            return Err(Error::NeedsPartitions);
        }
        self.partitions = partitions;
        Ok(self)
    }

    #[must_use]
    pub fn with_strict_dtypes(mut self, strict_dtypes: bool) -> Self {
        self.strict_dtypes = strict_dtypes;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn strict_dtypes(&self) -> bool {
        self.strict_dtypes
    }

    pub fn from_env() -> Result<Self, Error> {
        let threads: usize = parse_env_var("DAGFRAME_THREADS")?.unwrap_or(1);
        let config = Self::new(threads)?;
        let config = match parse_env_var("DAGFRAME_PARTITIONS")? {
            Some(partitions) => config.with_partitions(partitions)?,
            None => config,
        };
        let strict_dtypes = parse_env_flag("DAGFRAME_STRICT_DTYPES")?.unwrap_or(false);
        Ok(config.with_strict_dtypes(strict_dtypes))
    }
}

fn clamp_threads(threads: usize) -> Result<usize, Error> {
    if threads == 0 {
        return Err(Error::NeedsThreads);
    }
    if threads > MAX_THREADS {
        warn!("{threads} is greater than the maximum allowed number of threads ({MAX_THREADS}), reducing");
        return Ok(MAX_THREADS);
    }
    Ok(threads)
}
