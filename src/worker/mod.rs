//! Process execution for jobs.
//!
//! [`JobExecutor::run`] spawns the command directly (no shell) with both
//! output pipes captured, then hands the child to background tasks:
//!
//! 1. The pump reads stdout and stderr in fixed-size blocks and appends every
//!    non-empty read to the job's broadcaster. Order within each pipe is
//!    preserved; interleaving between the two is not.
//! 2. The reaper waits for the process to exit and serves kill requests.
//!
//! Once both pipes are drained and the process has exited the job becomes
//! `Completed`. A read or persistence failure makes it `Errored` and the
//! process is killed. [`JobExecutor::stop`] makes it `Stopped`.

pub mod executor;

pub use executor::JobExecutor;
