//! A Tokio-based lifecycle runner: error-aggregating task groups, an
//! elastic worker pool and phased graceful shutdown with per-phase
//! timeouts.
//!
//! Launch several independent units of work, observe the first failure,
//! then drive an orderly Run → Shutdown → Cleanup sequence and get back
//! every error that occurred along the way:
//!
//! ```no_run
//! use graceful_runner::{Runner, RunnerError};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let runner = Runner::builder()
//!   .shutdown_timeout(Duration::from_secs(10))
//!   .catch_signals()
//!   .build();
//!
//! runner.run_with_shutdown(
//!   |scope| async move {
//!     // serve until cancelled
//!     scope.cancelled().await;
//!     Ok(())
//!   },
//!   |_scope| async move {
//!     // stop accepting and drain
//!     Ok(())
//!   },
//! );
//!
//! let errors: Vec<RunnerError> = runner.wait().await;
//! # }
//! ```

mod collector;
mod error;
mod group;
mod pool;
mod runner;
mod scope;
pub mod task;

pub use collector::ErrorCollector;
pub use error::RunnerError;
pub use group::TaskGroup;
pub use pool::{Job, WorkerPool};
pub use runner::{
  Runner, RunnerBuilder, RunnerConfig, DEFAULT_CLEANUP_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use scope::Scope;
pub use task::{BoxTask, TaskFuture};
