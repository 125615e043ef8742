use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced and aggregated by this crate.
///
/// Task-level errors are carried behind an `Arc` so the same entry can be
/// handed out by both `wait_first` and `wait_all` without cloning the
/// underlying error value.
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
  /// An error returned by a user task body.
  #[error(transparent)]
  Task(Arc<dyn StdError + Send + Sync + 'static>),

  /// A task body panicked during execution.
  #[error("task panicked during execution")]
  TaskPanicked,

  /// Submission rejected: the pool's job queue was full.
  #[error("worker pool queue is full")]
  PoolOverloaded,

  /// Submission rejected: the pool has been closed.
  #[error("worker pool is closed")]
  PoolClosed,

  /// A lifecycle phase's deadline elapsed before its work completed.
  #[error("phase deadline exceeded")]
  DeadlineExceeded,
}

impl RunnerError {
  /// Wraps an arbitrary error as a task error.
  pub fn task<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    RunnerError::Task(Arc::new(err))
  }

  /// Builds a task error from a plain message.
  pub fn msg(message: impl Into<String>) -> Self {
    RunnerError::Task(Arc::new(MessageError(message.into())))
  }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl StdError for MessageError {}
