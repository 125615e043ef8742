use crate::error::RunnerError;

use std::sync::Arc;

use parking_lot::Mutex;

/// A thread-safe, append-only list of errors.
///
/// Insertion order is the completion order of the producing tasks, not
/// their submission order. Reads return an immutable snapshot taken at call
/// time, never a live view. Clones share the same underlying list; a
/// logically empty collector is obtained by constructing a new one, not by
/// truncating shared storage.
#[derive(Debug, Clone, Default)]
pub struct ErrorCollector {
  errors: Arc<Mutex<Vec<RunnerError>>>,
}

impl ErrorCollector {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends one error. Appends are mutually exclusive.
  pub fn push(&self, error: RunnerError) {
    self.errors.lock().push(error);
  }

  /// Appends every error from `errors`, preserving their order.
  pub fn extend(&self, errors: impl IntoIterator<Item = RunnerError>) {
    self.errors.lock().extend(errors);
  }

  /// The first recorded error in completion order, if any.
  pub fn first(&self) -> Option<RunnerError> {
    self.errors.lock().first().cloned()
  }

  /// A snapshot of every error recorded so far.
  pub fn snapshot(&self) -> Vec<RunnerError> {
    self.errors.lock().clone()
  }

  pub fn is_empty(&self) -> bool {
    self.errors.lock().is_empty()
  }

  pub fn len(&self) -> usize {
    self.errors.lock().len()
  }
}
