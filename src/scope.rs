use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A cancellation domain, optionally bounded by a deadline.
///
/// Scopes form a tree: cancelling a scope cancels every scope derived from
/// it, while a child can be cancelled without affecting its parent.
/// Cancellation is cooperative. Tasks are expected to poll or select on
/// [`Scope::cancelled`] and stop on their own. Cancelling is idempotent and
/// monotonic: once cancelled, a scope stays cancelled.
#[derive(Debug, Clone)]
pub struct Scope {
  token: CancellationToken,
  deadline_hit: Arc<AtomicBool>,
}

impl Scope {
  /// Creates a new root scope.
  pub fn new() -> Self {
    Self {
      token: CancellationToken::new(),
      deadline_hit: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Derives a child scope that observes this scope's cancellation.
  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      deadline_hit: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Creates a root scope that cancels itself once `timeout` elapses.
  ///
  /// Must be called from within a Tokio runtime; the deadline is driven by
  /// a spawned timer task.
  pub fn with_timeout(timeout: Duration) -> Self {
    let scope = Self::new();
    scope.arm_deadline(timeout);
    scope
  }

  /// Derives a child scope with its own deadline on top of the parent's
  /// cancellation.
  pub fn child_with_timeout(&self, timeout: Duration) -> Self {
    let scope = self.child();
    scope.arm_deadline(timeout);
    scope
  }

  fn arm_deadline(&self, timeout: Duration) {
    let token = self.token.clone();
    let deadline_hit = self.deadline_hit.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
          deadline_hit.store(true, Ordering::SeqCst);
          trace!(?timeout, "scope deadline elapsed, cancelling");
          token.cancel();
        }
      }
    });
  }

  /// Cancels this scope and every scope derived from it.
  pub fn cancel(&self) {
    self.token.cancel();
  }

  /// Returns `true` once this scope or one of its ancestors was cancelled.
  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Resolves once this scope or one of its ancestors has been cancelled.
  pub async fn cancelled(&self) {
    self.token.cancelled().await
  }

  /// Returns `true` when cancellation was caused by this scope's own
  /// deadline rather than an explicit [`Scope::cancel`] call or a parent.
  pub fn deadline_exceeded(&self) -> bool {
    self.deadline_hit.load(Ordering::SeqCst)
  }
}

impl Default for Scope {
  fn default() -> Self {
    Self::new()
  }
}
