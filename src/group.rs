use crate::collector::ErrorCollector;
use crate::error::RunnerError;
use crate::pool::WorkerPool;
use crate::scope::Scope;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, trace};

lazy_static::lazy_static! {
  static ref NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(0);
}

/// Runs a batch of tasks concurrently under one shared [`Scope`],
/// collecting every error in completion order.
///
/// Recording any task's error cancels the group scope, which is how sibling
/// tasks learn that something failed: they are never force-stopped, only
/// invited to stop. Waiters cancel the scope once every submitted task has
/// completed, so both wait operations converge on "scope cancelled".
///
/// Tasks run on freshly spawned Tokio tasks, or as jobs of a configured
/// [`WorkerPool`]. Clones share the same group; after a wait the group can
/// be [`reset`](TaskGroup::reset) for a new batch.
#[derive(Debug, Clone)]
pub struct TaskGroup {
  inner: Arc<GroupInner>,
}

#[derive(Debug)]
struct GroupInner {
  group_id: u64,
  scope: Scope,
  errors: ErrorCollector,
  outstanding: watch::Sender<usize>,
  pool: Option<WorkerPool>,
}

impl GroupInner {
  fn new(scope: Scope, pool: Option<WorkerPool>) -> Self {
    Self {
      group_id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
      scope,
      errors: ErrorCollector::new(),
      outstanding: watch::channel(0).0,
      pool,
    }
  }

  fn task_done(&self, result: Result<(), RunnerError>) {
    if let Err(error) = result {
      debug!(group_id = self.group_id, %error, "task failed, cancelling group scope");
      self.errors.push(error);
      self.scope.cancel();
    }
    // Waiters watch this counter; cancellation at zero is their job, so a
    // batch that drains between two submissions is not cut short.
    self.outstanding.send_modify(|count| *count -= 1);
  }
}

impl TaskGroup {
  /// Creates a group whose scope is derived from `parent`.
  pub fn new(parent: &Scope) -> Self {
    Self::build(parent, None)
  }

  /// Creates a group that dispatches its tasks onto `pool` instead of
  /// spawning a dedicated Tokio task per submission.
  pub fn with_pool(parent: &Scope, pool: WorkerPool) -> Self {
    Self::build(parent, Some(pool))
  }

  fn build(parent: &Scope, pool: Option<WorkerPool>) -> Self {
    Self {
      inner: Arc::new(GroupInner::new(parent.child(), pool)),
    }
  }

  /// The scope shared by every task in the current batch.
  pub fn scope(&self) -> &Scope {
    &self.inner.scope
  }

  /// Submits a task for concurrent execution.
  ///
  /// The task receives the group scope and should stop promptly once it is
  /// cancelled. A panicking task is recorded as
  /// [`RunnerError::TaskPanicked`]. If pool dispatch fails, the submission
  /// error is recorded as if the task had run and failed with it.
  pub fn submit<F, Fut>(&self, task: F)
  where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
  {
    let inner = self.inner.clone();
    inner.outstanding.send_modify(|count| *count += 1);
    trace!(group_id = inner.group_id, "task submitted");

    let scope = inner.scope.clone();
    let done_inner = inner.clone();
    let job = async move {
      let outcome = AssertUnwindSafe(async move { task(scope).await })
        .catch_unwind()
        .await;
      let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(RunnerError::TaskPanicked),
      };
      done_inner.task_done(result);
    };

    match &inner.pool {
      Some(pool) => {
        if let Err(error) = pool.submit(job) {
          inner.task_done(Err(error));
        }
      }
      None => {
        tokio::spawn(job);
      }
    }
  }

  /// Blocks until the group scope is cancelled: either some task failed, or
  /// every submitted task completed. Returns the first error in completion
  /// order.
  ///
  /// Does not wait for stragglers: after an early failure, the remaining
  /// tasks keep running in the background.
  pub async fn wait_first(&self) -> Option<RunnerError> {
    let mut outstanding = self.inner.outstanding.subscribe();
    tokio::select! {
      _ = self.inner.scope.cancelled() => {}
      _ = outstanding.wait_for(|count| *count == 0) => {
        trace!(group_id = self.inner.group_id, "all tasks completed, cancelling group scope");
        self.inner.scope.cancel();
      }
    }
    self.inner.errors.first()
  }

  /// Blocks until every submitted task has completed, then returns the
  /// full, order-preserving error snapshot.
  pub async fn wait_all(&self) -> Vec<RunnerError> {
    let mut outstanding = self.inner.outstanding.subscribe();
    let _ = outstanding.wait_for(|count| *count == 0).await;
    self.inner.scope.cancel();
    self.inner.errors.snapshot()
  }

  /// Re-arms the group for a new batch: a fresh scope derived from
  /// `parent` and a brand-new, empty collector. The configured pool, if
  /// any, is kept. Tasks from the previous batch keep their old scope and
  /// collector, so their errors can never leak into the new batch.
  pub fn reset(&mut self, parent: &Scope) {
    debug!(group_id = self.inner.group_id, "resetting task group");
    let pool = self.inner.pool.clone();
    self.inner = Arc::new(GroupInner::new(parent.child(), pool));
  }
}
