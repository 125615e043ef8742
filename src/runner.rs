use crate::collector::ErrorCollector;
use crate::error::RunnerError;
use crate::group::TaskGroup;
use crate::pool::WorkerPool;
use crate::scope::Scope;
use crate::task::{boxed, BoxTask};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout budgets for the shutdown and cleanup phases.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
  /// Budget for waiting out background tasks and shutdown hooks.
  pub shutdown_timeout: Duration,
  /// Budget for the cleanup hooks.
  pub cleanup_timeout: Duration,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
      cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
    }
  }
}

/// Configures and builds a [`Runner`].
pub struct RunnerBuilder {
  config: RunnerConfig,
  pool: Option<WorkerPool>,
  parent: Option<Scope>,
  catch_signals: bool,
}

impl RunnerBuilder {
  /// Bounds the shutdown phase. Non-positive values are ignored.
  pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
    if timeout > Duration::ZERO {
      self.config.shutdown_timeout = timeout;
    }
    self
  }

  /// Bounds the cleanup phase. Non-positive values are ignored.
  pub fn cleanup_timeout(mut self, timeout: Duration) -> Self {
    if timeout > Duration::ZERO {
      self.config.cleanup_timeout = timeout;
    }
    self
  }

  /// Dispatches background tasks onto `pool` instead of spawning one Tokio
  /// task per submission.
  pub fn pool(mut self, pool: WorkerPool) -> Self {
    self.pool = Some(pool);
    self
  }

  /// Attaches an external cancellation source: the runner's root scope
  /// becomes a child of `parent`, so cancelling `parent` ends the run
  /// phase.
  pub fn parent_scope(mut self, parent: &Scope) -> Self {
    self.parent = Some(parent.clone());
    self
  }

  /// Cancels the root scope on SIGINT/SIGTERM (Ctrl-C on non-unix
  /// platforms), turning OS signals into the shutdown trigger.
  pub fn catch_signals(mut self) -> Self {
    self.catch_signals = true;
    self
  }

  /// Builds the runner. Must be called from within a Tokio runtime.
  pub fn build(self) -> Runner {
    let scope = match &self.parent {
      Some(parent) => parent.child(),
      None => Scope::new(),
    };

    if self.catch_signals {
      spawn_signal_listener(scope.clone());
    }

    let group = match self.pool {
      Some(pool) => TaskGroup::with_pool(&scope, pool),
      None => TaskGroup::new(&scope),
    };

    Runner {
      inner: Arc::new(RunnerInner {
        scope,
        group,
        shutdown_hooks: Mutex::new(Vec::new()),
        cleanup_hooks: Mutex::new(Vec::new()),
        config: self.config,
      }),
    }
  }
}

/// Drives background tasks through a three-phase lifecycle:
///
/// 1. **Run**: background tasks execute under the root scope until every
///    one has completed or the first one fails.
/// 2. **Shutdown**, bounded by `shutdown_timeout`: the remaining
///    background tasks are waited out while every shutdown hook runs.
/// 3. **Cleanup**, bounded by `cleanup_timeout`: every cleanup hook runs,
///    regardless of how shutdown went.
///
/// [`Runner::wait`] returns the full aggregated error sequence; a phase
/// whose deadline fired contributes a [`RunnerError::DeadlineExceeded`]
/// entry. Clones share the same runner, which lets an init task register
/// more work; the runner is consumed by `wait` and is not reusable.
#[derive(Clone)]
pub struct Runner {
  inner: Arc<RunnerInner>,
}

struct RunnerInner {
  scope: Scope,
  group: TaskGroup,
  shutdown_hooks: Mutex<Vec<BoxTask>>,
  cleanup_hooks: Mutex<Vec<BoxTask>>,
  config: RunnerConfig,
}

impl Default for Runner {
  fn default() -> Self {
    Self::new()
  }
}

impl Runner {
  /// A runner with default timeouts and no pool.
  pub fn new() -> Self {
    Self::builder().build()
  }

  pub fn builder() -> RunnerBuilder {
    RunnerBuilder {
      config: RunnerConfig::default(),
      pool: None,
      parent: None,
      catch_signals: false,
    }
  }

  /// The root scope background tasks run under. Cancelling it ends the run
  /// phase.
  pub fn scope(&self) -> &Scope {
    &self.inner.scope
  }

  /// Launches a background task.
  pub fn run<F, Fut>(&self, task: F) -> &Self
  where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
  {
    self.inner.group.submit(task);
    self
  }

  /// Launches a background task together with the shutdown hook that knows
  /// how to stop it.
  ///
  /// This pair shape fits server adapters: "serve" as the task, "stop
  /// accepting and drain" as the hook, each treating "already stopped" as
  /// success.
  pub fn run_with_shutdown<F, Fut, S, SFut>(&self, task: F, shutdown: S) -> &Self
  where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
    S: FnOnce(Scope) -> SFut + Send + 'static,
    SFut: Future<Output = Result<(), RunnerError>> + Send + 'static,
  {
    self.inner.shutdown_hooks.lock().push(boxed(shutdown));
    self.run(task)
  }

  /// Launches an init task that receives a clone of this runner, letting
  /// it register further tasks and hooks before returning.
  pub fn run_init<F, Fut>(&self, init: F) -> &Self
  where
    F: FnOnce(Runner, Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
  {
    let handle = self.clone();
    self.inner.group.submit(move |scope| init(handle, scope));
    self
  }

  /// Registers a hook for the shutdown phase.
  pub fn add_shutdown_hook<F, Fut>(&self, hook: F) -> &Self
  where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
  {
    self.inner.shutdown_hooks.lock().push(boxed(hook));
    self
  }

  /// Registers a hook for the cleanup phase.
  pub fn add_cleanup_hook<F, Fut>(&self, hook: F) -> &Self
  where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
  {
    self.inner.cleanup_hooks.lock().push(boxed(hook));
    self
  }

  /// Runs the full lifecycle to completion and returns every collected
  /// error: background and shutdown errors in completion order, a
  /// [`RunnerError::DeadlineExceeded`] entry per elapsed phase deadline,
  /// cleanup errors last. A phase's error list is frozen when the phase
  /// ends; errors produced past a phase deadline are dropped.
  pub async fn wait(self) -> Vec<RunnerError> {
    let inner = self.inner;

    // Run phase: ends when all background tasks finished or one failed.
    match inner.group.wait_first().await {
      Some(error) => info!(%error, "background task failed, entering shutdown"),
      None => info!("run phase over, entering shutdown"),
    }

    // Shutdown phase: wait out the background tasks and run the shutdown
    // hooks concurrently, both bounded by the shutdown deadline. The phase
    // writes into its own collector.
    let shutdown_errors = ErrorCollector::new();
    let shutdown_scope = Scope::with_timeout(inner.config.shutdown_timeout);
    let shutdown_group = TaskGroup::new(&shutdown_scope);
    {
      let background = inner.group.clone();
      let errors = shutdown_errors.clone();
      shutdown_group.submit(move |_scope| async move {
        errors.extend(background.wait_all().await);
        Ok(())
      });
    }
    {
      let hooks: Vec<BoxTask> = std::mem::take(&mut *inner.shutdown_hooks.lock());
      let errors = shutdown_errors.clone();
      shutdown_group.submit(move |scope| async move {
        errors.extend(run_hooks(&scope, hooks).await);
        Ok(())
      });
    }
    let _ = shutdown_group.wait_first().await;
    // Freeze the phase here: a hook that outlives the deadline keeps
    // appending to the shared collector, but only errors recorded within
    // the shutdown window make it into the returned sequence.
    let mut errors = shutdown_errors.snapshot();
    if shutdown_scope.deadline_exceeded() {
      warn!(timeout = ?inner.config.shutdown_timeout, "shutdown phase deadline exceeded");
      errors.push(RunnerError::DeadlineExceeded);
    }
    // Releases the deadline timer; the phase is over either way.
    shutdown_scope.cancel();

    // Cleanup phase: runs unconditionally under its own budget, with a
    // fresh collector so shutdown stragglers can never interleave with
    // cleanup errors.
    let cleanup_errors = ErrorCollector::new();
    let cleanup_scope = Scope::with_timeout(inner.config.cleanup_timeout);
    let cleanup_group = TaskGroup::new(&cleanup_scope);
    {
      let hooks: Vec<BoxTask> = std::mem::take(&mut *inner.cleanup_hooks.lock());
      let errors = cleanup_errors.clone();
      cleanup_group.submit(move |scope| async move {
        errors.extend(run_hooks(&scope, hooks).await);
        Ok(())
      });
    }
    let _ = cleanup_group.wait_first().await;
    errors.extend(cleanup_errors.snapshot());
    if cleanup_scope.deadline_exceeded() {
      warn!(timeout = ?inner.config.cleanup_timeout, "cleanup phase deadline exceeded");
      errors.push(RunnerError::DeadlineExceeded);
    }
    cleanup_scope.cancel();

    info!(error_count = errors.len(), "lifecycle complete");
    errors
  }
}

/// Runs every hook as a task of a nested group and harvests its errors.
async fn run_hooks(scope: &Scope, hooks: Vec<BoxTask>) -> Vec<RunnerError> {
  let group = TaskGroup::new(scope);
  for hook in hooks {
    group.submit(hook);
  }
  group.wait_all().await
}

fn spawn_signal_listener(scope: Scope) {
  tokio::spawn(async move {
    #[cfg(unix)]
    {
      use tokio::signal::unix::{signal, SignalKind};

      let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(error) => {
          warn!(%error, "failed to install SIGINT handler");
          return;
        }
      };
      let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
          warn!(%error, "failed to install SIGTERM handler");
          return;
        }
      };

      tokio::select! {
        _ = interrupt.recv() => info!("received SIGINT, cancelling root scope"),
        _ = terminate.recv() => info!("received SIGTERM, cancelling root scope"),
        _ = scope.cancelled() => return,
      }
    }

    #[cfg(not(unix))]
    {
      tokio::select! {
        result = tokio::signal::ctrl_c() => {
          match result {
            Ok(()) => info!("received ctrl-c, cancelling root scope"),
            Err(error) => {
              warn!(%error, "ctrl-c handler failed");
              return;
            }
          }
        }
        _ = scope.cancelled() => return,
      }
    }

    scope.cancel();
  });
}
