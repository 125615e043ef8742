use crate::error::RunnerError;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);
}

const MIN_POOL_SIZE: usize = 1;
const MIN_QUEUE_CAPACITY: usize = 1;

/// A zero-argument job executed by a pool worker.
pub type Job = BoxFuture<'static, ()>;

/// A resizable pool of persistent worker loops draining a bounded job queue.
///
/// Jobs are delivered FIFO but complete in no particular order, since
/// workers run concurrently. The pool can be rescaled while running without
/// losing in-flight or queued jobs, and closing it seals the queue while
/// letting already-queued jobs drain.
///
/// Clones share the same pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
  inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
  pool_id: u64,
  jobs_tx: async_channel::Sender<Job>,
  jobs_rx: async_channel::Receiver<Job>,
  // Unbounded so a downscale of any magnitude never blocks the caller.
  retire_tx: async_channel::Sender<()>,
  retire_rx: async_channel::Receiver<()>,
  desired: AtomicUsize,
  live: AtomicUsize,
  closed: AtomicBool,
}

/// Decrements the live-worker count when a worker loop exits, including
/// exits caused by a panicking job.
struct LiveGuard(Arc<PoolInner>);

impl Drop for LiveGuard {
  fn drop(&mut self) {
    self.0.live.fetch_sub(1, Ordering::SeqCst);
  }
}

impl WorkerPool {
  /// Creates a pool with `size` workers and a job queue of `queue_capacity`
  /// slots. Both are clamped to a minimum of 1. Worker loops start
  /// immediately, so this must be called from within a Tokio runtime.
  pub fn new(size: usize, queue_capacity: usize) -> Self {
    let (jobs_tx, jobs_rx) = async_channel::bounded(queue_capacity.max(MIN_QUEUE_CAPACITY));
    let (retire_tx, retire_rx) = async_channel::unbounded();

    let pool = Self {
      inner: Arc::new(PoolInner {
        pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
        jobs_tx,
        jobs_rx,
        retire_tx,
        retire_rx,
        desired: AtomicUsize::new(0),
        live: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
      }),
    };

    info!(pool_id = pool.inner.pool_id, size, queue_capacity, "starting worker pool");
    pool.rescale(size);
    pool
  }

  /// Enqueues a job for eventual execution by any available worker.
  ///
  /// Never waits for capacity: returns [`RunnerError::PoolOverloaded`] when
  /// the queue is full and [`RunnerError::PoolClosed`] once the pool has
  /// been closed.
  pub fn submit<Fut>(&self, job: Fut) -> Result<(), RunnerError>
  where
    Fut: Future<Output = ()> + Send + 'static,
  {
    if self.inner.closed.load(Ordering::SeqCst) {
      return Err(RunnerError::PoolClosed);
    }

    let job: Job = Box::pin(job);
    match self.inner.jobs_tx.try_send(job) {
      Ok(()) => Ok(()),
      Err(async_channel::TrySendError::Full(_)) => {
        warn!(pool_id = self.inner.pool_id, "job queue full, rejecting submission");
        Err(RunnerError::PoolOverloaded)
      }
      Err(async_channel::TrySendError::Closed(_)) => Err(RunnerError::PoolClosed),
    }
  }

  /// Changes the desired worker count, clamped to a minimum of 1.
  ///
  /// Upscaling spawns exactly the deficit. Downscaling enqueues exactly the
  /// surplus as retire signals; each worker, on its next idle iteration,
  /// races "dequeue a job" against "consume a retire signal", so a worker
  /// may pick up one more job before retiring. The live count converges to
  /// the desired size as workers finish their current job. The retire
  /// channel is unbounded, so this call never blocks regardless of the
  /// downscale magnitude. A retire signal still pending when a later
  /// upscale is requested keeps its effect, so the live count can settle
  /// below the desired size until the next rescale call.
  pub fn rescale(&self, new_size: usize) {
    let new_size = new_size.max(MIN_POOL_SIZE);
    let inner = &self.inner;

    inner.desired.store(new_size, Ordering::SeqCst);
    let live = inner.live.load(Ordering::SeqCst);

    if new_size > live {
      debug!(pool_id = inner.pool_id, live, new_size, "rescale: spawning workers");
      for _ in live..new_size {
        inner.live.fetch_add(1, Ordering::SeqCst);
        let worker_inner = inner.clone();
        tokio::spawn(
          worker_loop(worker_inner)
            .instrument(info_span!("pool_worker", pool_id = inner.pool_id)),
        );
      }
    } else if new_size < live {
      debug!(pool_id = inner.pool_id, live, new_size, "rescale: retiring workers");
      for _ in new_size..live {
        let _ = inner.retire_tx.try_send(());
      }
    }
  }

  /// Marks the pool closed and seals the queue.
  ///
  /// New submissions fail with [`RunnerError::PoolClosed`]; jobs already in
  /// the queue are still dequeued and executed. Idle workers observe the
  /// sealed, drained queue and exit. Idempotent.
  pub fn close(&self) {
    if self.inner.closed.swap(true, Ordering::SeqCst) {
      return;
    }
    info!(pool_id = self.inner.pool_id, "closing worker pool");
    self.inner.jobs_tx.close();
  }

  /// Number of worker loops currently running.
  pub fn live_workers(&self) -> usize {
    self.inner.live.load(Ordering::SeqCst)
  }

  /// Worker count the pool is converging towards.
  pub fn desired_size(&self) -> usize {
    self.inner.desired.load(Ordering::SeqCst)
  }

  /// Number of jobs waiting in the queue.
  pub fn queued_jobs(&self) -> usize {
    self.inner.jobs_tx.len()
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::SeqCst)
  }
}

/// Worker state machine: Idle → (dequeue) → Executing → Idle;
/// Idle + retire signal → Terminated; Idle + sealed empty queue → Terminated.
async fn worker_loop(inner: Arc<PoolInner>) {
  let _live = LiveGuard(inner.clone());
  trace!("worker started");

  loop {
    // Unbiased select: a worker with both a queued job and a pending retire
    // signal takes whichever wins the race, so it may run one more job
    // before retiring.
    tokio::select! {
      retire = inner.retire_rx.recv() => {
        if retire.is_ok() {
          trace!("worker retiring on rescale signal");
        }
        break;
      }
      job = inner.jobs_rx.recv() => {
        match job {
          Ok(job) => {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
              warn!("pool job panicked");
            }
          }
          Err(_) => {
            trace!("job queue sealed and drained, worker exiting");
            break;
          }
        }
      }
    }
  }
}
