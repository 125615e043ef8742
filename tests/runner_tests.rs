use graceful_runner::{Runner, RunnerError, Scope, WorkerPool};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,graceful_runner=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[tokio::test]
async fn clean_run_returns_no_errors() {
  setup_tracing_for_test();
  let runner = Runner::new();

  runner.run(|_scope| async {
    sleep(Duration::from_millis(20)).await;
    Ok(())
  });
  runner.run(|_scope| async { Ok(()) });

  let errors = timeout(Duration::from_secs(5), runner.wait())
    .await
    .expect("wait did not resolve");
  assert!(errors.is_empty());
}

#[tokio::test]
async fn first_failure_triggers_shutdown_and_is_the_only_error() {
  setup_tracing_for_test();
  let slow_task_finished = Arc::new(AtomicBool::new(false));
  let runner = Runner::new();

  let flag = slow_task_finished.clone();
  runner.run(move |_scope| async move {
    sleep(Duration::from_millis(200)).await;
    flag.store(true, Ordering::SeqCst);
    Ok(())
  });
  runner.run(|_scope| async { Err(RunnerError::msg("immediate failure")) });

  let started = Instant::now();
  let errors = runner.wait().await;
  let elapsed = started.elapsed();

  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].to_string(), "immediate failure");
  // The slow task is allowed to run to completion during the shutdown
  // phase, well under the default 30s budget.
  assert!(slow_task_finished.load(Ordering::SeqCst));
  assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn slow_shutdown_hook_hits_the_deadline() {
  setup_tracing_for_test();
  let runner = Runner::builder()
    .shutdown_timeout(Duration::from_secs(1))
    .build();

  runner.run(|_scope| async { Err(RunnerError::msg("trigger")) });
  runner.add_shutdown_hook(|_scope| async {
    // Ignores cancellation on purpose.
    sleep(Duration::from_secs(2)).await;
    Ok(())
  });

  let started = Instant::now();
  let errors = runner.wait().await;
  let elapsed = started.elapsed();

  let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
  assert!(rendered.contains(&"trigger".to_string()), "missing trigger in {rendered:?}");
  assert!(
    errors.iter().any(|e| matches!(e, RunnerError::DeadlineExceeded)),
    "missing deadline entry in {rendered:?}"
  );
  // Bounded by the 1s shutdown budget, not the 2s hook.
  assert!(elapsed >= Duration::from_millis(900));
  assert!(elapsed < Duration::from_millis(1800));
}

#[tokio::test]
async fn shutdown_hooks_run_even_on_clean_exit() {
  setup_tracing_for_test();
  let hook_ran = Arc::new(AtomicBool::new(false));
  let runner = Runner::new();

  let flag = hook_ran.clone();
  runner.run_with_shutdown(
    |_scope| async { Ok(()) },
    move |_scope| async move {
      flag.store(true, Ordering::SeqCst);
      Ok(())
    },
  );

  let errors = runner.wait().await;
  assert!(errors.is_empty());
  assert!(hook_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cleanup_runs_after_shutdown_regardless_of_outcome() {
  setup_tracing_for_test();
  let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let runner = Runner::builder()
    .shutdown_timeout(Duration::from_millis(200))
    .cleanup_timeout(Duration::from_secs(1))
    .build();

  runner.run(|_scope| async { Err(RunnerError::msg("boom")) });

  let shutdown_order = order.clone();
  runner.add_shutdown_hook(move |_scope| async move {
    shutdown_order.lock().push("shutdown");
    // Blow the shutdown budget.
    sleep(Duration::from_secs(5)).await;
    Ok(())
  });

  let cleanup_order = order.clone();
  runner.add_cleanup_hook(move |_scope| async move {
    cleanup_order.lock().push("cleanup");
    Err(RunnerError::msg("cleanup gripe"))
  });

  let errors = runner.wait().await;
  let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

  assert_eq!(*order.lock(), vec!["shutdown", "cleanup"]);
  assert!(rendered.contains(&"boom".to_string()));
  assert!(errors.iter().any(|e| matches!(e, RunnerError::DeadlineExceeded)));
  // Cleanup errors come after everything the shutdown phase produced.
  assert_eq!(rendered.last().unwrap(), "cleanup gripe");
}

#[tokio::test]
async fn shutdown_straggler_errors_never_trail_the_deadline_entry() {
  setup_tracing_for_test();
  let runner = Runner::builder()
    .shutdown_timeout(Duration::from_millis(100))
    .build();

  runner.run(|_scope| async { Err(RunnerError::msg("bg")) });
  // Outlives the shutdown budget, then errors while cleanup is underway.
  runner.add_shutdown_hook(|_scope| async {
    sleep(Duration::from_millis(400)).await;
    Err(RunnerError::msg("late-shutdown"))
  });
  // Keeps the cleanup window open long enough for the straggler to finish.
  runner.add_cleanup_hook(|_scope| async {
    sleep(Duration::from_millis(800)).await;
    Err(RunnerError::msg("cleanup gripe"))
  });

  let errors = runner.wait().await;
  let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

  // Shutdown errors, then the deadline entry, then cleanup errors. The
  // straggler missed the shutdown window, so its error is dropped rather
  // than appended out of order.
  assert_eq!(
    rendered,
    vec![
      "bg".to_string(),
      "phase deadline exceeded".to_string(),
      "cleanup gripe".to_string(),
    ]
  );
}

#[tokio::test]
async fn external_scope_cancellation_ends_the_run_phase() {
  setup_tracing_for_test();
  let parent = Scope::new();
  let runner = Runner::builder().parent_scope(&parent).build();

  runner.run(|scope| async move {
    scope.cancelled().await;
    Ok(())
  });

  let canceller = parent.clone();
  tokio::spawn(async move {
    sleep(Duration::from_millis(50)).await;
    canceller.cancel();
  });

  let errors = timeout(Duration::from_secs(5), runner.wait())
    .await
    .expect("cancellation should have ended the run phase");
  assert!(errors.is_empty());
}

#[tokio::test]
async fn cancelling_the_runner_scope_stops_the_run_phase() {
  setup_tracing_for_test();
  let runner = Runner::new();

  runner.run(|scope| async move {
    scope.cancelled().await;
    Ok(())
  });

  runner.scope().cancel();

  let errors = timeout(Duration::from_secs(5), runner.wait())
    .await
    .expect("root cancellation should have ended the run phase");
  assert!(errors.is_empty());
}

#[tokio::test]
async fn init_task_can_register_more_work() {
  setup_tracing_for_test();
  let counters = Arc::new(AtomicUsize::new(0));
  let runner = Runner::new();

  let seen = counters.clone();
  runner.run_init(move |handle, _scope| async move {
    let from_task = seen.clone();
    handle.run(move |_scope| async move {
      from_task.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });
    let from_hook = seen.clone();
    handle.add_cleanup_hook(move |_scope| async move {
      from_hook.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });
    Ok(())
  });

  let errors = runner.wait().await;
  assert!(errors.is_empty());
  assert_eq!(counters.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_runner_completes_its_background_tasks() {
  setup_tracing_for_test();
  let completed = Arc::new(AtomicUsize::new(0));
  let pool = WorkerPool::new(2, 16);
  let runner = Runner::builder().pool(pool.clone()).build();

  for _ in 0..6 {
    let completed = completed.clone();
    runner.run(move |_scope| async move {
      sleep(Duration::from_millis(10)).await;
      completed.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });
  }

  let errors = timeout(Duration::from_secs(5), runner.wait())
    .await
    .expect("pooled runner did not resolve");
  assert!(errors.is_empty());
  assert_eq!(completed.load(Ordering::SeqCst), 6);
  pool.close();
}

#[tokio::test]
async fn panicking_background_task_is_reported() {
  setup_tracing_for_test();
  let runner = Runner::new();

  runner.run(|_scope| async { panic!("background task exploded") });

  let errors = runner.wait().await;
  assert_eq!(errors.len(), 1);
  assert!(matches!(errors[0], RunnerError::TaskPanicked));
}
