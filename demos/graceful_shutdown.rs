use graceful_runner::{Runner, RunnerError};

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Shutdown Demo ---");

  let runner = Runner::builder()
    .shutdown_timeout(Duration::from_secs(5))
    .cleanup_timeout(Duration::from_secs(2))
    .catch_signals()
    .build();

  // A server-shaped pair: serve until cancelled, then drain on shutdown.
  runner.run_with_shutdown(
    |scope| async move {
      info!("listener: serving");
      scope.cancelled().await;
      info!("listener: serve loop ended");
      Ok(())
    },
    |_scope| async move {
      info!("listener: draining connections");
      sleep(Duration::from_millis(200)).await;
      info!("listener: drained");
      Ok(())
    },
  );

  // A job that finishes on its own before anything else stops.
  runner.run(|_scope| async {
    sleep(Duration::from_secs(1)).await;
    info!("one-shot job finished");
    Ok(())
  });

  // Something to trip the lifecycle after a while, so the demo terminates
  // without a manual Ctrl-C.
  runner.run(|_scope| async {
    sleep(Duration::from_secs(3)).await;
    Err(RunnerError::msg("simulated failure"))
  });

  runner.add_cleanup_hook(|_scope| async {
    info!("cleanup: flushing buffers");
    Ok(())
  });

  let errors = runner.wait().await;
  for error in &errors {
    info!("error occurred: {error}");
  }
  info!("lifecycle finished with {} error(s)", errors.len());
}
