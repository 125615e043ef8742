use graceful_runner::{Runner, WorkerPool};

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Pooled Tasks Demo ---");

  // Two workers, eight queue slots; rescaled live below.
  let pool = WorkerPool::new(2, 8);
  let runner = Runner::builder().pool(pool.clone()).build();

  for i in 0..6 {
    runner.run(move |_scope| async move {
      info!("job {i} running");
      sleep(Duration::from_millis(300)).await;
      info!("job {i} done");
      Ok(())
    });
  }

  // Burst coming up: grow the pool, then shrink it back.
  pool.rescale(4);
  info!(
    "rescaled up: desired={} live={}",
    pool.desired_size(),
    pool.live_workers()
  );

  sleep(Duration::from_millis(500)).await;
  pool.rescale(1);
  info!("rescaled down: desired={}", pool.desired_size());

  let errors = runner.wait().await;
  info!("lifecycle finished with {} error(s)", errors.len());

  pool.close();
}
