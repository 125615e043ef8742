use crate::error::RunnerError;
use crate::scope::Scope;

use std::future::Future;

use futures::future::BoxFuture;

/// The future a task resolves to.
pub type TaskFuture = BoxFuture<'static, Result<(), RunnerError>>;

/// A boxed, cancellation-aware unit of work.
///
/// A task receives the [`Scope`] it runs under and must observe its
/// cancellation cooperatively; the runtime never preempts a running task.
pub type BoxTask = Box<dyn FnOnce(Scope) -> TaskFuture + Send + 'static>;

/// Boxes any task-shaped closure into a [`BoxTask`].
pub fn boxed<F, Fut>(task: F) -> BoxTask
where
  F: FnOnce(Scope) -> Fut + Send + 'static,
  Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
{
  Box::new(move |scope| Box::pin(task(scope)))
}

/// Adapts a future that does not care about cancellation into a task.
pub fn from_future<Fut>(fut: Fut) -> BoxTask
where
  Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
{
  boxed(move |_scope| fut)
}

/// Adapts a plain closure into a task. Useful for short, synchronous
/// teardown work such as closing a file or flushing a buffer.
pub fn from_fn<F>(f: F) -> BoxTask
where
  F: FnOnce() -> Result<(), RunnerError> + Send + 'static,
{
  boxed(move |_scope| async move { f() })
}
