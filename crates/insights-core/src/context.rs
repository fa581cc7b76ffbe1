//! Task-local Insighter for code that has no handle passed to it.

use std::future::Future;
use std::sync::Arc;

use crate::insighter::Insighter;

tokio::task_local! {
    static CURRENT: Arc<Insighter>;
}

/// Run `fut` with `insighter` attached to the task.
pub async fn scope<F>(insighter: Arc<Insighter>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(insighter, fut).await
}

/// Run `f` with `insighter` attached, outside of any future.
pub fn sync_scope<R>(insighter: Arc<Insighter>, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(insighter, f)
}

/// The attached Insighter, or a fresh nop one when nothing is attached.
pub fn current() -> Arc<Insighter> {
    CURRENT
        .try_with(Arc::clone)
        .unwrap_or_else(|_| Arc::new(Insighter::nop()))
}

/// Whether an Insighter is attached to the current task.
pub fn is_attached() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}
