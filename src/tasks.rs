use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Tracks the session actor tasks owned by a server.
///
/// This is a wrapper around a [`TaskTracker`] and a [`CancellationToken`].
/// Each spawned future is raced against the token, so cancelling the set
/// tears down every live session at once; [`TaskSet::shutdown`] then waits
/// for the actors to finish unwinding.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskSet {
    tasks: TaskTracker,
    token: CancellationToken,
}

impl TaskSet {
    /// Spawn a future on the current runtime and add it to the set. The
    /// future resolves to `None` if the set is cancelled first.
    ///
    /// ## Panics
    ///
    /// Panics if called outside the context of a Tokio runtime.
    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => None,
                result = task => Some(result),
            }
        })
    }

    /// Cancel every task in the set and wait for them to finish.
    pub(crate) async fn shutdown(&self) {
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
