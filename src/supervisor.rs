//! Task supervisor: owns every long-running task and the shutdown order
//!
//! Shutdown runs in a fixed order:
//!
//! 1. cancel every tracked task and wait for each to finish
//! 2. end the server-side session, once, and only if one exists
//! 3. release the shared connection pool
//!
//! Calling it again is a no-op.

use crate::error::{FeedError, Result};
use crate::subscription::{ReconnectingSubscription, SubscriptionState};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Final network teardown performed after all tasks have stopped
#[async_trait]
pub trait Teardown: Send + Sync {
    /// Whether a server-side session is open
    async fn session_established(&self) -> bool;

    /// Close the server-side session
    async fn end_session(&self) -> Result<()>;

    /// Drop the shared connection pool
    fn release(&self);
}

struct TrackedTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tracks spawned tasks and shuts them down in order
pub struct TaskSupervisor {
    cancel: CancellationToken,
    tasks: Mutex<Vec<TrackedTask>>,
    shut_down: AtomicBool,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Whether shutdown has started
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Number of tracked tasks still running
    pub fn active(&self) -> usize {
        self.lock_tasks()
            .iter()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    /// Spawn a task with its own child cancellation token
    ///
    /// An error returned by the task is logged and goes no further.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(FeedError::Closed);
        }

        let name = name.into();
        let cancel = self.cancel.child_token();
        let future = task(cancel.clone());
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => tracing::debug!(task = %task_name, "Task finished"),
                Err(e) => tracing::error!(task = %task_name, error = ?e, "Task failed"),
            }
        });

        tracing::debug!(task = %name, "Task started");
        let mut tasks = self.lock_tasks();
        tasks.retain(|t| !t.handle.is_finished());
        tasks.push(TrackedTask {
            name,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Start a subscription and hand back its state
    pub fn spawn_subscription(
        &self,
        subscription: ReconnectingSubscription,
    ) -> Result<watch::Receiver<SubscriptionState>> {
        let state = subscription.state();
        let name = format!("msgqueue:{}", subscription.scope());
        self.spawn(name, move |cancel| subscription.run(cancel))?;
        Ok(state)
    }

    /// Cancel and await the tasks started so far; the supervisor stays usable
    pub async fn stop_all(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        tracing::debug!(tasks = tasks.len(), "Stopping tasks");
        for task in &tasks {
            task.cancel.cancel();
        }
        join_all(tasks).await;
    }

    /// Cancel everything, end the session, release the pool
    pub async fn shutdown(&self, teardown: &dyn Teardown) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Shutdown already performed");
            return;
        }

        let tasks = std::mem::take(&mut *self.lock_tasks());
        tracing::info!(tasks = tasks.len(), "Shutting down");
        self.cancel.cancel();
        join_all(tasks).await;

        if teardown.session_established().await {
            if let Err(e) = teardown.end_session().await {
                tracing::warn!(error = %e, "Failed to end session during shutdown");
            }
        }

        teardown.release();
        tracing::info!("Shutdown complete");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<TrackedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn join_all(tasks: Vec<TrackedTask>) {
    for task in tasks {
        if let Err(e) = task.handle.await {
            tracing::error!(task = %task.name, error = %e, "Task did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchRegistry;
    use crate::subscription::testing::{ScriptedConnector, Step};
    use crate::types::Scope;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    /// Records the order of teardown calls
    #[derive(Default)]
    struct RecordingTeardown {
        session: AtomicBool,
        fail_end: bool,
        events: Mutex<Vec<&'static str>>,
        ends: AtomicU32,
    }

    impl RecordingTeardown {
        fn with_session() -> Self {
            let teardown = Self::default();
            teardown.session.store(true, Ordering::SeqCst);
            teardown
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Teardown for RecordingTeardown {
        async fn session_established(&self) -> bool {
            self.session.load(Ordering::SeqCst)
        }

        async fn end_session(&self) -> Result<()> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push("end_session");
            self.session.store(false, Ordering::SeqCst);
            if self.fail_end {
                return Err(FeedError::Connection("refused".into()));
            }
            Ok(())
        }

        fn release(&self) {
            self.events.lock().unwrap().push("release");
        }
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_started() {
        let supervisor = TaskSupervisor::new();
        let teardown = RecordingTeardown::default();

        supervisor.shutdown(&teardown).await;

        assert!(supervisor.is_shut_down());
        assert_eq!(teardown.events(), vec!["release"]);
    }

    #[tokio::test]
    async fn test_shutdown_order_and_idempotence() {
        let supervisor = TaskSupervisor::new();
        let teardown = RecordingTeardown::with_session();

        supervisor.shutdown(&teardown).await;
        supervisor.shutdown(&teardown).await;

        assert_eq!(teardown.ends.load(Ordering::SeqCst), 1);
        assert_eq!(teardown.events(), vec!["end_session", "release"]);
    }

    #[tokio::test]
    async fn test_teardown_failure_is_not_raised() {
        let supervisor = TaskSupervisor::new();
        let teardown = RecordingTeardown {
            fail_end: true,
            ..RecordingTeardown::with_session()
        };

        supervisor.shutdown(&teardown).await;
        assert_eq!(teardown.events(), vec!["end_session", "release"]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_awaits_tasks() {
        let supervisor = TaskSupervisor::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = stopped.clone();
        supervisor
            .spawn("waiter", move |cancel| async move {
                cancel.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(supervisor.active(), 1);

        supervisor.shutdown(&RecordingTeardown::default()).await;

        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_keeps_supervisor_usable() {
        let supervisor = TaskSupervisor::new();
        supervisor
            .spawn("first", |cancel| async move {
                cancel.cancelled().await;
                Ok(())
            })
            .unwrap();

        supervisor.stop_all().await;
        assert_eq!(supervisor.active(), 0);
        assert!(!supervisor.is_shut_down());

        supervisor
            .spawn("second", |cancel| async move {
                cancel.cancelled().await;
                Ok(())
            })
            .unwrap();
        assert_eq!(supervisor.active(), 1);
        supervisor.shutdown(&RecordingTeardown::default()).await;
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_crash() {
        let supervisor = TaskSupervisor::new();
        supervisor
            .spawn("doomed", |_| async { Err(FeedError::Malformed("bad".into())) })
            .unwrap();

        supervisor.shutdown(&RecordingTeardown::default()).await;
        assert!(supervisor.is_shut_down());
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_is_refused() {
        let supervisor = TaskSupervisor::new();
        supervisor.shutdown(&RecordingTeardown::default()).await;

        let result = supervisor.spawn("late", |_| async { Ok(()) });
        assert!(matches!(result, Err(FeedError::Closed)));
    }

    #[tokio::test]
    async fn test_subscription_reaches_terminated_on_shutdown() {
        let supervisor = TaskSupervisor::new();
        let connector = ScriptedConnector::new(vec![Step::Hang(vec![])]);
        let registry = Arc::new(DispatchRegistry::builder().build());
        let subscription = ReconnectingSubscription::new(Scope::User, connector, registry);

        let mut state = supervisor.spawn_subscription(subscription).unwrap();
        state
            .wait_for(|s| *s == SubscriptionState::Streaming)
            .await
            .unwrap();

        supervisor.shutdown(&RecordingTeardown::default()).await;
        assert_eq!(*state.borrow(), SubscriptionState::Terminated);
    }
}
