//! Serialization guard for user-triggered actions
//!
//! At most one guarded action runs at a time. A second action started while
//! the lock is held is rejected on the spot; it never queues. The lock is an
//! RAII guard, so it is released exactly once whether the action finishes,
//! fails, or is dropped mid-flight.

use crate::error::{FeedError, Result};
use crate::notify::{LogNotifier, Notice, NoticeKind, Notifier};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Result of a guarded action that did not fail hard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome<T> {
    /// The action ran and returned a value
    Completed(T),
    /// Another action held the lock; this one never ran
    Locked,
    /// The action failed; the error was logged and reported
    Aborted,
}

impl<T> ActionOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed(_))
    }

    /// The value of a completed action
    pub fn completed(self) -> Option<T> {
        match self {
            ActionOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Process-wide "an action is in flight" flag
///
/// Cheap to clone; clones share the same lock.
#[derive(Clone)]
pub struct ActionSerializer {
    locked: Arc<AtomicBool>,
    notifier: Arc<dyn Notifier>,
}

impl Default for ActionSerializer {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

impl ActionSerializer {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            locked: Arc::new(AtomicBool::new(false)),
            notifier,
        }
    }

    /// Whether a guarded action is currently in flight
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Take the lock without waiting
    ///
    /// Returns `None` and emits a busy notice when the lock is held.
    pub fn try_acquire(&self, action: &str) -> Option<ActionGuard> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(action, "Rejected: another action is in flight");
            self.notifier.notify(Notice::new(NoticeKind::Busy {
                action: action.to_string(),
            }));
            return None;
        }

        let guard = ActionGuard {
            locked: self.locked.clone(),
            notifier: self.notifier.clone(),
            action: action.to_string(),
            id: Uuid::new_v4(),
        };
        tracing::debug!(action, action_id = %guard.id, "Action lock acquired");
        self.notifier.notify(Notice::new(NoticeKind::Locked));
        Some(guard)
    }

    /// Run an action under the lock
    ///
    /// The lock is taken when this is called, not when the returned future is
    /// first polled, so a concurrent call is rejected immediately.
    ///
    /// Errors are settled here: server-side API errors (5xx) are logged and
    /// returned, cancellation is silent, and every other error is logged,
    /// reported to the notifier and turned into [`ActionOutcome::Aborted`].
    pub fn run<T, Fut>(
        &self,
        action: &str,
        task: Fut,
    ) -> impl Future<Output = Result<ActionOutcome<T>>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.try_acquire(action);
        let notifier = self.notifier.clone();
        let action = action.to_string();

        async move {
            let Some(guard) = guard else {
                return Ok(ActionOutcome::Locked);
            };

            let result = task.await;
            drop(guard);

            match result {
                Ok(value) => Ok(ActionOutcome::Completed(value)),
                Err(FeedError::Cancelled) => {
                    tracing::trace!(action = %action, "Action cancelled");
                    Ok(ActionOutcome::Aborted)
                }
                Err(e) if e.is_server_error() => {
                    tracing::error!(action = %action, error = ?e, "Server error during action");
                    Err(e)
                }
                Err(e) => {
                    tracing::warn!(action = %action, error = %e, "Action failed");
                    notifier.notify(Notice::new(NoticeKind::ActionFailed {
                        action,
                        reason: e.to_string(),
                    }));
                    Ok(ActionOutcome::Aborted)
                }
            }
        }
    }
}

/// Holds the action lock; releases it on drop
pub struct ActionGuard {
    locked: Arc<AtomicBool>,
    notifier: Arc<dyn Notifier>,
    action: String,
    id: Uuid,
}

impl ActionGuard {
    /// Name of the action holding the lock
    pub fn action(&self) -> &str {
        &self.action
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
        tracing::debug!(action = %self.action, action_id = %self.id, "Action lock released");
        self.notifier.notify(Notice::new(NoticeKind::Unlocked));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_second_action_rejected_while_first_pending() {
        let serializer = ActionSerializer::default();
        let (tx, rx) = oneshot::channel::<u32>();

        let mut first = task::spawn(serializer.run("login", async move {
            rx.await.map_err(|_| FeedError::Cancelled)
        }));
        assert_pending!(first.poll());
        assert!(serializer.is_locked());

        // Rejected before it is ever polled to completion
        let mut second = task::spawn(serializer.run("create group", async { Ok(7) }));
        let outcome = assert_ready!(second.poll()).unwrap();
        assert_eq!(outcome, ActionOutcome::Locked);

        // The first action is unaffected
        tx.send(1).unwrap();
        assert!(first.is_woken());
        let outcome = assert_ready!(first.poll()).unwrap();
        assert_eq!(outcome, ActionOutcome::Completed(1));
        assert!(!serializer.is_locked());

        let mut third = task::spawn(serializer.run("create group", async { Ok(7) }));
        let outcome = assert_ready!(third.poll()).unwrap();
        assert_eq!(outcome, ActionOutcome::Completed(7));
    }

    #[test]
    fn test_rejection_happens_at_call_time() {
        let serializer = ActionSerializer::default();
        let held = serializer.try_acquire("login").unwrap();

        let pending = serializer.run("join group", async { Ok(()) });
        assert!(serializer.is_locked());
        drop(held);

        // Still rejected: the decision was made when `run` was called
        let mut pending = task::spawn(pending);
        assert_eq!(assert_ready!(pending.poll()).unwrap(), ActionOutcome::Locked);
        assert!(!serializer.is_locked());
    }

    #[test]
    fn test_dropped_action_releases_lock() {
        let serializer = ActionSerializer::default();
        let (_tx, rx) = oneshot::channel::<()>();

        let mut running = task::spawn(serializer.run("start", async move {
            rx.await.map_err(|_| FeedError::Cancelled)
        }));
        assert_pending!(running.poll());
        assert!(serializer.is_locked());

        drop(running);
        assert!(!serializer.is_locked());
    }

    #[tokio::test]
    async fn test_client_error_is_reported_and_swallowed() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        let serializer = ActionSerializer::new(Arc::new(notifier));

        let outcome: ActionOutcome<()> = serializer
            .run("invite", async {
                Err(FeedError::Api {
                    status: 404,
                    reason: "User not found".into(),
                })
            })
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Aborted);
        assert!(!serializer.is_locked());

        let kinds: Vec<NoticeKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|n| n.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                NoticeKind::Locked,
                NoticeKind::Unlocked,
                NoticeKind::ActionFailed {
                    action: "invite".into(),
                    reason: "API error 404: User not found".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_server_error_is_reraised() {
        let serializer = ActionSerializer::default();

        let result: Result<ActionOutcome<()>> = serializer
            .run("start", async {
                Err(FeedError::Api {
                    status: 500,
                    reason: "Internal Server Error".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(FeedError::Api { status: 500, .. })));
        assert!(!serializer.is_locked());
    }

    #[tokio::test]
    async fn test_busy_notice_on_rejection() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        let serializer = ActionSerializer::new(Arc::new(notifier));

        let guard = serializer.try_acquire("login").unwrap();
        assert_eq!(guard.action(), "login");
        assert!(serializer.try_acquire("leave group").is_none());

        assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Locked);
        assert_eq!(
            rx.recv().await.unwrap().kind,
            NoticeKind::Busy {
                action: "leave group".into()
            }
        );
    }
}
