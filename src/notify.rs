//! User-visible notifications
//!
//! The core never renders anything. It reports lock transitions, received
//! events and failed actions as `Notice` values; whatever owns the screen
//! decides how to show them.

use crate::types::Scope;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;

/// Something the user should see
#[derive(Debug, Clone, PartialEq)]
pub enum NoticeKind {
    /// A guarded action took the lock
    Locked,
    /// A guarded action released the lock
    Unlocked,
    /// A guarded action was rejected because another one is running
    Busy { action: String },
    /// A guarded action failed and was aborted
    ActionFailed { action: String, reason: String },
    /// An event was routed to a handler
    EventReceived { scope: Scope, event_type: String },
}

/// A timestamped notice
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NoticeKind::Locked => write!(f, "Interface locked."),
            NoticeKind::Unlocked => write!(f, "Interface unlocked."),
            NoticeKind::Busy { .. } => write!(f, "Interface locked !"),
            NoticeKind::ActionFailed { action, reason } => {
                write!(f, "{} failed: {}", action, reason)
            }
            NoticeKind::EventReceived { event_type, .. } => {
                write!(f, "Event {} received !", event_type)
            }
        }
    }
}

/// Sink for user-visible notices
///
/// Called from the consumption loop and from guarded actions, so
/// implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::debug!(kind = ?notice.kind, "{}", notice);
    }
}

/// Forwards notices over an unbounded channel
///
/// Notices sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_display() {
        assert_eq!(Notice::new(NoticeKind::Locked).to_string(), "Interface locked.");
        assert_eq!(
            Notice::new(NoticeKind::Busy {
                action: "login".into()
            })
            .to_string(),
            "Interface locked !"
        );
        assert_eq!(
            Notice::new(NoticeKind::EventReceived {
                scope: Scope::User,
                event_type: "group:user left".into()
            })
            .to_string(),
            "Event group:user left received !"
        );
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        notifier.notify(Notice::new(NoticeKind::Locked));
        notifier.notify(Notice::new(NoticeKind::Unlocked));

        assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Locked);
        assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Unlocked);
    }

    #[test]
    fn test_channel_notifier_ignores_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);
        notifier.notify(Notice::new(NoticeKind::Locked));
    }
}
