// =============================================================================
// Notification Module — best-effort operator channel
// =============================================================================
//
// Notifications never fail the caller: implementations swallow their own
// transport errors and log them. `update` edits a previously sent message in
// place, which keeps TWAP progress and hold status to one message each.

pub mod telegram;

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::info;

/// Identifier of a sent message that can later be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub i64);

/// Operator-facing message channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a new message. `None` when the channel could not deliver it.
    async fn notify(&self, text: &str) -> Option<MessageHandle>;

    /// Replace the text of an earlier message.
    async fn update(&self, handle: MessageHandle, text: &str);
}

/// Channel that only writes to the log. Used when no chat credentials are
/// configured.
#[derive(Debug, Default)]
pub struct LogNotifier {
    next_id: AtomicI64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Option<MessageHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(message_id = id, "{text}");
        Some(MessageHandle(id))
    }

    async fn update(&self, handle: MessageHandle, text: &str) {
        info!(message_id = handle.0, "(edit) {text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_hands_out_increasing_handles() {
        let n = LogNotifier::new();
        let a = n.notify("first").await.unwrap();
        let b = n.notify("second").await.unwrap();
        assert!(b.0 > a.0);
        n.update(a, "edited").await;
    }
}
