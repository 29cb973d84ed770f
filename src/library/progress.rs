//! Fan-out of scan progress to any number of listeners.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::model::ProgressState;

/// Publish/subscribe channel for [`ProgressState`] events.
///
/// Every subscriber sees every event published after it subscribed. Nothing
/// is replayed for late subscribers, and a subscriber that falls behind
/// skips what it missed instead of blocking publishers.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressState>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish one event. Having no subscribers is fine.
    pub fn publish(&self, progress: ProgressState) {
        let _ = self.sender.send(progress);
    }

    /// Live progress events for as long as the stream is held.
    pub fn subscribe(&self) -> impl Stream<Item = ProgressState> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(progress) => Some(progress),
                Err(err) => {
                    tracing::debug!(target: "library::progress", error = %err, "Subscriber lagged");
                    None
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
