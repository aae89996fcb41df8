//! Consumers of pipeline output

use crate::pipeline::ScrapedItem;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

/// Receives surviving items one at a time, in order
///
/// Failures while consuming are the sink's own responsibility.
#[async_trait]
pub trait ItemSink: Send {
    /// Take ownership of one emitted item
    async fn accept(&mut self, item: ScrapedItem);
}

#[async_trait]
impl ItemSink for Vec<ScrapedItem> {
    async fn accept(&mut self, item: ScrapedItem) {
        self.push(item);
    }
}

#[async_trait]
impl ItemSink for mpsc::Sender<ScrapedItem> {
    async fn accept(&mut self, item: ScrapedItem) {
        if let Err(e) = self.send(item).await {
            warn!(name = %e.0.name, "item receiver closed, item discarded");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (mut tx, mut rx) = mpsc::channel(4);
        tx.accept(ScrapedItem::new("s", "a")).await;
        tx.accept(ScrapedItem::new("s", "b")).await;
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().name, "a");
        assert_eq!(rx.recv().await.unwrap().name, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_channel_does_not_panic() {
        let (mut tx, rx) = mpsc::channel(1);
        drop(rx);
        tx.accept(ScrapedItem::new("s", "lost")).await;
    }
}
