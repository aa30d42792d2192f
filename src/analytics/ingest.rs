//! Click ingestion off the redirect hot path
//!
//! Redirect handlers hand clicks to a bounded channel and return at once. A
//! single writer task parses the User-Agent and persists the click. When the
//! channel is full the click is dropped with a warning rather than slowing
//! the redirect down.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::user_agent::parse_user_agent;
use crate::models::NewClick;
use crate::storage::Storage;

enum IngestMessage {
    Record(NewClick),
    /// Acknowledged once everything queued before it is persisted
    Flush(oneshot::Sender<()>),
}

struct ClickWriter {
    receiver: mpsc::Receiver<IngestMessage>,
    storage: Arc<dyn Storage>,
}

impl ClickWriter {
    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                IngestMessage::Record(click) => self.persist(click).await,
                IngestMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        info!("Click ingestion channel closed, writer exiting");
    }

    async fn persist(&self, mut click: NewClick) {
        if let Some(ua) = click.user_agent.as_deref() {
            let parsed = parse_user_agent(ua);
            click.os_name = parsed.os_name;
            click.browser_name = parsed.browser_name;
        }

        match self.storage.insert_click(&click).await {
            Ok(id) => debug!(click_id = id, link_id = click.short_link_id, "Recorded click"),
            Err(e) => warn!(
                link_id = click.short_link_id,
                "Failed to record click: {e:#}"
            ),
        }
    }
}

/// Handle used by the redirect server to record clicks
#[derive(Clone)]
pub struct ClickIngestor {
    sender: mpsc::Sender<IngestMessage>,
}

impl ClickIngestor {
    /// Start the writer task; it exits once every handle is dropped
    pub fn spawn(storage: Arc<dyn Storage>, buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let writer = ClickWriter { receiver, storage };
        let handle = tokio::spawn(writer.run());
        (Self { sender }, handle)
    }

    /// Queue a click without waiting. Never fails the caller.
    pub fn record(&self, link_id: i64, user_agent: Option<String>, ip_address: Option<String>) {
        let click = NewClick {
            short_link_id: link_id,
            clicked_at: Utc::now().timestamp(),
            user_agent: user_agent.filter(|ua| !ua.is_empty()),
            ip_address,
            ..Default::default()
        };

        match self.sender.try_send(IngestMessage::Record(click)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(link_id, "Click ingestion buffer full, dropping click");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(link_id, "Click writer is not running, dropping click");
            }
        }
    }

    /// Wait until every click queued so far has been written
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(IngestMessage::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}
