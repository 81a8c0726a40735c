//! External-edit notifications for the permanent memory document.
//!
//! The document is a plain markdown file the user may edit by hand. Hosts
//! send a [`DocumentChanged`] event on the channel whenever they observe a
//! change; the watcher re-reads the document and rebuilds the chunk index.
//! Bursts are coalesced so a rapid series of saves costs one rebuild.

use crate::Indexer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Notification that the permanent document may have changed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentChanged;

/// Spawn the reindex-on-change loop. `read_document` supplies the current
/// document text; a read or reindex failure is logged and the loop keeps
/// serving later events against the last-good index. The task exits when
/// every sender is dropped.
pub fn spawn_watcher<F>(
    indexer: Arc<Indexer>,
    mut events: mpsc::Receiver<DocumentChanged>,
    read_document: F,
) -> JoinHandle<()>
where
    F: Fn() -> std::io::Result<String> + Send + 'static,
{
    tokio::spawn(async move {
        while events.recv().await.is_some() {
            // Drain queued events so a burst of edits rebuilds once
            while events.try_recv().is_ok() {}

            let text = match read_document() {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "document read failed, keeping current index");
                    continue;
                }
            };
            match indexer.reindex_permanent(&text).await {
                Ok(chunks) => debug!(chunks, "document change applied"),
                Err(e) => warn!(error = %e, "reindex failed, keeping current index"),
            }
        }
        debug!("document watcher stopped");
    })
}
