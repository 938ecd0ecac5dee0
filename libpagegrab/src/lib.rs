pub use crate::archive::sort_archives;
pub use crate::chain::{
    run_chain, ChainOptions, ChainReport, PageReport, VisitedSet, DEFAULT_NEXT_MARKER,
};
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::download::{BatchDownloader, BatchReport, DownloadTask, TaskOutcome};
pub use crate::errors::GrabError;
pub use crate::listing::{
    fetch_listing, fetch_page, remote_location, run_listing, EntryKind, ListingOptions,
    ListingPage, ListingReport, RemoteEntry, DEFAULT_PAGE_SIZE,
};
pub use crate::transport::{ClientConfig, HttpTransport, Response, Transport};

mod archive;
mod chain;
mod clock;
mod download;
mod errors;
mod listing;
mod page;
mod transport;

#[cfg(test)]
mod testing;

use tokio::sync::mpsc::Sender;

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct DownloadRule {
    /// Number of downloads allowed in flight at once
    pub concurrency: usize,
    /// Progress update interval in millisecond
    pub progress_update_interval: u64,
}

impl Default for DownloadRule {
    fn default() -> Self {
        DownloadRule {
            concurrency: DEFAULT_CONCURRENCY,
            progress_update_interval: 1000,
        }
    }
}

#[derive(Debug)]
pub enum Update {
    MessageUpdate(Message),
    ProgressUpdate(Progress),
    BatchUpdate(BatchProgress),
}

#[derive(Debug)]
pub struct Message {
    pub content: String,
    pub resource_name: String,
    pub is_error: bool,
}

#[derive(Debug)]
pub struct Progress {
    pub bytes_written: u64,
    /// Zero when the server did not announce a length
    pub file_size: u64,
    pub resource_name: String,
}

/// Sent once for every finished task of a batch, in completion order.
#[derive(Debug)]
pub struct BatchProgress {
    pub batch: String,
    pub completed: usize,
    pub total: usize,
    /// Ordinal of the finished task
    pub ordinal: usize,
    pub resource_name: String,
    pub outcome: TaskOutcome,
}

pub(crate) async fn notify(
    update_tx: &Sender<Update>,
    content: impl Into<String>,
    resource_name: impl Into<String>,
    is_error: bool,
) {
    if (update_tx
        .send(Update::MessageUpdate(Message {
            content: content.into(),
            resource_name: resource_name.into(),
            is_error,
        }))
        .await)
        .is_err()
    {};
}
