use crate::download::{BatchDownloader, BatchReport, DownloadTask};
use crate::errors::GrabError;
use crate::transport::Transport;
use crate::{notify, DownloadRule, Update};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc::Sender;
use tracing::instrument;
use url::Url;

pub const LISTING_API_PATH: &str = "/api/public/path";
pub const DEFAULT_PAGE_SIZE: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "u8")]
pub enum EntryKind {
    File,
    Directory,
    /// Any other type code the service reports. Skipped.
    Other(u8),
}

impl From<u8> for EntryKind {
    fn from(code: u8) -> Self {
        match code {
            0 => EntryKind::File,
            1 => EntryKind::Directory,
            other => EntryKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// One page of a directory listing.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub entries: Vec<RemoteEntry>,
    /// Number of entries in the whole directory
    pub total: u64,
    pub page_num: u64,
    pub page_size: u64,
}

impl ListingPage {
    pub fn has_more(&self) -> bool {
        self.total > self.page_num * self.page_size
    }
}

#[derive(Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<ApiData>,
}

#[derive(Deserialize)]
struct ApiData {
    meta: ApiMeta,
    files: Option<Vec<RemoteEntry>>,
}

#[derive(Deserialize)]
struct ApiMeta {
    total: u64,
}

#[derive(Debug, Clone)]
pub struct ListingOptions {
    /// Local directory the remote tree is mirrored under
    pub save_root: PathBuf,
    pub page_size: u64,
    pub rule: DownloadRule,
}

impl Default for ListingOptions {
    fn default() -> Self {
        ListingOptions {
            save_root: PathBuf::from("./download"),
            page_size: DEFAULT_PAGE_SIZE,
            rule: DownloadRule::default(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ListingReport {
    /// Remote directories whose files were all dispatched, in visiting order
    pub completed: Vec<String>,
    /// Remote directories that could not be listed
    pub failed: Vec<(String, GrabError)>,
    pub batch: BatchReport,
}

/// Splits a user supplied url into the service base (scheme and host) and the
/// decoded remote path.
pub fn remote_location(link: &str) -> Result<(Url, String), GrabError> {
    let url = Url::parse(link).map_err(|_| GrabError::InvalidUrl(link.to_string()))?;
    let base = Url::parse(&url.origin().ascii_serialization())
        .map_err(|_| GrabError::InvalidUrl(link.to_string()))?;
    let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
    Ok((base, path))
}

/// Requests a single page of `path`.
#[instrument(skip(transport))]
pub async fn fetch_page(
    transport: &dyn Transport,
    base: &Url,
    path: &str,
    page_num: u64,
    page_size: u64,
) -> Result<ListingPage, GrabError> {
    let api_url = base
        .join(LISTING_API_PATH)
        .map_err(|_| GrabError::InvalidUrl(base.to_string()))?;
    let body = json!({
        "path": path,
        "password": "",
        "page_num": page_num,
        "page_size": page_size,
    });

    let response = transport.post_json(&api_url, &body).await?;
    if !response.is_success() {
        tracing::error!(
            "request {}, response : {}, check network",
            api_url,
            response.status
        );
        return Err(GrabError::ErrorStatusCode {
            status_code: response.status.to_string(),
            url: api_url.to_string(),
        });
    }

    let payload = response.bytes().await?;
    let envelope: ApiEnvelope = serde_json::from_slice(&payload).map_err(|e| {
        tracing::error!("Error decoding listing of {}\nError : {}", path, e);
        GrabError::MalformedResponse {
            url: api_url.to_string(),
            message: e.to_string(),
        }
    })?;
    if envelope.code != 200 {
        tracing::error!(
            "Listing of {} rejected : {} {}",
            path,
            envelope.code,
            envelope.message
        );
        return Err(GrabError::ListingRejected {
            code: envelope.code,
            message: envelope.message,
        });
    }
    let data = envelope.data.ok_or_else(|| GrabError::MalformedResponse {
        url: api_url.to_string(),
        message: "missing data".into(),
    })?;

    Ok(ListingPage {
        entries: data.files.unwrap_or_default(),
        total: data.meta.total,
        page_num,
        page_size,
    })
}

/// Collects every entry of `path`, requesting pages until the reported total
/// is covered. Any failing page fails the whole listing.
pub async fn fetch_listing(
    transport: &dyn Transport,
    base: &Url,
    path: &str,
    page_size: u64,
) -> Result<Vec<RemoteEntry>, GrabError> {
    let page_size = page_size.max(1);
    let mut entries = Vec::new();
    let mut page_num = 1;
    loop {
        let page = fetch_page(transport, base, path, page_num, page_size).await?;
        let more = page.has_more();
        entries.extend(page.entries);
        if !more {
            break;
        }
        page_num += 1;
    }
    tracing::debug!("Listed {} entries under {}", entries.len(), path);
    Ok(entries)
}

/// Mirrors the remote tree under `remote_path` into the save root. Directories
/// are visited depth first in listing order, each one only after the files of
/// its parent finished downloading. A directory that fails to list is skipped
/// together with everything below it; only a failure on `remote_path` itself
/// is returned.
#[instrument(skip(transport, update_tx))]
pub async fn run_listing(
    base: &Url,
    remote_path: &str,
    options: &ListingOptions,
    transport: Arc<dyn Transport>,
    update_tx: Sender<Update>,
) -> Result<ListingReport, GrabError> {
    let downloader = BatchDownloader::new(transport.clone(), options.rule.clone(), update_tx.clone());
    let mut report = ListingReport::default();
    let root_dir = options
        .save_root
        .join(remote_path.trim_start_matches('/'));
    let mut pending = vec![(remote_path.to_string(), root_dir)];
    let mut at_root = true;

    while let Some((path, local_dir)) = pending.pop() {
        let result = download_directory(
            &downloader,
            transport.as_ref(),
            base,
            &path,
            &local_dir,
            options,
            &update_tx,
        )
        .await;
        match result {
            Ok((batch, sub_dirs)) => {
                report.batch.merge(&batch);
                report.completed.push(path.clone());
                pending.extend(
                    sub_dirs
                        .into_iter()
                        .rev()
                        .map(|name| (join_remote(&path, &name), local_dir.join(&name))),
                );
            }
            Err(e) if at_root => return Err(e),
            Err(e) => {
                tracing::error!("Skipping directory {}\nError : {}", path, e);
                notify(&update_tx, format!("Skipping directory. {e}"), path.as_str(), true).await;
                report.failed.push((path, e));
            }
        }
        at_root = false;
    }
    Ok(report)
}

/// Downloads the files of one directory and returns the names of its
/// sub-directories.
async fn download_directory(
    downloader: &BatchDownloader,
    transport: &dyn Transport,
    base: &Url,
    path: &str,
    local_dir: &Path,
    options: &ListingOptions,
    update_tx: &Sender<Update>,
) -> Result<(BatchReport, Vec<String>), GrabError> {
    let entries = fetch_listing(transport, base, path, options.page_size).await?;

    if let Err(e) = fs::create_dir_all(local_dir).await {
        tracing::error!("Failed to create {:?}\nError : {}", local_dir, e);
        return Err(GrabError::ErrorCreatingDestinationDirectory(format!(
            "{} | {} | {}",
            local_dir.display(),
            e,
            e.kind()
        )));
    }

    let mut tasks = Vec::new();
    let mut sub_dirs = Vec::new();
    for entry in entries {
        if !is_plain_name(&entry.name) {
            tracing::warn!("Ignoring entry {:?} of {}, not a plain file name", entry.name, path);
            notify(
                update_tx,
                format!("Ignoring entry with unusable name {:?}", entry.name),
                path,
                true,
            )
            .await;
            continue;
        }
        match entry.kind {
            EntryKind::File => tasks.push(DownloadTask {
                link: file_link(base, path, &entry.name)?,
                destination: local_dir.join(&entry.name),
                ordinal: tasks.len(),
            }),
            EntryKind::Directory => sub_dirs.push(entry.name),
            EntryKind::Other(code) => {
                tracing::debug!("Ignoring {} with type {}", entry.name, code)
            }
        }
    }

    notify(
        update_tx,
        format!("Downloading {} files", tasks.len()),
        path,
        false,
    )
    .await;
    let batch = downloader.run(path, tasks).await;
    Ok((batch, sub_dirs))
}

/// Download address of a listed file: `{base}/d{path}/{name}`.
fn file_link(base: &Url, path: &str, name: &str) -> Result<Url, GrabError> {
    let mut link = base.clone();
    link.path_segments_mut()
        .map_err(|_| GrabError::InvalidUrl(base.to_string()))?
        .clear()
        .push("d")
        .extend(path.split('/').filter(|s| !s.is_empty()))
        .push(name);
    Ok(link)
}

/// A name that stays a single component when joined to a local directory.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn join_remote(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}
