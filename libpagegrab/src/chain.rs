use crate::clock::Clock;
use crate::download::{BatchDownloader, BatchReport, DownloadTask};
use crate::errors::GrabError;
use crate::page::{image_file_name, leading_token, name_width, path_component, resolve_reference, scan_page};
use crate::transport::Transport;
use crate::{notify, DownloadRule, Update};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc::Sender;
use tracing::instrument;
use url::Url;

pub const DEFAULT_NEXT_MARKER: &str = "下一";

/// Pages fetched during one run, in visiting order.
#[derive(Debug, Default, Clone)]
pub struct VisitedSet {
    order: Vec<Url>,
    seen: HashSet<String>,
}

impl VisitedSet {
    /// Returns false if the url was already recorded.
    pub fn insert(&mut self, url: Url) -> bool {
        if !self.seen.insert(url.as_str().to_string()) {
            return false;
        }
        self.order.push(url);
        true
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.seen.contains(url.as_str())
    }

    pub fn into_vec(self) -> Vec<Url> {
        self.order
    }
}

#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Root that every run saves under
    pub save_root: PathBuf,
    /// Directory under `save_root` used for every page. When unset it is taken
    /// from the first page's title.
    pub target_dir: Option<String>,
    /// Text identifying the paragraph that holds the link to the next page
    pub next_marker: String,
    pub rule: DownloadRule,
}

impl Default for ChainOptions {
    fn default() -> Self {
        ChainOptions {
            save_root: PathBuf::from("./download"),
            target_dir: None,
            next_marker: DEFAULT_NEXT_MARKER.to_string(),
            rule: DownloadRule::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageReport {
    pub url: Url,
    pub title: String,
    /// Directory the page's images were saved to
    pub directory: PathBuf,
    pub images: usize,
    pub batch: BatchReport,
}

#[derive(Debug, Default, Clone)]
pub struct ChainReport {
    pub visited: Vec<Url>,
    pub pages: Vec<PageReport>,
}

/// Follows a chain of pages from `start`, saving every image of every page
/// into `save_root/<dir>/<title>/`. Stops when a page has no next link or the
/// next link was already visited.
#[instrument(skip(transport, clock, update_tx))]
pub async fn run_chain(
    start: &str,
    options: &ChainOptions,
    transport: Arc<dyn Transport>,
    clock: &dyn Clock,
    update_tx: Sender<Update>,
) -> Result<ChainReport, GrabError> {
    let mut next_link = match Url::parse(start) {
        Ok(u) => Some(u),
        Err(e) => {
            tracing::error!("Error parsing start url {}\nError : {}", start, e);
            return Err(GrabError::InvalidUrl(start.to_string()));
        }
    };

    let downloader = BatchDownloader::new(transport.clone(), options.rule.clone(), update_tx.clone());
    let mut visited = VisitedSet::default();
    let mut save_dir: Option<PathBuf> = options
        .target_dir
        .as_ref()
        .map(|dir| options.save_root.join(dir));
    let mut pages = Vec::new();

    while let Some(page_url) = next_link.take() {
        visited.insert(page_url.clone());
        let origin = page_url.origin().ascii_serialization();

        let response = transport.get(&page_url).await?;
        if !response.is_success() {
            tracing::warn!(
                "Error status code received : {} |{}|",
                response.status,
                page_url
            );
            notify(
                &update_tx,
                format!("Page answered with status {}, stopping", response.status),
                page_url.as_str(),
                true,
            )
            .await;
            break;
        }
        let html = response.text().await?;
        let scan = scan_page(&html, &options.next_marker);

        let raw_title = match &scan.title {
            Some(t) => t.clone(),
            None => {
                let t = clock.unix_seconds().to_string();
                notify(
                    &update_tx,
                    format!("Could not find title, rename at {t}"),
                    page_url.as_str(),
                    false,
                )
                .await;
                t
            }
        };
        let title = match path_component(&raw_title) {
            Some(t) => t,
            None => {
                let t = clock.unix_seconds().to_string();
                notify(
                    &update_tx,
                    format!("Title {raw_title:?} is not a usable directory name, rename at {t}"),
                    page_url.as_str(),
                    false,
                )
                .await;
                t
            }
        };

        let base_dir = match &save_dir {
            Some(dir) => dir.clone(),
            None => {
                let name =
                    path_component(leading_token(&raw_title)).unwrap_or_else(|| title.clone());
                let dir = options.save_root.join(name);
                notify(
                    &update_tx,
                    format!("No saving directory configured, saving to {}", dir.display()),
                    page_url.as_str(),
                    false,
                )
                .await;
                save_dir = Some(dir.clone());
                dir
            }
        };

        let image_dir = base_dir.join(&title);
        if let Err(e) = fs::create_dir_all(&image_dir).await {
            tracing::error!("Failed to create {:?}\nError : {}", image_dir, e);
            return Err(GrabError::ErrorCreatingDestinationDirectory(format!(
                "{} | {} | {}",
                image_dir.display(),
                e,
                e.kind()
            )));
        }

        notify(
            &update_tx,
            format!("Downloading {} images of {}", scan.images.len(), raw_title),
            page_url.as_str(),
            false,
        )
        .await;

        let width = name_width(scan.images.len());
        let tasks = scan
            .images
            .iter()
            .enumerate()
            .filter_map(|(i, reference)| {
                match Url::parse(&resolve_reference(&origin, reference)) {
                    Ok(link) => Some(DownloadTask {
                        link,
                        destination: image_dir.join(image_file_name(i, width, reference)),
                        ordinal: i,
                    }),
                    Err(e) => {
                        tracing::warn!("Skipping image {}\nError : {}", reference, e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        let batch = downloader.run(&title, tasks).await;
        pages.push(PageReport {
            url: page_url.clone(),
            title: raw_title,
            directory: image_dir,
            images: scan.images.len(),
            batch,
        });

        match scan.next_link(&origin, &visited) {
            Some(url) if visited.contains(&url) => {
                tracing::debug!("Next link {} already visited, stopping", url);
            }
            Some(url) => {
                notify(&update_tx, "Found next link, continue downloading", url.as_str(), false)
                    .await;
                next_link = Some(url);
            }
            None => tracing::debug!("No next link on {}", page_url),
        }
    }

    Ok(ChainReport {
        visited: visited.into_vec(),
        pages,
    })
}
