use crate::transport::Transport;
use crate::Update::{BatchUpdate, ProgressUpdate};
use crate::{notify, BatchProgress, DownloadRule, Progress, Update};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::spawn;
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub link: Url,
    /// Full path of the file to write. Its parent directory must already exist.
    pub destination: PathBuf,
    /// 0-based position of the task in its batch
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Body written to disk, with the number of bytes
    Downloaded(u64),
    /// Server answered with a non-success status, nothing written
    Abandoned,
    /// Network or file error
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: usize,
    pub abandoned: usize,
    pub failed: usize,
    pub bytes_written: u64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.downloaded + self.abandoned + self.failed
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.downloaded += other.downloaded;
        self.abandoned += other.abandoned;
        self.failed += other.failed;
        self.bytes_written += other.bytes_written;
    }

    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Downloaded(bytes) => {
                self.downloaded += 1;
                self.bytes_written += bytes;
            }
            TaskOutcome::Abandoned => self.abandoned += 1,
            TaskOutcome::Failed => self.failed += 1,
        }
    }
}

/// Runs batches of downloads with a fixed number of concurrency slots.
pub struct BatchDownloader {
    transport: Arc<dyn Transport>,
    rule: DownloadRule,
    update_tx: Sender<Update>,
}

impl BatchDownloader {
    pub fn new(transport: Arc<dyn Transport>, rule: DownloadRule, update_tx: Sender<Update>) -> Self {
        BatchDownloader {
            transport,
            rule,
            update_tx,
        }
    }

    /// Downloads every task and returns once all of them have finished.
    /// Individual failures are counted in the report, never returned.
    #[tracing::instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn run(&self, batch: &str, tasks: Vec<DownloadTask>) -> BatchReport {
        let total = tasks.len();
        let slots = Arc::new(Semaphore::new(self.rule.concurrency.max(1)));
        let interval = Duration::from_millis(self.rule.progress_update_interval);

        let mut pending = FuturesUnordered::new();
        for task in tasks {
            let resource_name = task.destination.to_string_lossy().to_string();
            let ordinal = task.ordinal;
            let handle = spawn_download(
                task,
                slots.clone(),
                self.transport.clone(),
                interval,
                self.update_tx.clone(),
            );
            pending.push(async move { (ordinal, resource_name, handle.await) });
        }

        let mut report = BatchReport::default();
        let mut completed = 0;
        while let Some((ordinal, resource_name, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Download task panicked\nError : {}", e);
                    TaskOutcome::Failed
                }
            };
            completed += 1;
            report.record(outcome);
            if (self
                .update_tx
                .send(BatchUpdate(BatchProgress {
                    batch: batch.to_string(),
                    completed,
                    total,
                    ordinal,
                    resource_name,
                    outcome,
                }))
                .await)
                .is_err()
            {};
        }
        tracing::debug!(
            "Batch {} finished: {} downloaded, {} abandoned, {} failed",
            batch,
            report.downloaded,
            report.abandoned,
            report.failed
        );
        report
    }
}

fn spawn_download(
    task: DownloadTask,
    slots: Arc<Semaphore>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    update_tx: Sender<Update>,
) -> JoinHandle<TaskOutcome> {
    spawn(async move {
        let _permit = match slots.acquire_owned().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Concurrency slots closed\nError : {}", e);
                return TaskOutcome::Failed;
            }
        };
        download_file(task, transport.as_ref(), interval, &update_tx).await
    })
}

/// Streams one resource to its destination file.
#[tracing::instrument(skip(transport, update_tx))]
async fn download_file(
    task: DownloadTask,
    transport: &dyn Transport,
    interval: Duration,
    update_tx: &Sender<Update>,
) -> TaskOutcome {
    let f_name = task.destination.to_string_lossy().to_string();

    let mut response = match transport.get(&task.link).await {
        Err(e) => {
            tracing::error!("Error downloading file from {}\nError : {}", task.link, e);
            notify(update_tx, "Network error", task.link.as_str(), true).await;
            return TaskOutcome::Failed;
        }
        Ok(r) => r,
    };

    if !response.is_success() {
        tracing::warn!(
            "Error status code received : {} |{}|",
            response.status,
            task.link
        );
        return TaskOutcome::Abandoned;
    }

    let mut dest_file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&task.destination)
        .await
    {
        Err(e) => {
            tracing::error!("Error opening/creating file {}", f_name);
            tracing::error!("{} | {}", e, e.kind());
            notify(update_tx, "Error opening destination file", task.link.as_str(), true).await;
            return TaskOutcome::Failed;
        }
        Ok(f) => f,
    };

    let f_size = response.content_length.unwrap_or(0);
    let mut last_update_time = Instant::now()
        .checked_sub(interval)
        .unwrap_or_else(Instant::now);
    let mut bytes_written = 0u64;

    while let Some(chunk) = response.body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Error downloading resource from {}\nError : {}", task.link, e);
                drop(dest_file);
                remove_partial(&task.destination).await;
                notify(update_tx, "Network error", task.link.as_str(), true).await;
                return TaskOutcome::Failed;
            }
        };
        if let Err(e) = dest_file.write_all(&chunk).await {
            tracing::error!("Error writing to destination file {}", f_name);
            tracing::error!("{} | {}", e, e.kind());
            drop(dest_file);
            remove_partial(&task.destination).await;
            notify(update_tx, "Error writing to file", task.link.as_str(), true).await;
            return TaskOutcome::Failed;
        }
        bytes_written += chunk.len() as u64;
        if Instant::now().duration_since(last_update_time) > interval
            && update_tx
                .try_send(ProgressUpdate(Progress {
                    bytes_written,
                    file_size: f_size,
                    resource_name: f_name.clone(),
                }))
                .is_ok()
        {
            last_update_time = Instant::now();
        }
    }

    if let Err(e) = dest_file.flush().await {
        tracing::error!("Error flushing {}\nError : {} | {}", f_name, e, e.kind());
        return TaskOutcome::Failed;
    }

    tracing::debug!("Download completed for {}, file @ {}", task.link, f_name);
    if update_tx
        .try_send(ProgressUpdate(Progress {
            bytes_written,
            file_size: if f_size == 0 { bytes_written } else { f_size },
            resource_name: f_name,
        }))
        .is_err()
    {};
    TaskOutcome::Downloaded(bytes_written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        tracing::debug!("Could not remove partial file {:?}\nError : {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collect_updates, FakeTransport};
    use tokio::sync::mpsc::channel;

    fn tasks_for(transport: &mut FakeTransport, dir: &Path, count: usize) -> Vec<DownloadTask> {
        (0..count)
            .map(|i| {
                let link = format!("https://img.example.com/{i}.jpg");
                transport.serve(&link, 200, format!("image {i}"));
                DownloadTask {
                    link: Url::parse(&link).unwrap(),
                    destination: dir.join(format!("{i}.jpg")),
                    ordinal: i,
                }
            })
            .collect()
    }

    fn rule(concurrency: usize) -> DownloadRule {
        DownloadRule {
            concurrency,
            ..DownloadRule::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_the_concurrency_limit() {
        for limit in [1, 3, 8] {
            let dir = tempfile::tempdir().unwrap();
            let mut transport = FakeTransport::new().with_delay(Duration::from_millis(15));
            let tasks = tasks_for(&mut transport, dir.path(), 20);
            let transport = Arc::new(transport);

            let (tx, rx) = channel(8);
            let collector = collect_updates(rx);
            let downloader = BatchDownloader::new(transport.clone(), rule(limit), tx);
            let report = downloader.run("limit", tasks).await;
            drop(downloader);
            collector.await.unwrap();

            assert_eq!(report.downloaded, 20);
            assert!(transport.max_in_flight() <= limit);
            assert!(transport.max_in_flight() >= 1);
        }
    }

    #[tokio::test]
    async fn reports_every_task_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = FakeTransport::new();
        let mut tasks = tasks_for(&mut transport, dir.path(), 5);
        let missing = Url::parse("https://img.example.com/missing.jpg").unwrap();
        tasks.push(DownloadTask {
            link: missing,
            destination: dir.path().join("missing.jpg"),
            ordinal: 5,
        });

        let (tx, rx) = channel(8);
        let collector = collect_updates(rx);
        let downloader = BatchDownloader::new(Arc::new(transport), rule(2), tx);
        let report = downloader.run("page", tasks).await;
        drop(downloader);
        let updates = collector.await.unwrap();

        let mut finished: Vec<usize> = updates
            .iter()
            .filter_map(|u| match u {
                BatchUpdate(p) => Some(p.completed),
                _ => None,
            })
            .collect();
        finished.sort_unstable();
        assert_eq!(finished, vec![1, 2, 3, 4, 5, 6]);

        let mut ordinals: Vec<usize> = updates
            .iter()
            .filter_map(|u| match u {
                BatchUpdate(p) => Some(p.ordinal),
                _ => None,
            })
            .collect();
        ordinals.sort_unstable();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4, 5]);
        let missing = updates.iter().find_map(|u| match u {
            BatchUpdate(p) if p.ordinal == 5 => Some(p.outcome),
            _ => None,
        });
        assert_eq!(missing, Some(TaskOutcome::Abandoned));
        assert_eq!(report.total(), 6);
        assert_eq!(report.downloaded, 5);
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn error_status_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = FakeTransport::new();
        transport.serve("https://img.example.com/gone.png", 500, "oops");
        let destination = dir.path().join("1.png");

        let (tx, rx) = channel(8);
        drop(rx);
        let downloader = BatchDownloader::new(Arc::new(transport), rule(8), tx);
        let report = downloader
            .run(
                "gone",
                vec![DownloadTask {
                    link: Url::parse("https://img.example.com/gone.png").unwrap(),
                    destination: destination.clone(),
                    ordinal: 0,
                }],
            )
            .await;

        assert_eq!(report.abandoned, 1);
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn network_failure_only_affects_its_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = FakeTransport::new();
        let mut tasks = tasks_for(&mut transport, dir.path(), 3);
        transport.fail("https://img.example.com/1.jpg");
        tasks.push(DownloadTask {
            link: Url::parse("https://img.example.com/broken.jpg").unwrap(),
            destination: dir.path().join("broken.jpg"),
            ordinal: 3,
        });
        transport.serve_broken_body("https://img.example.com/broken.jpg");

        let (tx, rx) = channel(8);
        drop(rx);
        let downloader = BatchDownloader::new(Arc::new(transport), rule(4), tx);
        let report = downloader.run("mixed", tasks).await;

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed, 2);
        assert!(!dir.path().join("1.jpg").exists());
        assert!(!dir.path().join("broken.jpg").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("2.jpg")).unwrap(),
            "image 2"
        );
    }
}
