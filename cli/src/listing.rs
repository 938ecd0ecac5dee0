use crate::report::{follow, MAX_BUFFER_SIZE};
use clap::Parser;
use libpagegrab::{
    remote_location, run_listing, ClientConfig, DownloadRule, HttpTransport, ListingOptions,
    Update, DEFAULT_PAGE_SIZE,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::channel;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mirror a directory of a file listing service",
    long_about = "Lists a remote directory page by page, downloads its files and then \
    descends into every sub-directory."
)]
pub struct ListingCli {
    #[arg(default_value = "", help = "URL of the remote directory.")]
    url: String,
    #[arg(short, long, default_value = "./download", help = "Local root the tree is mirrored under.")]
    dir: PathBuf,
    #[arg(short, long, default_value_t = libpagegrab::DEFAULT_CONCURRENCY, help = "The downloader threads.")]
    thread: usize,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u64,
    #[arg(long, help = "Proxy for all requests, e.g. http://127.0.0.1:7890")]
    proxy: Option<String>,
}

impl ListingCli {
    fn options(&self) -> ListingOptions {
        ListingOptions {
            save_root: self.dir.clone(),
            page_size: self.page_size,
            rule: DownloadRule {
                concurrency: self.thread,
                ..DownloadRule::default()
            },
        }
    }
}

pub async fn download(cli: ListingCli) {
    if cli.url.is_empty() {
        return;
    }
    let (base, remote_path) = match remote_location(&cli.url) {
        Ok(location) => location,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };
    let mut config = ClientConfig::default();
    if let Some(proxy) = &cli.proxy {
        config = config.with_proxy(proxy);
    }
    let transport = match HttpTransport::new(&config) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            println!("{}", e);
            return;
        }
    };

    println!("Listing {} on {}", remote_path, base);
    let (tx, rx) = channel::<Update>(MAX_BUFFER_SIZE);
    let options = cli.options();
    let job = tokio::spawn(async move {
        run_listing(&base, &remote_path, &options, transport, tx).await
    });
    match follow(rx, job).await {
        Some(Ok(report)) => {
            println!(
                "{} file(s) downloaded from {} directorie(s).",
                report.batch.downloaded,
                report.completed.len()
            );
            for (path, e) in report.failed {
                println!("Skipped {} : {}", path, e);
            }
        }
        Some(Err(e)) => {
            println!("Download wasn't able to complete");
            println!("{}", e);
        }
        None => println!("Download wasn't able to complete"),
    }
}
