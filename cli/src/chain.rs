use crate::report::{follow, MAX_BUFFER_SIZE};
use clap::Parser;
use libpagegrab::{
    run_chain, ChainOptions, ClientConfig, DownloadRule, HttpTransport, SystemClock, Update,
    DEFAULT_NEXT_MARKER,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::channel;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Download the images of a chain of linked pages",
    long_about = "Downloads every image of a page, then follows its next link and repeats \
    until there is no next page or a page comes up a second time."
)]
pub struct ChainCli {
    #[arg(default_value = "", help = "The URL to download images from.")]
    url: String,
    #[arg(
        short,
        long,
        help = "Directory to save into. Defaults to the first word of the first page's title."
    )]
    dir: Option<String>,
    #[arg(short, long, default_value_t = libpagegrab::DEFAULT_CONCURRENCY, help = "The downloader threads.")]
    thread: usize,
    #[arg(long, help = "Proxy for all requests, e.g. http://127.0.0.1:7890")]
    proxy: Option<String>,
    #[arg(long, default_value = "./download")]
    save_root: PathBuf,
    #[arg(long, default_value = DEFAULT_NEXT_MARKER, help = "Text marking the paragraph with the next page link.")]
    next_marker: String,
}

impl ChainCli {
    fn options(&self) -> ChainOptions {
        ChainOptions {
            save_root: self.save_root.clone(),
            target_dir: self.dir.clone(),
            next_marker: self.next_marker.clone(),
            rule: DownloadRule {
                concurrency: self.thread,
                ..DownloadRule::default()
            },
        }
    }
}

pub async fn download(cli: ChainCli) {
    if cli.url.is_empty() {
        return;
    }
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

    println!("Initializing download....");
    let (tx, rx) = channel::<Update>(MAX_BUFFER_SIZE);
    let options = cli.options();
    let job = tokio::spawn(async move {
        run_chain(&cli.url, &options, transport, &SystemClock, tx).await
    });
    match follow(rx, job).await {
        Some(Ok(report)) => {
            let images: usize = report.pages.iter().map(|p| p.batch.downloaded).sum();
            println!(
                "{} page(s) visited, {} image(s) downloaded.",
                report.visited.len(),
                images
            );
        }
        Some(Err(e)) => {
            println!("Download wasn't able to complete");
            println!("{}", e);
        }
        None => println!("Download wasn't able to complete"),
    }
}
