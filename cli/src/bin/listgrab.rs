use clap::Parser;
use pagegrab::listing::{download, ListingCli};

#[tokio::main]
async fn main() {
    let _guard = pagegrab::init_tracing("listgrab.log");
    let cli = ListingCli::parse();
    download(cli).await;
}
