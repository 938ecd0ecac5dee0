use clap::Parser;
use pagegrab::zipsort::{sort, ZipSortCli};

#[tokio::main]
async fn main() {
    let _guard = pagegrab::init_tracing("zipsort.log");
    let cli = ZipSortCli::parse();
    sort(cli).await;
}
