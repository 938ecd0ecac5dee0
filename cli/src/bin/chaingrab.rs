use clap::Parser;
use pagegrab::chain::{download, ChainCli};

#[tokio::main]
async fn main() {
    let _guard = pagegrab::init_tracing("chaingrab.log");
    let cli = ChainCli::parse();
    download(cli).await;
}
