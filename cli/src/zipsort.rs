use clap::Parser;
use libpagegrab::sort_archives;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Move every zip archive into a folder of the same name"
)]
pub struct ZipSortCli {
    #[arg(default_value = ".")]
    dir: PathBuf,
}

pub async fn sort(cli: ZipSortCli) {
    match sort_archives(&cli.dir).await {
        Ok(moved) => {
            for path in &moved {
                println!("[Moved] {}", path.display());
            }
            println!("{} archive(s) sorted.", moved.len());
        }
        Err(e) => {
            println!("Sorting wasn't able to complete");
            println!("{}", e);
        }
    }
}
