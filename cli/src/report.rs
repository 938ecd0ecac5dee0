use libpagegrab::{BatchProgress, TaskOutcome, Update};
use owo_colors::{OwoColorize, Stream::Stdout};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;

pub(crate) const MAX_BUFFER_SIZE: usize = 100;

/// Prints updates until every sender has been dropped.
pub(crate) async fn print_updates(mut rx: Receiver<Update>) {
    while let Some(update) = rx.recv().await {
        match update {
            Update::MessageUpdate(msg) if msg.is_error => {
                println!(
                    "{} | {}",
                    msg.content.if_supports_color(Stdout, |t| t.red()),
                    msg.resource_name
                );
            }
            Update::MessageUpdate(msg) => {
                println!("{} | {}", msg.content, msg.resource_name);
            }
            Update::ProgressUpdate(progress) => {
                tracing::trace!(
                    "{} {}/{} bytes",
                    progress.resource_name,
                    progress.bytes_written,
                    progress.file_size
                );
            }
            Update::BatchUpdate(progress) => match progress.outcome {
                TaskOutcome::Downloaded(_) => println!(
                    "{}",
                    batch_line(&progress).if_supports_color(Stdout, |t| t.green())
                ),
                _ => println!(
                    "{}",
                    batch_line(&progress).if_supports_color(Stdout, |t| t.yellow())
                ),
            },
        };
    }
}

/// Prints updates until the job drops its sender, then waits for the job's
/// own result so nothing it reports afterwards is lost.
pub(crate) async fn follow<T>(rx: Receiver<Update>, job: JoinHandle<T>) -> Option<T> {
    print_updates(rx).await;
    match job.await {
        Ok(output) => Some(output),
        Err(e) => {
            tracing::error!("Download task stopped unexpectedly\nError : {}", e);
            None
        }
    }
}

fn batch_line(progress: &BatchProgress) -> String {
    let status = match progress.outcome {
        TaskOutcome::Downloaded(bytes) => format!("Downloaded {bytes} bytes"),
        TaskOutcome::Abandoned => "Skipped, server refused".to_string(),
        TaskOutcome::Failed => "Failed".to_string(),
    };
    format!(
        "[{}/{}] #{} {} | {}",
        progress.completed,
        progress.total,
        progress.ordinal + 1,
        status,
        progress.resource_name
    )
}
