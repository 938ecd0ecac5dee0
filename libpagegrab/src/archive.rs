use crate::errors::GrabError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;

/// Moves every `*.zip` directly inside `dir` into a folder named after the
/// archive, creating the folder when needed. Returns the new archive paths.
#[instrument]
pub async fn sort_archives(dir: &Path) -> Result<Vec<PathBuf>, GrabError> {
    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|e| GrabError::file_operation(dir.to_string_lossy(), &e))?;

    let mut archives = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| GrabError::file_operation(dir.to_string_lossy(), &e))?
    {
        let path = entry.path();
        let is_file = match entry.file_type().await {
            Ok(t) => t.is_file(),
            Err(e) => {
                tracing::warn!("Could not stat {:?}\nError : {}", path, e);
                false
            }
        };
        if is_file && path.extension().map_or(false, |ext| ext == "zip") {
            archives.push(path);
        }
    }
    archives.sort();

    let mut moved = Vec::with_capacity(archives.len());
    for archive in archives {
        let (Some(stem), Some(file_name)) = (archive.file_stem(), archive.file_name()) else {
            continue;
        };
        let folder = dir.join(stem);
        fs::create_dir_all(&folder).await.map_err(|e| {
            tracing::error!("Failed to create {:?}\nError : {}", folder, e);
            GrabError::ErrorCreatingDestinationDirectory(format!(
                "{} | {} | {}",
                folder.display(),
                e,
                e.kind()
            ))
        })?;
        let target = folder.join(file_name);
        fs::rename(&archive, &target)
            .await
            .map_err(|e| GrabError::file_operation(archive.to_string_lossy(), &e))?;
        tracing::debug!("Moved {:?} to {:?}", archive, target);
        moved.push(target);
    }
    Ok(moved)
}
