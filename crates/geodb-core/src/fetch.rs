use std::path::Path;

use futures_util::StreamExt;
use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::error::UpdateError;
use crate::transport::Transport;

/// Stream `url` into `dest`, replacing any previous contents.
///
/// The output handle is flushed on every path, including failures. A failed
/// download can leave a partial file behind; nothing downstream trusts it
/// until the integrity check passes.
///
/// # Errors
/// Returns `DownloadFailed` wrapping either the transport error or the write
/// error that stopped the download.
pub async fn fetch_to_file(
    transport: &dyn Transport,
    url: &str,
    dest: &Path,
) -> Result<u64, UpdateError> {
    let mut stream = transport
        .fetch(url)
        .await
        .map_err(|error| UpdateError::download(url, error))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|error| UpdateError::download_write(url, dest, error))?;

    let mut downloaded: u64 = 0;
    let mut failure = None;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                failure = Some(UpdateError::download(url, error));
                break;
            }
        };
        if let Err(error) = file.write_all(&chunk).await {
            failure = Some(UpdateError::download_write(url, dest, error));
            break;
        }
        downloaded += chunk.len() as u64;
    }
    drop(stream);

    let flushed = file.flush().await;
    if let Some(error) = failure {
        debug!("Download of {url} aborted after {downloaded} bytes");
        return Err(error);
    }
    flushed.map_err(|error| UpdateError::download_write(url, dest, error))?;
    file.sync_all()
        .await
        .map_err(|error| UpdateError::download_write(url, dest, error))?;

    info!("Downloaded {url}: {downloaded} bytes");
    Ok(downloaded)
}
