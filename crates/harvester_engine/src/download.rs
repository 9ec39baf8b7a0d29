use std::path::{Path, PathBuf};

use bytes::BytesMut;
use futures_util::StreamExt;
use harvest_logging::harvest_info;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::fetch::{map_reqwest_error, progress, FetchRequest, ReqwestFetcher};
use crate::filename::sanitize_component;
use crate::{FailureKind, FetchError, ProgressSink};

/// Extension appended to downloaded files that have none.
pub const DEFAULT_DOWNLOAD_EXTENSION: &str = ".safetensors";
/// Derived names shorter than this are replaced by a timestamped name.
const MIN_DERIVED_NAME_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub content_length: Option<u64>,
}

/// Streams large payloads straight to disk in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct Downloader {
    fetcher: ReqwestFetcher,
}

impl Downloader {
    pub fn new(fetcher: ReqwestFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn download_to_dir(
        &self,
        url: &str,
        dir: &Path,
        filename: Option<&str>,
        auth: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadedFile, FetchError> {
        let url =
            Url::parse(url).map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let request = FetchRequest::get(url.clone()).bearer(auth).streaming(true);
        let response = self.fetcher.send(&request).await?;
        let content_length = response.content_length();

        tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let name = derive_download_name(response.url(), filename, &timestamp);
        let path = dir.join(&name);
        let partial = dir.join(format!("{name}.part"));
        harvest_info!("Saving {} to {}", url, path.display());

        let written = match self
            .write_partial(response, &partial, &url, content_length, sink)
            .await
        {
            Ok(written) => written,
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(err);
            }
        };
        if let Err(err) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_error(err));
        }

        harvest_info!("Download complete: {} ({} bytes)", path.display(), written);
        Ok(DownloadedFile {
            path,
            bytes_written: written,
            content_length,
        })
    }

    /// Stream the body into `partial`; the caller owns cleanup on error.
    async fn write_partial(
        &self,
        response: reqwest::Response,
        partial: &Path,
        url: &Url,
        content_length: Option<u64>,
        sink: &dyn ProgressSink,
    ) -> Result<u64, FetchError> {
        let chunk_size = self.fetcher.settings().chunk_size.max(1);
        let mut file = tokio::fs::File::create(partial).await.map_err(io_error)?;
        let mut pending = BytesMut::with_capacity(chunk_size);
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        sink.emit(progress(url, 0, content_length));

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk.map_err(map_reqwest_error)?);
            while pending.len() >= chunk_size {
                let block = pending.split_to(chunk_size);
                file.write_all(&block).await.map_err(io_error)?;
                written += block.len() as u64;
                sink.emit(progress(url, written, content_length));
            }
        }
        if !pending.is_empty() {
            file.write_all(&pending).await.map_err(io_error)?;
            written += pending.len() as u64;
            sink.emit(progress(url, written, content_length));
        }
        file.flush().await.map_err(io_error)?;
        Ok(written)
    }
}

/// Pick the on-disk name for a download.
///
/// A supplied name wins. Otherwise the URL's last path segment is used, unless it
/// is shorter than five characters, in which case `download_<timestamp>` is used.
/// Names without an extension get [`DEFAULT_DOWNLOAD_EXTENSION`].
pub fn derive_download_name(url: &Url, supplied: Option<&str>, timestamp: &str) -> String {
    let mut name = match supplied.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => sanitize_component(name),
        None => {
            let derived = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(sanitize_component)
                .unwrap_or_default();
            if derived.chars().count() < MIN_DERIVED_NAME_LEN {
                format!("download_{timestamp}{DEFAULT_DOWNLOAD_EXTENSION}")
            } else {
                derived
            }
        }
    };
    if Path::new(&name).extension().is_none() {
        name.push_str(DEFAULT_DOWNLOAD_EXTENSION);
    }
    name
}

fn io_error(err: std::io::Error) -> FetchError {
    FetchError::new(FailureKind::Io, err.to_string())
}
