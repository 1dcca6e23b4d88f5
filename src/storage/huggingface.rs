//! Model weight downloader
//!
//! Resolves model URLs (HuggingFace page links, resolve links, short
//! `user/repo/file.gguf` references or plain HTTP URLs) and streams the
//! weights to disk.

use crate::storage::StorageError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

const HF_BASE: &str = "https://huggingface.co/";
const USER_AGENT: &str = concat!("memora/", env!("CARGO_PKG_VERSION"));

/// A downloadable model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    /// Direct download URL
    pub download_url: String,
    /// File name to store the weights under
    pub file_name: String,
}

fn sanitize_local_filename(filename: &str) -> Result<String, StorageError> {
    let trimmed = filename.trim().trim_start_matches('/');
    let flattened = trimmed.replace('\\', "/").replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|ch| {
            let invalid = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
            if invalid || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(StorageError::InvalidUrl(filename.to_string()));
    }
    Ok(sanitized)
}

impl ModelSource {
    /// Parse a model URL into a download location and local file name
    pub fn parse(url: &str) -> Result<Self, StorageError> {
        let url = url.trim();
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);

        if url.contains("huggingface.co/") {
            let path = url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_start_matches("huggingface.co/");
            let parts: Vec<&str> = path.split('/').collect();

            // user/repo/{blob|resolve}/revision/file...
            let marker = parts
                .iter()
                .position(|&p| p == "blob" || p == "resolve")
                .filter(|&pos| pos == 2 && parts.len() > pos + 2)
                .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;

            let repo_id = format!("{}/{}", parts[0], parts[1]);
            let revision = parts[marker + 1];
            let filename = parts[marker + 2..].join("/");
            return Ok(Self {
                download_url: format!("{HF_BASE}{repo_id}/resolve/{revision}/{filename}"),
                file_name: sanitize_local_filename(&filename)?,
            });
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            let filename = url
                .rsplit('/')
                .next()
                .filter(|f| !f.is_empty())
                .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))?;
            return Ok(Self {
                download_url: url.to_string(),
                file_name: sanitize_local_filename(filename)?,
            });
        }

        // Short form: user/repo/file.gguf
        let parts: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 3 {
            let filename = parts[2..].join("/");
            return Ok(Self {
                download_url: format!("{HF_BASE}{}/{}/resolve/main/{}", parts[0], parts[1], filename),
                file_name: sanitize_local_filename(&filename)?,
            });
        }

        Err(StorageError::InvalidUrl(url.to_string()))
    }
}

/// Path of the partially written file for `dest`
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Stream `url` to `dest`.
///
/// Bytes land in a `.tmp` sibling first and are renamed into place only once
/// the byte count matches the advertised length, so `dest` is either absent
/// or complete. `progress` receives `(downloaded, total)` after every chunk.
pub async fn download_to(
    url: &str,
    dest: &Path,
    progress: impl Fn(u64, u64) + Send,
) -> Result<PathBuf, StorageError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = temp_path_for(dest);

    tracing::info!("Downloading from: {}", url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3600))
        .build()?;

    let mut response = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(StorageError::Status(response.status()));
    }

    let total_size = response.content_length().ok_or(StorageError::UnknownSize)?;
    tracing::info!("File size: {} ({} bytes)", format_size(total_size), total_size);

    let written = write_body(&mut response, &temp_path, total_size, progress).await;
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&temp_path).await {
            tracing::warn!("Could not remove {:?}: {}", temp_path, cleanup);
        }
        return Err(e);
    }

    fs::rename(&temp_path, dest).await?;
    tracing::info!("Download complete: {:?}", dest);

    Ok(dest.to_path_buf())
}

/// Stream the response body into `temp_path`, checking the final length
async fn write_body(
    response: &mut reqwest::Response,
    temp_path: &Path,
    total_size: u64,
    progress: impl Fn(u64, u64) + Send,
) -> Result<(), StorageError> {
    let mut temp_file = File::create(temp_path).await?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        temp_file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress(downloaded, total_size);
    }
    temp_file.flush().await?;

    if downloaded != total_size {
        return Err(StorageError::Incomplete {
            got: downloaded,
            expected: total_size,
        });
    }
    Ok(())
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KB {
        format!("{} B", bytes)
    } else if value < KB * KB {
        format!("{:.0}KB", value / KB)
    } else if value < KB * KB * KB {
        format!("{:.0}MB", value / (KB * KB))
    } else {
        format!("{:.1}GB", value / (KB * KB * KB))
    }
}
