//! Input resolution: turn a user-supplied path or URL into an in-memory image.
//!
//! The OCR engine is the only judge of whether the bytes are a usable image,
//! so no format validation happens here. The detected format is kept only as
//! a hint for naming the temporary file the engine reads.

use crate::error::InputError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A receipt photo held in memory.
#[derive(Clone)]
pub struct ReceiptImage {
    bytes: Vec<u8>,
    name: String,
}

impl std::fmt::Debug for ReceiptImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptImage")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ReceiptImage {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            name: name.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Original file name (or URL path segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Format sniffed from the magic bytes, if recognisable.
    pub fn format(&self) -> Option<image::ImageFormat> {
        image::guess_format(&self.bytes).ok()
    }

    /// File extension matching the sniffed format, falling back to the name's.
    pub fn extension(&self) -> String {
        self.format()
            .and_then(|f| f.extensions_str().first().copied())
            .map(str::to_string)
            .or_else(|| {
                Path::new(&self.name)
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
            })
            .unwrap_or_else(|| "img".to_string())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a receipt image from a local path or an HTTP(S) URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ReceiptImage, InputError> {
    if input.trim().is_empty() {
        return Err(InputError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<ReceiptImage, InputError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InputError::PermissionDenied { path });
        }
        Err(_) => return Err(InputError::FileNotFound { path }),
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "receipt".to_string());

    debug!("Read local receipt image: {} ({} bytes)", path.display(), bytes.len());
    Ok(ReceiptImage::from_bytes(bytes, name))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ReceiptImage, InputError> {
    info!("Downloading receipt image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InputError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InputError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InputError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(InputError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| InputError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(ReceiptImage::from_bytes(bytes.to_vec(), filename_from_url(url)))
}

/// Last non-empty URL path segment, or `receipt`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "receipt".to_string()
}
