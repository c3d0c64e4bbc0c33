//! [`OcrEngine`] backed by the `tesseract` command-line tool.
//!
//! The image is staged in a named temp file (tesseract reads from a path) and
//! the recognised text is read from stdout. The CLI has no progress output,
//! so the engine reports 0% when it starts and 100% when it is done.

use crate::error::BoxError;
use crate::pipeline::input::ReceiptImage;
use crate::pipeline::ocr::{OcrEngine, ProgressSink};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Default binary name, resolved through `PATH`.
pub const DEFAULT_TESSERACT_BINARY: &str = "tesseract";

pub struct TesseractEngine {
    binary: PathBuf,
    version: String,
}

impl TesseractEngine {
    /// Check that `binary` runs and return an engine for it.
    ///
    /// Meant to be passed to [`crate::pipeline::ocr::EngineSlot::load`].
    pub async fn detect(binary: impl AsRef<Path>) -> Result<Arc<dyn OcrEngine>, BoxError> {
        let binary = binary.as_ref().to_path_buf();
        let output = Command::new(&binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| format!("could not run '{}': {e}", binary.display()))?;

        if !output.status.success() {
            return Err(format!(
                "'{} --version' exited with {}",
                binary.display(),
                output.status
            )
            .into());
        }

        // Older releases print the version on stderr.
        let banner = if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        let version = parse_version(&String::from_utf8_lossy(banner));
        info!("Found tesseract {} at {}", version, binary.display());

        Ok(Arc::new(Self { binary, version }))
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(
        &self,
        image: &ReceiptImage,
        language: &str,
        progress: &ProgressSink,
    ) -> Result<String, BoxError> {
        progress.report(0);

        let mut staged = tempfile::Builder::new()
            .prefix("receipt-")
            .suffix(&format!(".{}", image.extension()))
            .tempfile()?;
        staged.write_all(image.bytes())?;
        staged.flush()?;

        debug!(
            "Running {} on {} ({} bytes)",
            self.binary.display(),
            staged.path().display(),
            image.len()
        );

        let output = Command::new(&self.binary)
            .arg(staged.path())
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("tesseract exited with {}: {}", output.status, stderr.trim()).into());
        }

        progress.report(100);
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// First line of `tesseract --version`, minus the program name.
fn parse_version(banner: &str) -> String {
    banner
        .lines()
        .next()
        .map(str::trim)
        .map(|l| l.strip_prefix("tesseract").unwrap_or(l).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
