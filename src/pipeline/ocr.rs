//! OCR stage: receipt image → extracted text, with a progress stream.
//!
//! ## Engine lifecycle
//!
//! The recognition engine is process-wide state held in an [`EngineSlot`]:
//! it starts `Pending`, is loaded at most once, and then stays `Ready` or
//! `Unavailable` for the life of the process. The slot is injected into
//! [`OcrPipeline`] rather than living in a global, and its state can be
//! watched so a UI can disable the upload control until the engine is ready.
//!
//! ## Event ordering
//!
//! [`OcrPipeline::extract_text`] returns an [`OcrStream`] that yields zero or
//! more [`OcrEvent::Progress`] values, never decreasing and clamped to
//! `0..=100`, followed by exactly one terminal event. Nothing is yielded
//! after the terminal event.

use crate::config::PlannerConfig;
use crate::error::{BoxError, OcrError};
use crate::pipeline::input::ReceiptImage;
use crate::progress::WorkflowProgressCallback;
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt;
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Capacity of the per-run event channel. Progress events beyond this are
/// dropped; the terminal event never is.
const EVENT_BUFFER: usize = 32;

// ── Engine contract ──────────────────────────────────────────────────────

/// A text-recognition backend.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Recognise the text in `image`.
    ///
    /// Report progress through `progress` as recognition proceeds. Returning
    /// an empty string is fine when nothing was detected.
    async fn recognize(
        &self,
        image: &ReceiptImage,
        language: &str,
        progress: &ProgressSink,
    ) -> Result<String, BoxError>;
}

/// Where an engine reports recognition progress.
///
/// Values above 100 are clamped, and a value lower than or equal to the last
/// reported one is ignored.
pub struct ProgressSink {
    tx: mpsc::Sender<OcrEvent>,
    last: Mutex<Option<u8>>,
}

impl ProgressSink {
    fn new(tx: mpsc::Sender<OcrEvent>) -> Self {
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        {
            let Ok(mut last) = self.last.lock() else {
                return;
            };
            if matches!(*last, Some(prev) if percent <= prev) {
                return;
            }
            *last = Some(percent);
        }
        if self.tx.try_send(OcrEvent::Progress(percent)).is_err() {
            debug!("OCR progress {}% dropped (channel full or closed)", percent);
        }
    }

    /// Report a fraction in `0.0..=1.0` as a whole percentage.
    pub fn report_fraction(&self, fraction: f32) {
        let pct = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8;
        self.report(pct);
    }
}

// ── Events and stream ────────────────────────────────────────────────────

/// One item of an OCR run.
#[derive(Debug)]
pub enum OcrEvent {
    /// Recognition progress, 0–100.
    Progress(u8),
    /// Terminal: the recognised text (possibly empty).
    Completed(String),
    /// Terminal: recognition failed.
    Failed(OcrError),
}

impl OcrEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OcrEvent::Progress(_))
    }
}

/// Stream of [`OcrEvent`]s for one recognition run.
///
/// Guarantees exactly one terminal event: if the engine task disappears
/// without reporting, a `RecognitionFailed` event is synthesised.
pub struct OcrStream {
    rx: mpsc::Receiver<OcrEvent>,
    finished: bool,
}

impl OcrStream {
    fn new(rx: mpsc::Receiver<OcrEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }
}

impl Stream for OcrStream {
    type Item = OcrEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(OcrEvent::Failed(OcrError::recognition(
                    "OCR task ended without a result",
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ── Engine slot ──────────────────────────────────────────────────────────

/// Observable state of the process-wide engine.
#[derive(Clone)]
pub enum EngineStatus {
    /// Not loaded yet, or loading.
    Pending,
    Ready(Arc<dyn OcrEngine>),
    /// Loading failed; stays this way until the process restarts.
    Unavailable(String),
}

impl EngineStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, EngineStatus::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready(_))
    }
}

impl fmt::Debug for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Pending => f.write_str("Pending"),
            EngineStatus::Ready(e) => write!(f, "Ready({})", e.name()),
            EngineStatus::Unavailable(r) => write!(f, "Unavailable({r})"),
        }
    }
}

/// Lazily-loaded holder for the OCR engine.
pub struct EngineSlot {
    status: watch::Sender<EngineStatus>,
    load_started: AtomicBool,
}

impl Default for EngineSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineSlot {
    /// A slot in the `Pending` state.
    pub fn new() -> Self {
        let (status, _) = watch::channel(EngineStatus::Pending);
        Self {
            status,
            load_started: AtomicBool::new(false),
        }
    }

    /// A slot that is already `Ready` with `engine`.
    pub fn ready(engine: Arc<dyn OcrEngine>) -> Self {
        let (status, _) = watch::channel(EngineStatus::Ready(engine));
        Self {
            status,
            load_started: AtomicBool::new(true),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Load the engine with `loader`, once.
    ///
    /// Only the first call runs `loader`; later calls return the current
    /// status without waiting. A failed load is permanent, and so is a load
    /// whose future is dropped before it settles.
    pub async fn load<F, Fut>(&self, loader: F) -> EngineStatus
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn OcrEngine>, BoxError>>,
    {
        if self.load_started.swap(true, Ordering::SeqCst) {
            return self.status();
        }

        let mut guard = LoadGuard {
            slot: self,
            settled: false,
        };
        let status = match loader().await {
            Ok(engine) => {
                info!("OCR engine '{}' ready", engine.name());
                EngineStatus::Ready(engine)
            }
            Err(e) => {
                warn!("OCR engine failed to load: {}", e);
                EngineStatus::Unavailable(e.to_string())
            }
        };
        self.status.send_replace(status.clone());
        guard.settled = true;
        status
    }

    /// Wait until the slot leaves `Pending`.
    pub async fn wait_settled(&self) -> EngineStatus {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|s| !s.is_pending()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        settled
    }

    /// The engine, if ready; never waits.
    pub fn engine(&self) -> Result<Arc<dyn OcrEngine>, OcrError> {
        match self.status() {
            EngineStatus::Ready(engine) => Ok(engine),
            EngineStatus::Pending => Err(OcrError::EngineNotReady),
            EngineStatus::Unavailable(reason) => Err(OcrError::EngineUnavailable { reason }),
        }
    }
}

/// Marks the slot `Unavailable` if a load is dropped before it settles, so
/// the slot never stays `Pending` with no loader running.
struct LoadGuard<'a> {
    slot: &'a EngineSlot,
    settled: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("OCR engine load was cancelled before it finished");
            self.slot
                .status
                .send_replace(EngineStatus::Unavailable(LOAD_CANCELLED.to_string()));
        }
    }
}

const LOAD_CANCELLED: &str = "engine load was cancelled";

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Runs an image through the engine held in an [`EngineSlot`].
///
/// Holds no state between calls.
#[derive(Clone)]
pub struct OcrPipeline {
    slot: Arc<EngineSlot>,
    language: String,
    grayscale: bool,
}

impl OcrPipeline {
    pub fn new(slot: Arc<EngineSlot>, config: &PlannerConfig) -> Self {
        Self {
            slot,
            language: config.ocr_language.clone(),
            grayscale: config.ocr_grayscale,
        }
    }

    pub fn slot(&self) -> &Arc<EngineSlot> {
        &self.slot
    }

    /// Start recognising `image`.
    ///
    /// Fails with [`OcrError::EngineNotReady`] (or `EngineUnavailable`) before
    /// any event is produced if the engine is not loaded.
    pub fn extract_text(&self, image: ReceiptImage) -> Result<OcrStream, OcrError> {
        let engine = self.slot.engine()?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let language = self.language.clone();
        let grayscale = self.grayscale;

        debug!(
            "OCR start: engine={} image={:?} lang={}",
            engine.name(),
            image,
            language
        );

        tokio::spawn(async move {
            let sink = ProgressSink::new(tx.clone());
            let terminal = match run_engine(engine, image, &language, grayscale, &sink).await {
                Ok(text) => OcrEvent::Completed(text),
                Err(e) => OcrEvent::Failed(e),
            };
            // Receiver may be gone if the caller dropped the stream.
            let _ = tx.send(terminal).await;
        });

        Ok(OcrStream::new(rx))
    }

    /// Recognise `image`, forwarding progress to `callback`, and return the text.
    ///
    /// `on_ocr_start` fires only once the engine has accepted the image.
    pub async fn recognize(
        &self,
        image: ReceiptImage,
        callback: &dyn WorkflowProgressCallback,
    ) -> Result<String, OcrError> {
        let mut events = self.extract_text(image)?;
        callback.on_ocr_start();
        while let Some(event) = events.next().await {
            match event {
                OcrEvent::Progress(pct) => callback.on_ocr_progress(pct),
                OcrEvent::Completed(text) => return Ok(text),
                OcrEvent::Failed(e) => return Err(e),
            }
        }
        // OcrStream always ends with a terminal event.
        Err(OcrError::recognition("OCR stream ended without a result"))
    }
}

async fn run_engine(
    engine: Arc<dyn OcrEngine>,
    image: ReceiptImage,
    language: &str,
    grayscale: bool,
    sink: &ProgressSink,
) -> Result<String, OcrError> {
    let image = if grayscale {
        let name = image.name().to_string();
        let bytes = image.bytes().to_vec();
        let png = tokio::task::spawn_blocking(move || to_grayscale_png(&bytes))
            .await
            .map_err(OcrError::recognition)?
            .map_err(OcrError::recognition)?;
        ReceiptImage::from_bytes(png, name)
    } else {
        image
    };

    let text = engine
        .recognize(&image, language, sink)
        .await
        .map_err(|source| OcrError::RecognitionFailed { source })?;
    debug!("OCR finished: {} chars", text.len());
    Ok(text)
}

/// Decode any supported image and re-encode it as an 8-bit grayscale PNG.
pub fn to_grayscale_png(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let luma = image::load_from_memory(bytes)?.to_luma8();
    let mut buf = Vec::new();
    image::DynamicImage::ImageLuma8(luma).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
