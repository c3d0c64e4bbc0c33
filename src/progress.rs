//! Progress-callback trait for workflow events.
//!
//! Inject an [`Arc<dyn WorkflowProgressCallback>`] into
//! [`crate::workflow::WorkflowController::with_progress`] to receive events as
//! the receipt moves through OCR and generation. The CLI uses this to drive an
//! indicatif progress bar; a UI could forward events to a channel instead.
//!
//! Callbacks are observers only: nothing they do can change the workflow
//! stage or the extracted text.
//!
//! # Example
//!
//! ```rust
//! use receipt2plan::WorkflowProgressCallback;
//! use std::sync::atomic::{AtomicU8, Ordering};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl WorkflowProgressCallback for LastPercent {
//!     fn on_ocr_progress(&self, percent: u8) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::config::ProviderId;
use std::sync::Arc;

/// Called by the workflow as OCR and generation proceed.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait WorkflowProgressCallback: Send + Sync {
    /// OCR has started on a new image.
    fn on_ocr_start(&self) {}

    /// Recognition progress, 0–100. Never decreases within one OCR run.
    fn on_ocr_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// OCR finished.
    ///
    /// # Arguments
    /// * `text_len` — byte length of the recognised text
    fn on_ocr_complete(&self, text_len: usize) {
        let _ = text_len;
    }

    /// A provider request is about to be sent.
    fn on_generation_start(&self, provider: ProviderId) {
        let _ = provider;
    }

    /// A plan was generated and validated.
    fn on_generation_complete(&self, provider: ProviderId) {
        let _ = provider;
    }

    /// OCR or generation failed.
    ///
    /// # Arguments
    /// * `error` — human-readable error description
    fn on_error(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl WorkflowProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback type.
pub type ProgressCallback = Arc<dyn WorkflowProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        percents: Mutex<Vec<u8>>,
        errors: AtomicUsize,
    }

    impl WorkflowProgressCallback for Recorder {
        fn on_ocr_progress(&self, percent: u8) {
            self.percents.lock().unwrap().push(percent);
        }

        fn on_error(&self, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_ocr_start();
        cb.on_ocr_progress(50);
        cb.on_ocr_complete(12);
        cb.on_generation_start(ProviderId::Gemini);
        cb.on_generation_complete(ProviderId::Gemini);
        cb.on_error("boom");
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_ocr_progress(10);
        rec.on_ocr_progress(90);
        rec.on_ocr_complete(5);
        rec.on_error("x");
        assert_eq!(*rec.percents.lock().unwrap(), vec![10, 90]);
        assert_eq!(rec.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_ocr_start();
        cb.on_generation_start(ProviderId::OpenAI);
    }
}
