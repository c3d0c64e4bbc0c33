//! The three-stage workflow: Upload → Review → Plan.
//!
//! ```text
//!           submit_image            confirm_text
//!  Upload ───────────────▶ Review ───────────────▶ Plan
//!    ▲                      │  ▲ edit_text          │
//!    │                      │  └────────────────────┤ back_to_review
//!    └──────────────────────┴───────────────────────┘ restart
//! ```
//!
//! [`WorkflowController`] owns the [`WorkflowState`] and the current
//! [`ProviderConfig`]. Every method takes `&self`; state lives behind a mutex
//! that is never held across an `.await`, so a second call made while OCR or
//! generation is in flight sees `is_busy` and is rejected with
//! [`WorkflowError::AlreadyInProgress`].
//!
//! Failed operations leave the stage, text and plan as they were. The busy
//! flag is cleared by a guard on every exit path, including when the caller
//! drops the future mid-flight.

use crate::config::ProviderConfig;
use crate::error::{OcrError, WorkflowError};
use crate::output::MealPlan;
use crate::pipeline::input::ReceiptImage;
use crate::pipeline::normalize::PlanNormalizer;
use crate::pipeline::ocr::{EngineStatus, OcrPipeline};
use crate::pipeline::provider::ProviderGateway;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::settings::{load_provider_config, save_provider_config, SettingsStore};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Where the user is in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    /// Waiting for a receipt photo.
    #[default]
    Upload,
    /// OCR text is shown for correction.
    Review,
    /// A meal plan has been generated.
    Plan,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Upload => "upload",
            Stage::Review => "review",
            Stage::Plan => "plan",
        })
    }
}

/// Snapshot of the session.
///
/// * `Upload`: `extracted_text` is empty and `meal_plan` is `None`.
/// * `Review`: `extracted_text` is non-empty.
/// * `Plan`: `meal_plan` is `Some`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkflowState {
    pub stage: Stage,
    pub extracted_text: String,
    pub meal_plan: Option<MealPlan>,
    pub is_busy: bool,
}

struct Inner {
    state: WorkflowState,
    provider: ProviderConfig,
}

/// Drives a single receipt session through the three stages.
pub struct WorkflowController {
    ocr: OcrPipeline,
    gateway: ProviderGateway,
    normalizer: PlanNormalizer,
    settings: Arc<dyn SettingsStore>,
    progress: ProgressCallback,
    inner: Mutex<Inner>,
}

/// Clears `is_busy` when dropped.
struct BusyGuard<'a> {
    inner: &'a Mutex<Inner>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        lock(self.inner).state.is_busy = false;
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkflowController {
    /// Create a controller in the Upload stage, reading the provider
    /// selection from `settings`.
    pub fn new(
        ocr: OcrPipeline,
        gateway: ProviderGateway,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, WorkflowError> {
        let provider = load_provider_config(settings.as_ref())?;
        debug!("Workflow starting with {:?}", provider);
        Ok(Self {
            ocr,
            gateway,
            normalizer: PlanNormalizer,
            settings,
            progress: Arc::new(NoopProgressCallback),
            inner: Mutex::new(Inner {
                state: WorkflowState::default(),
                provider,
            }),
        })
    }

    /// Attach a progress observer.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> WorkflowState {
        lock(&self.inner).state.clone()
    }

    pub fn provider_config(&self) -> ProviderConfig {
        lock(&self.inner).provider.clone()
    }

    /// Current OCR engine status, for enabling the upload control.
    pub fn engine_status(&self) -> EngineStatus {
        self.ocr.slot().status()
    }

    /// Mark busy if idle and in `required`; the guard clears it again.
    fn begin(&self, action: &'static str, required: Stage) -> Result<BusyGuard<'_>, WorkflowError> {
        let mut inner = lock(&self.inner);
        check(&inner.state, action, required)?;
        inner.state.is_busy = true;
        Ok(BusyGuard { inner: &self.inner })
    }

    /// Run OCR on `image`. On success the text moves to Review.
    pub async fn submit_image(&self, image: ReceiptImage) -> Result<(), WorkflowError> {
        let _busy = self.begin("submit an image", Stage::Upload)?;
        info!("Scanning receipt {:?}", image);

        let result = match self.ocr.recognize(image, self.progress.as_ref()).await {
            Ok(text) if text.trim().is_empty() => Err(OcrError::NoTextDetected),
            other => other,
        };

        match result {
            Ok(text) => {
                self.progress.on_ocr_complete(text.len());
                let mut inner = lock(&self.inner);
                inner.state.extracted_text = text;
                inner.state.stage = Stage::Review;
                Ok(())
            }
            Err(e) => {
                warn!("OCR failed: {}", e);
                let err = WorkflowError::from(e);
                self.progress.on_error(&err.user_message());
                Err(err)
            }
        }
    }

    /// Skip OCR and move straight to Review with `text` (e.g. pasted or
    /// read from a file).
    pub fn submit_text(&self, text: impl Into<String>) -> Result<(), WorkflowError> {
        let text = text.into();
        let mut inner = lock(&self.inner);
        check(&inner.state, "submit text", Stage::Upload)?;
        if text.trim().is_empty() {
            return Err(WorkflowError::EmptyText);
        }
        inner.state.extracted_text = text;
        inner.state.stage = Stage::Review;
        Ok(())
    }

    /// Replace the reviewed text.
    pub fn edit_text(&self, new_text: impl Into<String>) -> Result<(), WorkflowError> {
        let new_text = new_text.into();
        let mut inner = lock(&self.inner);
        check(&inner.state, "edit the text", Stage::Review)?;
        if new_text.trim().is_empty() {
            return Err(WorkflowError::EmptyText);
        }
        inner.state.extracted_text = new_text;
        Ok(())
    }

    /// Send the reviewed text to the configured provider and move to Plan.
    pub async fn confirm_text(&self) -> Result<(), WorkflowError> {
        let (_busy, text, provider) = {
            let mut inner = lock(&self.inner);
            check(&inner.state, "generate a plan", Stage::Review)?;
            if inner.state.extracted_text.trim().is_empty() {
                return Err(WorkflowError::EmptyText);
            }
            self.gateway.check_credentials(&inner.provider)?;
            inner.state.is_busy = true;
            (
                BusyGuard { inner: &self.inner },
                inner.state.extracted_text.clone(),
                inner.provider.clone(),
            )
        };

        let id = provider.provider_id;
        self.progress.on_generation_start(id);

        let result = match self.gateway.generate_plan(&provider, &text).await {
            Ok(raw) => self.normalizer.normalize(&raw).map_err(WorkflowError::from),
            Err(e) => Err(WorkflowError::from(e)),
        };

        match result {
            Ok(plan) => {
                info!("Meal plan ready from {}", id);
                {
                    let mut inner = lock(&self.inner);
                    inner.state.meal_plan = Some(plan);
                    inner.state.stage = Stage::Plan;
                }
                self.progress.on_generation_complete(id);
                Ok(())
            }
            Err(e) => {
                warn!("Generation via {} failed: {}", id, e);
                self.progress.on_error(&e.user_message());
                Err(e)
            }
        }
    }

    /// Leave the plan and return to the reviewed text.
    pub fn back_to_review(&self) -> Result<(), WorkflowError> {
        let mut inner = lock(&self.inner);
        check(&inner.state, "go back to the text", Stage::Plan)?;
        inner.state.meal_plan = None;
        inner.state.stage = Stage::Review;
        Ok(())
    }

    /// Discard everything and start over.
    pub fn restart(&self) -> Result<(), WorkflowError> {
        let mut inner = lock(&self.inner);
        if inner.state.is_busy {
            return Err(WorkflowError::AlreadyInProgress);
        }
        inner.state = WorkflowState::default();
        Ok(())
    }

    /// Persist `config` and use it for subsequent generations.
    ///
    /// Allowed while busy; an in-flight generation keeps the config it
    /// started with.
    pub fn update_settings(&self, config: ProviderConfig) -> Result<(), WorkflowError> {
        save_provider_config(self.settings.as_ref(), &config)?;
        info!("Provider set to {}", config.provider_id);
        lock(&self.inner).provider = config;
        Ok(())
    }
}

fn check(state: &WorkflowState, action: &'static str, required: Stage) -> Result<(), WorkflowError> {
    if state.is_busy {
        return Err(WorkflowError::AlreadyInProgress);
    }
    if state.stage != required {
        return Err(WorkflowError::InvalidTransition {
            action,
            stage: state.stage,
        });
    }
    Ok(())
}
