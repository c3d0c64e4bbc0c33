//! # receipt2plan
//!
//! Turn a photographed grocery receipt into a three-day, zero-waste meal plan.
//!
//! The receipt is read with OCR, the user corrects the text, and one of three
//! LLM providers (Gemini, DeepSeek or OpenAI) proposes breakfast, lunch and
//! dinner for three days using what was bought. The provider's answer is
//! validated into a fixed [`MealPlan`] shape before anyone sees it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! receipt photo
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. OCR        injected engine on a spawned task, streamed progress
//!  ├─ 3. Review     user edits the extracted text
//!  ├─ 4. Provider   one HTTPS call to gemini / deepseek / openai
//!  └─ 5. Normalize  strict JSON → MealPlan, or MalformedPlan with a path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt2plan::pipeline::{input::resolve_input, ocr::{EngineSlot, OcrPipeline}};
//! use receipt2plan::pipeline::tesseract::{TesseractEngine, DEFAULT_TESSERACT_BINARY};
//! use receipt2plan::{JsonFileSettingsStore, PlannerConfig, ProviderGateway, WorkflowController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlannerConfig::default();
//!     let slot = Arc::new(EngineSlot::new());
//!     slot.load(|| TesseractEngine::detect(DEFAULT_TESSERACT_BINARY)).await;
//!
//!     let controller = WorkflowController::new(
//!         OcrPipeline::new(slot, &config),
//!         ProviderGateway::from_config(&config)?,
//!         Arc::new(JsonFileSettingsStore::open_default()),
//!     )?;
//!
//!     let image = resolve_input("receipt.jpg", config.download_timeout_secs).await?;
//!     controller.submit_image(image).await?;
//!     controller.confirm_text().await?;
//!     if let Some(plan) = controller.state().meal_plan {
//!         println!("{}", plan.to_markdown());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt2plan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! receipt2plan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod settings;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PlannerConfig, PlannerConfigBuilder, ProviderConfig, ProviderId};
pub use error::{
    ConfigError, GenerationError, InputError, MalformedPlan, OcrError, SettingsError,
    WorkflowError,
};
pub use output::{DayMeals, DayPlan, MealEntry, MealPlan};
pub use pipeline::normalize::PlanNormalizer;
pub use pipeline::provider::ProviderGateway;
pub use progress::{NoopProgressCallback, ProgressCallback, WorkflowProgressCallback};
pub use settings::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore};
pub use workflow::{Stage, WorkflowController, WorkflowState};
