//! Error types for the receipt2plan library.
//!
//! Each stage owns its own error type so the workflow controller can tell a
//! credential problem from a network problem from a malformed plan:
//!
//! * [`OcrError`] — the OCR engine was not ready or recognition failed.
//! * [`GenerationError`] — the provider could not be reached or refused the call.
//! * [`MalformedPlan`] — the provider answered, but not with a usable plan.
//! * [`WorkflowError`] — what the controller returns; wraps the above and adds
//!   the state-machine rejections (busy, wrong stage, empty text).
//!
//! Nothing in this crate is fatal to the process. Every error is recovered at
//! the [`crate::workflow::WorkflowController`] boundary, which leaves its state
//! untouched and hands the error back to the caller.

use crate::config::ProviderId;
use crate::workflow::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used to carry an engine's own failure as a `#[source]`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the OCR stage.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine has not finished loading yet. Submissions are never queued.
    #[error("OCR engine is still loading. Please wait a moment and try again.")]
    EngineNotReady,

    /// The engine failed to load; it stays unavailable for this process.
    #[error("OCR engine is unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// The engine raised an error while recognising the image.
    #[error("Failed to read receipt: {source}")]
    RecognitionFailed {
        #[source]
        source: BoxError,
    },

    /// Recognition finished but found no text.
    #[error("No text detected in image")]
    NoTextDetected,
}

impl OcrError {
    /// Wrap any engine error as [`OcrError::RecognitionFailed`].
    pub fn recognition(source: impl Into<BoxError>) -> Self {
        OcrError::RecognitionFailed {
            source: source.into(),
        }
    }
}

/// Failures of the provider gateway.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The selected provider needs an API key and none is configured.
    #[error("Provider '{provider}' requires an API key.\nAdd one in the settings before generating a plan.")]
    MissingCredential { provider: ProviderId },

    /// Non-2xx status, transport failure or timeout.
    #[error("Provider '{provider}' is unavailable: {message}")]
    ProviderUnavailable { provider: ProviderId, message: String },

    /// The provider answered 2xx but the envelope held no plan text.
    #[error("Empty response from provider '{provider}'")]
    EmptyResponse { provider: ProviderId },
}

/// The provider's output could not be turned into a [`crate::output::MealPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed meal plan at '{path}': {reason}")]
pub struct MalformedPlan {
    /// Path to the offending field, e.g. `days[1].meals.lunch.name`.
    /// `$` denotes the document root.
    pub path: String,
    pub reason: String,
}

impl MalformedPlan {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reading or writing the persisted settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file '{path}' is not valid JSON: {detail}")]
    Parse { path: PathBuf, detail: String },
}

/// Failures resolving a user-supplied receipt image path or URL.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },
}

/// Builder validation failures for [`crate::config::PlannerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Everything the workflow controller can reject or report.
///
/// Whatever the variant, the controller's state is left exactly as it was
/// before the call, apart from the busy flag which is always cleared.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Another OCR or generation call is still in flight.
    #[error("Another operation is already in progress")]
    AlreadyInProgress,

    /// The action is not valid in the current stage.
    #[error("Cannot {action} while in the {stage} stage")]
    InvalidTransition { action: &'static str, stage: Stage },

    /// The receipt text is empty (or whitespace only).
    #[error("Receipt text is empty")]
    EmptyText,

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    MalformedPlan(#[from] MalformedPlan),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl WorkflowError {
    /// True when the user must fix the provider settings before retrying.
    pub fn is_configuration_required(&self) -> bool {
        matches!(
            self,
            WorkflowError::Generation(GenerationError::MissingCredential { .. })
        )
    }

    /// A message suitable for showing to the person using the app.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::AlreadyInProgress => {
                "Still working on the previous request. Please wait.".to_string()
            }
            WorkflowError::InvalidTransition { action, stage } => {
                format!("You can't {action} from the {stage} step.")
            }
            WorkflowError::EmptyText => {
                "The receipt text is empty. Add the items you bought first.".to_string()
            }
            WorkflowError::Ocr(OcrError::EngineNotReady) => {
                "OCR engine is still loading. Please wait a moment.".to_string()
            }
            WorkflowError::Ocr(OcrError::EngineUnavailable { .. }) => {
                "The OCR engine could not be loaded. Restart the app to try again.".to_string()
            }
            WorkflowError::Ocr(OcrError::NoTextDetected) => {
                "No text was found on the receipt. Please try a clearer image.".to_string()
            }
            WorkflowError::Ocr(OcrError::RecognitionFailed { .. }) => {
                "Failed to read receipt. Please try a clearer image.".to_string()
            }
            WorkflowError::Generation(GenerationError::MissingCredential { provider }) => {
                format!("Configuration required: add your {provider} API key in the settings.")
            }
            WorkflowError::Generation(GenerationError::ProviderUnavailable {
                provider,
                message,
            }) => format!("Generation failed: could not reach {provider}: {message}"),
            WorkflowError::Generation(GenerationError::EmptyResponse { provider }) => {
                format!("Generation failed: {provider} returned an empty response.")
            }
            WorkflowError::MalformedPlan(m) => format!(
                "Generation failed: the AI returned a plan we could not read ({}: {}).",
                m.path, m.reason
            ),
            WorkflowError::Settings(e) => format!("Could not save settings: {e}"),
        }
    }
}
