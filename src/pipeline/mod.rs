//! Pipeline stages for receipt-to-plan generation.
//!
//! Each submodule implements one step. The [`crate::workflow`] controller
//! strings them together and owns the state between steps.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ocr ──▶ (user review) ──▶ provider ──▶ normalize
//! (path/URL)  (engine)                 (LLM call)    (MealPlan)
//! ```
//!
//! 1. [`input`]     — load the receipt photo from a local path or URL
//! 2. [`ocr`]       — run the injected [`ocr::OcrEngine`] on a spawned task and
//!    stream progress; [`tesseract`] is the stock engine
//! 3. [`provider`]  — send the reviewed text to Gemini, DeepSeek or OpenAI;
//!    the only stage that talks to an LLM
//! 4. [`normalize`] — validate the provider's JSON into a three-day plan

pub mod input;
pub mod normalize;
pub mod ocr;
pub mod provider;
pub mod tesseract;
