//! Workflow integration tests.
//!
//! The OCR engine and the HTTP transport are replaced by in-process fakes,
//! so these tests run offline and count every request that would have gone
//! over the network.
//!
//! Run with:
//!   cargo test --test workflow

use async_trait::async_trait;
use futures::StreamExt;
use receipt2plan::error::BoxError;
use receipt2plan::pipeline::input::ReceiptImage;
use receipt2plan::pipeline::ocr::{EngineSlot, OcrEngine, OcrEvent, OcrPipeline, ProgressSink};
use receipt2plan::pipeline::provider::{HttpResponse, HttpTransport, ProviderRequest};
use receipt2plan::settings::{KEY_API_KEY, KEY_PROVIDER};
use receipt2plan::{
    GenerationError, MemorySettingsStore, PlannerConfig, ProviderConfig, ProviderGateway,
    ProviderId, Stage, WorkflowController, WorkflowError, WorkflowProgressCallback,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Reports a fixed progress sequence, then returns fixed text.
struct FakeEngine {
    progress: Vec<u8>,
    text: String,
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn recognize(
        &self,
        _image: &ReceiptImage,
        _language: &str,
        progress: &ProgressSink,
    ) -> Result<String, BoxError> {
        for p in &self.progress {
            progress.report(*p);
            tokio::task::yield_now().await;
        }
        Ok(self.text.clone())
    }
}

/// Records requests and replays canned bodies; yields once per call so
/// concurrent callers interleave.
#[derive(Default)]
struct CountingTransport {
    requests: Mutex<Vec<ProviderRequest>>,
    bodies: Mutex<VecDeque<Value>>,
}

impl CountingTransport {
    fn with_bodies(bodies: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            bodies: Mutex::new(bodies.into()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for CountingTransport {
    async fn post_json(&self, request: &ProviderRequest) -> Result<HttpResponse, BoxError> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        let body = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or("no canned response")?;
        Ok(HttpResponse {
            status: 200,
            status_text: "OK".into(),
            body: body.to_string(),
        })
    }
}

#[derive(Default)]
struct PercentRecorder(Mutex<Vec<u8>>);

impl WorkflowProgressCallback for PercentRecorder {
    fn on_ocr_progress(&self, percent: u8) {
        self.0.lock().unwrap().push(percent);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn plan_json(days: usize) -> String {
    let meal = |name: &str| json!({ "name": name, "ingredients_used": ["Milk", "Eggs"] });
    let days: Vec<Value> = (1..=days)
        .map(|n| {
            json!({
                "day": format!("Day {n}"),
                "focus": "Use the dairy first",
                "meals": {
                    "breakfast": meal("Scrambled Eggs"),
                    "lunch": meal("French Toast"),
                    "dinner": meal("Quiche")
                }
            })
        })
        .collect();
    json!({ "pantry_summary": ["Milk", "Eggs", "Bread"], "days": days }).to_string()
}

fn gemini_envelope(text: &str) -> Value {
    json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
}

fn engine(text: &str) -> Arc<FakeEngine> {
    Arc::new(FakeEngine {
        progress: vec![0, 40, 80, 100],
        text: text.to_string(),
    })
}

fn controller(
    engine: Arc<FakeEngine>,
    transport: Arc<CountingTransport>,
    store: MemorySettingsStore,
) -> WorkflowController {
    let config = PlannerConfig::default();
    let ocr = OcrPipeline::new(Arc::new(EngineSlot::ready(engine)), &config);
    let gateway = ProviderGateway::new(&config, transport);
    WorkflowController::new(ocr, gateway, Arc::new(store)).expect("controller")
}

fn receipt() -> ReceiptImage {
    ReceiptImage::from_bytes(b"\xFF\xD8\xFFfake-jpeg".to_vec(), "receipt.jpg")
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scan_edit_and_plan_with_gemini() {
    let transport = CountingTransport::with_bodies(vec![gemini_envelope(&plan_json(3))]);
    let recorder = Arc::new(PercentRecorder::default());
    let ctl = controller(
        engine("Milk $3.99\nEggs $4.50"),
        transport.clone(),
        MemorySettingsStore::new(),
    )
    .with_progress(recorder.clone());

    ctl.submit_image(receipt()).await.unwrap();
    let s = ctl.state();
    assert_eq!(s.stage, Stage::Review);
    assert_eq!(s.extracted_text, "Milk $3.99\nEggs $4.50");

    ctl.edit_text("Milk\nEggs\nBread").unwrap();
    ctl.confirm_text().await.unwrap();

    let s = ctl.state();
    assert_eq!(s.stage, Stage::Plan);
    assert!(!s.is_busy);
    let plan = s.meal_plan.expect("plan");
    assert_eq!(plan.days().len(), 3);
    for item in ["Milk", "Eggs", "Bread"] {
        assert!(plan.pantry_summary().iter().any(|p| p == item), "missing {item}");
    }

    assert_eq!(transport.calls(), 1);
    let req = transport.requests.lock().unwrap()[0].clone();
    let prompt = req.body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.ends_with("Milk\nEggs\nBread"), "edited text must be sent");

    let percents = recorder.0.lock().unwrap().clone();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "got {percents:?}");
}

#[tokio::test]
async fn deepseek_without_key_needs_configuration() {
    let transport = CountingTransport::with_bodies(vec![]);
    let store = MemorySettingsStore::with_values([(KEY_PROVIDER, "deepseek"), (KEY_API_KEY, "")]);
    let ctl = controller(engine("Rice\nBeans"), transport.clone(), store);
    ctl.submit_image(receipt()).await.unwrap();

    let err = ctl.confirm_text().await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Generation(GenerationError::MissingCredential {
            provider: ProviderId::DeepSeek
        })
    ));
    assert!(err.is_configuration_required());
    assert!(err.user_message().to_lowercase().contains("configuration required"));

    let s = ctl.state();
    assert_eq!(s.stage, Stage::Review);
    assert!(!s.is_busy);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn two_day_plan_is_rejected() {
    let transport = CountingTransport::with_bodies(vec![gemini_envelope(&plan_json(2))]);
    let ctl = controller(engine("Milk"), transport.clone(), MemorySettingsStore::new());
    ctl.submit_image(receipt()).await.unwrap();

    let err = ctl.confirm_text().await.unwrap_err();
    match &err {
        WorkflowError::MalformedPlan(m) => assert_eq!(m.path, "days"),
        other => panic!("expected MalformedPlan, got {other:?}"),
    }
    let s = ctl.state();
    assert_eq!(s.stage, Stage::Review);
    assert!(s.meal_plan.is_none());
    assert_eq!(transport.calls(), 1);
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn ocr_stream_is_monotonic_with_one_terminal_event() {
    let fake = Arc::new(FakeEngine {
        progress: vec![5, 3, 50, 50, 150, 99],
        text: "Bread".into(),
    });
    let pipeline = OcrPipeline::new(Arc::new(EngineSlot::ready(fake)), &PlannerConfig::default());
    let events: Vec<OcrEvent> = pipeline.extract_text(receipt()).unwrap().collect().await;

    let (last, progress) = events.split_last().expect("at least one event");
    assert!(matches!(last, OcrEvent::Completed(t) if t == "Bread"));
    assert!(progress.iter().all(|e| !e.is_terminal()));

    let percents: Vec<u8> = progress
        .iter()
        .map(|e| match e {
            OcrEvent::Progress(p) => *p,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(percents, vec![5, 50, 100]);
}

#[tokio::test]
async fn editing_to_same_text_changes_nothing() {
    let ctl = controller(
        engine("Apples\nPears"),
        CountingTransport::with_bodies(vec![]),
        MemorySettingsStore::new(),
    );
    ctl.submit_image(receipt()).await.unwrap();
    let before = ctl.state();
    ctl.edit_text(before.extracted_text.clone()).unwrap();
    assert_eq!(ctl.state(), before);
}

#[tokio::test]
async fn concurrent_confirm_sends_one_request() {
    let transport = CountingTransport::with_bodies(vec![
        gemini_envelope(&plan_json(3)),
        gemini_envelope(&plan_json(3)),
    ]);
    let ctl = controller(engine("Milk"), transport.clone(), MemorySettingsStore::new());
    ctl.submit_image(receipt()).await.unwrap();

    let (first, second) = tokio::join!(ctl.confirm_text(), ctl.confirm_text());
    first.unwrap();
    assert!(matches!(second, Err(WorkflowError::AlreadyInProgress)));
    assert_eq!(transport.calls(), 1);
    assert_eq!(ctl.state().stage, Stage::Plan);
}

#[tokio::test]
async fn settings_change_applies_to_next_generation() {
    let chat = json!({ "choices": [{ "message": { "content": plan_json(3) } }] });
    let transport = CountingTransport::with_bodies(vec![chat]);
    let ctl = controller(engine("Milk"), transport.clone(), MemorySettingsStore::new());
    ctl.submit_image(receipt()).await.unwrap();

    ctl.update_settings(ProviderConfig::new(ProviderId::OpenAI, Some("sk-test".into())))
        .unwrap();
    ctl.confirm_text().await.unwrap();

    let req = transport.requests.lock().unwrap()[0].clone();
    assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
    assert_eq!(req.bearer_token.as_deref(), Some("sk-test"));
    assert_eq!(req.body["model"], "gpt-4o-mini");
}
