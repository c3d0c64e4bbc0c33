//! Provider gateway: one request/response contract over three LLM backends.
//!
//! Each backend is a [`Provider`] strategy that knows how to wrap the prompt
//! in its request envelope and where to find the plan text in its response.
//! The gateway picks the strategy from [`ProviderConfig::provider_id`], checks
//! the credential precondition, sends the request through an
//! [`HttpTransport`] and maps failures to [`GenerationError`].
//!
//! | Provider | Auth | Plan text at |
//! |----------|------|--------------|
//! | Gemini   | `?key=` query parameter, optional | `candidates[0].content.parts[0].text` |
//! | DeepSeek | `Authorization: Bearer`, required | `choices[0].message.content` |
//! | OpenAI   | `Authorization: Bearer`, required | `choices[0].message.content` |
//!
//! The system prompt is identical for all three ([`crate::prompts`]).
//!
//! ## No retries
//!
//! A failed call is returned immediately. Retrying is a user decision made
//! at the workflow level, never something the gateway does on its own.

use crate::config::{PlannerConfig, ProviderConfig, ProviderId};
use crate::error::{BoxError, ConfigError, GenerationError};
use crate::prompts::{combined_prompt, user_message, SYSTEM_PROMPT};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Wire types ───────────────────────────────────────────────────────────

/// A fully-built provider request.
#[derive(Clone)]
pub struct ProviderRequest {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer_token: Option<String>,
    pub body: Value,
}

impl ProviderRequest {
    /// The URL with any query string (which may carry a key) masked.
    pub fn redacted_url(&self) -> String {
        match self.url.split_once('?') {
            Some((base, _)) => format!("{base}?<redacted>"),
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("url", &self.redacted_url())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("body", &self.body)
            .finish()
    }
}

/// What came back over the wire, whatever the status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase, e.g. "Bad Request".
    pub status_text: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a JSON POST. Implemented over reqwest by [`ReqwestTransport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Errors are transport-level only (DNS, TLS, timeout); any HTTP status
    /// is returned as an `HttpResponse`.
    async fn post_json(&self, request: &ProviderRequest) -> Result<HttpResponse, BoxError>;
}

/// [`HttpTransport`] using a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, request: &ProviderRequest) -> Result<HttpResponse, BoxError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        // `without_url` keeps a Gemini key in the query string out of messages.
        let response = builder.send().await.map_err(|e| -> BoxError {
            if e.is_timeout() {
                format!("request timed out after {}s", self.timeout_secs).into()
            } else {
                Box::new(e.without_url())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| -> BoxError { Box::new(e.without_url()) })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

// ── Provider strategies ──────────────────────────────────────────────────

/// One backend's request envelope and response layout.
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Wrap `receipt_text` in this provider's request envelope.
    fn build_request(
        &self,
        config: &ProviderConfig,
        receipt_text: &str,
    ) -> Result<ProviderRequest, GenerationError>;

    /// Pull the plan text out of a successful response body.
    fn parse_response(&self, raw: &str) -> Result<String, GenerationError>;

    /// Message for a non-2xx status when the body carries no `error.message`.
    fn status_message(&self, status: u16, status_text: &str) -> String {
        format!("API Error {status}: {status_text}")
    }

    /// Message for a non-2xx response, preferring the provider's own.
    fn failure_message(&self, response: &HttpResponse) -> String {
        serde_json::from_str::<Value>(&response.body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.status_message(response.status, &response.status_text))
    }
}

/// Text at `pointer` in a JSON body, if present and non-empty.
fn extract_text(raw: &str, pointer: &str) -> Option<String> {
    let v: Value = serde_json::from_str(raw).ok()?;
    v.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Google Gemini `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    endpoint: String,
    model: String,
    default_key: Option<String>,
}

impl GeminiProvider {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            endpoint: config.gemini_endpoint.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            default_key: config.gemini_default_key.clone(),
        }
    }
}

impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn build_request(
        &self,
        config: &ProviderConfig,
        receipt_text: &str,
    ) -> Result<ProviderRequest, GenerationError> {
        let mut url = reqwest::Url::parse(&format!(
            "{}/{}:generateContent",
            self.endpoint, self.model
        ))
        .map_err(|e| GenerationError::ProviderUnavailable {
            provider: ProviderId::Gemini,
            message: format!("invalid endpoint: {e}"),
        })?;

        let key = config.api_key().or(self.default_key.as_deref());
        match key {
            Some(key) => {
                url.query_pairs_mut().append_pair("key", key);
            }
            None => debug!("Gemini request sent without an API key"),
        }

        Ok(ProviderRequest {
            url: url.to_string(),
            bearer_token: None,
            body: json!({
                "contents": [{ "parts": [{ "text": combined_prompt(receipt_text) }] }],
                "generationConfig": { "responseMimeType": "application/json" }
            }),
        })
    }

    fn parse_response(&self, raw: &str) -> Result<String, GenerationError> {
        extract_text(raw, "/candidates/0/content/parts/0/text").ok_or(
            GenerationError::EmptyResponse {
                provider: ProviderId::Gemini,
            },
        )
    }

    fn status_message(&self, _status: u16, status_text: &str) -> String {
        format!("Gemini API Error: {status_text}")
    }
}

/// OpenAI-style `chat/completions`, used by both DeepSeek and OpenAI.
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    id: ProviderId,
    endpoint: String,
    model: String,
}

impl ChatCompletionsProvider {
    pub fn deepseek(config: &PlannerConfig) -> Self {
        Self {
            id: ProviderId::DeepSeek,
            endpoint: config.deepseek_endpoint.clone(),
            model: config.deepseek_model.clone(),
        }
    }

    pub fn openai(config: &PlannerConfig) -> Self {
        Self {
            id: ProviderId::OpenAI,
            endpoint: config.openai_endpoint.clone(),
            model: config.openai_model.clone(),
        }
    }
}

impl Provider for ChatCompletionsProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn build_request(
        &self,
        config: &ProviderConfig,
        receipt_text: &str,
    ) -> Result<ProviderRequest, GenerationError> {
        let key = config
            .api_key()
            .ok_or(GenerationError::MissingCredential { provider: self.id })?;

        Ok(ProviderRequest {
            url: self.endpoint.clone(),
            bearer_token: Some(key.to_string()),
            body: json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": user_message(receipt_text) }
                ],
                "response_format": { "type": "json_object" }
            }),
        })
    }

    fn parse_response(&self, raw: &str) -> Result<String, GenerationError> {
        extract_text(raw, "/choices/0/message/content")
            .ok_or(GenerationError::EmptyResponse { provider: self.id })
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

/// Routes a generation request to the selected provider.
#[derive(Clone)]
pub struct ProviderGateway {
    transport: Arc<dyn HttpTransport>,
    gemini: GeminiProvider,
    deepseek: ChatCompletionsProvider,
    openai: ChatCompletionsProvider,
}

impl ProviderGateway {
    pub fn new(config: &PlannerConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            gemini: GeminiProvider::new(config),
            deepseek: ChatCompletionsProvider::deepseek(config),
            openai: ChatCompletionsProvider::openai(config),
        }
    }

    /// Gateway over a real HTTPS client with `config.api_timeout_secs`.
    pub fn from_config(config: &PlannerConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(config.api_timeout_secs)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn provider(&self, id: ProviderId) -> &dyn Provider {
        match id {
            ProviderId::Gemini => &self.gemini,
            ProviderId::DeepSeek => &self.deepseek,
            ProviderId::OpenAI => &self.openai,
        }
    }

    /// Fail fast when the selected provider needs a key and has none.
    pub fn check_credentials(&self, config: &ProviderConfig) -> Result<(), GenerationError> {
        if config.provider_id.requires_api_key() && config.api_key().is_none() {
            return Err(GenerationError::MissingCredential {
                provider: config.provider_id,
            });
        }
        Ok(())
    }

    /// Send `receipt_text` to the configured provider and return the raw plan
    /// text it produced. Exactly one network call, or none if the
    /// credential check fails.
    pub async fn generate_plan(
        &self,
        config: &ProviderConfig,
        receipt_text: &str,
    ) -> Result<String, GenerationError> {
        self.check_credentials(config)?;
        let provider = self.provider(config.provider_id);
        let id = provider.id();
        let request = provider.build_request(config, receipt_text)?;

        info!("Requesting meal plan from {} ({})", id, request.redacted_url());

        let response = self.transport.post_json(&request).await.map_err(|e| {
            warn!("{}: transport error: {}", id, e);
            GenerationError::ProviderUnavailable {
                provider: id,
                message: e.to_string(),
            }
        })?;

        if !response.is_success() {
            let message = provider.failure_message(&response);
            warn!("{}: HTTP {}: {}", id, response.status, message);
            return Err(GenerationError::ProviderUnavailable {
                provider: id,
                message,
            });
        }

        let text = provider.parse_response(&response.body)?;
        debug!("{}: received {} bytes of plan text", id, text.len());
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that records requests and replays canned responses.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub requests: Mutex<Vec<ProviderRequest>>,
        pub responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
    }

    impl RecordingTransport {
        pub fn replying(responses: Vec<Result<HttpResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
            })
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn post_json(&self, request: &ProviderRequest) -> Result<HttpResponse, BoxError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no canned response".to_string()))
                .map_err(BoxError::from)
        }
    }

    pub fn ok(body: Value) -> Result<HttpResponse, String> {
        Ok(HttpResponse {
            status: 200,
            status_text: "OK".into(),
            body: body.to_string(),
        })
    }

    pub fn status(status: u16, status_text: &str, body: &str) -> Result<HttpResponse, String> {
        Ok(HttpResponse {
            status,
            status_text: status_text.into(),
            body: body.into(),
        })
    }

    pub fn gemini_body(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    pub fn chat_body(text: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn gateway(transport: Arc<RecordingTransport>) -> ProviderGateway {
        let config = PlannerConfig::builder()
            .gemini_endpoint("https://gemini.test/v1beta/models")
            .deepseek_endpoint("https://deepseek.test/chat/completions")
            .openai_endpoint("https://openai.test/v1/chat/completions")
            .build()
            .unwrap();
        ProviderGateway::new(&config, transport)
    }

    #[tokio::test]
    async fn gemini_request_shape_and_extraction() {
        let t = RecordingTransport::replying(vec![ok(gemini_body("{\"days\":[]}"))]);
        let gw = gateway(t.clone());
        let cfg = ProviderConfig::new(ProviderId::Gemini, Some("g-key".into()));

        let text = gw.generate_plan(&cfg, "Milk").await.unwrap();
        assert_eq!(text, "{\"days\":[]}");

        let req = t.requests.lock().unwrap()[0].clone();
        assert!(req.url.starts_with(
            "https://gemini.test/v1beta/models/gemini-2.5-flash-preview-09-2025:generateContent?"
        ));
        assert!(req.url.ends_with("key=g-key"));
        assert!(req.bearer_token.is_none());
        assert_eq!(
            req.body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let prompt = req.body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.ends_with("Milk"));
    }

    #[tokio::test]
    async fn gemini_without_any_key_omits_query() {
        let t = RecordingTransport::replying(vec![ok(gemini_body("x"))]);
        let gw = gateway(t.clone());
        gw.generate_plan(&ProviderConfig::default(), "Milk").await.unwrap();
        let url = t.requests.lock().unwrap()[0].url.clone();
        assert!(!url.contains("key="), "got: {url}");
    }

    #[tokio::test]
    async fn gemini_falls_back_to_default_key() {
        let config = PlannerConfig::builder()
            .gemini_default_key("shared-key")
            .build()
            .unwrap();
        let t = RecordingTransport::replying(vec![ok(gemini_body("x"))]);
        let gw = ProviderGateway::new(&config, t.clone());
        gw.generate_plan(&ProviderConfig::new(ProviderId::Gemini, None), "Milk")
            .await
            .unwrap();
        assert!(t.requests.lock().unwrap()[0].url.ends_with("key=shared-key"));
    }

    #[tokio::test]
    async fn chat_providers_share_prompt_and_use_bearer() {
        for (id, url, model) in [
            (ProviderId::DeepSeek, "https://deepseek.test/chat/completions", "deepseek-chat"),
            (ProviderId::OpenAI, "https://openai.test/v1/chat/completions", "gpt-4o-mini"),
        ] {
            let t = RecordingTransport::replying(vec![ok(chat_body("{}"))]);
            let gw = gateway(t.clone());
            let cfg = ProviderConfig::new(id, Some("sk-1".into()));
            assert_eq!(gw.generate_plan(&cfg, "Eggs").await.unwrap(), "{}");

            let req = t.requests.lock().unwrap()[0].clone();
            assert_eq!(req.url, url);
            assert_eq!(req.bearer_token.as_deref(), Some("sk-1"));
            assert_eq!(req.body["model"], model);
            assert_eq!(req.body["messages"][0]["role"], "system");
            assert_eq!(req.body["messages"][0]["content"], SYSTEM_PROMPT);
            assert_eq!(req.body["messages"][1]["role"], "user");
            assert_eq!(
                req.body["messages"][1]["content"],
                "Here is the receipt text: \n\nEggs"
            );
            assert_eq!(req.body["response_format"]["type"], "json_object");
        }
    }

    #[tokio::test]
    async fn missing_key_makes_no_network_call() {
        for id in [ProviderId::DeepSeek, ProviderId::OpenAI] {
            let t = RecordingTransport::replying(vec![]);
            let gw = gateway(t.clone());
            let err = gw
                .generate_plan(&ProviderConfig::new(id, Some("  ".into())), "Milk")
                .await
                .unwrap_err();
            assert!(matches!(err, GenerationError::MissingCredential { provider } if provider == id));
            assert_eq!(t.calls(), 0);
        }
    }

    #[tokio::test]
    async fn non_2xx_uses_provider_error_message() {
        let t = RecordingTransport::replying(vec![status(
            401,
            "Unauthorized",
            r#"{"error":{"message":"Incorrect API key provided"}}"#,
        )]);
        let gw = gateway(t.clone());
        let err = gw
            .generate_plan(&ProviderConfig::new(ProviderId::OpenAI, Some("bad".into())), "x")
            .await
            .unwrap_err();
        match err {
            GenerationError::ProviderUnavailable { message, .. } => {
                assert_eq!(message, "Incorrect API key provided")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn non_2xx_without_json_uses_status_text() {
        let t = RecordingTransport::replying(vec![
            status(503, "Service Unavailable", "<html>down</html>"),
            status(500, "Internal Server Error", ""),
        ]);
        let gw = gateway(t.clone());

        let err = gw
            .generate_plan(&ProviderConfig::default(), "x")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, GenerationError::ProviderUnavailable { message, .. } if message == "Gemini API Error: Service Unavailable"),
            "got {err:?}"
        );

        let err = gw
            .generate_plan(&ProviderConfig::new(ProviderId::DeepSeek, Some("k".into())), "x")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, GenerationError::ProviderUnavailable { message, .. } if message == "API Error 500: Internal Server Error"),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn transport_error_is_provider_unavailable_without_retry() {
        let t = RecordingTransport::replying(vec![Err("connection refused".into())]);
        let gw = gateway(t.clone());
        let err = gw
            .generate_plan(&ProviderConfig::default(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ProviderUnavailable { ref message, .. } if message.contains("connection refused")));
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn empty_envelope_is_empty_response() {
        let t = RecordingTransport::replying(vec![
            ok(json!({ "candidates": [] })),
            ok(chat_body("   ")),
        ]);
        let gw = gateway(t.clone());
        let err = gw
            .generate_plan(&ProviderConfig::default(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse { provider: ProviderId::Gemini }));

        let err = gw
            .generate_plan(&ProviderConfig::new(ProviderId::OpenAI, Some("k".into())), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse { provider: ProviderId::OpenAI }));
    }

    #[test]
    fn request_debug_hides_secrets() {
        let req = ProviderRequest {
            url: "https://gemini.test/m:generateContent?key=secret".into(),
            bearer_token: Some("sk-secret".into()),
            body: json!({}),
        };
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("secret\""), "got: {dbg}");
        assert!(!dbg.contains("key=secret"));
        assert!(!dbg.contains("sk-secret"));
    }
}
