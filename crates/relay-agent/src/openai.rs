use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use relay_core::config::CompletionConfig;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Client for any OpenAI-compatible `chat/completions` endpoint.
///
/// The default target is OpenRouter; `base_url` and `chat_path` point it
/// elsewhere.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    app_name: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_path(
            api_key,
            base_url.unwrap_or_else(|| "https://openrouter.ai/api".to_string()),
            "/v1/chat/completions".to_string(),
        )
    }

    pub fn with_path(api_key: String, base_url: String, chat_path: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_path,
            app_name: None,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        let mut provider = Self::with_path(
            config.api_key.clone(),
            config.base_url.clone(),
            config.chat_path.clone(),
        );
        provider.app_name = config.app_name.clone();
        provider
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);

        debug!(model = %req.model, turns = req.messages.len(), "sending completion request");

        let mut builder = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(ref title) = self.app_name {
            builder = builder.header("X-Title", title);
        }

        let resp = builder.send().await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // seconds to ms
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "completion API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_resp, &req.model)
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    // System prompt goes first as a regular system message.
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    messages.push(serde_json::json!({
        "role": "system",
        "content": req.system,
    }));

    for m in &req.messages {
        messages.push(serde_json::json!({
            "role": m.role,
            "content": m.content,
        }));
    }

    serde_json::json!({
        "model": req.model,
        "messages": messages,
        "temperature": req.temperature,
        "max_tokens": req.max_tokens,
    })
}

fn parse_response(resp: ApiResponse, requested_model: &str) -> Result<ChatResponse, ProviderError> {
    let Some(choice) = resp.choices.into_iter().next() else {
        return Err(ProviderError::Parse(
            "response contained no choices".to_string(),
        ));
    };

    // Delivered verbatim; trimming is only for the emptiness check.
    let content = choice.message.and_then(|m| m.content).unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }

    let model = if resp.model.is_empty() {
        requested_model.to_string()
    } else {
        resp.model
    };

    Ok(ChatResponse {
        content,
        model,
        tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        tokens_out: resp
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0),
        stop_reason: choice.finish_reason.unwrap_or_default(),
    })
}

// Completion API response types (private, deserialization only).
// Missing fields default so that shape problems surface as
// "no choices" / "empty completion" rather than opaque serde errors.

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::provider::Message;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "openai/gpt-3.5-turbo".to_string(),
            system: "You are a test.".to_string(),
            messages: vec![
                Message::user("alice: hello"),
                Message::assistant("hi alice"),
            ],
            temperature: 0.7,
            max_tokens: 64,
        }
    }

    fn parse(json: &str) -> Result<ChatResponse, ProviderError> {
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        parse_response(api, "fallback-model")
    }

    /// Captured state of the fake completion endpoint.
    #[derive(Default)]
    struct Recorded {
        hits: AtomicUsize,
        body: Mutex<Option<serde_json::Value>>,
        auth: Mutex<Option<String>>,
        title: Mutex<Option<String>>,
    }

    /// Serve a fixed status/body on the chat path of a local port.
    async fn fake_endpoint(status: StatusCode, body: &'static str) -> (String, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let rec = Arc::clone(&recorded);

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(req): Json<serde_json::Value>| {
                let rec = Arc::clone(&rec);
                async move {
                    rec.hits.fetch_add(1, Ordering::SeqCst);
                    *rec.body.lock().unwrap() = Some(req);
                    *rec.auth.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    *rec.title.lock().unwrap() = headers
                        .get("x-title")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    (status, body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), recorded)
    }

    #[test]
    fn request_body_has_system_first_and_sampling_fields() {
        let body = build_request_body(&request());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are a test.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(body["model"], "openai/gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 64);
        assert!(body["temperature"].as_f64().is_some());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn well_formed_response_yields_content() {
        let resp = parse(r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(resp.content, "hi");
        assert_eq!(resp.model, "fallback-model");
    }

    #[test]
    fn content_is_returned_verbatim() {
        let resp =
            parse(r#"{"choices":[{"message":{"content":"\n  - one\n  - two\n"}}]}"#).unwrap();
        assert_eq!(resp.content, "\n  - one\n  - two\n");
    }

    #[test]
    fn empty_choices_is_a_format_error() {
        let err = parse(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn missing_choices_is_a_format_error() {
        let err = parse(r#"{"error":{"message":"upstream"}}"#).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn whitespace_content_is_empty_completion() {
        let err = parse(r#"{"choices":[{"message":{"content":"  \n "}}]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyCompletion));

        let err = parse(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyCompletion));
    }

    #[test]
    fn usage_and_finish_reason_are_read() {
        let resp = parse(
            r#"{"model":"m","choices":[{"message":{"content":" ok "},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(resp.content, " ok ");
        assert_eq!(resp.model, "m");
        assert_eq!(resp.tokens_in, 12);
        assert_eq!(resp.tokens_out, 3);
        assert_eq!(resp.stop_reason, "stop");
    }

    #[tokio::test]
    async fn posts_bearer_authenticated_request() {
        let (base, recorded) =
            fake_endpoint(StatusCode::OK, r#"{"choices":[{"message":{"content":"hi"}}]}"#).await;

        let mut provider = OpenAiProvider::new("sk-test".into(), Some(format!("{base}/")));
        provider.app_name = Some("relay".into());
        let resp = provider.send(&request()).await.unwrap();

        assert_eq!(resp.content, "hi");
        assert_eq!(recorded.hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorded.auth.lock().unwrap().as_deref(),
            Some("Bearer sk-test")
        );
        assert_eq!(recorded.title.lock().unwrap().as_deref(), Some("relay"));
        let body = recorded.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn server_error_is_reported_once() {
        let (base, recorded) =
            fake_endpoint(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").await;

        let provider = OpenAiProvider::new("sk-test".into(), Some(base));
        let err = provider.send(&request()).await.unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(recorded.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_distinct() {
        let (base, _) = fake_endpoint(StatusCode::TOO_MANY_REQUESTS, "slow down").await;

        let provider = OpenAiProvider::new("sk-test".into(), Some(base));
        let err = provider.send(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_ms: 5000 }));
    }

    #[tokio::test]
    async fn non_json_body_is_a_parse_error() {
        let (base, _) = fake_endpoint(StatusCode::OK, "<html>gateway</html>").await;

        let provider = OpenAiProvider::new("sk-test".into(), Some(base));
        let err = provider.send(&request()).await.unwrap_err();
        assert!(err.is_format());
    }
}
