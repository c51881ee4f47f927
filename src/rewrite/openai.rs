use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use super::{RewriteFuture, RewriteService, instruction};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Rewrite service backed by an OpenAI-compatible chat completions
/// endpoint. Failures are not retried here: the adapter in the parent
/// module degrades to the original text instead.
#[derive(Debug, Clone)]
pub struct OpenAiRewriter {
    key: String,
    model: String,
    base_url: String,
}

impl OpenAiRewriter {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if !base_url.trim().is_empty() {
            self.base_url = base_url;
        }
        self
    }
}

impl RewriteService for OpenAiRewriter {
    fn rewrite(&self, text: &str, target_lang: &str) -> RewriteFuture {
        let client = self.clone();
        let text = text.to_string();
        let target_lang = target_lang.to_string();
        Box::pin(async move { call_chat_completions(&client, &text, &target_lang).await })
    }
}

async fn call_chat_completions(
    rewriter: &OpenAiRewriter,
    text: &str,
    target_lang: &str,
) -> Result<String> {
    let client = reqwest::Client::new();
    let url = format!("{}/chat/completions", rewriter.base_url);

    let body = json!({
        "model": rewriter.model,
        "messages": [
            {"role": "system", "content": instruction(target_lang)},
            {"role": "user", "content": text}
        ]
    });

    let response = client
        .post(&url)
        .bearer_auth(&rewriter.key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    let payload = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "rewrite API error ({}): {}",
            status,
            extract_api_error(&payload).unwrap_or(payload)
        ));
    }
    extract_content(&payload)
}

fn extract_content(payload: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(payload).with_context(|| "failed to parse rewrite response JSON")?;
    let content = parsed
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .ok_or_else(|| anyhow!("no content returned from rewrite service"))?;
    Ok(content.to_string())
}

fn extract_api_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ApiError>,
    }

    #[derive(Deserialize)]
    struct ApiError {
        message: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut parts = Vec::new();
    if let Some(message) = error.message.filter(|value| !value.trim().is_empty()) {
        parts.push(message);
    }
    if let Some(code) = error.code.filter(|value| !value.trim().is_empty()) {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        Some("unknown error".to_string())
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
