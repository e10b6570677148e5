//! OpenAI-compatible chat-completions backend with strict JSON-schema output.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{GenerationRequest, GenerationService};
use crate::error::{PipelineError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: Value,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

pub struct OpenAiService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Generation(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// User turn: prompt text, file references, then image parts.
fn user_content(req: &GenerationRequest) -> Value {
    let mut text = req.prompt.clone();
    if !req.file_urls.is_empty() {
        text.push_str("\n\nReference files:");
        for url in &req.file_urls {
            text.push_str("\n- ");
            text.push_str(url);
        }
    }
    let mut parts = vec![json!({ "type": "text", "text": text })];
    for url in &req.image_urls {
        parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
    }
    Value::Array(parts)
}

fn build_body(req: &GenerationRequest) -> ChatRequest {
    ChatRequest {
        model: req.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system",
                content: Value::String(req.system.clone()),
            },
            ChatMessage {
                role: "user",
                content: user_content(req),
            },
        ],
        response_format: json!({
            "type": "json_schema",
            "json_schema": {
                "name": req.schema.name,
                "schema": req.schema.schema,
                "strict": true
            }
        }),
        temperature: 0.7,
    }
}

fn map_http_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Generation(format!("request timeout: {err}"))
    } else if err.is_connect() {
        PipelineError::Generation(format!("connection error: {err}"))
    } else {
        PipelineError::Generation(format!("HTTP error: {err}"))
    }
}

fn parse_choice(resp: ChatResponse) -> Result<Value> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Generation("no choices in response".into()))?;
    if let Some(refusal) = choice.message.refusal {
        return Err(PipelineError::ContentSafety(refusal));
    }
    if choice.finish_reason.as_deref() == Some("length") {
        return Err(PipelineError::validation("response was cut off at the token limit"));
    }
    let content = choice
        .message
        .content
        .ok_or_else(|| PipelineError::Generation("empty message content".into()))?;
    let value: Value = serde_json::from_str(&content)?;
    if !value.is_object() {
        return Err(PipelineError::validation("response is not a JSON object"));
    }
    Ok(value)
}

#[async_trait]
impl GenerationService for OpenAiService {
    async fn generate(&self, request: GenerationRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_body(&request);

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await.map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, schema = request.schema.name, "generation service rejected request");
            return Err(PipelineError::Generation(format!("status {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Generation(format!("failed to parse response: {e}")))?;
        parse_choice(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::schema;

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "gpt-x".into(),
            system: "sys".into(),
            prompt: "make titles".into(),
            image_urls: vec!["https://img/a.png".into()],
            file_urls: vec!["https://files/a.pdf".into()],
            schema: schema::titles_schema(),
        }
    }

    #[test]
    fn body_carries_strict_schema_and_attachments() {
        let body = serde_json::to_value(build_body(&request())).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "unit_titles");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert!(parts[0]["text"].as_str().unwrap().contains("https://files/a.pdf"));
        assert_eq!(parts[1]["image_url"]["url"], "https://img/a.png");
    }

    #[test]
    fn refusal_maps_to_content_safety() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": null, "refusal": "cannot help" } }]
        }))
        .unwrap();
        assert!(matches!(parse_choice(resp), Err(PipelineError::ContentSafety(_))));
    }

    #[test]
    fn content_must_be_a_json_object() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "[1,2]" }, "finish_reason": "stop" }]
        }))
        .unwrap();
        assert!(matches!(parse_choice(resp), Err(PipelineError::Validation(_))));

        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "{\"title\":\"t\",\"description\":\"d\"}" } }]
        }))
        .unwrap();
        assert_eq!(parse_choice(resp).unwrap()["title"], "t");
    }
}
