//! OpenAI-compatible chat completions over HTTP.

use crate::config::GenerationConfig;
use crate::error::{GenerationError, Result};
use crate::llm::generator::{GenerationRequest, Generator};

use anyhow::Context as _;
use async_trait::async_trait;
use std::time::Duration;

/// Generator backed by a `/v1/chat/completions` endpoint.
pub struct HttpGenerator {
    http_client: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl HttpGenerator {
    /// `None` when no endpoint is configured.
    pub fn from_config(config: &GenerationConfig, timeout: Duration) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Some(Self {
            http_client,
            completions_url: completions_url(endpoint),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }))
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": request.style.temperature(),
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn model_tag(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>> {
        let mut request_builder = self
            .http_client
            .post(&self.completions_url)
            .header("content-type", "application/json");
        if let Some(api_key) = &self.api_key {
            request_builder = request_builder.header("authorization", format!("Bearer {api_key}"));
        }

        let response = request_builder
            .json(&self.body(request))
            .send()
            .await
            .map_err(|error| GenerationError::Request(error.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|error| GenerationError::Request(format!("failed to read body: {error}")))?;

        if !status.is_success() {
            return Err(GenerationError::Request(format!(
                "{status}: {}",
                truncate_body(&response_text)
            ))
            .into());
        }

        let body: serde_json::Value = serde_json::from_str(&response_text).map_err(|error| {
            GenerationError::MalformedResponse(format!(
                "not valid JSON: {error}: {}",
                truncate_body(&response_text)
            ))
        })?;
        parse_completion(&body).map_err(Into::into)
    }
}

/// Accept either a base URL or the full completions URL.
fn completions_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with("/chat/completions") {
        endpoint.to_string()
    } else if endpoint.ends_with("/v1") {
        format!("{endpoint}/chat/completions")
    } else {
        format!("{endpoint}/v1/chat/completions")
    }
}

/// First choice's message content. Empty content is `None`, a missing
/// `choices` array is malformed.
fn parse_completion(body: &serde_json::Value) -> std::result::Result<Option<String>, GenerationError> {
    let choices = body["choices"].as_array().ok_or_else(|| {
        GenerationError::MalformedResponse(format!("no choices in {}", truncate_body(&body.to_string())))
    })?;
    let content = choices
        .first()
        .and_then(|choice| choice["message"]["content"].as_str())
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string);
    Ok(content)
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let cut: String = body.chars().take(LIMIT).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StyleHints;

    #[test]
    fn url_normalization() {
        assert_eq!(completions_url("http://localhost:8080"), "http://localhost:8080/v1/chat/completions");
        assert_eq!(completions_url("http://h/v1/"), "http://h/v1/chat/completions");
        assert_eq!(
            completions_url("https://h/v1/chat/completions"),
            "https://h/v1/chat/completions"
        );
    }

    #[test]
    fn parses_first_choice() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": " Привет! " } }]
        });
        assert_eq!(parse_completion(&body).unwrap().as_deref(), Some("Привет!"));

        let empty = serde_json::json!({ "choices": [{ "message": { "content": "" } }] });
        assert_eq!(parse_completion(&empty).unwrap(), None);

        let no_choices = serde_json::json!({ "choices": [] });
        assert_eq!(parse_completion(&no_choices).unwrap(), None);
    }

    #[test]
    fn missing_choices_is_malformed() {
        let body = serde_json::json!({ "error": { "message": "nope" } });
        assert!(matches!(
            parse_completion(&body),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn no_endpoint_means_no_generator() {
        let config = GenerationConfig::default();
        assert!(HttpGenerator::from_config(&config, Duration::from_secs(5)).unwrap().is_none());
    }

    #[test]
    fn request_body_carries_prompts_and_temperature() {
        let config = GenerationConfig {
            endpoint: Some("http://localhost:1".into()),
            ..GenerationConfig::default()
        };
        let generator = HttpGenerator::from_config(&config, Duration::from_secs(5))
            .unwrap()
            .unwrap();
        let body = generator.body(&GenerationRequest {
            system_prompt: "sys".into(),
            user_prompt: "hi".into(),
            style: StyleHints::default(),
        });
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body["temperature"].as_f64().is_some());
    }
}
