//! OpenAI-compatible analyzer backend.
//!
//! Speaks the `/chat/completions` protocol against any OpenAI-compatible
//! server. The model is instructed to reply with a strict JSON document that
//! is parsed into [`CardProposal`]s; replies wrapped in markdown code fences
//! are tolerated because several popular models add them regardless of
//! instructions.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{Analysis, AnalyzerError, AnalyzerGateway, CardProposal, Result};
use crate::config::AnalyzerEndpointConfig;

pub struct OpenAiAnalyzer {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
    request_timeout: Duration,
}

impl From<AnalyzerEndpointConfig> for OpenAiAnalyzer {
    fn from(config: AnalyzerEndpointConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url,
            api_key: config.api_key,
            model: config.model,
            request_timeout: config.request_timeout,
        }
    }
}

fn system_prompt(max_proposals: usize) -> String {
    format!(
        "You turn operational report text into actionable work items. \
         Reply with a single JSON object and nothing else, shaped as: \
         {{\"confidence\": <number between 0 and 1>, \"proposals\": [{{\
         \"title\": <string>, \"summary\": <string, optional>, \
         \"status\": <\"open\"|\"in_progress\"|\"done\", optional>, \
         \"priority\": <\"low\"|\"medium\"|\"high\", optional>, \
         \"due_in_days\": <integer, optional>, \"labels\": [<string>], \
         \"subtasks\": [{{\"title\": <string>, \"description\": <string, optional>}}]}}]}}. \
         Return at most {max_proposals} proposals."
    )
}

/// Strip a leading/trailing markdown code fence from a model reply.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag that follows the opening fence, if any
    let rest = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    model: Option<String>,
    #[serde(default)]
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

/// The JSON document the model is instructed to produce.
#[derive(Debug, Deserialize)]
struct AnalyzerReply {
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    proposals: Vec<CardProposal>,
}

#[async_trait]
impl AnalyzerGateway for OpenAiAnalyzer {
    fn is_available(&self) -> bool {
        true
    }

    async fn analyze(&self, prompt: &str, max_proposals: usize) -> Result<Analysis> {
        let url = format!(
            "{}/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        );
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt(max_proposals) },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.2
        });

        let mut request = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(self.request_timeout);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| AnalyzerError::RequestFailed {
            message: e.to_string(),
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AnalyzerError::RequestFailed {
                message: format!("HTTP {} - Failed to read response body: {}", status, e),
            })?;

        if !status.is_success() {
            return Err(AnalyzerError::RequestFailed {
                message: format!("HTTP {} - {}", status, body),
            });
        }

        let completion: ChatCompletionReply =
            serde_json::from_str(&body).map_err(|e| AnalyzerError::InvalidResponse {
                message: format!("Failed to parse response as JSON: {}. Response body: {}", e, body),
            })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AnalyzerError::InvalidResponse {
                message: "response contained no message content".to_string(),
            })?;

        let reply: AnalyzerReply = serde_json::from_str(strip_code_fences(&content))
            .map_err(|e| AnalyzerError::InvalidResponse {
                message: format!("Failed to parse proposals from model reply: {}", e),
            })?;

        Ok(Analysis {
            model: completion.model.unwrap_or_else(|| self.model.clone()),
            confidence: reply.confidence,
            proposals: reply.proposals,
        })
    }
}
