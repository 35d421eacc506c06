//! Google Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::provider::{ProviderResponse, SummarizationProvider};
use crate::error::ServiceError;

/// Keeps provider error bodies from flooding logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const PROMPT_HEADER: &str = "Summarize the following text into a structured news summary with headings:
1. Headline / Title
2. Key Events / News Highlights
3. Political Updates
4. Economic Updates
5. International Relations
6. Miscellaneous / Other Important Notes

Use bullet points where appropriate.

Text:
";

pub fn build_prompt(chunk_text: &str) -> String {
    format!("{}{}\n", PROMPT_HEADER, chunk_text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate, trimmed.
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

pub struct GeminiProvider {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        temperature: f32,
        max_output_tokens: u32,
        request_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(concat!("docdigest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            temperature,
            max_output_tokens,
        })
    }

    async fn call(&self, chunk_text: &str) -> Result<Option<String>, ServiceError> {
        let prompt = build_prompt(chunk_text);
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let body: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout
            } else {
                ServiceError::Malformed(e.to_string())
            }
        })?;

        Ok(body.first_text().map(str::to_string))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(err.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}

#[async_trait]
impl SummarizationProvider for GeminiProvider {
    async fn summarize(&self, chunk_text: &str) -> ProviderResponse {
        match self.call(chunk_text).await {
            Ok(Some(text)) => ProviderResponse::Success(text),
            Ok(None) => ProviderResponse::Empty,
            Err(e) => ProviderResponse::ServiceError(e),
        }
    }
}
