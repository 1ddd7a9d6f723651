//! OpenAI-compatible remote sentiment classifier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::local::truncate_at_token_boundary;
use super::{
    ClassifierError, ClassifierFuture, ClassifierMetadata, SentimentClassifier, SentimentLabel,
    SentimentScore, TokenUsage,
};
use crate::config::{ClassifierBackend, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Longest input sent, in whitespace tokens.
const MAX_INPUT_TOKENS: usize = 2048;

/// Upper bound on the verdict's length.
const MAX_OUTPUT_TOKENS: u32 = 60;

/// Concurrent requests that stay well inside typical rate limits.
const REMOTE_CONCURRENCY: usize = 4;

const SYSTEM_PROMPT: &str = "You classify the emotional tone of software engineering text: \
commit messages, code comments and identifiers. Reply with a JSON object only, of the form \
{\"label\": \"POSITIVE\" | \"NEUTRAL\" | \"NEGATIVE\", \"confidence\": <number from 0 to 1>}. \
Routine technical wording without emotion is NEUTRAL.";

/// USD prices per million tokens, as (model prefix, prompt, completion).
///
/// Longer prefixes are listed first so dated snapshots match their family.
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
];

/// Token usage with an estimated price.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostInfo {
    /// Model the usage was billed against.
    pub model: String,
    /// Tokens sent.
    pub prompt_tokens: u64,
    /// Tokens generated.
    pub completion_tokens: u64,
    /// Sum of both.
    pub tokens_used: u64,
    /// Estimated USD cost; `None` for models without a known price.
    pub estimated_cost_usd: Option<f64>,
}

/// Estimates the USD cost of a model's token usage.
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> Option<f64> {
    PRICES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, prompt, completion)| {
            (prompt_tokens as f64 * prompt + completion_tokens as f64 * completion) / 1_000_000.0
        })
}

#[derive(Serialize, Debug)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize, Debug)]
struct Verdict {
    label: String,
    confidence: f64,
}

/// Builder for [`OpenAiClassifier`].
pub struct OpenAiClassifierBuilder {
    model: String,
    api_key: String,
    api_base: String,
    organization: Option<String>,
    timeout: Duration,
}

impl OpenAiClassifierBuilder {
    /// Sets the service base URL.
    pub fn api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    /// Sets the organization sent with every request.
    pub fn organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|org| !org.trim().is_empty());
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Validates the settings and creates the classifier.
    pub fn build(self) -> Result<OpenAiClassifier, ClassifierError> {
        if self.api_key.trim().is_empty() {
            return Err(ClassifierError::ClassifierUnavailable(
                "API key is empty".to_string(),
            ));
        }

        let endpoint = chat_completions_url(&self.api_base)?;
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                ClassifierError::ClassifierUnavailable(format!("Failed to build HTTP client: {e}"))
            })?;

        debug!(endpoint = %endpoint, model = %self.model, "Created remote classifier");

        Ok(OpenAiClassifier {
            client,
            endpoint,
            api_key: self.api_key,
            organization: self.organization,
            model: self.model,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }
}

/// Resolves `<base>/v1/chat/completions`, rejecting anything but http(s).
fn chat_completions_url(api_base: &str) -> Result<Url, ClassifierError> {
    let invalid = |reason: String| {
        ClassifierError::ClassifierUnavailable(format!("invalid API base URL {api_base}: {reason}"))
    };

    let mut base = Url::parse(api_base.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", base.scheme())));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("v1/chat/completions")
        .map_err(|e| invalid(e.to_string()))
}

/// Classifier backed by an OpenAI-compatible chat completions API.
///
/// Token usage accumulates for the lifetime of the instance.
pub struct OpenAiClassifier {
    client: Client,
    endpoint: Url,
    api_key: String,
    organization: Option<String>,
    model: String,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl OpenAiClassifier {
    /// Starts building a classifier for `model`.
    pub fn builder(model: impl Into<String>, api_key: impl Into<String>) -> OpenAiClassifierBuilder {
        OpenAiClassifierBuilder {
            model: model.into(),
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            organization: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// The resolved chat completions endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn record_usage(&self, usage: &Usage) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    fn current_usage(&self) -> TokenUsage {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    async fn request(&self, text: &str) -> Result<SentimentScore, ClassifierError> {
        let text = truncate_at_token_boundary(text, MAX_INPUT_TOKENS);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
            max_tokens: MAX_OUTPUT_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            stream: false,
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(response).await);
        }

        let raw = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| ClassifierError::InvalidResponseFormat(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            self.record_usage(usage);
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ClassifierError::InvalidResponseFormat("No choices in response".to_string())
            })?;
        parse_verdict(&content)
    }
}

/// Maps a non-success response onto the error taxonomy.
async fn error_for_status(response: reqwest::Response) -> ClassifierError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_else(|e| {
        debug!("Failed to read error response body: {e}");
        String::new()
    });

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(?retry_after, "Classifier rate limited");
            ClassifierError::RateLimited { retry_after }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ClassifierError::ClassifierUnavailable(format!("HTTP {status}: {body}"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClassifierError::Timeout,
        _ => ClassifierError::ApiRequestFailed(format!("HTTP {status}: {body}")),
    }
}

/// Reads a delay-seconds `Retry-After` value.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Extracts the verdict object from the model's reply.
///
/// Replies occasionally wrap the JSON in a code fence or prose, so the
/// outermost braces are located first.
fn parse_verdict(content: &str) -> Result<SentimentScore, ClassifierError> {
    let invalid = || {
        ClassifierError::InvalidResponseFormat(format!("unexpected classifier reply: {content}"))
    };

    let start = content.find('{').ok_or_else(invalid)?;
    let end = content.rfind('}').ok_or_else(invalid)?;
    if end < start {
        return Err(invalid());
    }

    let verdict: Verdict = serde_json::from_str(&content[start..=end]).map_err(|_| invalid())?;
    let label = SentimentLabel::parse(&verdict.label).ok_or_else(invalid)?;
    if !verdict.confidence.is_finite() {
        return Err(invalid());
    }
    Ok(SentimentScore::new(label, verdict.confidence))
}

impl SentimentClassifier for OpenAiClassifier {
    fn score<'a>(&'a self, text: &'a str) -> ClassifierFuture<'a, SentimentScore> {
        Box::pin(async move {
            debug!(model = %self.model, text_len = text.len(), "Scoring text remotely");
            self.request(text).await
        })
    }

    fn metadata(&self) -> ClassifierMetadata {
        ClassifierMetadata {
            backend: ClassifierBackend::Remote,
            model: self.model.clone(),
            max_input_tokens: MAX_INPUT_TOKENS,
            recommended_concurrency: REMOTE_CONCURRENCY,
        }
    }

    fn usage(&self) -> Option<TokenUsage> {
        Some(self.current_usage())
    }

    fn cost_info(&self) -> Option<CostInfo> {
        let usage = self.current_usage();
        Some(CostInfo {
            model: self.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            tokens_used: usage.total_tokens,
            estimated_cost_usd: estimate_cost(
                &self.model,
                usage.prompt_tokens,
                usage.completion_tokens,
            ),
        })
    }
}
