// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gemini API client for stamp identification, market news and the advisor chat

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::AnalysisError;
use crate::imaging::ImagePayload;
use crate::model::{KeyStatus, NewsItem, StampDraft, WebRef};
use crate::Result;

/// Link used for a headline the search grounding gave no source for
pub const NEWS_FALLBACK_URL: &str = "https://www.philately.live";

/// What the scan queue and the advisor need from an analysis service
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Identify and value the stamp in `image`; `hints` is free text from the user
    async fn identify(&self, image: &ImagePayload, hints: &str) -> std::result::Result<StampDraft, AnalysisError>;

    /// Open a chat seeded with a text summary of the collection
    fn converse(&self, collection_summary: &str) -> Box<dyn ChatSession>;
}

/// A stateful conversation; history stays inside the session
#[async_trait]
pub trait ChatSession: Send {
    async fn send(&mut self, text: &str) -> std::result::Result<String, AnalysisError>;
}

// === Wire types ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Deserialize)]
struct WebChunk {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part { text: Some(text.to_string()), ..Default::default() }],
        }
    }

    fn system(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part { text: Some(text.to_string()), ..Default::default() }],
        }
    }
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn grounding_chunks(&self) -> &[GroundingChunk] {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| g.grounding_chunks.as_slice())
            .unwrap_or(&[])
    }

    /// Citations with both a title and a URI, in the order returned
    fn web_refs(&self, limit: usize) -> Vec<WebRef> {
        self.grounding_chunks()
            .iter()
            .filter_map(|chunk| {
                let web = chunk.web.as_ref()?;
                match (web.title.as_deref(), web.uri.as_deref()) {
                    (Some(title), Some(uri)) if !title.is_empty() && !uri.is_empty() => Some(WebRef {
                        title: title.to_string(),
                        uri: uri.to_string(),
                    }),
                    _ => None,
                }
            })
            .take(limit)
            .collect()
    }
}

/// Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    vision_model: String,
    chat_model: String,
    news_model: String,
    quota_retries: u32,
    retry_backoff: Duration,
    max_citations: usize,
    max_dimension: u32,
}

impl GeminiClient {
    /// Create a new client; without an API key every call reports `AuthInvalid`
    pub fn new(config: &AppConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ai_engine.timeout_secs))
            .build()?;

        // Normalize URL
        let base_url = config.ai_engine.url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            vision_model: config.ai_engine.models.vision.clone(),
            chat_model: config.ai_engine.models.chat.clone(),
            news_model: config.ai_engine.models.news.clone(),
            quota_retries: config.ai_engine.quota_retries,
            retry_backoff: Duration::from_millis(config.ai_engine.retry_backoff_ms),
            max_citations: config.scanner.max_citations,
            max_dimension: config.scanner.max_dimension,
        })
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send one generateContent request and classify any failure
    async fn generate(&self, model: &str, request: &GenerateRequest) -> std::result::Result<GenerateResponse, AnalysisError> {
        let api_key = self.api_key.as_deref().ok_or(AnalysisError::AuthInvalid)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        debug!("Sending request to Gemini: model={}", model);

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AnalysisError::AnalysisFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::AnalysisFailed(format!("cannot read response: {}", e)))?;

        if !status.is_success() {
            let err = classify_failure(status, &body);
            warn!("Gemini returned {} ({})", status, err);
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| AnalysisError::AnalysisFailed(format!("unexpected response shape: {}", e)))
    }

    async fn identify_once(&self, image: &ImagePayload, hints: &str) -> std::result::Result<StampDraft, AnalysisError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.to_base64(),
                        }),
                        ..Default::default()
                    },
                    Part { text: Some(identify_prompt(hints)), ..Default::default() },
                ],
            }],
            system_instruction: None,
            tools: vec![json!({ "googleSearch": {} })],
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": stamp_schema(),
            })),
        };

        let response = self.generate(&self.vision_model, &request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(AnalysisError::AnalysisFailed("EMPTY_RESPONSE".to_string()));
        }

        let value = extract_json(&text)?;
        if !value.is_object() {
            return Err(AnalysisError::AnalysisFailed("expected a JSON object".to_string()));
        }

        let mut draft: StampDraft = serde_json::from_value(value)
            .map_err(|e| AnalysisError::AnalysisFailed(format!("unparseable result: {}", e)))?;
        draft.web_refs = response.web_refs(self.max_citations);
        Ok(draft)
    }

    /// Four current headlines from the stamp market; empty on any failure
    pub async fn market_news(&self) -> Vec<NewsItem> {
        let request = GenerateRequest {
            contents: vec![Content::text("user", NEWS_PROMPT)],
            system_instruction: None,
            tools: vec![json!({ "googleSearch": {} })],
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": news_schema(),
            })),
        };

        let response = match self.generate(&self.news_model, &request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to fetch market news: {}", e);
                return Vec::new();
            }
        };

        let items = match extract_json(&response.text()).map(serde_json::from_value::<Vec<NewsEntry>>) {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!("News response did not match schema: {}", e);
                return Vec::new();
            }
            Err(e) => {
                warn!("News response unreadable: {}", e);
                return Vec::new();
            }
        };

        let chunks = response.grounding_chunks();
        items
            .into_iter()
            .take(4)
            .enumerate()
            .map(|(idx, entry)| {
                let url = chunks
                    .get(idx)
                    .and_then(|c| c.web.as_ref())
                    .and_then(|w| w.uri.clone())
                    .unwrap_or_else(|| NEWS_FALLBACK_URL.to_string());
                entry.into_item(url)
            })
            .collect()
    }

    /// Ping the service with a one-token request
    pub async fn key_status(&self) -> KeyStatus {
        if self.api_key.is_none() {
            return KeyStatus::Missing;
        }

        let request = GenerateRequest {
            contents: vec![Content::text("user", "ping")],
            system_instruction: None,
            tools: Vec::new(),
            generation_config: Some(json!({ "maxOutputTokens": 1 })),
        };

        match self.generate(&self.chat_model, &request).await {
            Ok(_) => KeyStatus::Valid,
            // The key authenticated; only the budget is spent
            Err(AnalysisError::QuotaExhausted) => KeyStatus::Valid,
            Err(e) => {
                warn!("Key validation failed: {}", e);
                KeyStatus::Invalid
            }
        }
    }
}

#[async_trait]
impl AnalysisClient for GeminiClient {
    async fn identify(&self, image: &ImagePayload, hints: &str) -> std::result::Result<StampDraft, AnalysisError> {
        let prepared = image.prepare_for_upload(self.max_dimension);
        let prepared = &prepared;
        let draft = retry_on_quota(self.quota_retries, self.retry_backoff, move || {
            self.identify_once(prepared, hints)
        })
        .await?;

        info!(
            "Identified: {} ({} references)",
            draft.name.as_deref().unwrap_or("?"),
            draft.web_refs.len()
        );
        Ok(draft)
    }

    fn converse(&self, collection_summary: &str) -> Box<dyn ChatSession> {
        Box::new(GeminiChat {
            client: self.clone(),
            system: Content::system(&advisor_instruction(collection_summary)),
            history: Vec::new(),
        })
    }
}

/// Advisor chat backed by stateless generateContent calls
struct GeminiChat {
    client: GeminiClient,
    system: Content,
    history: Vec<Content>,
}

#[async_trait]
impl ChatSession for GeminiChat {
    async fn send(&mut self, text: &str) -> std::result::Result<String, AnalysisError> {
        self.history.push(Content::text("user", text));

        let request = GenerateRequest {
            contents: self.history.clone(),
            system_instruction: Some(self.system.clone()),
            tools: vec![json!({ "googleSearch": {} })],
            generation_config: None,
        };

        match self.client.generate(&self.client.chat_model, &request).await {
            Ok(response) => {
                let reply = response.text();
                self.history.push(Content::text("model", &reply));
                Ok(reply)
            }
            Err(e) => {
                // Keep user/model turns alternating for the next attempt
                self.history.pop();
                Err(e)
            }
        }
    }
}

/// Run `op`, retrying only quota failures with a linearly growing pause
pub async fn retry_on_quota<T, F, Fut>(
    retries: u32,
    backoff: Duration,
    mut op: F,
) -> std::result::Result<T, AnalysisError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AnalysisError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(AnalysisError::QuotaExhausted) if attempt < retries => {
                attempt += 1;
                let delay = backoff * attempt;
                warn!("Quota limit hit, retrying in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Map an unsuccessful HTTP response to the analysis error taxonomy
pub fn classify_failure(status: StatusCode, body: &str) -> AnalysisError {
    let api_status = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| (e.error.status, e.error.message))
        .unwrap_or_default();

    match (status, api_status.0.as_str()) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND, _)
        | (_, "PERMISSION_DENIED" | "UNAUTHENTICATED") => AnalysisError::AuthInvalid,
        (StatusCode::TOO_MANY_REQUESTS, _) | (_, "RESOURCE_EXHAUSTED") => AnalysisError::QuotaExhausted,
        (_, "INVALID_ARGUMENT") if api_status.1.to_lowercase().contains("api key") => AnalysisError::AuthInvalid,
        _ => {
            let detail = if api_status.1.is_empty() { status.to_string() } else { api_status.1 };
            AnalysisError::AnalysisFailed(detail)
        }
    }
}

/// Pull a JSON value out of model text that may be wrapped in prose or code fences
pub fn extract_json(text: &str) -> std::result::Result<Value, AnalysisError> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }

    let unfenced = text.replace("```json", "").replace("```", "");
    if let Ok(value) = serde_json::from_str(unfenced.trim()) {
        return Ok(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (unfenced.find(open), unfenced.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&unfenced[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(AnalysisError::AnalysisFailed("JSON_NOT_FOUND".to_string()))
}

fn identify_prompt(hints: &str) -> String {
    let hints = hints.trim();
    format!(
        "Identify and value the postage stamp in this image.\n\
         1. Identification: recognise the issue from the design, perforation, colour and inscriptions.\n\
         2. Catalog match: cross-reference Michel, Scott, Yvert et Tellier and Stanley Gibbons.\n\
         3. Valuation: estimate today's market value in euro from auction results of the last three years \
         and current dealer price lists.\n\
         Collector notes: {}.\n\
         Answer with a single JSON object using the fields name, origin, year, catalogId, estimatedValue \
         (for example \"150,00 €\"), priceSource, rarity (Common, Scarce, Rare or Unique), condition, \
         description, historicalContext, printingMethod, paperType and cancellationType.",
        if hints.is_empty() { "None" } else { hints }
    )
}

fn stamp_schema() -> Value {
    let string = json!({ "type": "STRING" });
    json!({
        "type": "OBJECT",
        "properties": {
            "name": string,
            "origin": string,
            "year": string,
            "catalogId": string,
            "estimatedValue": string,
            "priceSource": string,
            "rarity": string,
            "condition": string,
            "description": string,
            "historicalContext": string,
            "printingMethod": string,
            "paperType": string,
            "cancellationType": string,
        },
        "required": ["name", "origin", "year", "estimatedValue", "rarity", "condition", "description"],
    })
}

const NEWS_PROMPT: &str = "List 4 current, significant news items from the world of philately: \
    auction results, rare discoveries or market shifts. \
    Return a JSON array of objects with title, summary, source and type.";

fn news_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "summary": { "type": "STRING" },
                "source": { "type": "STRING" },
                "type": { "type": "STRING", "enum": ["auction", "discovery", "trend"] },
            },
            "required": ["title", "summary", "source", "type"],
        },
    })
}

#[derive(Deserialize)]
struct NewsEntry {
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: String,
    #[serde(rename = "type")]
    kind: crate::model::NewsKind,
}

impl NewsEntry {
    fn into_item(self, url: String) -> NewsItem {
        NewsItem {
            title: self.title,
            summary: self.summary,
            source: self.source,
            kind: self.kind,
            url,
        }
    }
}

/// System prompt of the advisor chat
pub fn advisor_instruction(collection_summary: &str) -> String {
    let summary = if collection_summary.trim().is_empty() {
        "No stamps in the archive yet."
    } else {
        collection_summary
    };

    format!(
        "You are the philatelic advisor of the Stampvault collection manager. \
         Your tone is professional and expert.\n\n\
         The user's archive currently holds:\n{}\n\n\
         Help with identifying stamps, their historical context, preservation and market trends. \
         Be concise. When asked about a stamp from the archive, rely on the data above. \
         Use proper terminology (perforation, watermark, intaglio, fiscal stamps).",
        summary
    )
}
