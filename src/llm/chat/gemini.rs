use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };

use super::{ stream_response, ChatClient, FragmentStream, LineOutcome };
use crate::llm::{ ChatError, ProviderConfig, ProviderType };

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

impl GoogleChunk {
    /// Text of the first candidate, all of its parts joined.
    fn candidate_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let mut texts = content.parts
            .into_iter()
            .filter_map(|part| part.text)
            .peekable();
        texts.peek()?;
        Some(texts.collect())
    }
}

/// The stream endpoint sends the elements of one JSON array, either one
/// object per line or pretty-printed across lines. There is no end sentinel.
pub fn parse_gemini_line(line: &str) -> LineOutcome {
    let line = line.trim();
    let line = line.strip_prefix('[').unwrap_or(line).trim_start();
    let line = line.strip_prefix(',').unwrap_or(line).trim_start();
    let line = line.strip_suffix(']').unwrap_or(line).trim_end();
    let line = line.strip_suffix(',').unwrap_or(line).trim_end();
    if line.is_empty() {
        return LineOutcome::Skip;
    }

    if line.starts_with('{') && line.ends_with('}') {
        return match serde_json::from_str::<GoogleChunk>(line) {
            Ok(chunk) =>
                chunk
                    .candidate_text()
                    .filter(|text| !text.is_empty())
                    .map(LineOutcome::Fragment)
                    .unwrap_or(LineOutcome::Skip),
            Err(e) => {
                debug!("Gemini chunk skipped: {} for line: {}", e, line);
                LineOutcome::Skip
            }
        };
    }

    // Pretty-printed bodies put each part's text on its own line.
    if let Some(value) = line.strip_prefix("\"text\":") {
        return match serde_json::from_str::<String>(value.trim()) {
            Ok(text) if !text.is_empty() => LineOutcome::Fragment(text),
            Ok(_) => LineOutcome::Skip,
            Err(e) => {
                debug!("Gemini text line skipped: {} for line: {}", e, line);
                LineOutcome::Skip
            }
        };
    }

    LineOutcome::Skip
}

pub struct GeminiChatClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiChatClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ChatError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            api_key: config.api_key().to_string(),
            model: config.model().to_string(),
            base_url: config.base_url().to_string(),
            system_prompt: config.system_prompt().map(str::to_string),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, self.model, method)
    }

    fn build_request(&self, prompt: &str) -> GeminiRequest {
        let text = match &self.system_prompt {
            Some(system) => format!("{}\n\nUser: {}\n\nAssistant:", system, prompt),
            None => prompt.to_string(),
        };

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        info!("GeminiChatClient::complete() → model={} base_url={}", self.model, self.base_url);
        let payload = self.build_request(prompt);

        let body = self.http.post(self.url("generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let chunk: GoogleChunk = serde_json::from_slice(&body).map_err(|source| ChatError::Json {
            provider: ProviderType::Gemini,
            source,
        })?;

        chunk.candidate_text().ok_or(ChatError::EmptyResponse(ProviderType::Gemini))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError> {
        info!(
            "GeminiChatClient::complete_stream() → model={} base_url={}",
            self.model,
            self.base_url
        );
        let payload = self.build_request(prompt);

        let resp = self.http.post(self.url("streamGenerateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(stream_response(ProviderType::Gemini, resp, parse_gemini_line))
    }

    fn provider(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
