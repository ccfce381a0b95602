pub mod chat;
pub mod unified;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Key passed as a `key` query parameter.
    Gemini,
    /// Key passed as a bearer token.
    OpenAI,
}

impl ProviderType {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
            ProviderType::OpenAI => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "gemini-1.5-flash",
            ProviderType::OpenAI => "gpt-3.5-turbo",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Gemini => write!(f, "gemini"),
            ProviderType::OpenAI => write!(f, "openai"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseProviderTypeError {
    message: String,
}

impl fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseProviderTypeError {}
impl FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(ProviderType::Gemini),
            "openai" => Ok(ProviderType::OpenAI),
            _ =>
                Err(ParseProviderTypeError {
                    message: format!("Invalid provider type: '{}' (expected gemini or openai)", s),
                }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Http(reqwest::Error),
    #[error("Failed to decode {provider} response: {source}")]
    Json {
        provider: ProviderType,
        #[source]
        source: serde_json::Error,
    },
    #[error("No response from {0}")]
    EmptyResponse(ProviderType),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChatError {
    /// Whether the same request could succeed if sent again: transport
    /// failures, 5xx, 429 and empty answers. Client errors, undecodable
    /// bodies and bad configuration fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Http(e) =>
                match e.status() {
                    Some(status) =>
                        status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
                    None => !e.is_builder() && !e.is_decode(),
                }
            ChatError::EmptyResponse(_) => true,
            ChatError::Json { .. } | ChatError::InvalidConfig(_) => false,
        }
    }
}

// Gemini carries its key in the query string, so URLs never reach the message.
impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Http(err.without_url())
    }
}

/// Connection settings for one provider. Built once, then handed to
/// [`chat::new_client`]; nothing mutates it afterwards.
#[derive(Clone)]
pub struct ProviderConfig {
    provider: ProviderType,
    api_key: String,
    endpoint: Url,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ProviderConfig {
    pub fn new(provider: ProviderType, api_key: impl Into<String>) -> Result<Self, ChatError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ChatError::InvalidConfig(format!("{} API key is required", provider)));
        }
        let endpoint = Url::parse(provider.default_endpoint()).map_err(|e|
            ChatError::InvalidConfig(format!("Invalid default endpoint: {}", e))
        )?;

        Ok(Self {
            provider,
            api_key,
            endpoint,
            model: provider.default_model().to_string(),
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ChatError> {
        let url = Url::parse(endpoint).map_err(|e|
            ChatError::InvalidConfig(format!("Invalid endpoint '{}': {}", endpoint, e))
        )?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(
                ChatError::InvalidConfig(format!("Endpoint must be http(s), got '{}'", url.scheme()))
            );
        }
        self.endpoint = url;
        Ok(self)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = Some(prompt).filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoint without a trailing slash, ready for route suffixes.
    pub fn base_url(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
