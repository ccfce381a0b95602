use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ stream_response, ChatClient, FragmentStream, LineOutcome };
use crate::llm::{ ChatError, ProviderConfig, ProviderType };

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

/// `data: <json>` lines, closed by `data: [DONE]`.
pub fn parse_openai_line(line: &str) -> LineOutcome {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return LineOutcome::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return LineOutcome::Done;
    }

    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(chunk) => {
            chunk.choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(LineOutcome::Fragment)
                .unwrap_or(LineOutcome::Skip)
        }
        Err(e) => {
            debug!("OpenAI chunk skipped: {} for data: {}", e, data);
            LineOutcome::Skip
        }
    }
}

impl OpenAIChatClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ChatError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key()))
            .map_err(|e| ChatError::InvalidConfig(format!("Invalid API key format: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            model: config.model().to_string(),
            base_url: config.base_url().to_string(),
            system_prompt: config.system_prompt().map(str::to_string),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, prompt: &str, stream: bool) -> OpenAIChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        OpenAIChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        info!("OpenAIChatClient::complete() → model={} base_url={}", self.model, self.base_url);
        let req = self.build_request(prompt, false);

        let body = self.http.post(self.url())
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let resp: OpenAIResponse = serde_json::from_slice(&body).map_err(|source| ChatError::Json {
            provider: ProviderType::OpenAI,
            source,
        })?;

        resp.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ChatError::EmptyResponse(ProviderType::OpenAI))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError> {
        info!("OpenAIChatClient::complete_stream() → model={} base_url={}", self.model, self.base_url);
        let req = self.build_request(prompt, true);

        let resp = self.http.post(self.url())
            .json(&req)
            .send()
            .await?
            .error_for_status()?;

        Ok(stream_response(ProviderType::OpenAI, resp, parse_openai_line))
    }

    fn provider(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(system_prompt: Option<&str>) -> OpenAIChatClient {
        let mut config = ProviderConfig::new(ProviderType::OpenAI, "sk-test").unwrap();
        if let Some(prompt) = system_prompt {
            config = config.with_system_prompt(prompt);
        }
        OpenAIChatClient::from_config(&config).unwrap()
    }

    #[test]
    fn delta_line_yields_fragment() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_openai_line(line), LineOutcome::Fragment("Hel".to_string()));
    }

    #[test]
    fn done_sentinel_ends_stream() {
        assert_eq!(parse_openai_line("data: [DONE]"), LineOutcome::Done);
    }

    #[test]
    fn role_only_and_empty_deltas_are_skipped() {
        let role = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        let empty = r#"data: {"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(parse_openai_line(role), LineOutcome::Skip);
        assert_eq!(parse_openai_line(empty), LineOutcome::Skip);
    }

    #[test]
    fn malformed_and_foreign_lines_are_skipped() {
        assert_eq!(parse_openai_line("data: {not json"), LineOutcome::Skip);
        assert_eq!(parse_openai_line(": keep-alive"), LineOutcome::Skip);
        assert_eq!(parse_openai_line(""), LineOutcome::Skip);
    }

    #[test]
    fn request_puts_system_prompt_first() {
        let req = client(Some("Be brief.")).build_request("Hi", false);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "Be brief.");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Hi");
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn streaming_request_sets_flag() {
        let req = client(None).build_request("Hi", true);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["max_tokens"], 1000);
    }
}
