use futures::StreamExt;
use log::info;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::chat::policy::{
    CachedClient,
    RateLimitedClient,
    RetryClient,
    DEFAULT_CACHE_CAPACITY,
    DEFAULT_CACHE_TTL,
    DEFAULT_RETRY_DELAY,
};
use super::chat::{ new_client, ChatClient, FragmentStream };
use super::{ ChatError, ProviderConfig, ProviderType };

/// Wrappers to stack around the provider adapter. The default is none.
#[derive(Debug, Clone)]
pub struct CallPolicies {
    /// Total attempts per request; 1 disables retrying.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub calls_per_minute: Option<NonZeroU32>,
    pub cache: bool,
    pub cache_capacity: usize,
    /// `None` keeps cached answers until they are evicted.
    pub cache_ttl: Option<Duration>,
}

impl Default for CallPolicies {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
            calls_per_minute: None,
            cache: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: Some(DEFAULT_CACHE_TTL),
        }
    }
}

/// One entry point over whichever provider was configured. The provider is
/// chosen once, here; calls never branch on it.
#[derive(Clone)]
pub struct UnifiedClient {
    inner: Arc<dyn ChatClient>,
}

impl UnifiedClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ChatError> {
        Self::with_policies(config, &CallPolicies::default())
    }

    pub fn with_policies(config: &ProviderConfig, policies: &CallPolicies) -> Result<Self, ChatError> {
        let mut client = new_client(config)?;

        if let Some(limit) = policies.calls_per_minute {
            client = Arc::new(RateLimitedClient::per_minute(client, limit));
        }
        if policies.max_attempts > 1 {
            client = Arc::new(RetryClient::new(client, policies.max_attempts, policies.retry_delay));
        }
        if policies.cache {
            client = Arc::new(
                CachedClient::with_limits(client, policies.cache_capacity, policies.cache_ttl)
            );
        }

        info!(
            "Chat client configured: Provider={}, Model={}, BaseURL={}",
            config.provider(),
            config.model(),
            config.base_url()
        );
        Ok(Self::from_client(client))
    }

    pub fn from_client(inner: Arc<dyn ChatClient>) -> Self {
        Self { inner }
    }

    /// Complete answer; failures come back as `"Error: ..."` text.
    pub async fn chat(&self, prompt: &str) -> String {
        self.inner.send(prompt).await
    }

    /// Answer as incremental fragments; concatenated in order they equal
    /// what [`UnifiedClient::chat`] would return for the same answer.
    pub async fn chat_stream(&self, prompt: &str) -> FragmentStream {
        self.inner.send_streaming(prompt).await
    }

    /// Drains [`UnifiedClient::chat_stream`], handing each fragment to
    /// `on_fragment`, and returns the concatenation.
    pub async fn chat_stream_collect<F>(&self, prompt: &str, mut on_fragment: F) -> String
        where F: FnMut(&str) + Send
    {
        let mut fragments = self.chat_stream(prompt).await;
        let mut full = String::new();
        while let Some(fragment) = fragments.next().await {
            on_fragment(&fragment);
            full.push_str(&fragment);
        }
        full
    }

    pub fn provider(&self) -> ProviderType {
        self.inner.provider()
    }

    pub fn model(&self) -> String {
        self.inner.model()
    }
}
