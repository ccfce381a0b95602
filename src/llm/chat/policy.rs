//! Optional wrappers around a [`ChatClient`]. Each one is itself a
//! `ChatClient`, so they stack in any order.

use async_trait::async_trait;
use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use log::{ debug, info, warn };
use std::collections::{ HashMap, VecDeque };
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{ Duration, Instant };
use tokio::sync::Mutex;

use super::{ full_response_as_stream, ChatClient, FragmentStream };
use crate::llm::{ ChatError, ProviderType };

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Re-issues a request that failed with a transient error until it
/// succeeds or `max_attempts` requests have been made. Only the start of a
/// stream is retried.
pub struct RetryClient {
    inner: Arc<dyn ChatClient>,
    max_attempts: u32,
    delay: Duration,
}

impl RetryClient {
    pub fn new(inner: Arc<dyn ChatClient>, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl ChatClient for RetryClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        let mut attempt = 1;
        loop {
            match self.inner.complete(prompt).await {
                Ok(text) => {
                    return Ok(text);
                }
                Err(e) if attempt < self.max_attempts && e.is_transient() => {
                    warn!("Attempt {} of {} failed, retrying: {}", attempt, self.max_attempts, e);
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }
    }

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError> {
        let mut attempt = 1;
        loop {
            match self.inner.complete_stream(prompt).await {
                Ok(fragments) => {
                    return Ok(fragments);
                }
                Err(e) if attempt < self.max_attempts && e.is_transient() => {
                    warn!(
                        "Streaming attempt {} of {} failed, retrying: {}",
                        attempt,
                        self.max_attempts,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }
    }

    fn provider(&self) -> ProviderType {
        self.inner.provider()
    }

    fn model(&self) -> String {
        self.inner.model()
    }
}

/// Holds every request until the per-minute quota allows it.
pub struct RateLimitedClient {
    inner: Arc<dyn ChatClient>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimitedClient {
    pub fn per_minute(inner: Arc<dyn ChatClient>, calls_per_minute: NonZeroU32) -> Self {
        info!("Rate limiting {} requests to {} per minute", inner.provider(), calls_per_minute);
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_minute(calls_per_minute)),
        }
    }
}

#[async_trait]
impl ChatClient for RateLimitedClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        self.limiter.until_ready().await;
        self.inner.complete(prompt).await
    }

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError> {
        self.limiter.until_ready().await;
        self.inner.complete_stream(prompt).await
    }

    fn provider(&self) -> ProviderType {
        self.inner.provider()
    }

    fn model(&self) -> String {
        self.inner.model()
    }
}

struct CacheEntry {
    text: String,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    // Keys oldest first; always the same set as `entries`.
    order: VecDeque<String>,
}

impl CacheState {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Remembers successful answers by normalised prompt. Streams are served
/// from the cache on a hit but never populate it. At most `capacity`
/// answers are kept, the oldest evicted first, and each expires after
/// `ttl` when one is set.
pub struct CachedClient {
    inner: Arc<dyn ChatClient>,
    capacity: usize,
    ttl: Option<Duration>,
    state: Mutex<CacheState>,
}

impl CachedClient {
    pub fn new(inner: Arc<dyn ChatClient>) -> Self {
        Self::with_limits(inner, DEFAULT_CACHE_CAPACITY, Some(DEFAULT_CACHE_TTL))
    }

    pub fn with_limits(inner: Arc<dyn ChatClient>, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    async fn lookup(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let entry = state.entries.get(key)?;
        if self.ttl.map_or(true, |ttl| entry.stored_at.elapsed() <= ttl) {
            return Some(entry.text.clone());
        }
        debug!("Cache entry expired ({} chars)", key.len());
        state.remove(key);
        None
    }

    async fn store(&self, key: String, text: String) {
        let mut state = self.state.lock().await;
        state.remove(&key);
        while state.entries.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
        state.order.push_back(key.clone());
        state.entries.insert(key, CacheEntry { text, stored_at: Instant::now() });
    }
}

pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl ChatClient for CachedClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        let key = normalize_prompt(prompt);
        if let Some(hit) = self.lookup(&key).await {
            debug!("Cache hit for prompt ({} chars)", key.len());
            return Ok(hit);
        }

        let text = self.inner.complete(prompt).await?;
        self.store(key, text.clone()).await;
        Ok(text)
    }

    async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError> {
        let key = normalize_prompt(prompt);
        if let Some(hit) = self.lookup(&key).await {
            debug!("Cache hit for streamed prompt ({} chars)", key.len());
            return Ok(full_response_as_stream(hit));
        }
        self.inner.complete_stream(prompt).await
    }

    fn provider(&self) -> ProviderType {
        self.inner.provider()
    }

    fn model(&self) -> String {
        self.inner.model()
    }
}
