pub mod cli;
pub mod console;
pub mod guard;
pub mod llm;
pub mod models;
pub mod session;

use cli::Args;
use guard::SecurityGuard;
use llm::unified::{ CallPolicies, UnifiedClient };
use llm::{ ProviderConfig, ProviderType };
use log::{ info, warn };
use session::ChatSession;
use std::error::Error;
use std::num::NonZeroU32;
use std::time::Duration;

pub fn provider_config_from_args(args: &Args) -> Result<ProviderConfig, Box<dyn Error + Send + Sync>> {
    let provider: ProviderType = args.provider.parse()?;
    let mut config = ProviderConfig::new(provider, args.api_key.clone())?
        .with_system_prompt(args.system_prompt.clone())
        .with_temperature(args.temperature)
        .with_max_tokens(args.max_tokens);
    if let Some(url) = args.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        config = config.with_endpoint(url)?;
    }
    if let Some(model) = args.model.as_deref().filter(|m| !m.trim().is_empty()) {
        config = config.with_model(model);
    }
    Ok(config)
}

pub fn call_policies_from_args(args: &Args) -> CallPolicies {
    CallPolicies {
        max_attempts: args.retries.max(1),
        calls_per_minute: NonZeroU32::new(args.rate_limit),
        cache: args.enable_cache,
        cache_capacity: args.cache_capacity,
        cache_ttl: Some(args.cache_ttl)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
        ..CallPolicies::default()
    }
}

pub fn session_from_args(args: &Args) -> Result<ChatSession, Box<dyn Error + Send + Sync>> {
    let config = provider_config_from_args(args)?;
    let client = UnifiedClient::with_policies(&config, &call_policies_from_args(args))?;
    let mut session = ChatSession::new(client).with_history_window(args.history_window);

    if args.disable_guard {
        warn!("Security guard disabled. Requests and answers are not screened.");
    } else {
        let guard = match &args.guard_config {
            Some(path) => SecurityGuard::from_file(path)?,
            None => SecurityGuard::default(),
        };
        session = session.with_guard(guard);
    }
    Ok(session)
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Provider: {}", args.provider);
    info!("Base URL: {}", args.base_url.as_deref().unwrap_or("provider default"));
    info!("Model: {}", args.model.as_deref().unwrap_or("provider default"));
    info!("Streaming: {}", args.stream);
    info!("Guard Enabled: {}", !args.disable_guard);
    info!("History Window: {}", args.history_window);
    info!("Retries: {}", args.retries);
    info!("Rate Limit: {}", args.rate_limit);
    info!("Cache Enabled: {}", args.enable_cache);
    if args.enable_cache {
        info!("Cache Capacity: {}, TTL: {}s", args.cache_capacity, args.cache_ttl);
    }
    info!("-------------------------");

    let mut session = session_from_args(&args)?;
    info!("Started session {}", session.id());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    console::run_console(&mut session, args.stream, stdin, &mut stdout).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn provider_config_follows_args() {
        let args = Args::try_parse_from([
            "secure-chat",
            "--provider",
            "gemini",
            "--api-key",
            "g-key",
            "--base-url",
            "http://localhost:9000/v1beta/models",
            "--system-prompt",
            "",
        ]).unwrap();
        let config = provider_config_from_args(&args).unwrap();
        assert_eq!(config.provider(), ProviderType::Gemini);
        assert_eq!(config.base_url(), "http://localhost:9000/v1beta/models");
        assert_eq!(config.model(), "gemini-1.5-flash");
        assert!(config.system_prompt().is_none());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let args = Args::try_parse_from(["secure-chat", "--api-key", ""]).unwrap();
        assert!(provider_config_from_args(&args).is_err());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let args = Args::try_parse_from(["secure-chat", "--provider", "ollama", "--api-key", "k"]).unwrap();
        assert!(provider_config_from_args(&args).is_err());
    }

    #[test]
    fn zero_rate_limit_disables_limiting() {
        let args = Args::try_parse_from(["secure-chat", "--api-key", "k", "--retries", "0"]).unwrap();
        let policies = call_policies_from_args(&args);
        assert!(policies.calls_per_minute.is_none());
        assert_eq!(policies.max_attempts, 1);
        assert!(!policies.cache);
    }

    #[test]
    fn zero_cache_ttl_keeps_entries_until_evicted() {
        let args = Args::try_parse_from([
            "secure-chat",
            "--api-key",
            "k",
            "--enable-cache",
            "--cache-ttl",
            "0",
            "--cache-capacity",
            "16",
        ]).unwrap();
        let policies = call_policies_from_args(&args);
        assert!(policies.cache);
        assert_eq!(policies.cache_capacity, 16);
        assert!(policies.cache_ttl.is_none());
    }
}
