use crate::config::Config;
use crate::providers::OpenAIProvider;
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::sync::Arc;

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

const API_KEY_ENV_VARS: &[&str] = &["OPENAI_API_KEY", "TANDEM_API_KEY"];

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider_name = config.provider.as_deref().unwrap_or("openai");

    let provider = match provider_name.to_lowercase().as_str() {
        "openai" => {
            let api_key = resolve_api_key_with_fallback(API_KEY_ENV_VARS, &config.api_key)?;
            let mut provider = OpenAIProvider::new(api_key);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            provider
        }
        "ollama" => OpenAIProvider::new(config.api_key.clone())
            .with_name("ollama")
            .with_base_url(config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL)),
        _ => {
            return Err(anyhow!(
                "Unknown provider: {}. Available: openai, ollama",
                provider_name
            ));
        }
    };

    tracing::debug!(provider = provider_name, model = %config.model, "provider configured");
    Ok(Arc::new(
        provider
            .with_model(config.model.clone())
            .with_temperature(config.temperature),
    ))
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Result<String> {
    for var_name in env_vars {
        if let Ok(key) = std::env::var(var_name)
            && !key.trim().is_empty()
        {
            return Ok(key);
        }
    }
    if !config_key.is_empty() {
        Ok(config_key.to_string())
    } else {
        Err(anyhow!(
            "No API key found. Set {} or add api_key to the config file.",
            env_vars.join(" or ")
        ))
    }
}
