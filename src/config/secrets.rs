// Provider credentials
//
// Tokens come from the process environment or from
// ~/.research-supervisor/secrets.toml (global only). Resolution happens
// before anything is spawned or persisted.

use crate::config::providers::{get_provider_preset, ProviderPreset};
use crate::error::{SupervisorError, SupervisorResult};
use crate::file_storage::get_global_supervisor_dir;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Key-value lookup for credentials
pub trait CredentialSource {
    /// Look up a credential for a provider under one of its env keys
    fn lookup(&self, provider_id: &str, env_key: &str) -> Option<String>;
}

/// Reads the process environment
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, _provider_id: &str, env_key: &str) -> Option<String> {
        std::env::var(env_key).ok()
    }
}

/// In-memory source keyed by env key
impl CredentialSource for HashMap<String, String> {
    fn lookup(&self, _provider_id: &str, env_key: &str) -> Option<String> {
        self.get(env_key).cloned()
    }
}

/// Secrets stored in ~/.research-supervisor/secrets.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// API tokens indexed by provider ID (e.g., "anthropic" -> "sk-...")
    #[serde(default)]
    pub api_tokens: HashMap<String, String>,
}

impl SecretsConfig {
    pub fn get_secrets_path() -> PathBuf {
        get_global_supervisor_dir().join("secrets.toml")
    }

    /// Load secrets from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_secrets_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read secrets file '{}': {}", path.display(), e))?;

        let config: SecretsConfig = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse secrets file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    pub fn get_token(&self, provider_id: &str) -> Option<&String> {
        self.api_tokens.get(provider_id)
    }

    pub fn set_token(&mut self, provider_id: &str, token: &str) {
        self.api_tokens
            .insert(provider_id.to_string(), token.to_string());
    }
}

impl CredentialSource for SecretsConfig {
    fn lookup(&self, provider_id: &str, _env_key: &str) -> Option<String> {
        self.get_token(provider_id).cloned()
    }
}

/// Tries each source in order
pub struct ChainedCredentials {
    sources: Vec<Box<dyn CredentialSource + Send + Sync>>,
}

impl ChainedCredentials {
    pub fn new(sources: Vec<Box<dyn CredentialSource + Send + Sync>>) -> Self {
        Self { sources }
    }

    /// Environment first, then the secrets file
    pub fn standard() -> Self {
        let secrets = match SecretsConfig::load() {
            Ok(secrets) => secrets,
            Err(e) => {
                log::warn!("Ignoring secrets file: {}", e);
                SecretsConfig::default()
            }
        };
        Self::new(vec![Box::new(EnvCredentials), Box::new(secrets)])
    }
}

impl CredentialSource for ChainedCredentials {
    fn lookup(&self, provider_id: &str, env_key: &str) -> Option<String> {
        self.sources
            .iter()
            .filter_map(|source| source.lookup(provider_id, env_key))
            .find(|value| !value.trim().is_empty())
    }
}

/// A credential ready to be injected into the worker environment
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCredential {
    pub provider: &'static ProviderPreset,
    pub env_key: &'static str,
    pub value: String,
}

impl ResolvedCredential {
    pub fn env(&self) -> Vec<(String, String)> {
        vec![(self.env_key.to_string(), self.value.clone())]
    }
}

/// Resolve the credential for a provider. Unknown providers and blank or
/// missing credentials are configuration errors.
pub fn resolve_credential(
    provider_id: &str,
    source: &dyn CredentialSource,
) -> SupervisorResult<ResolvedCredential> {
    let provider = get_provider_preset(provider_id).ok_or_else(|| {
        SupervisorError::Configuration(format!("Unsupported provider: {}", provider_id))
    })?;

    let value = provider
        .env_keys
        .iter()
        .filter_map(|key| source.lookup(provider_id, key))
        .find(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            SupervisorError::Configuration(format!(
                "No credential for provider '{}' (set {})",
                provider_id,
                provider.env_keys.join(" or ")
            ))
        })?;

    Ok(ResolvedCredential {
        provider,
        env_key: provider.primary_env_key(),
        value: value.trim().to_string(),
    })
}

/// The requested model, or the provider's default
pub fn resolve_model(provider: &ProviderPreset, model: Option<&str>) -> String {
    match model {
        Some(m) if !m.trim().is_empty() => m.trim().to_string(),
        _ => provider.default_model.to_string(),
    }
}
