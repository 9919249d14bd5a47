// Builtin LLM provider presets for the research worker
//
// The worker takes the provider id and model as positional arguments and
// reads the credential from its environment.

use serde::{Deserialize, Serialize};

/// A builtin provider preset
/// Note: This is hardcoded data, not deserialized from files
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPreset {
    /// Provider ID passed to the worker (e.g., "anthropic")
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Environment keys that may hold the credential; the first is the one
    /// injected into the worker
    pub env_keys: &'static [&'static str],
    pub default_model: &'static str,
}

/// Builtin provider presets
pub static PROVIDERS: &[ProviderPreset] = &[
    ProviderPreset {
        id: "anthropic",
        name: "Anthropic",
        env_keys: &["ANTHROPIC_API_KEY"],
        default_model: "claude-sonnet-4-5",
    },
    ProviderPreset {
        id: "openai",
        name: "OpenAI",
        env_keys: &["OPENAI_API_KEY"],
        default_model: "gpt-4o-mini",
    },
    ProviderPreset {
        id: "google",
        name: "Google",
        env_keys: &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        default_model: "gemini-pro",
    },
];

/// Get a provider preset by ID
pub fn get_provider_preset(id: &str) -> Option<&'static ProviderPreset> {
    PROVIDERS.iter().find(|p| p.id == id)
}

pub fn get_all_provider_presets() -> &'static [ProviderPreset] {
    PROVIDERS
}

impl ProviderPreset {
    pub fn primary_env_key(&self) -> &'static str {
        self.env_keys[0]
    }

    pub fn to_info(&self, has_credential: bool) -> ProviderInfo {
        ProviderInfo {
            id: self.id.to_string(),
            name: self.name.to_string(),
            env_keys: self.env_keys.iter().map(|k| k.to_string()).collect(),
            default_model: self.default_model.to_string(),
            has_credential,
        }
    }
}

/// Provider info printed by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub env_keys: Vec<String>,
    pub default_model: String,
    pub has_credential: bool,
}
