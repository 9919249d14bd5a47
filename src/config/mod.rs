// Supervisor configuration, provider presets and credentials

pub mod loader;
pub mod providers;
pub mod secrets;

pub use loader::{default_config_path, ConfigOverrides, SupervisorConfig};
pub use providers::{get_all_provider_presets, get_provider_preset, ProviderPreset};
pub use secrets::{
    resolve_credential, resolve_model, ChainedCredentials, CredentialSource, EnvCredentials,
    ResolvedCredential, SecretsConfig,
};
