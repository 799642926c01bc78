use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{TapClawError, TapClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    /// Kept for role-to-model lookups.
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// Human-readable name of a provider, falling back to its id.
    pub fn display_name(&self, id: &str) -> String {
        self.llm_config
            .providers
            .get(id)
            .map(|p| p.display_name.clone())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn get_active(&self) -> TapClawResult<Arc<dyn LlmProvider>> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| TapClawError::Config(format!("Active provider '{}' not found in registry", self.active)))
    }

    pub fn set_active(&mut self, name: String) -> TapClawResult<()> {
        if self.providers.contains_key(&name) {
            self.active = name;
            Ok(())
        } else {
            Err(TapClawError::Config(format!("Provider '{name}' not registered")))
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the provider id, provider and call configuration for a named agent role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature, no streaming
    pub fn call_config_for_role(
        &self,
        role: &str,
    ) -> TapClawResult<(String, Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            "planner" => self.llm_config.roles.planner.as_ref(),
            other => {
                tracing::warn!(role = other, "unknown role, falling back to active provider");
                None
            }
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                TapClawError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role, entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role,
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                entry.provider.clone(),
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                    max_tokens: None,
                },
            ));
        }

        // Fallback: active provider, provider-level defaults
        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active);
        let (model, temperature) = entry
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role,
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            self.active.clone(),
            provider,
            CallConfig {
                model,
                stream: false,
                temperature,
                max_tokens: None,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys come from `TAPCLAW_<ID>_API_KEY`, then config.toml.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                config.api_key_for(id),
            );
            registry.register(Arc::new(provider));
        }
        tracing::info!(
            providers = registry.providers.len(),
            active = %registry.active,
            "LLM provider registry built"
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[llm]
active_provider = "openai"

[llm.providers.openai]
display_name = "OpenAI"
api_base = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o-mini"
temperature = 0.2
api_key = "sk-test"

[llm.providers.google]
display_name = "Google Gemini"
api_base = "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
model = "gemini-2.5-flash"
"#;

    fn registry(extra: &str) -> ProviderRegistry {
        let cfg: AppConfig = toml::from_str(&format!("{CONFIG}{extra}")).unwrap();
        ProviderRegistry::from_config(&cfg)
    }

    #[test]
    fn planner_falls_back_to_active_provider() {
        let registry = registry("");
        let (id, provider, cfg) = registry.call_config_for_role("planner").unwrap();
        assert_eq!(id, "openai");
        assert_eq!(provider.name(), "openai");
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert!(!cfg.stream);
        assert!((cfg.temperature - 0.2).abs() < 1e-9);
    }

    #[test]
    fn planner_role_overrides_provider_and_model() {
        let registry = registry(
            r#"
[llm.roles.planner]
provider = "google"
model = "gemini-2.5-pro"
stream = true
"#,
        );
        let (id, _, cfg) = registry.call_config_for_role("planner").unwrap();
        assert_eq!(id, "google");
        assert_eq!(cfg.model, "gemini-2.5-pro");
        assert!(cfg.stream);
        assert_eq!(registry.display_name("google"), "Google Gemini");
    }

    #[test]
    fn role_with_unknown_provider_is_a_config_error() {
        let registry = registry(
            r#"
[llm.roles.planner]
provider = "nowhere"
model = "m"
"#,
        );
        assert!(matches!(
            registry.call_config_for_role("planner"),
            Err(TapClawError::Config(_))
        ));
    }

    #[test]
    fn set_active_rejects_unregistered_names() {
        let mut registry = registry("");
        assert_eq!(registry.list_names(), vec!["google".to_string(), "openai".to_string()]);
        assert!(registry.set_active("google".into()).is_ok());
        assert_eq!(registry.active_name(), "google");
        assert!(registry.set_active("missing".into()).is_err());
    }
}
