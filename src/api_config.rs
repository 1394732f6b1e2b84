//! Provider configuration store
//!
//! Holds the credentials and model settings used for chat-completion calls.
//! Every mutation is validated, persisted immediately, and `is_configured`
//! is always recomputed from the fields rather than trusted from storage.

use crate::error::{ChatroomError, Result};
use crate::storage::{keys, load_json, save_json, KeyValueStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Lower bound for `max_tokens`
pub const MIN_MAX_TOKENS: u32 = 1;
/// Upper bound for `max_tokens`
pub const MAX_MAX_TOKENS: u32 = 8192;

fn default_api_provider() -> String {
    "siliconflow".to_string()
}

fn default_base_url() -> String {
    "https://api.siliconflow.cn/v1".to_string()
}

fn default_model() -> String {
    "deepseek-ai/DeepSeek-V3".to_string()
}

fn default_max_tokens() -> Option<u32> {
    Some(2048)
}

fn default_temperature() -> Option<f64> {
    Some(0.7)
}

/// Provider configuration
///
/// Serialized with the camel-case field names of the persisted record
/// (`apiProvider`, `apiKey`, `baseURL`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Provider label, informational only
    #[serde(default = "default_api_provider")]
    pub api_provider: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API, without `/chat/completions`
    #[serde(rename = "baseURL", default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Completion token cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,

    /// Derived flag; recomputed on every read
    #[serde(default)]
    pub is_configured: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_provider: default_api_provider(),
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            is_configured: false,
        }
    }
}

impl ApiConfig {
    /// True iff the API key, base URL and model are all non-empty
    ///
    /// # Examples
    ///
    /// ```
    /// use chatroom::api_config::ApiConfig;
    ///
    /// let mut config = ApiConfig::default();
    /// assert!(!config.has_required_fields());
    /// config.api_key = "sk-test".to_string();
    /// assert!(config.has_required_fields());
    /// ```
    pub fn has_required_fields(&self) -> bool {
        !self.api_key.trim().is_empty()
            && !self.base_url.trim().is_empty()
            && !self.model.trim().is_empty()
    }

    /// Endpoint for chat completions
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Endpoint for the model listing
    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }

    fn with_derived_flag(mut self) -> Self {
        self.is_configured = self.has_required_fields();
        self
    }
}

/// Partial update applied over the current configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigUpdate {
    /// New provider label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_provider: Option<String>,
    /// New API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// New base URL
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// New model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// New token cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// New temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ApiConfigUpdate {
    /// Merge this update over `base`
    pub fn apply_to(&self, base: &ApiConfig) -> ApiConfig {
        let mut merged = base.clone();
        if let Some(v) = &self.api_provider {
            merged.api_provider = v.trim().to_string();
        }
        if let Some(v) = &self.api_key {
            merged.api_key = v.trim().to_string();
        }
        if let Some(v) = &self.base_url {
            merged.base_url = v.trim().to_string();
        }
        if let Some(v) = &self.model {
            merged.model = v.trim().to_string();
        }
        if self.max_tokens.is_some() {
            merged.max_tokens = self.max_tokens;
        }
        if self.temperature.is_some() {
            merged.temperature = self.temperature;
        }
        merged.with_derived_flag()
    }

    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Configuration as shown to clients that must not see the key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicApiConfig {
    /// Provider label
    pub api_provider: String,
    /// Base URL
    #[serde(rename = "baseURL")]
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Completion token cap
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Whether a key is set
    pub has_api_key: bool,
    /// Whether all required fields are present
    pub is_configured: bool,
}

/// Export document: the configuration minus the key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigExport {
    api_provider: String,
    #[serde(rename = "baseURL")]
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    export_time: String,
    version: String,
}

/// Validate a configuration, returning human-readable field errors
///
/// An empty vector means the configuration is valid.
///
/// # Examples
///
/// ```
/// use chatroom::api_config::{validate, ApiConfig};
///
/// let errors = validate(&ApiConfig::default());
/// assert_eq!(errors, vec!["API key cannot be empty".to_string()]);
/// ```
pub fn validate(config: &ApiConfig) -> Vec<String> {
    let mut errors = validate_settings(config);
    if config.api_key.trim().is_empty() {
        errors.insert(0, "API key cannot be empty".to_string());
    }
    errors
}

/// Validation of everything except the key (used for imports)
fn validate_settings(config: &ApiConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.base_url.trim().is_empty() {
        errors.push("Base URL cannot be empty".to_string());
    } else if url::Url::parse(config.base_url.trim()).is_err() {
        errors.push(format!("Base URL is not a valid URL: {}", config.base_url));
    }

    if config.model.trim().is_empty() {
        errors.push("Model cannot be empty".to_string());
    }

    if let Some(max_tokens) = config.max_tokens {
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&max_tokens) {
            errors.push(format!(
                "Max tokens must be between {} and {}",
                MIN_MAX_TOKENS, MAX_MAX_TOKENS
            ));
        }
    }

    if let Some(temperature) = config.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            errors.push("Temperature must be between 0 and 2".to_string());
        }
    }

    errors
}

/// Validated, persisted provider configuration
pub struct ConfigStore {
    storage: Arc<dyn KeyValueStore>,
    config: RwLock<ApiConfig>,
}

impl ConfigStore {
    /// Load the stored configuration, merged over the built-in defaults
    ///
    /// Missing fields take their default; a missing or unreadable record
    /// yields the defaults.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let config = load_json::<ApiConfig>(storage.as_ref(), keys::CONFIG)?
            .unwrap_or_default()
            .with_derived_flag();

        tracing::debug!(
            provider = %config.api_provider,
            model = %config.model,
            configured = config.is_configured,
            "Loaded provider configuration"
        );

        Ok(Self {
            storage,
            config: RwLock::new(config),
        })
    }

    /// Fill gaps in the loaded configuration from deployment settings
    ///
    /// The key is only taken when none is stored; base URL and model
    /// replace the stored values. Nothing is persisted.
    pub fn seed(&self, seed: &ApiConfigUpdate) {
        if seed.is_empty() {
            return;
        }
        if let Ok(mut config) = self.config.write() {
            let mut effective = seed.clone();
            if !config.api_key.is_empty() {
                effective.api_key = None;
            }
            *config = effective.apply_to(&config);
            tracing::debug!(
                configured = config.is_configured,
                "Applied configuration seed"
            );
        }
    }

    /// Current configuration (a copy)
    pub fn get(&self) -> ApiConfig {
        self.config
            .read()
            .map(|c| c.clone().with_derived_flag())
            .unwrap_or_default()
    }

    /// Validate and apply a partial update
    ///
    /// On success the merged configuration is persisted and returned. On
    /// failure nothing changes and `ChatroomError::Validation` carries the
    /// field messages.
    pub fn update(&self, partial: &ApiConfigUpdate) -> Result<ApiConfig> {
        let mut current = self
            .config
            .write()
            .map_err(|_| ChatroomError::Storage("Config lock poisoned".to_string()))?;

        let merged = partial.apply_to(&current);
        let errors = validate(&merged);
        if !errors.is_empty() {
            tracing::warn!(errors = ?errors, "Rejected configuration update");
            return Err(ChatroomError::Validation(errors).into());
        }

        save_json(self.storage.as_ref(), keys::CONFIG, &merged)?;
        *current = merged.clone();
        tracing::info!(model = %merged.model, "Saved provider configuration");
        Ok(merged)
    }

    /// Restore and persist the built-in defaults
    pub fn reset(&self) -> Result<ApiConfig> {
        let defaults = ApiConfig::default();
        save_json(self.storage.as_ref(), keys::CONFIG, &defaults)?;
        if let Ok(mut current) = self.config.write() {
            *current = defaults.clone();
        }
        tracing::info!("Reset provider configuration to defaults");
        Ok(defaults)
    }

    /// True iff the API key, base URL and model are all present
    pub fn is_configured(&self) -> bool {
        self.config
            .read()
            .map(|c| c.has_required_fields())
            .unwrap_or(false)
    }

    /// Configuration without the key
    pub fn public_config(&self) -> PublicApiConfig {
        let config = self.get();
        PublicApiConfig {
            has_api_key: !config.api_key.is_empty(),
            is_configured: config.is_configured,
            api_provider: config.api_provider,
            base_url: config.base_url,
            model: config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Export the configuration as pretty JSON, omitting the key
    pub fn export(&self) -> Result<String> {
        let config = self.get();
        let export = ConfigExport {
            api_provider: config.api_provider,
            base_url: config.base_url,
            model: config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            export_time: Utc::now().to_rfc3339(),
            version: "1.0".to_string(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Import an exported configuration
    ///
    /// The document is merged over the defaults and the current key is
    /// kept. Invalid documents leave the store unchanged.
    pub fn import(&self, json: &str) -> Result<ApiConfig> {
        let imported: ApiConfig = serde_json::from_str(json)?;

        let errors = validate_settings(&imported);
        if !errors.is_empty() {
            return Err(ChatroomError::Validation(errors).into());
        }

        let mut current = self
            .config
            .write()
            .map_err(|_| ChatroomError::Storage("Config lock poisoned".to_string()))?;

        let merged = ApiConfig {
            api_key: current.api_key.clone(),
            ..imported
        }
        .with_derived_flag();

        save_json(self.storage.as_ref(), keys::CONFIG, &merged)?;
        *current = merged.clone();
        tracing::info!("Imported provider configuration");
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> (ConfigStore, MemoryStorage) {
        let storage = MemoryStorage::new();
        let store = ConfigStore::load(Arc::new(storage.clone())).unwrap();
        (store, storage)
    }

    fn valid_update() -> ApiConfigUpdate {
        ApiConfigUpdate {
            api_key: Some("k".to_string()),
            base_url: Some("https://x".to_string()),
            model: Some("m".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_not_configured() {
        let (store, _) = store();
        let config = store.get();
        assert_eq!(config.api_provider, "siliconflow");
        assert_eq!(config.max_tokens, Some(2048));
        assert!(!config.is_configured);
        assert!(!store.is_configured());
    }

    #[test]
    fn test_update_persists_and_marks_configured() {
        let (store, storage) = store();
        let config = store.update(&valid_update()).unwrap();
        assert!(config.is_configured);
        assert!(store.is_configured());

        let raw = storage.get(keys::CONFIG).unwrap().unwrap();
        assert!(raw.contains("\"baseURL\":\"https://x\""));
        assert!(raw.contains("\"isConfigured\":true"));

        let reloaded = ConfigStore::load(Arc::new(storage)).unwrap();
        assert_eq!(reloaded.get().model, "m");
    }

    #[test]
    fn test_update_failure_leaves_state_unchanged() {
        let (store, storage) = store();
        store.update(&valid_update()).unwrap();

        let bad = ApiConfigUpdate {
            base_url: Some("not a url".to_string()),
            max_tokens: Some(0),
            temperature: Some(2.5),
            ..Default::default()
        };
        let err = store.update(&bad).unwrap_err();
        match err.downcast_ref::<ChatroomError>() {
            Some(ChatroomError::Validation(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.contains("Base URL")));
                assert!(errors.iter().any(|e| e.contains("Max tokens")));
                assert!(errors.iter().any(|e| e.contains("Temperature")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        assert_eq!(store.get().base_url, "https://x");
        let persisted: ApiConfig = load_json(&storage, keys::CONFIG).unwrap().unwrap();
        assert_eq!(persisted.base_url, "https://x");
    }

    #[test]
    fn test_validate_reports_each_missing_field() {
        let config = ApiConfig {
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            ..Default::default()
        };
        let errors = validate(&config);
        assert_eq!(
            errors,
            vec![
                "API key cannot be empty".to_string(),
                "Base URL cannot be empty".to_string(),
                "Model cannot be empty".to_string(),
            ]
        );
    }

    #[test]
    fn test_validate_accepts_boundaries() {
        let config = ApiConfig {
            api_key: "k".to_string(),
            max_tokens: Some(8192),
            temperature: Some(0.0),
            ..Default::default()
        };
        assert!(validate(&config).is_empty());

        let config = ApiConfig {
            max_tokens: Some(1),
            temperature: Some(2.0),
            ..config
        };
        assert!(validate(&config).is_empty());

        let config = ApiConfig {
            max_tokens: None,
            temperature: None,
            ..config
        };
        assert!(validate(&config).is_empty());
    }

    #[test]
    fn test_is_configured_ignores_stale_stored_flag() {
        let storage = MemoryStorage::new();
        storage
            .set(
                keys::CONFIG,
                r#"{"apiKey":"","baseURL":"https://x","model":"m","isConfigured":true}"#,
            )
            .unwrap();
        let store = ConfigStore::load(Arc::new(storage)).unwrap();
        assert!(!store.is_configured());
        assert!(!store.get().is_configured);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let (store, storage) = store();
        store.update(&valid_update()).unwrap();
        let config = store.reset().unwrap();
        assert_eq!(config, ApiConfig::default());
        assert!(!store.is_configured());
        let persisted: ApiConfig = load_json(&storage, keys::CONFIG).unwrap().unwrap();
        assert!(persisted.api_key.is_empty());
    }

    #[test]
    fn test_public_config_hides_key() {
        let (store, _) = store();
        store.update(&valid_update()).unwrap();
        let public = store.public_config();
        assert!(public.has_api_key);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("apiKey"));
    }

    #[test]
    fn test_export_omits_key_and_import_preserves_it() {
        let (store, _) = store();
        store.update(&valid_update()).unwrap();
        let exported = store.export().unwrap();
        assert!(!exported.contains("apiKey"));
        assert!(exported.contains("exportTime"));

        let (other, _) = store_with_key("other-key");
        let imported = other.import(&exported).unwrap();
        assert_eq!(imported.api_key, "other-key");
        assert_eq!(imported.model, "m");
        assert!(imported.is_configured);
    }

    fn store_with_key(key: &str) -> (ConfigStore, MemoryStorage) {
        let (store, storage) = store();
        store
            .update(&ApiConfigUpdate {
                api_key: Some(key.to_string()),
                ..Default::default()
            })
            .unwrap();
        (store, storage)
    }

    #[test]
    fn test_import_rejects_invalid_document() {
        let (store, _) = store();
        let err = store
            .import(r#"{"baseURL":"nope","model":""}"#)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatroomError>(),
            Some(ChatroomError::Validation(_))
        ));
        assert_eq!(store.get(), ApiConfig::default());
    }

    #[test]
    fn test_seed_fills_missing_key_only() {
        let (store, _) = store();
        store.seed(&ApiConfigUpdate {
            api_key: Some("env-key".to_string()),
            ..Default::default()
        });
        assert!(store.is_configured());
        assert_eq!(store.get().api_key, "env-key");

        let (store, _) = store_with_key("stored");
        store.seed(&ApiConfigUpdate {
            api_key: Some("env-key".to_string()),
            model: Some("seeded-model".to_string()),
            ..Default::default()
        });
        let config = store.get();
        assert_eq!(config.api_key, "stored");
        assert_eq!(config.model, "seeded-model");
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let config = ApiConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.chat_completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(config.models_url(), "https://api.example.com/v1/models");
    }
}
