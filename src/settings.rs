//! Chat settings and the image auto-switch
//!
//! Attaching an image while the active provider cannot take images swaps in
//! the image-capable provider. The replaced `{provider, model}` waits in a
//! one-slot shadow until the attachments are gone, then comes back exactly.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::models::{self, Provider, DEFAULT_MODEL, DEFAULT_PROVIDER, IMAGE_PROVIDER};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 4000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        validate_temperature(self.temperature)?;
        validate_max_tokens(self.max_tokens)
    }
}

/// What the auto-switch replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSettings {
    pub provider: Provider,
    pub model: String,
}

/// Transient user-visible message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice(pub String);

#[derive(Debug, Default)]
pub struct SettingsContext {
    active: Settings,
    shadow: Option<SavedSettings>,
}

impl SettingsContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            active: settings,
            shadow: None,
        }
    }

    pub fn active(&self) -> &Settings {
        &self.active
    }

    pub fn shadow(&self) -> Option<&SavedSettings> {
        self.shadow.as_ref()
    }

    pub fn is_overridden(&self) -> bool {
        self.shadow.is_some()
    }

    /// Snapshot sent with a request
    pub fn for_request(&self) -> Settings {
        self.active.clone()
    }

    /// Switch provider and adopt its default model. Drops any pending
    /// auto-switch restore: the explicit choice stays.
    pub fn set_provider(&mut self, provider: Provider) {
        if self.shadow.take().is_some() {
            debug!("manual provider change discards auto-switch restore");
        }
        self.active.provider = provider;
        self.active.model = provider.default_model().to_string();
    }

    /// Select a catalog model; the provider follows the model
    pub fn set_model(&mut self, model_id: &str) -> Result<()> {
        let model = models::find_model(model_id).ok_or_else(|| {
            ChatError::InvalidSetting(format!("unknown model '{}'", model_id))
        })?;
        if model.provider != self.active.provider {
            self.set_provider(model.provider);
        }
        self.active.model = model.id.to_string();
        Ok(())
    }

    /// Free-form model id for the active provider
    pub fn set_custom_model(&mut self, model_id: &str) -> Result<()> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(ChatError::InvalidSetting("model id is empty".into()));
        }
        self.active.model = model_id.to_string();
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        validate_temperature(temperature)?;
        self.active.temperature = temperature;
        Ok(())
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) -> Result<()> {
        validate_max_tokens(max_tokens)?;
        self.active.max_tokens = max_tokens;
        Ok(())
    }

    /// Back to the built-in defaults. Any pending restore is dropped.
    pub fn reset_to_defaults(&mut self) {
        self.active = Settings::default();
        self.shadow = None;
    }

    /// Override the provider when images are attached and the active one
    /// cannot take them. Only the first override saves the previous choice.
    pub fn require_capability(&mut self, needs_images: bool) -> Option<Notice> {
        if !needs_images || self.active.provider.supports_images() {
            return None;
        }

        if self.shadow.is_none() {
            self.shadow = Some(SavedSettings {
                provider: self.active.provider,
                model: self.active.model.clone(),
            });
        }

        let previous = self.active.provider;
        self.active.provider = IMAGE_PROVIDER;
        self.active.model = IMAGE_PROVIDER.default_model().to_string();
        info!(from = %previous, to = %IMAGE_PROVIDER, "auto-switched provider for image input");

        Some(Notice(format!(
            "{} cannot read images; switched to {} ({}) for this message",
            previous, IMAGE_PROVIDER, self.active.model
        )))
    }

    /// Put back what `require_capability` replaced. No-op when nothing is saved.
    pub fn restore(&mut self) -> Option<Notice> {
        let saved = self.shadow.take()?;
        info!(provider = %saved.provider, model = %saved.model, "restored provider after image input");
        self.active.provider = saved.provider;
        self.active.model = saved.model;
        Some(Notice(format!(
            "switched back to {} ({})",
            self.active.provider, self.active.model
        )))
    }
}

pub fn validate_temperature(t: f32) -> Result<()> {
    let (lo, hi) = TEMPERATURE_RANGE;
    if !(lo..=hi).contains(&t) {
        return Err(ChatError::InvalidSetting(format!(
            "temperature must be between {} and {}",
            lo, hi
        )));
    }
    Ok(())
}

pub fn validate_max_tokens(n: u32) -> Result<()> {
    let (lo, hi) = MAX_TOKENS_RANGE;
    if !(lo..=hi).contains(&n) {
        return Err(ChatError::InvalidSetting(format!(
            "max tokens must be between {} and {}",
            lo, hi
        )));
    }
    Ok(())
}
