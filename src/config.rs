//! Client settings and persona configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol::AseState;
use crate::storage::{keys, KeyValueStore, StorageResult};

/// Enumerated persona tags.
///
/// Unknown tags coming off the wire or out of old stored settings fall back
/// to [`Personality::Default`], which adds no extra tone clause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    /// No extra tone clause.
    #[default]
    Default,
    /// Sharp wit and clever humor.
    Witty,
    /// Cryptic, ethereal tone.
    Mystical,
}

impl Personality {
    /// Parse a tag leniently; anything unrecognized is the default persona.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "witty" => Self::Witty,
            "mystical" => Self::Mystical,
            _ => Self::Default,
        }
    }

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Witty => "witty",
            Self::Mystical => "mystical",
        }
    }

    /// Extra system-prompt clause for this persona, if any.
    #[must_use]
    pub const fn tone_clause(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Witty => Some("Respond with sharp wit and clever humor."),
            Self::Mystical => {
                Some("Speak in cryptic, mystical tones with ethereal wisdom.")
            }
        }
    }
}

/// Persisted client settings.
///
/// `theme`, `font_size` and the trailing booleans are presentation
/// preferences the core passes through opaquely; they are kept here so one
/// settings record round-trips unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Display name of the assistant.
    pub name: String,
    /// Persona tag.
    pub personality: Personality,
    /// Cosmic-insight augmentation flag.
    pub cosmic_insights: bool,
    /// Mood-reflection augmentation flag.
    pub mood_analysis: bool,
    /// UI theme, passed through.
    pub theme: String,
    /// UI font size, passed through.
    pub font_size: u8,
    /// Whether autosave is enabled in the UI, passed through.
    pub auto_save: bool,
    /// Sound preference, passed through.
    pub sound_enabled: bool,
    /// Notification preference, passed through.
    pub notifications: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "Ase (Bab3yini)".to_string(),
            personality: Personality::Default,
            cosmic_insights: true,
            mood_analysis: false,
            theme: "dark".to_string(),
            font_size: 16,
            auto_save: true,
            sound_enabled: true,
            notifications: true,
        }
    }
}

impl Settings {
    /// Project the fields the mediator cares about into wire form.
    #[must_use]
    pub fn to_ase_state(&self) -> AseState {
        AseState {
            name: Some(self.name.clone()),
            personality: Some(self.personality.as_str().to_string()),
            cosmic_insights: Some(self.cosmic_insights),
            mood_analysis: Some(self.mood_analysis),
        }
    }
}

/// Settings persistence on top of the key/value store.
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    /// Create a settings store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load settings, falling back to defaults on absence or parse failure.
    pub async fn load(&self) -> StorageResult<Settings> {
        Ok(self
            .store
            .get(keys::SETTINGS)
            .await?
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default())
    }

    /// Persist the full settings record.
    pub async fn save(&self, settings: &Settings) -> StorageResult<()> {
        let json = serde_json::to_string(settings)?;
        self.store.set(keys::SETTINGS, &json).await
    }

    /// Load, mutate, persist.
    pub async fn update<F>(&self, mutate: F) -> StorageResult<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.load().await?;
        mutate(&mut settings);
        self.save(&settings).await?;
        Ok(settings)
    }
}
