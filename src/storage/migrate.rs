//! One-shot schema migration for the persisted client state.
//!
//! Runs on startup; a store already at [`APP_VERSION`] is left untouched
//! apart from making sure a client token exists. Legacy records from the
//! pre-2.0 layout are carried over and their keys removed.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversations::count_words;

use super::{keys, KeyValueStore, StorageResult, APP_VERSION};

/// Legacy (pre-2.0) keys superseded by the current schema.
const LEGACY_CONVERSATIONS: &str = "aseConversations";
const LEGACY_THEME: &str = "aseTheme";
const LEGACY_FONT_SIZE: &str = "aseFontSize";
const LEGACY_PERSONALITY: &str = "asePersonality";
const LEGACY_USER_IP: &str = "userIP";

/// Bring the store up to the current schema version.
///
/// Idempotent: running twice at the same version changes nothing.
///
/// # Errors
/// Returns an error when the underlying store fails; individual malformed
/// legacy records are dropped, not fatal.
pub async fn run(store: &dyn KeyValueStore) -> StorageResult<()> {
    ensure_client_token(store).await?;

    let stored_version = store.get(keys::APP_VERSION).await?;
    if stored_version.as_deref() == Some(APP_VERSION) {
        return Ok(());
    }

    info!(
        from = stored_version.as_deref().unwrap_or("none"),
        to = APP_VERSION,
        "migrating persisted state"
    );

    migrate_conversations(store).await?;
    migrate_settings(store).await?;

    // The stored IP was replaced by the client token.
    store.remove(LEGACY_USER_IP).await?;

    cleanup_stray_keys(store).await?;

    store.set(keys::APP_VERSION, APP_VERSION).await?;
    Ok(())
}

/// Generate and persist a client-identifying token on first run.
async fn ensure_client_token(store: &dyn KeyValueStore) -> StorageResult<()> {
    if store.get(keys::USER_TOKEN).await?.is_none() {
        store
            .set(keys::USER_TOKEN, &Uuid::new_v4().to_string())
            .await?;
    }
    Ok(())
}

/// Carry the old conversation array over, filling fields the old layout
/// did not track.
async fn migrate_conversations(store: &dyn KeyValueStore) -> StorageResult<()> {
    let Some(raw) = store.get(LEGACY_CONVERSATIONS).await? else {
        return Ok(());
    };

    if store.get(keys::CONVERSATIONS).await?.is_none() {
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(old) => {
                let migrated: Vec<Value> = old.into_iter().map(normalize_legacy).collect();
                store
                    .set(keys::CONVERSATIONS, &serde_json::to_string(&migrated)?)
                    .await?;
            }
            Err(err) => warn!("dropping unreadable legacy conversations: {err}"),
        }
    }

    store.remove(LEGACY_CONVERSATIONS).await?;
    Ok(())
}

/// Normalize one legacy conversation object in place.
fn normalize_legacy(mut conversation: Value) -> Value {
    let now = Utc::now().to_rfc3339();
    let Some(object) = conversation.as_object_mut() else {
        return conversation;
    };

    let fallback_time = object
        .get("timestamp")
        .and_then(Value::as_str)
        .map_or(now, ToString::to_string);

    if !object.contains_key("id") {
        object.insert("id".to_string(), Value::from(Uuid::new_v4().to_string()));
    }
    for key in ["createdAt", "updatedAt"] {
        if !object.contains_key(key) {
            object.insert(key.to_string(), Value::from(fallback_time.clone()));
        }
    }

    let messages = object
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let word_count: u32 = messages
        .iter()
        .filter_map(|m| m.get("content").and_then(Value::as_str))
        .map(count_words)
        .sum();
    object.insert("wordCount".to_string(), Value::from(word_count));
    object.insert(
        "messageCount".to_string(),
        Value::from(u32::try_from(messages.len()).unwrap_or(u32::MAX)),
    );

    conversation
}

/// Fold loose legacy settings keys into the settings record.
async fn migrate_settings(store: &dyn KeyValueStore) -> StorageResult<()> {
    let theme = store.get(LEGACY_THEME).await?;
    let font_size = store.get(LEGACY_FONT_SIZE).await?;
    let personality = store.get(LEGACY_PERSONALITY).await?;

    if theme.is_some() || font_size.is_some() || personality.is_some() {
        let mut settings: Value = store
            .get(keys::SETTINGS)
            .await?
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_else(|| {
                serde_json::to_value(crate::config::Settings::default())
                    .unwrap_or(Value::Null)
            });

        if let Some(object) = settings.as_object_mut() {
            if let Some(theme) = theme {
                object.insert("theme".to_string(), Value::from(theme.trim_matches('"')));
            }
            if let Some(size) = font_size.and_then(|s| s.trim_matches('"').parse::<u8>().ok()) {
                object.insert("fontSize".to_string(), Value::from(size));
            }
            if let Some(personality) = personality {
                object.insert(
                    "personality".to_string(),
                    Value::from(
                        crate::config::Personality::parse(personality.trim_matches('"'))
                            .as_str(),
                    ),
                );
            }
            store
                .set(keys::SETTINGS, &serde_json::to_string(&settings)?)
                .await?;
        }
    }

    for key in [LEGACY_THEME, LEGACY_FONT_SIZE, LEGACY_PERSONALITY] {
        store.remove(key).await?;
    }
    Ok(())
}

/// Drop `ase_`-prefixed keys that are not part of the current schema.
async fn cleanup_stray_keys(store: &dyn KeyValueStore) -> StorageResult<()> {
    for key in store.all_keys().await? {
        if key.starts_with("ase_") && !keys::ALL.contains(&key.as_str()) {
            store.remove(&key).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Personality, Settings};
    use crate::storage::MemoryKeyValueStore;

    #[tokio::test]
    async fn test_fresh_store_gets_version_and_token() {
        let store = MemoryKeyValueStore::new();
        run(&store).await.unwrap();

        assert_eq!(
            store.get(keys::APP_VERSION).await.unwrap().as_deref(),
            Some(APP_VERSION)
        );
        let token = store.get(keys::USER_TOKEN).await.unwrap().unwrap();
        assert!(Uuid::parse_str(&token).is_ok());
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let store = MemoryKeyValueStore::new();
        run(&store).await.unwrap();
        let token = store.get(keys::USER_TOKEN).await.unwrap();

        run(&store).await.unwrap();
        assert_eq!(store.get(keys::USER_TOKEN).await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_legacy_conversations_are_carried_over() {
        let store = MemoryKeyValueStore::new();
        let legacy = r#"[{"title":"old chat","timestamp":"2024-01-01T00:00:00Z",
            "messages":[{"role":"user","content":"two words",
                         "timestamp":"2024-01-01T00:00:00Z"}]}]"#;
        store.set(LEGACY_CONVERSATIONS, legacy).await.unwrap();

        run(&store).await.unwrap();

        assert!(store.get(LEGACY_CONVERSATIONS).await.unwrap().is_none());
        let migrated: Vec<Value> = serde_json::from_str(
            &store.get(keys::CONVERSATIONS).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(migrated.len(), 1);
        assert!(migrated[0].get("id").is_some());
        assert_eq!(migrated[0]["createdAt"], "2024-01-01T00:00:00Z");
        assert_eq!(migrated[0]["wordCount"], 2);
        assert_eq!(migrated[0]["messageCount"], 1);
    }

    #[tokio::test]
    async fn test_legacy_settings_keys_are_folded_in() {
        let store = MemoryKeyValueStore::new();
        store.set(LEGACY_THEME, "\"light\"").await.unwrap();
        store.set(LEGACY_PERSONALITY, "\"witty\"").await.unwrap();
        store.set(LEGACY_USER_IP, "\"10.0.0.1\"").await.unwrap();
        store.set("ase_stray_cache", "junk").await.unwrap();

        run(&store).await.unwrap();

        let settings: Settings = serde_json::from_str(
            &store.get(keys::SETTINGS).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(settings.theme, "light");
        assert_eq!(settings.personality, Personality::Witty);

        assert!(store.get(LEGACY_THEME).await.unwrap().is_none());
        assert!(store.get(LEGACY_USER_IP).await.unwrap().is_none());
        assert!(store.get("ase_stray_cache").await.unwrap().is_none());
    }
}
