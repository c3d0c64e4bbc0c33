//! Persisted provider settings.
//!
//! The store is a flat string key/value map. Two keys are used:
//!
//! | Key            | Value |
//! |----------------|-------|
//! | `r2r_provider` | `gemini`, `deepseek` or `openai` |
//! | `r2r_api_key`  | the user's key for that provider |
//!
//! [`load_provider_config`] and [`save_provider_config`] translate between
//! the map and a [`ProviderConfig`].

use crate::config::{ProviderConfig, ProviderId};
use crate::error::SettingsError;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const KEY_PROVIDER: &str = "r2r_provider";
pub const KEY_API_KEY: &str = "r2r_api_key";

/// Overrides the settings file location.
pub const SETTINGS_PATH_ENV: &str = "RECEIPT2PLAN_SETTINGS";

const SETTINGS_DIR_NAME: &str = "receipt2plan";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// String key/value persistence.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;

    /// Store `value` under `key`; `None` removes the entry.
    fn set(&self, key: &str, value: Option<&str>) -> Result<(), SettingsError>;

    /// Apply every entry, or none of them.
    ///
    /// The default applies entries one `set` at a time and, if one fails,
    /// restores the keys already written before returning the error.
    fn set_many(&self, entries: &[(&str, Option<&str>)]) -> Result<(), SettingsError> {
        let mut previous: Vec<(&str, Option<String>)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let old = self.get(key)?;
            if let Err(e) = self.set(key, *value) {
                for (applied, old) in previous.iter().rev() {
                    if let Err(restore) = self.set(applied, old.as_deref()) {
                        warn!("Could not restore setting '{}': {}", applied, restore);
                    }
                }
                return Err(e);
            }
            previous.push((*key, old));
        }
        Ok(())
    }
}

/// Read the provider selection from `store`.
///
/// An unknown provider name falls back to Gemini; a blank key is absent.
pub fn load_provider_config(store: &dyn SettingsStore) -> Result<ProviderConfig, SettingsError> {
    let provider_id = match store.get(KEY_PROVIDER)? {
        Some(raw) => raw.parse::<ProviderId>().unwrap_or_else(|_| {
            warn!("Unknown provider '{}' in settings, using gemini", raw);
            ProviderId::Gemini
        }),
        None => ProviderId::default(),
    };
    let api_key = store.get(KEY_API_KEY)?;
    Ok(ProviderConfig::new(provider_id, api_key))
}

/// Write `config` to `store`. A missing key removes the stored one.
///
/// Provider and key are written together; on failure the store keeps the
/// previous pair.
pub fn save_provider_config(
    store: &dyn SettingsStore,
    config: &ProviderConfig,
) -> Result<(), SettingsError> {
    store.set_many(&[
        (KEY_PROVIDER, Some(config.provider_id.as_str())),
        (KEY_API_KEY, config.api_key()),
    ])?;
    debug!("Saved settings: {:?}", config);
    Ok(())
}

// ── In-memory store ──────────────────────────────────────────────────────

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `pairs`.
    pub fn with_values<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<(), SettingsError> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&self, entries: &[(&str, Option<&str>)]) -> Result<(), SettingsError> {
        let mut values = self.lock();
        for (key, value) in entries {
            apply(&mut values, key, *value);
        }
        Ok(())
    }
}

/// Apply one entry to `values`; true if the map changed.
fn apply(values: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) -> bool {
    match value {
        Some(v) => values.insert(key.to_string(), v.to_string()).as_deref() != Some(v),
        None => values.remove(key).is_some(),
    }
}

// ── JSON file store ──────────────────────────────────────────────────────

/// Store backed by a JSON object on disk.
///
/// Every write rewrites the file through a temp file in the same directory
/// followed by a rename, so a crash never leaves a half-written file. A
/// missing file reads as empty.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at [`default_settings_path`].
    pub fn open_default() -> Self {
        Self::new(default_settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Settings file {} does not exist yet", self.path.display());
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| SettingsError::Parse {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(io_err)?;

        let json = serde_json::to_string_pretty(values).map_err(|e| SettingsError::Parse {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        info!("Wrote settings to {}", self.path.display());
        Ok(())
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<(), SettingsError> {
        self.set_many(&[(key, value)])
    }

    fn set_many(&self, entries: &[(&str, Option<&str>)]) -> Result<(), SettingsError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut values = self.read_all()?;
        let mut changed = false;
        for (key, value) in entries {
            changed |= apply(&mut values, key, *value);
        }
        if changed {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// Settings file location.
///
/// Priority: `RECEIPT2PLAN_SETTINGS` env > `<config_dir>/receipt2plan/settings.json`
/// > `./receipt2plan-settings.json`.
pub fn default_settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    match dirs::config_dir() {
        Some(dir) => dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME),
        None => PathBuf::from("receipt2plan-settings.json"),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FailingKeyStore;
    use super::*;

    #[test]
    fn empty_store_loads_gemini_without_key() {
        let store = MemorySettingsStore::new();
        let cfg = load_provider_config(&store).unwrap();
        assert_eq!(cfg.provider_id, ProviderId::Gemini);
        assert_eq!(cfg.api_key(), None);
    }

    #[test]
    fn unknown_provider_falls_back_to_gemini() {
        let store = MemorySettingsStore::with_values([(KEY_PROVIDER, "claude"), (KEY_API_KEY, "k")]);
        let cfg = load_provider_config(&store).unwrap();
        assert_eq!(cfg.provider_id, ProviderId::Gemini);
        assert_eq!(cfg.api_key(), Some("k"));
    }

    #[test]
    fn empty_stored_key_is_absent() {
        let store = MemorySettingsStore::with_values([(KEY_PROVIDER, "openai"), (KEY_API_KEY, "")]);
        let cfg = load_provider_config(&store).unwrap();
        assert_eq!(cfg.provider_id, ProviderId::OpenAI);
        assert_eq!(cfg.api_key(), None);
    }

    #[test]
    fn saving_without_key_removes_it() {
        let store = MemorySettingsStore::with_values([(KEY_API_KEY, "old")]);
        save_provider_config(&store, &ProviderConfig::new(ProviderId::DeepSeek, None)).unwrap();
        assert_eq!(store.get(KEY_API_KEY).unwrap(), None);
        assert_eq!(store.get(KEY_PROVIDER).unwrap().as_deref(), Some("deepseek"));
    }

    #[test]
    fn failed_key_write_keeps_previous_pair() {
        let store = FailingKeyStore::new(
            MemorySettingsStore::with_values([
                (KEY_PROVIDER, "openai"),
                (KEY_API_KEY, "sk-openai-secret"),
            ]),
            KEY_API_KEY,
        );
        let next = ProviderConfig::new(ProviderId::DeepSeek, Some("sk-deepseek".into()));
        let err = save_provider_config(&store, &next).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));

        assert_eq!(store.get(KEY_PROVIDER).unwrap().as_deref(), Some("openai"));
        assert_eq!(store.get(KEY_API_KEY).unwrap().as_deref(), Some("sk-openai-secret"));
        let cfg = load_provider_config(&store).unwrap();
        assert_eq!(cfg.provider_id, ProviderId::OpenAI);
        assert_eq!(cfg.api_key(), Some("sk-openai-secret"));
    }

    #[test]
    fn failed_write_restores_absent_provider() {
        let store = FailingKeyStore::new(MemorySettingsStore::new(), KEY_API_KEY);
        let next = ProviderConfig::new(ProviderId::OpenAI, Some("sk-new".into()));
        assert!(save_provider_config(&store, &next).is_err());
        assert_eq!(store.get(KEY_PROVIDER).unwrap(), None);
    }

    #[test]
    fn file_store_writes_pair_in_one_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = JsonFileSettingsStore::new(&path);
        store
            .set_many(&[(KEY_PROVIDER, Some("deepseek")), (KEY_API_KEY, Some("sk-ds"))])
            .unwrap();

        let on_disk: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[KEY_PROVIDER], "deepseek");
        assert_eq!(on_disk[KEY_API_KEY], "sk-ds");

        store.set_many(&[(KEY_API_KEY, None)]).unwrap();
        assert_eq!(store.get(KEY_API_KEY).unwrap(), None);
        assert_eq!(store.get(KEY_PROVIDER).unwrap().as_deref(), Some("deepseek"));
    }

    #[test]
    fn file_store_round_trips_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = JsonFileSettingsStore::new(&path);

        let cfg = ProviderConfig::new(ProviderId::OpenAI, Some("sk-123".into()));
        save_provider_config(&store, &cfg).unwrap();
        assert!(path.exists());

        let reopened = JsonFileSettingsStore::new(&path);
        assert_eq!(load_provider_config(&reopened).unwrap(), cfg);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk[KEY_PROVIDER], "openai");
    }

    #[test]
    fn file_store_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSettingsStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get(KEY_PROVIDER).unwrap(), None);
    }

    #[test]
    fn file_store_reports_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileSettingsStore::new(&path).get(KEY_PROVIDER).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }
}
