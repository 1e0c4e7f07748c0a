//! Key/value application settings.
//!
//! The transport only needs "read a value by key" and "write a value by key";
//! [`SettingsStore`] is that seam. [`MemorySettings`] backs tests and embedded
//! callers, [`JsonFileSettings`] persists a flat JSON object on disk.

use crate::config::{BackendKind, MessageFormat, TransportConfig};
use crate::error::{TransportError, TransportResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Well-known setting keys.
pub mod keys {
    pub const BACKEND: &str = "transport.backend";
    pub const BASE_URL: &str = "transport.base_url";
    pub const MESSAGE_FORMAT: &str = "transport.message_format";
    pub const NAMESPACE: &str = "transport.namespace";
    pub const TIMEOUT_SECS: &str = "transport.timeout_secs";
}

/// Read/write access to string settings.
pub trait SettingsStore: Send + Sync {
    /// Returns the value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`.
    fn set(&self, key: &str, value: &str) -> TransportResult<()>;
}

/// In-memory settings.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-filled with `pairs`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> TransportResult<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Settings persisted as a flat JSON object.
///
/// The file is read once on [`open`](Self::open) and rewritten in full on
/// every [`set`](SettingsStore::set). Non-string JSON values are kept in
/// their JSON text form.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileSettings {
    /// Opens the settings file at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> TransportResult<Self> {
        let path = path.into();
        if !path.exists() {
            info!("No settings file found at {:?}, starting empty", path);
            return Ok(Self {
                path,
                values: RwLock::new(BTreeMap::new()),
            });
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| TransportError::Settings(format!("failed to read {path:?}: {e}")))?;
        let values = parse_flat_object(&contents)
            .map_err(|e| TransportError::Settings(format!("failed to parse {path:?}: {e}")))?;
        debug!("Loaded {} settings from {:?}", values.len(), path);

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> TransportResult<()> {
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| TransportError::Settings(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| {
            warn!("Failed to write settings file {:?}: {}", self.path, e);
            TransportError::Settings(format!("failed to write {:?}: {e}", self.path))
        })
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> TransportResult<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }
}

fn parse_flat_object(contents: &str) -> Result<BTreeMap<String, String>, String> {
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object at the top level".to_string())?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect())
}

/// Reads the backend kind and transport configuration from `store`.
///
/// The backend defaults to buffered and the format to JSON. The base URL has
/// no default.
pub fn load_transport_settings(
    store: &dyn SettingsStore,
) -> TransportResult<(BackendKind, TransportConfig)> {
    let base_url = store
        .get(keys::BASE_URL)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            TransportError::Precondition(format!("setting {} is required", keys::BASE_URL))
        })?;

    let kind = match store.get(keys::BACKEND) {
        Some(name) if !name.trim().is_empty() => name.parse()?,
        _ => BackendKind::Buffered,
    };

    let mut config = TransportConfig::new(base_url.trim());
    if let Some(format) = store.get(keys::MESSAGE_FORMAT).filter(|f| !f.trim().is_empty()) {
        config.message_format = format.parse::<MessageFormat>()?;
    }
    if let Some(namespace) = store.get(keys::NAMESPACE) {
        config.default_namespace = namespace;
    }
    if let Some(timeout) = store.get(keys::TIMEOUT_SECS).filter(|t| !t.trim().is_empty()) {
        config.timeout_secs = timeout.trim().parse().map_err(|_| {
            TransportError::Configuration(format!(
                "{} must be a whole number of seconds, got {timeout:?}",
                keys::TIMEOUT_SECS
            ))
        })?;
    }

    Ok((kind, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_object_stringifies_scalars() {
        let values = parse_flat_object(r#"{"a":"x","b":30,"c":true}"#).unwrap();
        assert_eq!(values["a"], "x");
        assert_eq!(values["b"], "30");
        assert_eq!(values["c"], "true");
    }

    #[test]
    fn flat_object_rejects_arrays() {
        assert!(parse_flat_object("[1,2]").is_err());
        assert!(parse_flat_object("   ").unwrap().is_empty());
    }

    #[test]
    fn load_defaults_to_buffered_json() {
        let store = MemorySettings::from_pairs([(keys::BASE_URL, "http://svc")]);
        let (kind, config) = load_transport_settings(&store).unwrap();
        assert_eq!(kind, BackendKind::Buffered);
        assert_eq!(config.message_format, MessageFormat::Json);
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn load_requires_base_url() {
        let store = MemorySettings::from_pairs([(keys::BASE_URL, " ")]);
        assert!(matches!(
            load_transport_settings(&store),
            Err(TransportError::Precondition(_))
        ));
    }

    #[test]
    fn load_rejects_bad_timeout() {
        let store = MemorySettings::from_pairs([
            (keys::BASE_URL, "http://svc"),
            (keys::TIMEOUT_SECS, "soon"),
        ]);
        let err = load_transport_settings(&store).unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }
}
