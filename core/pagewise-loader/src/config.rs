//! Loader configuration.

use pagewise_transport::HttpMethod;
use serde::{Deserialize, Serialize};

/// Verb used to send modified entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    /// Sends the whole entity as a merge.
    #[default]
    Patch,
    /// Replaces the entity.
    Put,
}

impl UpdateMethod {
    pub fn http_method(&self) -> HttpMethod {
        match self {
            UpdateMethod::Patch => HttpMethod::Patch,
            UpdateMethod::Put => HttpMethod::Put,
        }
    }
}

/// Write behaviour of an [`EntityLoader`](crate::EntityLoader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub update_method: UpdateMethod,
    /// Ask the server to echo written entities (`Prefer: return=representation`).
    pub return_representation: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            update_method: UpdateMethod::Patch,
            return_representation: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.update_method, UpdateMethod::Patch);
        assert!(config.return_representation);
    }

    #[test]
    fn serde_fills_missing_fields() {
        let config: LoaderConfig = serde_json::from_str(r#"{"update_method":"put"}"#).unwrap();
        assert_eq!(config.update_method.http_method(), HttpMethod::Put);
        assert!(config.return_representation);
    }
}
