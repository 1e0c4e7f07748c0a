//! Transport configuration.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire format used for outbound request bodies.
///
/// Inbound bodies are always classified by sniffing, whatever this says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Json,
    Xml,
}

impl MessageFormat {
    /// The `Content-Type` header value for bodies in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            MessageFormat::Json => "application/json; charset=utf-8",
            MessageFormat::Xml => "application/xml; charset=utf-8",
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageFormat::Json => f.write_str("json"),
            MessageFormat::Xml => f.write_str("xml"),
        }
    }
}

impl FromStr for MessageFormat {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(MessageFormat::Json),
            "xml" => Ok(MessageFormat::Xml),
            other => Err(TransportError::Configuration(format!(
                "unhandled message format: {other}"
            ))),
        }
    }
}

/// The network stack a [`Transport`](crate::Transport) runs its calls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `reqwest` async client, buffered response bodies.
    Buffered,
    /// Pooled hyper client, bodies read as text.
    Native,
    /// `reqwest` blocking client driven from the blocking pool.
    Legacy,
    /// New hyper HTTP/1 connection per request.
    Raw,
}

impl BackendKind {
    /// All backend kinds, in factory order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Buffered,
        BackendKind::Native,
        BackendKind::Legacy,
        BackendKind::Raw,
    ];

    /// The name used in settings and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Buffered => "buffered",
            BackendKind::Native => "native",
            BackendKind::Legacy => "legacy",
            BackendKind::Raw => "raw",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                TransportError::Configuration(format!("unhandled transport backend: {s}"))
            })
    }
}

/// Configuration owned by a single transport instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Service root, e.g. `http://localhost:8080/odata`.
    pub base_url: String,
    /// Format for outbound bodies.
    pub message_format: MessageFormat,
    /// XML namespace applied to outbound XML bodies.
    pub default_namespace: String,
    /// Upper bound for a single call, in seconds.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            message_format: MessageFormat::Json,
            default_namespace: String::new(),
            timeout_secs: 60,
        }
    }
}

impl TransportConfig {
    /// Creates a JSON configuration for the given service root.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Sets the outbound message format.
    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.message_format = format;
        self
    }

    /// Sets the default XML namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Resolves a request path against the base URL.
    ///
    /// Absolute `http(s)://` paths (server-issued continuation links) are
    /// returned untouched.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }
}
