//! Backend selection.

use crate::backends::{BufferedCall, LegacyBlockingCall, NativeCall, RawCall};
use crate::config::{BackendKind, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::http::CallStrategy;
use crate::settings::{SettingsStore, load_transport_settings};
use crate::transport::Transport;
use tracing::info;

/// Builds a [`Transport`] for a named backend.
///
/// Validation happens before any client is built, so a rejected request
/// leaves nothing half-constructed behind.
pub struct TransportFactory;

impl TransportFactory {
    /// Creates a transport for `kind`.
    pub fn create(kind: BackendKind, config: TransportConfig) -> TransportResult<Transport> {
        validate(kind, &config)?;

        let strategy: Box<dyn CallStrategy> = match kind {
            BackendKind::Buffered => Box::new(BufferedCall::new()?),
            BackendKind::Native => Box::new(NativeCall::new()),
            BackendKind::Legacy => Box::new(LegacyBlockingCall::new(config.timeout_secs)),
            BackendKind::Raw => Box::new(RawCall::new()),
        };

        info!("Created {} transport for {}", kind, config.base_url);
        Ok(Transport::with_strategy(config, strategy))
    }

    /// Creates a transport from a backend name such as `"buffered"`.
    pub fn create_named(name: &str, config: TransportConfig) -> TransportResult<Transport> {
        let kind: BackendKind = name.parse()?;
        Self::create(kind, config)
    }

    /// Creates a transport from the `transport.*` keys of a settings store.
    pub fn from_settings(store: &dyn SettingsStore) -> TransportResult<Transport> {
        let (kind, config) = load_transport_settings(store)?;
        Self::create(kind, config)
    }
}

fn validate(kind: BackendKind, config: &TransportConfig) -> TransportResult<()> {
    let base = config.base_url.trim();
    if base.is_empty() {
        return Err(TransportError::Precondition("base URL is required".to_string()));
    }

    let scheme = base
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| {
            TransportError::Configuration(format!("base URL has no scheme: {base}"))
        })?;

    match scheme.as_str() {
        "http" => Ok(()),
        "https" if matches!(kind, BackendKind::Buffered | BackendKind::Legacy) => Ok(()),
        "https" => Err(TransportError::Configuration(format!(
            "{kind} transport supports only http:// base URLs"
        ))),
        other => Err(TransportError::Configuration(format!(
            "unsupported URL scheme: {other}"
        ))),
    }
}
