//! Interchangeable HTTP transports for a paginated data service.
//!
//! One operation set ([`DataTransport`]) is implemented by a single
//! [`Transport`] type whose network mechanics are pluggable:
//! - **buffered**: `reqwest` async client, whole body buffered
//! - **native**: pooled hyper client, body read as text
//! - **legacy**: `reqwest` blocking client on tokio's blocking pool
//! - **raw**: a new hyper HTTP/1 connection for every request
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Factory**: picks the backend from a kind, a name or a settings store
//! - **Transport**: URL resolution, cancellation, timeout, status checks
//! - **Serializer**: JSON/XML bodies, inbound content sniffing
//! - **Settings**: key/value store feeding the factory
//!
//! Every failure surfaces as a [`TransportError`]; library errors from the
//! HTTP stacks are flattened into text before they leave the crate.
//!
//! # Example
//!
//! ```no_run
//! use pagewise_transport::{BackendKind, DataTransport, TransportConfig, TransportFactory};
//!
//! # async fn run() -> pagewise_transport::TransportResult<()> {
//! let config = TransportConfig::new("http://localhost:8080/odata");
//! let transport = TransportFactory::create(BackendKind::Buffered, config)?;
//! let names: Vec<String> = transport.get_list("Names").await?;
//! # Ok(())
//! # }
//! ```

mod backends;
mod cancel;
mod config;
mod contract;
pub mod dates;
mod error;
mod factory;
mod http;
mod serializer;
pub mod settings;
mod transport;

pub use backends::{BufferedCall, LegacyBlockingCall, NativeCall, RawCall};
pub use cancel::CancellationScope;
pub use config::{BackendKind, MessageFormat, TransportConfig};
pub use contract::DataTransport;
pub use error::{TransportError, TransportResult, flatten_error_chain};
pub use factory::TransportFactory;
pub use http::{CallError, CallStrategy, HttpMethod, HttpRequest, HttpResponse};
pub use serializer::{MessageSerializer, PayloadKind, sniff};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use transport::Transport;
