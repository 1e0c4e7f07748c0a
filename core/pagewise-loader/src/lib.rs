//! Paged queries and optimistic-concurrency writes for a data service.
//!
//! Built on [`pagewise_transport`]: every request goes through a shared
//! [`Transport`](pagewise_transport::Transport), whichever backend it uses.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Context**: tracks entities by identity with their etag and change state
//! - **Loader**: pagination walk, counts, and tracked writes
//! - **Repository**: typed facade with optional audit stamping
//!
//! ## Pagination
//!
//! A query is walked one round-trip at a time. Each page may carry a
//! continuation token (the next link); the following round-trip uses it
//! verbatim, and the walk ends at the first page without one.
//!
//! ## Write conflicts
//!
//! Updates send the last known etag in `If-Match`. A 412 or 409 answer is
//! resolved once, by keeping the local values and resubmitting with the etag
//! of the server copy read before the save. A second conflict is reported as
//! [`LoaderError::Conflict`].
//!
//! # Example
//!
//! ```no_run
//! use pagewise_loader::{EntityLoader, QueryOption};
//! use pagewise_transport::{BackendKind, TransportConfig, TransportFactory};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TransportFactory::create(
//!     BackendKind::Buffered,
//!     TransportConfig::new("http://localhost:8080/odata"),
//! )?;
//! let loader = EntityLoader::new(Arc::new(transport));
//! let page = loader
//!     .get_pagination_data::<serde_json::Value>("Items", 0, 20)
//!     .await?;
//! println!("{} of {}", page.page_data.len(), page.total_items);
//! # Ok(())
//! # }
//! ```

mod audit;
mod config;
mod context;
mod error;
mod loader;
mod metadata;
mod page;
mod query;
mod repository;

pub use audit::AuditStamp;
pub use config::{LoaderConfig, UpdateMethod};
pub use context::{DataServiceContext, EntityDescriptor, EntityState, MergeMode};
pub use error::{LoaderError, LoaderResult};
pub use loader::EntityLoader;
pub use metadata::{AuditColumns, EntityMetadata, KeyPredicate};
pub use page::{PageResponse, PaginationResult};
pub use query::{QueryOption, compose};
pub use repository::{Repository, RepositoryBuilder};
