//! Paged queries and tracked writes against one entity service.

use crate::config::LoaderConfig;
use crate::context::{DataServiceContext, EntityDescriptor, MergeMode, entity_etag};
use crate::error::{LoaderError, LoaderResult};
use crate::metadata::{EntityMetadata, KeyPredicate, entity_type_name, extract_key};
use crate::page::{PageResponse, PaginationResult};
use crate::query::{INLINE_COUNT, QueryOption, compose, has_option};
use futures::stream::{self, Stream, StreamExt};
use pagewise_transport::{CancellationScope, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Position of a pagination walk.
enum PageCursor {
    Start(String),
    Continue(String),
    Exhausted,
}

/// Reads and writes entities through a tracking context.
///
/// Query results are never tracked. Every write tracks exactly the entity it
/// sends and detaches it again before returning, whatever the outcome.
pub struct EntityLoader {
    transport: Arc<Transport>,
    context: DataServiceContext,
    cancel: CancellationScope,
}

impl EntityLoader {
    /// Creates a loader with the default write behaviour.
    pub fn new(transport: Arc<Transport>) -> Self {
        Self::with_config(transport, LoaderConfig::default())
    }

    pub fn with_config(transport: Arc<Transport>, config: LoaderConfig) -> Self {
        let cancel = transport.cancellation().child();
        let context = DataServiceContext::new(Arc::clone(&transport), config);
        Self {
            transport,
            context,
            cancel,
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// The tracking context.
    pub fn context(&self) -> &DataServiceContext {
        &self.context
    }

    /// Aborts in-flight work and fails all later calls with
    /// [`LoaderError::Aborted`]. The transport itself stays usable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn guarded<F, T>(&self, fut: F) -> LoaderResult<T>
    where
        F: Future<Output = LoaderResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(LoaderError::Aborted);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LoaderError::Aborted),
            result = fut => result,
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Streams the pages of a query, one round-trip per page.
    ///
    /// Nothing is fetched until the first page is polled. Each later page is
    /// fetched with the previous page's continuation token, verbatim, and the
    /// stream ends after the first page without one. If the loader is
    /// cancelled the stream yields [`LoaderError::Aborted`] and ends; any
    /// other error also ends it.
    pub fn execute_query<'a, T>(
        &'a self,
        base_query: &str,
        options: &[QueryOption],
    ) -> impl Stream<Item = LoaderResult<PageResponse<T>>> + use<'a, T>
    where
        T: DeserializeOwned + 'a,
    {
        let start = compose(base_query, options);
        stream::unfold(PageCursor::Start(start), move |cursor| async move {
            let url = match cursor {
                PageCursor::Start(url) => url,
                PageCursor::Continue(token) => {
                    debug!("Following continuation {}", token);
                    token
                }
                PageCursor::Exhausted => return None,
            };

            let page = self
                .guarded(self.context.fetch_page(&url))
                .await
                .and_then(|raw| {
                    let next = match &raw.next {
                        Some(token) => PageCursor::Continue(token.clone()),
                        None => PageCursor::Exhausted,
                    };
                    raw.into_typed::<T>().map(|page| (page, next))
                });
            match page {
                Ok((page, next)) => Some((Ok(page), next)),
                Err(e) => Some((Err(e), PageCursor::Exhausted)),
            }
        })
    }

    /// Reads page `page_index` (zero-based) of `page_size` items.
    ///
    /// The total is the first round-trip's reported count, or the number of
    /// items gathered when the server reports none.
    pub async fn get_pagination_data<T>(
        &self,
        base_query: &str,
        page_index: u64,
        page_size: u64,
    ) -> LoaderResult<PaginationResult<T>>
    where
        T: DeserializeOwned,
    {
        if page_size == 0 {
            return Err(LoaderError::Precondition("page size must be positive".to_string()));
        }
        let skip = page_index.checked_mul(page_size).ok_or_else(|| {
            LoaderError::Precondition(format!("page {page_index} of size {page_size} is out of range"))
        })?;

        let mut options = vec![QueryOption::skip(skip), QueryOption::top(page_size)];
        if !has_option(base_query, &[], INLINE_COUNT) {
            options.push(QueryOption::inline_count());
        }

        let mut pages = pin!(self.execute_query::<T>(base_query, &options));
        let mut total = None;
        let mut first = true;
        let mut page_data = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page?;
            if first {
                total = page.total_count;
                first = false;
            }
            page_data.extend(page.items);
        }

        Ok(PaginationResult {
            total_items: total.unwrap_or(page_data.len() as u64),
            page_data,
        })
    }

    /// Asks the server for the number of entities matching `base_query`.
    ///
    /// `$inlinecount=allpages` is added unless the query already carries an
    /// inline-count option.
    pub async fn get_total_records_count(&self, base_query: &str) -> LoaderResult<u64> {
        let url = if has_option(base_query, &[], INLINE_COUNT) {
            base_query.to_string()
        } else {
            compose(base_query, &[QueryOption::inline_count()])
        };
        let page = self.guarded(self.context.fetch_page(&url)).await?;
        page.count
            .ok_or_else(|| LoaderError::Payload("server did not report a total count".to_string()))
    }

    /// Reads the entity matching `predicate`, if any.
    pub async fn find_one<T>(&self, predicate: &KeyPredicate) -> LoaderResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.find_match(predicate).await? {
            Some((value, _)) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn find_match(&self, predicate: &KeyPredicate) -> LoaderResult<Option<(Value, Option<String>)>> {
        let url = compose(
            predicate.entity_set(),
            &[QueryOption::filter(predicate.to_filter()), QueryOption::top(1)],
        );
        let page = self.guarded(self.context.fetch_page(&url)).await?;
        Ok(page.entries.into_iter().next().map(|entity| {
            let etag = entity_etag(&entity);
            (entity, etag)
        }))
    }

    // ── Keys and tracking ───────────────────────────────────────

    /// Key predicate over every declared key field of `entity`.
    pub fn key_predicate<T: EntityMetadata>(&self, entity: &T) -> LoaderResult<KeyPredicate> {
        KeyPredicate::for_entity(entity)
    }

    /// Tracks `record` as an unchanged server entity with `etag`.
    ///
    /// Returns the identity it is tracked under.
    pub fn attach_record<T: EntityMetadata>(&self, record: &T, etag: Option<String>) -> LoaderResult<String> {
        let value = serde_json::to_value(record)?;
        let predicate = KeyPredicate::from_value(T::ENTITY_SET, T::key_fields(), &value)?;
        let identity = predicate.identity();
        self.context.attach(T::ENTITY_SET, &identity, value, etag)?;
        Ok(identity)
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Applies `mutate` to `record`, inserts it and returns the new key.
    ///
    /// The key is read from the entity echoed by the server, or from the
    /// submitted record when the server echoes nothing usable. Every failure
    /// is reported as [`LoaderError::Write`] naming the entity type.
    pub async fn add_record<T, K, F>(&self, record: T, mutate: F) -> LoaderResult<K>
    where
        T: EntityMetadata,
        K: DeserializeOwned,
        F: FnOnce(&mut T) -> LoaderResult<()>,
    {
        self.add_tracked(record, mutate)
            .await
            .map_err(|source| LoaderError::Write {
                operation: "add",
                entity_type: entity_type_name::<T>(),
                source: Box::new(source),
            })
    }

    async fn add_tracked<T, K, F>(&self, mut record: T, mutate: F) -> LoaderResult<K>
    where
        T: EntityMetadata,
        K: DeserializeOwned,
        F: FnOnce(&mut T) -> LoaderResult<()>,
    {
        mutate(&mut record)?;
        let value = serde_json::to_value(&record)?;
        let identity = self.context.add_object(T::ENTITY_SET, value.clone());
        let tracked = DetachOnDrop::new(&self.context, identity);

        let echoed = self
            .guarded(self.context.save_changes(&tracked.identity))
            .await
            .map_err(surface_conflict::<T>)?;
        let key = key_from(T::key_fields(), echoed.as_ref(), &value)?;
        info!("Added {} to {}", entity_type_name::<T>(), T::ENTITY_SET);
        Ok(key)
    }

    /// Sends local changes of `record` with optimistic concurrency.
    ///
    /// The server copy is read first. A 412 or 409 answer is resolved by
    /// keeping the local values, adopting that copy's etag and resubmitting
    /// once; if that fails too the result is [`LoaderError::Conflict`]. Any
    /// other failure resets the tracked entry to the server copy before it is
    /// returned.
    pub async fn update_record<T, K>(&self, record: &T) -> LoaderResult<K>
    where
        T: EntityMetadata,
        K: DeserializeOwned,
    {
        let entity_type = entity_type_name::<T>();
        let value = serde_json::to_value(record)?;
        let predicate = KeyPredicate::from_value(T::ENTITY_SET, T::key_fields(), &value)?;
        let identity = predicate.identity();
        let _tracked = DetachOnDrop::new(&self.context, identity.clone());

        let (matched, match_etag) =
            self.find_match(&predicate)
                .await?
                .ok_or_else(|| LoaderError::NotFound {
                    entity_type: entity_type.clone(),
                    key: predicate.key_text(),
                })?;

        match self.context.update_object(&identity, value.clone()) {
            Ok(()) => {}
            Err(LoaderError::NotTracked(_)) => {
                warn!("{} is not tracked; attaching it to the server etag", identity);
                self.attach_and_retry(&predicate, &identity, &value, match_etag.clone())?;
            }
            Err(e) => return Err(e),
        }

        let echoed = match self.guarded(self.context.save_changes(&identity)).await {
            Ok(echoed) => echoed,
            Err(LoaderError::ConflictDetected { status, body }) => {
                warn!(
                    "Conflict ({}) updating {}; resubmitting once: {}",
                    status, identity, body
                );
                self.context.materialize_with(
                    &identity,
                    &matched,
                    match_etag,
                    MergeMode::PreserveLocalChanges,
                )?;
                match self.guarded(self.context.save_changes(&identity)).await {
                    Ok(echoed) => echoed,
                    Err(LoaderError::ConflictDetected { status, body }) => {
                        return Err(LoaderError::Conflict {
                            entity_type,
                            status,
                            message: body,
                        });
                    }
                    Err(LoaderError::Aborted) => return Err(LoaderError::Aborted),
                    Err(e) => {
                        return Err(LoaderError::Conflict {
                            entity_type,
                            status,
                            message: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                if let Err(refresh) =
                    self.context
                        .materialize_with(&identity, &matched, match_etag, MergeMode::OverwriteLocal)
                {
                    debug!("Could not refresh {} after failed update: {}", identity, refresh);
                }
                return Err(e);
            }
        };

        let key = key_from(T::key_fields(), echoed.as_ref(), &value)?;
        info!("Updated {} {}", entity_type, identity);
        Ok(key)
    }

    /// Replaces whatever is tracked for the key with `value` at `etag`, then
    /// marks it modified. Restores the previous entry if that fails.
    fn attach_and_retry(
        &self,
        predicate: &KeyPredicate,
        identity: &str,
        value: &Value,
        etag: Option<String>,
    ) -> LoaderResult<()> {
        let previous = self
            .context
            .find_tracked(predicate)
            .and_then(|tracked| self.context.detach(&tracked));
        self.reattach(predicate.entity_set(), identity, value, etag, previous)
    }

    /// Tracks `value` under `identity` and marks it modified. On failure only
    /// an entry this call attached is removed, then `previous` is put back.
    fn reattach(
        &self,
        entity_set: &str,
        identity: &str,
        value: &Value,
        etag: Option<String>,
        previous: Option<EntityDescriptor>,
    ) -> LoaderResult<()> {
        let attached = self.context.attach(entity_set, identity, value.clone(), etag);
        let retried = match attached {
            Ok(()) => self.context.update_object(identity, value.clone()),
            Err(e) => Err(e),
        };

        if let Err(e) = retried {
            warn!("Fallback attach of {} failed; rolling back: {}", identity, e);
            if !matches!(e, LoaderError::AlreadyTracked(_)) {
                self.context.detach(identity);
            }
            if let Some(previous) = previous {
                self.context.restore(previous);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Deletes the entity with the key of `record`.
    ///
    /// Uses the tracked entry for that key if there is one, otherwise reads
    /// the server copy to obtain its etag.
    pub async fn delete_record<T, K>(&self, record: &T) -> LoaderResult<K>
    where
        T: EntityMetadata,
        K: DeserializeOwned,
    {
        let value = serde_json::to_value(record)?;
        let predicate = KeyPredicate::from_value(T::ENTITY_SET, T::key_fields(), &value)?;

        let identity = match self.context.find_tracked(&predicate) {
            Some(identity) => identity,
            None => {
                let (matched, etag) =
                    self.find_match(&predicate)
                        .await?
                        .ok_or_else(|| LoaderError::NotFound {
                            entity_type: entity_type_name::<T>(),
                            key: predicate.key_text(),
                        })?;
                let identity = predicate.identity();
                self.context.attach(T::ENTITY_SET, &identity, matched, etag)?;
                identity
            }
        };
        let _tracked = DetachOnDrop::new(&self.context, identity.clone());

        let tracked_value = self
            .context
            .descriptor(&identity)
            .map(|entry| entry.value)
            .unwrap_or(value);
        self.context.delete_object(&identity)?;
        let echoed = self
            .guarded(self.context.save_changes(&identity))
            .await
            .map_err(surface_conflict::<T>)?;

        let key = key_from(T::key_fields(), echoed.as_ref(), &tracked_value)?;
        info!("Deleted {} {}", entity_type_name::<T>(), identity);
        Ok(key)
    }
}

impl std::fmt::Debug for EntityLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLoader")
            .field("context", &self.context)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Detaches an identity from the context when dropped.
struct DetachOnDrop<'a> {
    context: &'a DataServiceContext,
    identity: String,
}

impl<'a> DetachOnDrop<'a> {
    fn new(context: &'a DataServiceContext, identity: String) -> Self {
        Self { context, identity }
    }
}

impl Drop for DetachOnDrop<'_> {
    fn drop(&mut self) {
        if self.context.detach(&self.identity).is_some() {
            debug!("Detached {}", self.identity);
        }
    }
}

/// Reports a raw conflict signal as a typed conflict.
fn surface_conflict<T>(err: LoaderError) -> LoaderError {
    match err {
        LoaderError::ConflictDetected { status, body } => LoaderError::Conflict {
            entity_type: entity_type_name::<T>(),
            status,
            message: body,
        },
        other => other,
    }
}

/// Key from the echoed entity, else from the fallback.
fn key_from<K: DeserializeOwned>(fields: &[&str], echoed: Option<&Value>, fallback: &Value) -> LoaderResult<K> {
    match echoed.map(|entity| extract_key(fields, entity)) {
        Some(Ok(key)) => Ok(key),
        _ => extract_key(fields, fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EntityState;
    use pagewise_transport::{BackendKind, TransportConfig, TransportFactory};
    use serde_json::json;

    fn loader() -> EntityLoader {
        let transport =
            TransportFactory::create(BackendKind::Buffered, TransportConfig::new("http://svc")).unwrap();
        EntityLoader::new(Arc::new(transport))
    }

    #[test]
    fn failed_reattach_restores_previous_entry() {
        let loader = loader();
        let ctx = loader.context();
        let placeholder = ctx.add_object("Items", json!({"Id": 7, "Name": "pending"}));
        let predicate = KeyPredicate::from_value("Items", &["Id"], &json!({"Id": 7})).unwrap();

        let previous = ctx
            .find_tracked(&predicate)
            .and_then(|tracked| ctx.detach(&tracked));
        assert!(previous.is_some());
        let expected = previous.clone();

        // Someone else tracks the identity between detach and attach.
        ctx.attach("Items", "Items(7)", json!({"Id": 7, "Name": "other"}), Some("W/\"9\"".into()))
            .unwrap();

        let err = loader
            .reattach(
                "Items",
                "Items(7)",
                &json!({"Id": 7, "Name": "local"}),
                Some("W/\"2\"".into()),
                previous,
            )
            .unwrap_err();

        assert!(matches!(err, LoaderError::AlreadyTracked(_)));
        assert_eq!(ctx.descriptor(&placeholder), expected);
        let other = ctx.descriptor("Items(7)").unwrap();
        assert_eq!(other.value["Name"], "other");
        assert_eq!(other.etag.as_deref(), Some("W/\"9\""));
        assert_eq!(other.state, EntityState::Unchanged);
    }

    #[test]
    fn successful_reattach_marks_record_modified() {
        let loader = loader();
        let ctx = loader.context();
        loader
            .reattach("Items", "Items(7)", &json!({"Id": 7, "Name": "local"}), Some("W/\"2\"".into()), None)
            .unwrap();

        let entry = ctx.descriptor("Items(7)").unwrap();
        assert_eq!(entry.state, EntityState::Modified);
        assert_eq!(entry.etag.as_deref(), Some("W/\"2\""));
    }

    #[test]
    fn detach_guard_untracks_on_drop() {
        let loader = loader();
        let ctx = loader.context();
        ctx.attach("Items", "Items(7)", json!({"Id": 7}), None).unwrap();
        {
            let _tracked = DetachOnDrop::new(ctx, "Items(7)".to_string());
            assert!(ctx.is_tracking("Items(7)"));
        }
        assert!(!ctx.is_tracking("Items(7)"));
    }
}
