//! Tracking context over the data service.
//!
//! The context remembers entities by identity together with their last known
//! etag and a change state, and turns those states into HTTP writes. Query
//! reads are never tracked.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult};
use crate::metadata::KeyPredicate;
use crate::page::RawPage;
use pagewise_transport::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const JSON: &str = "application/json";
const JSON_BODY: &str = "application/json; charset=utf-8";

/// Change state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// How server values are merged into tracked entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Server values replace local ones.
    #[default]
    OverwriteLocal,
    /// Local changes are kept; only the etag is refreshed.
    PreserveLocalChanges,
}

/// A tracked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub entity_set: String,
    /// `Items(7)` for entities that exist on the server, a placeholder for
    /// entities added locally.
    pub identity: String,
    pub value: Value,
    pub etag: Option<String>,
    pub state: EntityState,
}

#[derive(Debug, Default)]
struct Tracker {
    entries: BTreeMap<String, EntityDescriptor>,
    merge_mode: MergeMode,
    added: u64,
}

/// Entity tracking plus the HTTP calls that read and write tracked entities.
pub struct DataServiceContext {
    transport: Arc<Transport>,
    config: LoaderConfig,
    tracker: Mutex<Tracker>,
}

impl DataServiceContext {
    pub fn new(transport: Arc<Transport>, config: LoaderConfig) -> Self {
        Self {
            transport,
            config,
            tracker: Mutex::new(Tracker::default()),
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Merge mode ──────────────────────────────────────────────

    /// Mode used by [`materialize`](Self::materialize).
    pub fn merge_mode(&self) -> MergeMode {
        self.tracker().merge_mode
    }

    pub fn set_merge_mode(&self, mode: MergeMode) {
        self.tracker().merge_mode = mode;
    }

    // ── Tracking ────────────────────────────────────────────────

    pub fn is_tracking(&self, identity: &str) -> bool {
        self.tracker().entries.contains_key(identity)
    }

    /// A copy of the tracked entry for `identity`.
    pub fn descriptor(&self, identity: &str) -> Option<EntityDescriptor> {
        self.tracker().entries.get(identity).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker().entries.len()
    }

    /// Starts tracking an existing server entity as unchanged.
    pub fn attach(
        &self,
        entity_set: &str,
        identity: &str,
        value: Value,
        etag: Option<String>,
    ) -> LoaderResult<()> {
        let mut tracker = self.tracker();
        if tracker.entries.contains_key(identity) {
            return Err(LoaderError::AlreadyTracked(identity.to_string()));
        }
        tracker.entries.insert(
            identity.to_string(),
            EntityDescriptor {
                entity_set: entity_set.to_string(),
                identity: identity.to_string(),
                value,
                etag,
                state: EntityState::Unchanged,
            },
        );
        Ok(())
    }

    /// Tracks a new entity for insertion. Returns its placeholder identity.
    pub fn add_object(&self, entity_set: &str, value: Value) -> String {
        let mut tracker = self.tracker();
        tracker.added += 1;
        let identity = format!("{entity_set}#added-{}", tracker.added);
        tracker.entries.insert(
            identity.clone(),
            EntityDescriptor {
                entity_set: entity_set.to_string(),
                identity: identity.clone(),
                value,
                etag: None,
                state: EntityState::Added,
            },
        );
        identity
    }

    /// Replaces the tracked value and marks the entry modified.
    pub fn update_object(&self, identity: &str, value: Value) -> LoaderResult<()> {
        let mut tracker = self.tracker();
        let entry = tracker
            .entries
            .get_mut(identity)
            .ok_or_else(|| LoaderError::NotTracked(identity.to_string()))?;
        entry.value = value;
        if entry.state != EntityState::Added {
            entry.state = EntityState::Modified;
        }
        Ok(())
    }

    /// Marks the tracked entry for deletion.
    pub fn delete_object(&self, identity: &str) -> LoaderResult<()> {
        let mut tracker = self.tracker();
        let entry = tracker
            .entries
            .get_mut(identity)
            .ok_or_else(|| LoaderError::NotTracked(identity.to_string()))?;
        entry.state = EntityState::Deleted;
        Ok(())
    }

    /// Identity of a tracked entry whose key values match `predicate`.
    pub fn find_tracked(&self, predicate: &KeyPredicate) -> Option<String> {
        let tracker = self.tracker();
        if let Some(entry) = tracker.entries.get(&predicate.identity()) {
            return Some(entry.identity.clone());
        }
        tracker
            .entries
            .values()
            .find(|entry| entry.entity_set == predicate.entity_set() && predicate.matches(&entry.value))
            .map(|entry| entry.identity.clone())
    }

    /// Stops tracking `identity`, returning the entry that was tracked.
    pub fn detach(&self, identity: &str) -> Option<EntityDescriptor> {
        self.tracker().entries.remove(identity)
    }

    /// Puts a previously detached entry back, replacing any current one.
    pub fn restore(&self, descriptor: EntityDescriptor) {
        self.tracker()
            .entries
            .insert(descriptor.identity.clone(), descriptor);
    }

    /// Merges a server copy into the tracked entry under the context's merge
    /// mode.
    pub fn materialize(&self, identity: &str, server: &Value, etag: Option<String>) -> LoaderResult<()> {
        let mode = self.merge_mode();
        self.materialize_with(identity, server, etag, mode)
    }

    /// Merges a server copy into the tracked entry under `mode`, for this call
    /// only. The context's merge mode is neither read nor changed.
    ///
    /// `OverwriteLocal` replaces the value and resets the state to unchanged.
    /// `PreserveLocalChanges` keeps local values of changed entries. Both
    /// adopt the server etag.
    pub fn materialize_with(
        &self,
        identity: &str,
        server: &Value,
        etag: Option<String>,
        mode: MergeMode,
    ) -> LoaderResult<()> {
        let mut tracker = self.tracker();
        let entry = tracker
            .entries
            .get_mut(identity)
            .ok_or_else(|| LoaderError::NotTracked(identity.to_string()))?;
        match mode {
            MergeMode::OverwriteLocal => {
                entry.value = server.clone();
                entry.state = EntityState::Unchanged;
            }
            MergeMode::PreserveLocalChanges => {
                if entry.state == EntityState::Unchanged {
                    entry.value = server.clone();
                }
            }
        }
        if etag.is_some() {
            entry.etag = etag;
        }
        Ok(())
    }

    // ── Wire ────────────────────────────────────────────────────

    /// Fetches one page of a query. Nothing read here is tracked.
    pub(crate) async fn fetch_page(&self, url: &str) -> LoaderResult<RawPage> {
        let request = HttpRequest::new(HttpMethod::Get, self.transport.resolve(url)).header("Accept", JSON);
        let response = self.transport.send(request).await?;
        let body = json_body(&response)?.unwrap_or(Value::Array(Vec::new()));
        RawPage::parse(body)
    }

    /// Sends the pending change of `identity`, if any.
    ///
    /// Returns the entity echoed by the server. On success the entry becomes
    /// unchanged with the echoed value and etag, or is dropped after a delete.
    /// 412 and 409 surface as [`LoaderError::ConflictDetected`].
    pub async fn save_changes(&self, identity: &str) -> LoaderResult<Option<Value>> {
        let entry = self
            .descriptor(identity)
            .ok_or_else(|| LoaderError::NotTracked(identity.to_string()))?;

        let request = match entry.state {
            EntityState::Unchanged => return Ok(None),
            EntityState::Added => self
                .write_request(HttpMethod::Post, &entry.entity_set)
                .body(serde_json::to_vec(&entry.value)?),
            EntityState::Modified => {
                let request = self
                    .write_request(self.config.update_method.http_method(), &entry.identity)
                    .body(serde_json::to_vec(&entry.value)?);
                with_if_match(request, entry.etag.as_deref())
            }
            EntityState::Deleted => {
                with_if_match(self.write_request(HttpMethod::Delete, &entry.identity), entry.etag.as_deref())
            }
        };

        debug!("Saving {:?} entity {}", entry.state, entry.identity);
        let response = self.transport.exchange(request).await?;
        if response.status == 412 || response.status == 409 {
            warn!("Conflict ({}) saving {}", response.status, entry.identity);
            return Err(LoaderError::ConflictDetected {
                status: response.status,
                body: response.body_text(),
            });
        }
        if !response.is_success() {
            return Err(LoaderError::Transport(TransportError::Status {
                status: response.status,
                body: response.body_text(),
            }));
        }

        let echoed = json_body(&response)?;
        let etag = etag_of(&response, echoed.as_ref());
        let mut tracker = self.tracker();
        if entry.state == EntityState::Deleted {
            tracker.entries.remove(identity);
        } else if let Some(tracked) = tracker.entries.get_mut(identity) {
            if let Some(value) = &echoed {
                tracked.value = value.clone();
            }
            if etag.is_some() {
                tracked.etag = etag;
            }
            tracked.state = EntityState::Unchanged;
        }
        Ok(echoed)
    }

    fn write_request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        let request = HttpRequest::new(method, self.transport.resolve(path))
            .header("Accept", JSON)
            .header("Content-Type", JSON_BODY);
        if self.config.return_representation && method != HttpMethod::Delete {
            request.header("Prefer", "return=representation")
        } else {
            request
        }
    }
}

impl std::fmt::Debug for DataServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServiceContext")
            .field("transport", &self.transport)
            .field("tracked", &self.tracked_count())
            .field("merge_mode", &self.merge_mode())
            .finish()
    }
}

fn with_if_match(request: HttpRequest, etag: Option<&str>) -> HttpRequest {
    match etag {
        Some(etag) => request.header("If-Match", etag),
        None => request,
    }
}

fn json_body(response: &HttpResponse) -> LoaderResult<Option<Value>> {
    let text = response.body_text();
    let text = text.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| LoaderError::Payload(format!("response is not JSON: {e}")))
}

/// The entity tag from the `ETag` header, else from the entity's metadata.
pub(crate) fn etag_of(response: &HttpResponse, entity: Option<&Value>) -> Option<String> {
    response
        .header("etag")
        .map(str::to_string)
        .or_else(|| entity.and_then(entity_etag))
}

/// The entity tag embedded in a serialized entity.
pub(crate) fn entity_etag(entity: &Value) -> Option<String> {
    entity
        .get("@odata.etag")
        .or_else(|| entity.get("odata.etag"))
        .or_else(|| entity.get("__metadata").and_then(|m| m.get("etag")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewise_transport::{BackendKind, TransportConfig, TransportFactory};
    use serde_json::json;

    fn context() -> DataServiceContext {
        let transport =
            TransportFactory::create(BackendKind::Buffered, TransportConfig::new("http://svc")).unwrap();
        DataServiceContext::new(Arc::new(transport), LoaderConfig::default())
    }

    #[test]
    fn attach_twice_is_rejected() {
        let ctx = context();
        ctx.attach("Items", "Items(1)", json!({"Id": 1}), None).unwrap();
        let err = ctx.attach("Items", "Items(1)", json!({"Id": 1}), None).unwrap_err();
        assert!(matches!(err, LoaderError::AlreadyTracked(_)));
    }

    #[test]
    fn update_untracked_is_not_tracked() {
        let ctx = context();
        let err = ctx.update_object("Items(9)", json!({})).unwrap_err();
        assert!(matches!(err, LoaderError::NotTracked(_)));
    }

    #[test]
    fn explicit_mode_leaves_context_mode_alone() {
        let ctx = context();
        ctx.attach("Items", "Items(1)", json!({"Id": 1, "Name": "old"}), None).unwrap();
        ctx.update_object("Items(1)", json!({"Id": 1, "Name": "mine"})).unwrap();

        ctx.materialize_with(
            "Items(1)",
            &json!({"Id": 1, "Name": "theirs"}),
            None,
            MergeMode::PreserveLocalChanges,
        )
        .unwrap();
        assert_eq!(ctx.merge_mode(), MergeMode::OverwriteLocal);

        ctx.set_merge_mode(MergeMode::PreserveLocalChanges);
        ctx.materialize_with("Items(1)", &json!({"Id": 1, "Name": "theirs"}), None, MergeMode::OverwriteLocal)
            .unwrap();
        assert_eq!(ctx.merge_mode(), MergeMode::PreserveLocalChanges);
        assert_eq!(ctx.descriptor("Items(1)").unwrap().value["Name"], "theirs");
    }

    #[test]
    fn preserve_keeps_local_values_but_takes_etag() {
        let ctx = context();
        ctx.attach("Items", "Items(1)", json!({"Id": 1, "Name": "old"}), Some("W/\"1\"".into()))
            .unwrap();
        ctx.update_object("Items(1)", json!({"Id": 1, "Name": "mine"})).unwrap();

        ctx.set_merge_mode(MergeMode::PreserveLocalChanges);
        ctx.materialize("Items(1)", &json!({"Id": 1, "Name": "theirs"}), Some("W/\"2\"".into()))
            .unwrap();

        let entry = ctx.descriptor("Items(1)").unwrap();
        assert_eq!(entry.value["Name"], "mine");
        assert_eq!(entry.etag.as_deref(), Some("W/\"2\""));
        assert_eq!(entry.state, EntityState::Modified);
    }

    #[test]
    fn overwrite_replaces_local_values() {
        let ctx = context();
        ctx.attach("Items", "Items(1)", json!({"Id": 1, "Name": "old"}), None).unwrap();
        ctx.update_object("Items(1)", json!({"Id": 1, "Name": "mine"})).unwrap();
        ctx.materialize("Items(1)", &json!({"Id": 1, "Name": "theirs"}), Some("W/\"5\"".into()))
            .unwrap();

        let entry = ctx.descriptor("Items(1)").unwrap();
        assert_eq!(entry.value["Name"], "theirs");
        assert_eq!(entry.state, EntityState::Unchanged);
    }

    #[test]
    fn added_entities_get_distinct_placeholders() {
        let ctx = context();
        let a = ctx.add_object("Items", json!({"Name": "a"}));
        let b = ctx.add_object("Items", json!({"Name": "b"}));
        assert_ne!(a, b);
        assert_eq!(ctx.descriptor(&a).unwrap().state, EntityState::Added);
        assert!(ctx.detach(&a).is_some());
        assert!(!ctx.is_tracking(&a));
    }

    #[test]
    fn etag_from_entity_metadata() {
        assert_eq!(entity_etag(&json!({"@odata.etag": "W/\"1\""})).as_deref(), Some("W/\"1\""));
        assert_eq!(entity_etag(&json!({"odata.etag": "2"})).as_deref(), Some("2"));
        assert_eq!(entity_etag(&json!({"__metadata": {"etag": "3"}})).as_deref(), Some("3"));
        assert_eq!(entity_etag(&json!({"Id": 1})), None);
    }
}
