//! Typed repository facade over an [`EntityLoader`].

use crate::audit::AuditStamp;
use crate::error::{LoaderError, LoaderResult};
use crate::loader::EntityLoader;
use crate::metadata::{EntityMetadata, KeyPredicate, extract_key};
use crate::page::PaginationResult;
use crate::query::{QueryOption, compose};
use chrono::Utc;
use futures::TryStreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

const AUDIT_TARGET: &str = "pagewise::audit";

/// Create/read/update/delete for one entity type.
///
/// Keys are always taken from [`EntityMetadata::key_fields`].
pub struct Repository<T: EntityMetadata> {
    loader: Arc<EntityLoader>,
    audit_user: Option<String>,
    audit_log: bool,
    _entity: PhantomData<fn() -> T>,
}

/// Fluent builder for a [`Repository`].
pub struct RepositoryBuilder<T: EntityMetadata> {
    loader: Option<Arc<EntityLoader>>,
    audit_user: Option<String>,
    audit_log: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: EntityMetadata> Default for RepositoryBuilder<T> {
    fn default() -> Self {
        Self {
            loader: None,
            audit_user: None,
            audit_log: false,
            _entity: PhantomData,
        }
    }
}

impl<T: EntityMetadata> RepositoryBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loader(mut self, loader: Arc<EntityLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Stamps declared audit columns with `user` on add and update.
    pub fn audit_user(mut self, user: impl Into<String>) -> Self {
        self.audit_user = Some(user.into());
        self
    }

    /// Emits an event on the `pagewise::audit` target after each
    /// successful write.
    pub fn audit_log(mut self, enabled: bool) -> Self {
        self.audit_log = enabled;
        self
    }

    pub fn build(self) -> LoaderResult<Repository<T>> {
        let loader = self
            .loader
            .ok_or_else(|| LoaderError::Precondition("repository requires a loader".to_string()))?;
        Ok(Repository {
            loader,
            audit_user: self.audit_user,
            audit_log: self.audit_log,
            _entity: PhantomData,
        })
    }
}

impl<T: EntityMetadata> Repository<T> {
    pub fn builder() -> RepositoryBuilder<T> {
        RepositoryBuilder::new()
    }

    pub fn loader(&self) -> &Arc<EntityLoader> {
        &self.loader
    }

    /// Inserts `record` and returns its key.
    pub async fn add(&self, record: T) -> LoaderResult<T::Key> {
        let stamp = self
            .audit_user
            .as_deref()
            .map(|user| AuditStamp::for_insert(user, Utc::now()));
        let key = self
            .loader
            .add_record::<T, T::Key, _>(record, |record| match &stamp {
                Some(stamp) => stamped(record, stamp),
                None => Ok(()),
            })
            .await?;
        self.audit("add", &key);
        Ok(key)
    }

    /// Sends the changes of `record` and returns its key.
    pub async fn update(&self, record: &T) -> LoaderResult<T::Key> {
        let key = match self.audit_user.as_deref() {
            Some(user) => {
                let mut copy = serde_json::from_value::<T>(serde_json::to_value(record)?)?;
                stamped(&mut copy, &AuditStamp::for_update(user, Utc::now()))?;
                self.loader.update_record::<T, T::Key>(&copy).await?
            }
            None => self.loader.update_record::<T, T::Key>(record).await?,
        };
        self.audit("update", &key);
        Ok(key)
    }

    /// Deletes the entity with the key of `record` and returns that key.
    pub async fn delete(&self, record: &T) -> LoaderResult<T::Key> {
        let key = self.loader.delete_record::<T, T::Key>(record).await?;
        self.audit("delete", &key);
        Ok(key)
    }

    pub async fn get_by_key(&self, key: &T::Key) -> LoaderResult<Option<T>> {
        let predicate = KeyPredicate::from_key::<T>(key)?;
        self.loader.find_one(&predicate).await
    }

    /// Every entity matching `options`, across all pages.
    pub async fn get_all(&self, options: &[QueryOption]) -> LoaderResult<Vec<T>> {
        let pages: Vec<_> = self
            .loader
            .execute_query::<T>(T::ENTITY_SET, options)
            .try_collect()
            .await?;
        Ok(pages.into_iter().flat_map(|page| page.items).collect())
    }

    /// Page `page_index` (zero-based) of the whole set.
    pub async fn get_page(&self, page_index: u64, page_size: u64) -> LoaderResult<PaginationResult<T>> {
        self.loader
            .get_pagination_data(T::ENTITY_SET, page_index, page_size)
            .await
    }

    /// Page `page_index` (zero-based) of the entities matching `filter`.
    pub async fn get_page_filtered(
        &self,
        filter: &str,
        page_index: u64,
        page_size: u64,
    ) -> LoaderResult<PaginationResult<T>> {
        let base = compose(T::ENTITY_SET, &[QueryOption::filter(filter)]);
        self.loader
            .get_pagination_data(&base, page_index, page_size)
            .await
    }

    /// Number of entities, optionally restricted by a `$filter` expression.
    pub async fn count(&self, filter: Option<&str>) -> LoaderResult<u64> {
        let base = match filter {
            Some(filter) => compose(T::ENTITY_SET, &[QueryOption::filter(filter)]),
            None => T::ENTITY_SET.to_string(),
        };
        self.loader.get_total_records_count(&base).await
    }

    /// The key of `record`.
    pub fn primary_key(&self, record: &T) -> LoaderResult<T::Key> {
        let value = serde_json::to_value(record)?;
        extract_key(T::key_fields(), &value)
    }

    fn audit(&self, operation: &str, key: &T::Key) {
        if self.audit_log {
            info!(
                target: AUDIT_TARGET,
                "{} {} {:?} by {}",
                operation,
                T::ENTITY_SET,
                key,
                self.audit_user.as_deref().unwrap_or("anonymous")
            );
        }
    }
}

impl<T: EntityMetadata> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity_set", &T::ENTITY_SET)
            .field("audit_user", &self.audit_user)
            .field("audit_log", &self.audit_log)
            .finish()
    }
}

/// Applies `stamp` to the declared audit columns of `record`.
fn stamped<T: EntityMetadata>(record: &mut T, stamp: &AuditStamp) -> LoaderResult<()> {
    let columns = T::audit_columns();
    if columns.is_empty() {
        return Ok(());
    }
    let mut value = serde_json::to_value(&*record)?;
    if stamp.apply(&mut value, &columns) > 0 {
        *record = serde_json::from_value(value)?;
    }
    Ok(())
}
