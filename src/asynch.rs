//! Async facade (§9 design note): thin `tokio::task::spawn_blocking`
//! wrappers around `Database`. Identical semantics to the sync engine — no
//! separate async transaction manager, no separate locking model — since
//! the storage kernel itself is synchronous and page-cache-bound, not I/O-
//! bound in a way async scheduling would help.

use std::sync::Arc;

use crate::catalog::IndexDescriptor;
use crate::db::Database;
use crate::document::{PolymorphicId, Value};
use crate::errors::{DbError, Result};
use crate::index::{IndexKind, Predicate};
use crate::types::OpenConfig;

/// An async handle over a `Database` running on tokio's blocking thread
/// pool. Clone is cheap (an `Arc` bump); every method spawns one blocking
/// task and awaits it.
#[derive(Clone)]
pub struct AsyncDatabase {
    inner: Arc<Database>,
}

async fn run_blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(_) => Err(DbError::Cancelled),
    }
}

impl AsyncDatabase {
    pub async fn open(path: impl AsRef<std::path::Path> + Send + 'static, config: OpenConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = run_blocking(move || Database::open(path, config)).await?;
        Ok(Self { inner: Arc::new(inner) })
    }

    pub async fn create_collection(&self, name: String) -> Result<()> {
        let db = self.inner.clone();
        run_blocking(move || db.create_collection(&name)).await
    }

    pub async fn insert(&self, collection: String, fields: Vec<(String, Value)>) -> Result<PolymorphicId> {
        let db = self.inner.clone();
        run_blocking(move || db.insert(&collection, fields)).await
    }

    pub async fn find_by_id(&self, collection: String, id: PolymorphicId) -> Result<Option<Vec<(String, Value)>>> {
        let db = self.inner.clone();
        run_blocking(move || db.find_by_id(&collection, &id)).await
    }

    pub async fn find_all(&self, collection: String) -> Result<Vec<Vec<(String, Value)>>> {
        let db = self.inner.clone();
        run_blocking(move || db.find_all(&collection)).await
    }

    pub async fn scan(&self, collection: String, index_name: String, predicate: Predicate) -> Result<Vec<Vec<(String, Value)>>> {
        let db = self.inner.clone();
        run_blocking(move || db.scan(&collection, &index_name, &predicate)).await
    }

    pub async fn update(&self, collection: String, id: PolymorphicId, fields: Vec<(String, Value)>) -> Result<bool> {
        let db = self.inner.clone();
        run_blocking(move || db.update(&collection, &id, fields)).await
    }

    pub async fn delete(&self, collection: String, id: PolymorphicId) -> Result<bool> {
        let db = self.inner.clone();
        run_blocking(move || db.delete(&collection, &id)).await
    }

    pub async fn count(&self, collection: String) -> Result<usize> {
        let db = self.inner.clone();
        run_blocking(move || db.count(&collection)).await
    }

    pub async fn create_index(&self, collection: String, name: String, field_paths: Vec<String>, kind: IndexKind, unique: bool) -> Result<()> {
        let db = self.inner.clone();
        run_blocking(move || db.create_index(&collection, &name, field_paths, kind, unique)).await
    }

    pub async fn drop_index(&self, collection: String, name: String) -> Result<()> {
        let db = self.inner.clone();
        run_blocking(move || db.drop_index(&collection, &name)).await
    }

    pub async fn list_indexes(&self, collection: String) -> Result<Vec<IndexDescriptor>> {
        let db = self.inner.clone();
        run_blocking(move || db.list_indexes(&collection)).await
    }

    pub async fn backup(&self, dest_path: impl AsRef<std::path::Path> + Send + 'static) -> Result<()> {
        let db = self.inner.clone();
        run_blocking(move || db.backup(dest_path)).await
    }
}
