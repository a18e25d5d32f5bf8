use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use super::{
    Collection, MIGRATION_001_INITIAL, ObjectStore, StoreError, ensure_id, merge_fields,
};

/// Object store backed by SQLite: one table of JSON documents per collection.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in MIGRATION_001_INITIAL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run migration 001")?;
        }
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> anyhow::Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Create (if needed) and migrate the database file at `path`.
    pub async fn init_path(path: &str) -> anyhow::Result<Self> {
        Self::init(&format!("sqlite:{}?mode=rwc", path)).await
    }

    /// Open an existing database file at `path`.
    pub async fn open_path(path: &str) -> anyhow::Result<Self> {
        Self::connect(&format!("sqlite:{}", path))
            .await
            .with_context(|| format!("Failed to open {}. Run `saldo init` first", path))
    }

    async fn fetch(&self, collection: Collection, id: &str) -> Result<Value, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT body FROM {} WHERE id = ?",
            collection.as_str()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch document from {}", collection))?;

        match row {
            Some(row) => Self::row_to_document(&row),
            None => Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            }),
        }
    }

    async fn write_body(
        &self,
        collection: Collection,
        id: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        let result = sqlx::query(&format!(
            "UPDATE {} SET body = ? WHERE id = ?",
            collection.as_str()
        ))
        .bind(&body)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update document in {}", collection))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Value, StoreError> {
        let body: String = row.get("body");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn create(
        &self,
        collection: Collection,
        mut document: Value,
    ) -> Result<Value, StoreError> {
        let id = ensure_id(&mut document)?;
        let body = serde_json::to_string(&document)?;

        let result = sqlx::query(&format!(
            "INSERT INTO {} (id, body) VALUES (?, ?)",
            collection.as_str()
        ))
        .bind(&id)
        .bind(&body)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(document),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::Conflict { collection, id })
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("Failed to insert document into {}", collection))
                .into()),
        }
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &str,
        mut document: Value,
    ) -> Result<Value, StoreError> {
        if let Some(object) = document.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.write_body(collection, id, &document).await?;
        Ok(document)
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Value,
    ) -> Result<Value, StoreError> {
        let mut document = self.fetch(collection, id).await?;
        merge_fields(&mut document, fields)?;
        self.write_body(collection, id, &document).await?;
        Ok(document)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", collection.as_str()))
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete document from {}", collection))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT body FROM {} ORDER BY seq",
            collection.as_str()
        ))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list {}", collection))?;

        rows.iter().map(Self::row_to_document).collect()
    }
}
