use std::collections::BTreeMap;
use std::{fs, path::PathBuf};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// Durable record of one mirrored folder, keyed by its relative path.
/// `files` carries the folder's known child file records so a folder pass
/// touches the index once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub rel_path: String,
    pub gdrive_id: Option<String>,
    pub seen_at: i64,
    pub uploaded_at: Option<i64>,
    pub files: BTreeMap<String, FileRecord>,
}

impl FolderRecord {
    pub fn new(rel_path: impl Into<String>, seen_at: i64) -> Self {
        Self {
            rel_path: rel_path.into(),
            gdrive_id: None,
            seen_at,
            uploaded_at: None,
            files: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub rel_path: String,
    pub folder_path: String,
    pub md5: String,
    pub size: i64,
    pub gdrive_id: Option<String>,
    pub seen_at: i64,
    pub uploaded_at: Option<i64>,
}

pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, IndexError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Fetches a folder record together with its child file records,
    /// ordered by relative path. Lookup is case-insensitive.
    pub async fn get_folder(&self, rel_path: &str) -> Result<Option<FolderRecord>, IndexError> {
        let row = sqlx::query(
            "SELECT rel_path, gdrive_id, seen_at, uploaded_at FROM folders WHERE rel_path = ?1",
        )
        .bind(rel_path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut folder = FolderRecord {
            rel_path: row.try_get("rel_path")?,
            gdrive_id: row.try_get("gdrive_id")?,
            seen_at: row.try_get("seen_at")?,
            uploaded_at: row.try_get("uploaded_at")?,
            files: BTreeMap::new(),
        };

        let rows = sqlx::query(
            "SELECT rel_path, folder_path, md5, size, gdrive_id, seen_at, uploaded_at
             FROM files
             WHERE folder_path = ?1
             ORDER BY rel_path ASC",
        )
        .bind(rel_path)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let record = FileRecord {
                rel_path: row.try_get("rel_path")?,
                folder_path: row.try_get("folder_path")?,
                md5: row.try_get("md5")?,
                size: row.try_get("size")?,
                gdrive_id: row.try_get("gdrive_id")?,
                seen_at: row.try_get("seen_at")?,
                uploaded_at: row.try_get("uploaded_at")?,
            };
            folder.files.insert(record.rel_path.to_lowercase(), record);
        }

        Ok(Some(folder))
    }

    pub async fn insert_folder(&self, folder: &FolderRecord) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO folders (rel_path, gdrive_id, seen_at, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&folder.rel_path)
        .bind(&folder.gdrive_id)
        .bind(folder.seen_at)
        .bind(folder.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_folder(&self, folder: &FolderRecord) -> Result<(), IndexError> {
        sqlx::query(
            "UPDATE folders SET gdrive_id = ?2, seen_at = ?3, uploaded_at = ?4 WHERE rel_path = ?1",
        )
        .bind(&folder.rel_path)
        .bind(&folder.gdrive_id)
        .bind(folder.seen_at)
        .bind(folder.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_file(&self, file: &FileRecord) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO files (rel_path, folder_path, md5, size, gdrive_id, seen_at, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&file.rel_path)
        .bind(&file.folder_path)
        .bind(&file.md5)
        .bind(file.size)
        .bind(&file.gdrive_id)
        .bind(file.seen_at)
        .bind(file.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_file(&self, file: &FileRecord) -> Result<(), IndexError> {
        sqlx::query(
            "UPDATE files SET folder_path = ?2, md5 = ?3, size = ?4, gdrive_id = ?5, seen_at = ?6, uploaded_at = ?7
             WHERE rel_path = ?1",
        )
        .bind(&file.rel_path)
        .bind(&file.folder_path)
        .bind(&file.md5)
        .bind(file.size)
        .bind(&file.gdrive_id)
        .bind(file.seen_at)
        .bind(file.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, IndexError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    pub async fn kv_set(&self, key: &str, value: &str) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn default_db_path() -> Result<PathBuf, IndexError> {
    let mut path = dirs::data_dir().ok_or(IndexError::MissingDataDir)?;
    path.push("gdriveup");
    path.push("index.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_store() -> IndexStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = IndexStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    fn file(rel: &str, folder: &str) -> FileRecord {
        FileRecord {
            rel_path: rel.to_string(),
            folder_path: folder.to_string(),
            md5: "aa".to_string(),
            size: 5,
            gdrive_id: None,
            seen_at: 1_700_000_000,
            uploaded_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_folder_with_files() {
        let store = make_store().await;
        let folder = FolderRecord::new("docs", 1_700_000_000);
        store.insert_folder(&folder).await.unwrap();
        store.insert_file(&file("docs/b.txt", "docs")).await.unwrap();
        store.insert_file(&file("docs/a.txt", "docs")).await.unwrap();

        let fetched = store.get_folder("docs").await.unwrap().unwrap();

        assert_eq!(fetched.rel_path, "docs");
        assert_eq!(fetched.gdrive_id, None);
        let keys: Vec<_> = fetched.files.keys().cloned().collect();
        assert_eq!(keys, vec!["docs/a.txt", "docs/b.txt"]);
    }

    #[tokio::test]
    async fn folder_lookup_is_case_insensitive() {
        let store = make_store().await;
        store
            .insert_folder(&FolderRecord::new("docs", 1))
            .await
            .unwrap();
        store.insert_file(&file("docs/a.txt", "docs")).await.unwrap();

        let fetched = store.get_folder("DOCS").await.unwrap().unwrap();

        assert_eq!(fetched.files.len(), 1);
        assert!(fetched.files.contains_key("docs/a.txt"));
    }

    #[tokio::test]
    async fn update_folder_persists_remote_id() {
        let store = make_store().await;
        let mut folder = FolderRecord::new("docs", 1);
        store.insert_folder(&folder).await.unwrap();

        folder.gdrive_id = Some("d1".to_string());
        folder.uploaded_at = Some(2);
        store.update_folder(&folder).await.unwrap();

        let fetched = store.get_folder("docs").await.unwrap().unwrap();
        assert_eq!(fetched.gdrive_id.as_deref(), Some("d1"));
        assert_eq!(fetched.uploaded_at, Some(2));
    }

    #[tokio::test]
    async fn update_file_persists_upload_state() {
        let store = make_store().await;
        store
            .insert_folder(&FolderRecord::new("docs", 1))
            .await
            .unwrap();
        let mut record = file("docs/a.txt", "docs");
        store.insert_file(&record).await.unwrap();

        record.gdrive_id = Some("f1".to_string());
        record.md5 = "bb".to_string();
        record.size = 9;
        record.uploaded_at = Some(3);
        store.update_file(&record).await.unwrap();

        let fetched = store.get_folder("docs").await.unwrap().unwrap();
        let fetched = fetched.files.get("docs/a.txt").unwrap();
        assert_eq!(fetched.gdrive_id.as_deref(), Some("f1"));
        assert_eq!(fetched.md5, "bb");
        assert_eq!(fetched.size, 9);
        assert_eq!(fetched.uploaded_at, Some(3));
    }

    #[tokio::test]
    async fn kv_roundtrip_and_overwrite() {
        let store = make_store().await;
        assert_eq!(store.kv_get("oauth_token").await.unwrap(), None);

        store.kv_set("oauth_token", "t-1").await.unwrap();
        store.kv_set("oauth_token", "t-2").await.unwrap();

        assert_eq!(
            store.kv_get("oauth_token").await.unwrap().as_deref(),
            Some("t-2")
        );
    }
}
