//! Sync target and sync config repository
//!
//! Sync targets are the artist/playlist URLs the scheduler re-syncs on its
//! interval. The config table holds a single row (id = 1) with the global
//! scheduler settings.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    bool_to_int, int_to_bool, str_to_datetime, str_to_datetime_opt, str_to_uuid, str_to_uuid_opt,
    uuid_to_str,
};

/// One URL the scheduler keeps in sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncTargetRecord {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub thumbnail_url: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_job_id: Option<Uuid>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SyncTargetRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let enabled_int: i32 = row.try_get("enabled")?;
        let created_str: String = row.try_get("created_at")?;
        let last_job_str: Option<String> = row.try_get("last_job_id")?;
        let last_sync_str: Option<String> = row.try_get("last_sync_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            url: row.try_get("url")?,
            name: row.try_get("name")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            enabled: int_to_bool(enabled_int),
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            last_job_id: str_to_uuid_opt(last_job_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            last_sync_at: str_to_datetime_opt(last_sync_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateSyncTarget {
    pub url: String,
    pub name: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateSyncTarget {
    pub name: Option<String>,
    pub enabled: Option<bool>,
}

/// Global scheduler settings, a singleton row.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncConfigRecord {
    pub enabled: bool,
    pub interval_minutes: i64,
}

impl Default for SyncConfigRecord {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
        }
    }
}

const TARGET_COLUMNS: &str =
    "id, url, name, thumbnail_url, enabled, created_at, last_job_id, last_sync_at";

pub struct SyncTargetRepository {
    pool: SqlitePool,
}

impl SyncTargetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: CreateSyncTarget) -> Result<SyncTargetRecord> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO sync_targets (id, url, name, thumbnail_url, enabled, created_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&input.url)
        .bind(&input.name)
        .bind(&input.thumbnail_url)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(SyncTargetRecord {
            id,
            url: input.url,
            name: input.name,
            thumbnail_url: input.thumbnail_url,
            enabled: true,
            created_at,
            last_job_id: None,
            last_sync_at: None,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SyncTargetRecord>> {
        let record = sqlx::query_as::<_, SyncTargetRecord>(&format!(
            "SELECT {TARGET_COLUMNS} FROM sync_targets WHERE id = ?1"
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get_by_url(&self, url: &str) -> Result<Option<SyncTargetRecord>> {
        let record = sqlx::query_as::<_, SyncTargetRecord>(&format!(
            "SELECT {TARGET_COLUMNS} FROM sync_targets WHERE url = ?1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<SyncTargetRecord>> {
        let records = sqlx::query_as::<_, SyncTargetRecord>(&format!(
            "SELECT {TARGET_COLUMNS} FROM sync_targets ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_enabled(&self) -> Result<Vec<SyncTargetRecord>> {
        let records = sqlx::query_as::<_, SyncTargetRecord>(&format!(
            "SELECT {TARGET_COLUMNS} FROM sync_targets WHERE enabled = 1 ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Apply the provided fields; returns the updated record, or None if the
    /// target does not exist.
    pub async fn update(
        &self,
        id: Uuid,
        update: UpdateSyncTarget,
    ) -> Result<Option<SyncTargetRecord>> {
        if let Some(name) = &update.name {
            sqlx::query("UPDATE sync_targets SET name = ?1 WHERE id = ?2")
                .bind(name)
                .bind(uuid_to_str(id))
                .execute(&self.pool)
                .await?;
        }
        if let Some(enabled) = update.enabled {
            sqlx::query("UPDATE sync_targets SET enabled = ?1 WHERE id = ?2")
                .bind(bool_to_int(enabled))
                .bind(uuid_to_str(id))
                .execute(&self.pool)
                .await?;
        }
        self.get(id).await
    }

    /// Returns whether a row was deleted.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_targets WHERE id = ?1")
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record that a sync job was created for this target.
    pub async fn record_sync(&self, id: Uuid, job_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sync_targets SET last_job_id = ?1, last_sync_at = ?2 WHERE id = ?3")
            .bind(uuid_to_str(job_id))
            .bind(at.to_rfc3339())
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_config(&self) -> Result<SyncConfigRecord> {
        use sqlx::Row;
        let row = sqlx::query("SELECT enabled, interval_minutes FROM sync_config WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(SyncConfigRecord {
            enabled: int_to_bool(row.try_get("enabled")?),
            interval_minutes: row.try_get("interval_minutes")?,
        })
    }

    pub async fn update_config(
        &self,
        enabled: Option<bool>,
        interval_minutes: Option<i64>,
    ) -> Result<SyncConfigRecord> {
        if let Some(enabled) = enabled {
            sqlx::query("UPDATE sync_config SET enabled = ?1 WHERE id = 1")
                .bind(bool_to_int(enabled))
                .execute(&self.pool)
                .await?;
        }
        if let Some(interval) = interval_minutes {
            sqlx::query("UPDATE sync_config SET interval_minutes = ?1 WHERE id = 1")
                .bind(interval)
                .execute(&self.pool)
                .await?;
        }
        self.get_config().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn create_list_update_delete_roundtrip() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.sync_targets();

        let target = repo
            .create(CreateSyncTarget {
                url: "https://music.example.com/channel/UCabc".to_string(),
                name: "Some Artist".to_string(),
                thumbnail_url: None,
            })
            .await
            .unwrap();
        assert!(target.enabled);

        let listed = repo.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, target.id);

        let updated = repo
            .update(
                target.id,
                UpdateSyncTarget {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.enabled);
        assert!(repo.list_enabled().await.unwrap().is_empty());

        assert!(repo.delete(target.id).await.unwrap());
        assert!(!repo.delete(target.id).await.unwrap());
    }

    #[tokio::test]
    async fn record_sync_sets_last_job_and_time() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.sync_targets();
        let target = repo
            .create(CreateSyncTarget {
                url: "https://music.example.com/playlist?list=PL1".to_string(),
                name: "Mix".to_string(),
                thumbnail_url: None,
            })
            .await
            .unwrap();

        let job_id = Uuid::new_v4();
        let at = Utc::now();
        repo.record_sync(target.id, job_id, at).await.unwrap();

        let fetched = repo.get(target.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_job_id, Some(job_id));
        assert_eq!(
            fetched.last_sync_at.map(|t| t.timestamp()),
            Some(at.timestamp())
        );
    }

    #[tokio::test]
    async fn config_defaults_and_updates() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.sync_targets();

        let config = repo.get_config().await.unwrap();
        assert!(config.enabled);
        assert_eq!(config.interval_minutes, 60);

        let config = repo.update_config(Some(false), Some(15)).await.unwrap();
        assert!(!config.enabled);
        assert_eq!(config.interval_minutes, 15);
    }

    #[tokio::test]
    async fn duplicate_url_is_rejected() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.sync_targets();
        let input = CreateSyncTarget {
            url: "https://music.example.com/channel/UCdup".to_string(),
            name: "Dup".to_string(),
            thumbnail_url: None,
        };

        repo.create(input.clone()).await.unwrap();
        assert!(repo.create(input).await.is_err());
    }
}
