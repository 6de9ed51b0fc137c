//! # Sync Wave Repository
//!
//! Persists sync waves in the `sync_waves` table. Waves are inserted once,
//! updated in place while they run, and never deleted.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_auth::ChangeSnapshot;
use core_library::WaveId;
use sqlx::{FromRow, SqlitePool};

use crate::wave::{SyncPhase, SyncWave, WaveKind};
use crate::{Result, SyncError};

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait SyncWaveRepository: Send + Sync {
    /// Insert a new wave and return its assigned id
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, wave: &SyncWave) -> Result<WaveId>;

    /// Persist phase, cursor and timestamps of an existing wave
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WaveNotFound` if the wave was never inserted
    async fn update(&self, wave: &SyncWave) -> Result<()>;

    async fn find_by_id(&self, id: WaveId) -> Result<Option<SyncWave>>;

    /// The most recently created wave
    async fn find_latest(&self) -> Result<Option<SyncWave>>;

    /// Most recent waves first
    async fn history(&self, limit: u32) -> Result<Vec<SyncWave>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteSyncWaveRepository {
    pool: SqlitePool,
}

impl SqliteSyncWaveRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a sync wave
#[derive(Debug, FromRow)]
struct SyncWaveRow {
    id: i64,
    kind: String,
    phase: String,
    resume_cursor: i64,
    schema_version: i64,
    snapshot_update: Option<i64>,
    snapshot_add: Option<i64>,
    snapshot_clean: Option<i64>,
    delta_since: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

fn to_unix(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|dt| dt.timestamp())
}

impl TryFrom<SyncWaveRow> for SyncWave {
    type Error = SyncError;

    fn try_from(row: SyncWaveRow) -> Result<Self> {
        let kind: WaveKind = row.kind.parse()?;
        let phase: SyncPhase = row.phase.parse()?;

        Ok(SyncWave {
            id: WaveId(row.id),
            kind,
            phase,
            resume_cursor: row.resume_cursor.max(0) as u64,
            schema_version: row.schema_version.max(0) as u32,
            snapshot: ChangeSnapshot {
                update: from_unix(row.snapshot_update),
                add: from_unix(row.snapshot_add),
                clean: from_unix(row.snapshot_clean),
            },
            delta_since: from_unix(row.delta_since),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, kind, phase, resume_cursor, schema_version,
           snapshot_update, snapshot_add, snapshot_clean,
           delta_since, created_at, updated_at
    FROM sync_waves
"#;

#[async_trait]
impl SyncWaveRepository for SqliteSyncWaveRepository {
    async fn insert(&self, wave: &SyncWave) -> Result<WaveId> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_waves (
                kind, phase, resume_cursor, schema_version,
                snapshot_update, snapshot_add, snapshot_clean,
                delta_since, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(wave.kind.as_str())
        .bind(wave.phase.as_str())
        .bind(wave.resume_cursor as i64)
        .bind(wave.schema_version as i64)
        .bind(to_unix(wave.snapshot.update))
        .bind(to_unix(wave.snapshot.add))
        .bind(to_unix(wave.snapshot.clean))
        .bind(to_unix(wave.delta_since))
        .bind(wave.created_at)
        .bind(wave.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(WaveId(result.last_insert_rowid()))
    }

    async fn update(&self, wave: &SyncWave) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_waves SET
                phase = ?,
                resume_cursor = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(wave.phase.as_str())
        .bind(wave.resume_cursor as i64)
        .bind(wave.updated_at)
        .bind(wave.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::WaveNotFound { wave_id: wave.id.0 });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: WaveId) -> Result<Option<SyncWave>> {
        let row = sqlx::query_as::<_, SyncWaveRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncWave::try_from).transpose()
    }

    async fn find_latest(&self) -> Result<Option<SyncWave>> {
        let row =
            sqlx::query_as::<_, SyncWaveRow>(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT 1"))
                .fetch_optional(&self.pool)
                .await?;

        row.map(SyncWave::try_from).transpose()
    }

    async fn history(&self, limit: u32) -> Result<Vec<SyncWave>> {
        let rows =
            sqlx::query_as::<_, SyncWaveRow>(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?"))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(SyncWave::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SongsPhase;
    use core_library::db::create_test_pool;

    async fn setup() -> SqliteSyncWaveRepository {
        let pool = create_test_pool().await.unwrap();
        SqliteSyncWaveRepository::new(pool)
    }

    fn snapshot() -> ChangeSnapshot {
        ChangeSnapshot {
            update: Some(Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()),
            add: Some(Utc.with_ymd_and_hms(2024, 2, 2, 8, 0, 0).unwrap()),
            clean: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = setup().await;
        let wave = SyncWave::new(WaveKind::Normal, snapshot(), 1, None);

        let id = repo.insert(&wave).await.unwrap();
        assert!(id.0 > 0);

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.phase, SyncPhase::Artists);
        assert_eq!(found.snapshot, snapshot());
        assert!(found.delta_since.is_none());
    }

    #[tokio::test]
    async fn test_update_persists_phase_and_cursor() {
        let repo = setup().await;
        let mut wave = SyncWave::new(WaveKind::Normal, snapshot(), 1, snapshot().add);
        wave.id = repo.insert(&wave).await.unwrap();

        wave.advance(SongsPhase::Skip).unwrap();
        wave.set_cursor(120).unwrap();
        repo.update(&wave).await.unwrap();

        let found = repo.find_by_id(wave.id).await.unwrap().unwrap();
        assert_eq!(found.phase, SyncPhase::Albums);
        assert_eq!(found.resume_cursor, 120);
        assert_eq!(found.delta_since, snapshot().add);
    }

    #[tokio::test]
    async fn test_update_unknown_wave() {
        let repo = setup().await;
        let mut wave = SyncWave::new(WaveKind::Normal, snapshot(), 1, None);
        wave.id = WaveId(999);
        assert!(matches!(
            repo.update(&wave).await,
            Err(SyncError::WaveNotFound { wave_id: 999 })
        ));
    }

    #[tokio::test]
    async fn test_latest_and_history() {
        let repo = setup().await;
        assert!(repo.find_latest().await.unwrap().is_none());

        let first = repo
            .insert(&SyncWave::new(WaveKind::Normal, snapshot(), 1, None))
            .await
            .unwrap();
        let second = repo
            .insert(&SyncWave::new(WaveKind::Migration, snapshot(), 2, None))
            .await
            .unwrap();

        let latest = repo.find_latest().await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.kind, WaveKind::Migration);

        let history = repo.history(10).await.unwrap();
        assert_eq!(
            history.iter().map(|w| w.id).collect::<Vec<_>>(),
            vec![second, first]
        );
    }
}
