use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::data::{ImagePayload, NewScanRecord, ScanRecord, ScanRecordId, StoredScan, VrSceneInfo};
use crate::error::StoreError;

/// Durable home for finished scans.
///
/// Records are written once and never updated in place, only deleted.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Write a finished scan; the store assigns `id` and `created_at`
    async fn persist(&self, record: NewScanRecord) -> Result<StoredScan, StoreError>;

    /// All stored scans, most recent first
    async fn list(&self) -> Result<Vec<ScanRecord>, StoreError>;

    /// Remove one scan
    async fn delete(&self, id: ScanRecordId) -> Result<(), StoreError>;
}

/// The Library manages the SQLite scan database.
/// It stores every persisted scan together with its images (as data URLs).
pub struct Library {
    db_path: PathBuf,
}

impl Library {
    /// Create a Library at the default location and initialize the database.
    ///
    /// The database file is created in the user's data directory:
    /// - Linux: ~/.local/share/artifact-kiosk/scans.db
    /// - macOS: ~/Library/Application Support/artifact-kiosk/scans.db
    /// - Windows: %APPDATA%\artifact-kiosk\scans.db
    pub fn new() -> Result<Self, StoreError> {
        let db_path = Self::default_db_path()
            .ok_or_else(|| StoreError::Database("could not determine user data directory".into()))?;
        Self::open(db_path)
    }

    /// Create a Library backed by a specific database file
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&db_path)?;
        init_schema(&conn)?;

        info!("📁 Scan database initialized at: {}", db_path.display());

        Ok(Library { db_path })
    }

    /// Get the path where the database should be stored
    pub fn default_db_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("artifact-kiosk");
        path.push("scans.db");
        Some(path)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run a blocking database operation on a fresh connection
    ///
    /// rusqlite connections are opened per operation so the store can be shared
    /// between the workflow and any number of in-flight joins.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            op(&mut conn)
        })
        .await?
    }
}

/// Initialize the database schema.
/// Creates all necessary tables and indexes if they don't exist.
fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scans (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            name                  TEXT NOT NULL,
            era                   TEXT NOT NULL,
            description           TEXT NOT NULL,
            usage                 TEXT NOT NULL DEFAULT '',
            conservation_advice   TEXT,
            vr_scene              TEXT NOT NULL DEFAULT '',
            vr_scene_info         TEXT NOT NULL DEFAULT '{}',
            captured_image        TEXT NOT NULL,
            restoration_image     TEXT,
            three_d_design_image  TEXT,
            created_at            INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scans_created_at
         ON scans(created_at DESC)",
        [],
    )?;

    debug!("Scan schema ready");
    Ok(())
}

fn encode_image(image: Option<&ImagePayload>) -> Option<String> {
    image.map(ImagePayload::to_data_url)
}

fn decode_image(column: &str, value: Option<String>) -> Result<Option<ImagePayload>, StoreError> {
    match value.filter(|v| !v.is_empty()) {
        Some(url) => ImagePayload::from_base64(&url)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e))),
        None => Ok(None),
    }
}

/// Raw column values, decoded outside the rusqlite row closure
struct ScanRow {
    id: i64,
    name: String,
    era: String,
    description: String,
    usage: String,
    conservation_advice: Option<String>,
    vr_scene: String,
    vr_scene_info: String,
    captured_image: String,
    restoration_image: Option<String>,
    three_d_design_image: Option<String>,
    created_at: i64,
}

impl ScanRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ScanRow {
            id: row.get(0)?,
            name: row.get(1)?,
            era: row.get(2)?,
            description: row.get(3)?,
            usage: row.get(4)?,
            conservation_advice: row.get(5)?,
            vr_scene: row.get(6)?,
            vr_scene_info: row.get(7)?,
            captured_image: row.get(8)?,
            restoration_image: row.get(9)?,
            three_d_design_image: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<ScanRecord, StoreError> {
        let vr_scene_info: Option<VrSceneInfo> = serde_json::from_str(&self.vr_scene_info).ok();
        let (vr_scene, vr_scene_info) = VrSceneInfo::resolve(Some(&self.vr_scene), vr_scene_info);

        let captured_image = decode_image("captured_image", Some(self.captured_image))?
            .ok_or_else(|| StoreError::Corrupt(format!("scan {} has no captured image", self.id)))?;

        Ok(ScanRecord {
            id: ScanRecordId(self.id),
            created_at: timestamp_to_datetime(self.created_at)?,
            content: NewScanRecord {
                name: self.name,
                era: self.era,
                description: self.description,
                usage: self.usage,
                conservation_advice: self.conservation_advice.filter(|a| !a.is_empty()),
                vr_scene,
                vr_scene_info,
                captured_image,
                restoration_image: decode_image("restoration_image", self.restoration_image)?,
                three_d_design_image: decode_image("three_d_design_image", self.three_d_design_image)?,
            },
        })
    }
}

fn timestamp_to_datetime(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {}", secs)))
}

#[async_trait]
impl ScanStore for Library {
    async fn persist(&self, record: NewScanRecord) -> Result<StoredScan, StoreError> {
        self.with_connection(move |conn| {
            // Whole-second precision, the same resolution the column keeps
            let created_at = timestamp_to_datetime(Utc::now().timestamp())?;
            let scene_info = serde_json::to_string(&record.vr_scene_info)
                .map_err(|e| StoreError::Database(e.to_string()))?;

            conn.execute(
                "INSERT INTO scans (
                    name, era, description, usage, conservation_advice,
                    vr_scene, vr_scene_info, captured_image,
                    restoration_image, three_d_design_image, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    record.name,
                    record.era,
                    record.description,
                    record.usage,
                    record.conservation_advice,
                    record.vr_scene,
                    scene_info,
                    record.captured_image.to_data_url(),
                    encode_image(record.restoration_image.as_ref()),
                    encode_image(record.three_d_design_image.as_ref()),
                    created_at.timestamp(),
                ],
            )?;

            let id = ScanRecordId(conn.last_insert_rowid());
            info!("💾 Stored scan {} ({})", id, record.name);
            Ok(StoredScan { id, created_at })
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ScanRecord>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, era, description, usage, conservation_advice,
                        vr_scene, vr_scene_info, captured_image,
                        restoration_image, three_d_design_image, created_at
                 FROM scans
                 ORDER BY created_at DESC, id DESC",
            )?;

            let rows = stmt
                .query_map([], ScanRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter().map(ScanRow::into_record).collect()
        })
        .await
    }

    async fn delete(&self, id: ScanRecordId) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            let exists = conn
                .query_row("SELECT 1 FROM scans WHERE id = ?1", [id.0], |_| Ok(()))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(id));
            }

            conn.execute("DELETE FROM scans WHERE id = ?1", [id.0])?;
            info!("🗑️  Deleted scan {}", id);
            Ok(())
        })
        .await
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
