use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::video::VideoRecord;

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

// Display-only; never reconciled against the server.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub videos: Vec<VideoRecord>,
    pub current_index: usize,
    pub saved_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn new(videos: Vec<VideoRecord>, current_index: usize) -> Self {
        Self {
            videos,
            current_index,
            saved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn save_snapshot(&self, snapshot: &FeedSnapshot) -> Result<()> {
        let videos =
            serde_json::to_string(&snapshot.videos).context("storage: encode snapshot videos")?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO feed_snapshot (slot, videos, current_index, saved_at)
VALUES (1, ?1, ?2, ?3)
ON CONFLICT(slot) DO UPDATE SET
  videos = excluded.videos,
  current_index = excluded.current_index,
  saved_at = excluded.saved_at
"#,
            params![
                videos,
                snapshot.current_index as i64,
                snapshot.saved_at.timestamp(),
            ],
        )
        .context("storage: save snapshot")?;
        debug!(len = snapshot.videos.len(), index = snapshot.current_index, "snapshot saved");
        Ok(())
    }

    // A row that no longer decodes is treated as absent.
    pub fn load_snapshot(&self) -> Result<Option<FeedSnapshot>> {
        let conn = self.conn.lock();
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT videos, current_index, saved_at FROM feed_snapshot WHERE slot = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("storage: query snapshot")?;

        let Some((videos, current_index, saved_at)) = row else {
            return Ok(None);
        };
        let videos: Vec<VideoRecord> = match serde_json::from_str(&videos) {
            Ok(videos) => videos,
            Err(err) => {
                debug!("discarding undecodable snapshot: {err}");
                return Ok(None);
            }
        };
        Ok(Some(FeedSnapshot {
            videos,
            current_index: usize::try_from(current_index).unwrap_or(0),
            saved_at: Utc
                .timestamp_opt(saved_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS feed_snapshot (
  slot INTEGER PRIMARY KEY CHECK (slot = 1),
  videos TEXT NOT NULL,
  current_index INTEGER NOT NULL,
  saved_at INTEGER NOT NULL
);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("groovi").join("state.db"))
}
