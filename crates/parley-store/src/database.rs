//! The SQLite file that mirrors every realm.
//!
//! Opening a [`Database`] always migrates it first; every other module adds
//! its queries as `impl Database` blocks.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// File name of the database inside the application data directory.
pub const DATABASE_FILE_NAME: &str = "parley.db";

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/parley/parley.db`
    /// - macOS:   `~/Library/Application Support/org.parley.parley/parley.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\parley.db`
    pub fn new() -> Result<Self> {
        let db_path = default_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) the database file at `path`, with WAL journaling and
    /// foreign keys enforced.
    pub fn open_at(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Needed to open transactions.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Platform default location of the database file.
pub fn default_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("org", "parley", "parley").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join(DATABASE_FILE_NAME))
}
