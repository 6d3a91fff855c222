//! Schema migrations.
//!
//! Each entry of [`MIGRATIONS`] upgrades the schema by one version and is
//! applied in its own transaction together with the `user_version` bump, so
//! an interrupted upgrade never leaves a half-migrated file behind.

pub mod v001_initial;

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

type Migration = (u32, &'static str, fn(&Connection) -> rusqlite::Result<()>);

const MIGRATIONS: &[Migration] = &[(1, "v001_initial", v001_initial::up)];

/// Schema version of a fully migrated database.
pub const CURRENT_VERSION: u32 = 1;

/// Bring the schema of `conn` up to [`CURRENT_VERSION`].
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{found} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    for &(version, name, up) in MIGRATIONS.iter().filter(|(v, _, _)| *v > found) {
        info!(migration = name, version, "applying migration");
        let tx = conn.transaction()?;
        up(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}
