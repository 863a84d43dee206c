use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema scripts in application order; entry `i` upgrades to version `i + 1`.
const MIGRATIONS: &[&str] = &[
    include_str!("schemas/schema_v1.sql"),
    include_str!("schemas/schema_v2.sql"),
];

const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

fn user_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

/// Brings the schema up to date. Each step commits on its own, so an
/// interrupted upgrade resumes from the last version that succeeded.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version = user_version(conn)?;
    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database schema v{version} is newer than this build understands (v{CURRENT_SCHEMA_VERSION})"
        );
    }

    for (index, script) in MIGRATIONS.iter().enumerate().skip(version.max(0) as usize) {
        let target = index as i32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(script)
            .with_context(|| format!("schema v{target} failed to apply"))?;
        tx.pragma_update(None, "user_version", target)
            .context("failed to update user_version pragma")?;
        tx.commit()
            .with_context(|| format!("failed to commit schema v{target}"))?;
        log::info!("Classroom database upgraded to schema v{target}");
    }

    Ok(())
}
