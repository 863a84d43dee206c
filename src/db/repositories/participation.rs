use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{day_key, to_u64},
    models::PeriodParticipation,
};

impl Database {
    pub async fn record_participation(&self, student_id: &str, period: &str) -> Result<()> {
        let student_id = student_id.to_string();
        let period = period.to_string();
        self.execute(move |conn| {
            let now = Local::now();
            conn.execute(
                "INSERT INTO participation (student_id, periodo, fecha, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![student_id, period, day_key(&now), now.to_rfc3339()],
            )
            .with_context(|| format!("failed to record participation for {student_id}"))?;
            Ok(())
        })
        .await
    }

    pub async fn participation_summary_today(&self) -> Result<Vec<PeriodParticipation>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT periodo, COUNT(DISTINCT student_id), COUNT(student_id)
                 FROM participation
                 WHERE fecha = ?1
                 GROUP BY periodo
                 ORDER BY periodo",
            )?;

            let mut rows = stmt.query(params![day_key(&Local::now())])?;
            let mut summary = Vec::new();
            while let Some(row) = rows.next()? {
                summary.push(PeriodParticipation {
                    periodo: row.get(0)?,
                    total_participantes: to_u64(row.get(1)?, "total_participantes")?,
                    total_participaciones: to_u64(row.get(2)?, "total_participaciones")?,
                });
            }
            Ok(summary)
        })
        .await
    }

    /// All-time durable participation events for one student.
    pub async fn participation_count_for(&self, student_id: &str) -> Result<u64> {
        let student_id = student_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM participation WHERE student_id = ?1",
                params![student_id],
                |row| row.get(0),
            )?;
            to_u64(count, "participation count")
        })
        .await
    }
}
