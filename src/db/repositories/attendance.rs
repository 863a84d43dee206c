use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{day_key, to_u64},
    models::PeriodAttendance,
};

impl Database {
    pub async fn has_attended_today(&self, student_id: &str, period: &str) -> Result<bool> {
        let student_id = student_id.to_string();
        let period = period.to_string();
        self.execute(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM attendance
                     WHERE student_id = ?1 AND periodo = ?2 AND fecha = ?3
                     LIMIT 1",
                    params![student_id, period, day_key(&Local::now())],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    pub async fn record_attendance(&self, student_id: &str, period: &str) -> Result<()> {
        let student_id = student_id.to_string();
        let period = period.to_string();
        self.execute(move |conn| {
            let now = Local::now();
            conn.execute(
                "INSERT INTO attendance (student_id, periodo, fecha, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![student_id, period, day_key(&now), now.to_rfc3339()],
            )
            .with_context(|| format!("failed to record attendance for {student_id}"))?;
            Ok(())
        })
        .await
    }

    /// Records attendance unless the student already has a row for `period`
    /// today. Returns `true` when a new row was written.
    pub async fn mark_present(&self, student_id: &str, period: &str) -> Result<bool> {
        let student_id = student_id.to_string();
        let period = period.to_string();
        self.transaction(move |tx| {
            let now = Local::now();
            let fecha = day_key(&now);
            let already = tx
                .query_row(
                    "SELECT 1 FROM attendance
                     WHERE student_id = ?1 AND periodo = ?2 AND fecha = ?3
                     LIMIT 1",
                    params![student_id, period, fecha],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if already {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO attendance (student_id, periodo, fecha, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![student_id, period, fecha, now.to_rfc3339()],
            )
            .with_context(|| format!("failed to record attendance for {student_id}"))?;
            Ok(true)
        })
        .await
    }

    pub async fn attendance_summary_today(&self) -> Result<Vec<PeriodAttendance>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT periodo, COUNT(DISTINCT student_id)
                 FROM attendance
                 WHERE fecha = ?1
                 GROUP BY periodo
                 ORDER BY periodo",
            )?;

            let mut rows = stmt.query(params![day_key(&Local::now())])?;
            let mut summary = Vec::new();
            while let Some(row) = rows.next()? {
                summary.push(PeriodAttendance {
                    periodo: row.get(0)?,
                    total: to_u64(row.get(1)?, "total")?,
                });
            }
            Ok(summary)
        })
        .await
    }
}
