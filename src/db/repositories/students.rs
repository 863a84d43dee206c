use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{day_key, decode_embedding, encode_embedding, parse_optional_date},
    models::{KnownFace, Student},
};

fn row_to_student(row: &Row) -> Result<Student> {
    let registro_fecha: Option<String> = row.get("registro_fecha")?;

    Ok(Student {
        id: row.get("id")?,
        nombre: row.get("nombre")?,
        apellido: row.get("apellido")?,
        registro_fecha: parse_optional_date(registro_fecha, "registro_fecha")?,
        imagen_path: row.get("imagen_path")?,
    })
}

impl Database {
    /// Inserts a student together with their face embeddings in one transaction.
    /// `registro_fecha` defaults to today when the record leaves it empty.
    pub async fn insert_student(&self, student: &Student, embeddings: &[Vec<f32>]) -> Result<()> {
        let record = student.clone();
        let encoded = embeddings
            .iter()
            .map(|embedding| encode_embedding(embedding))
            .collect::<Result<Vec<_>>>()?;

        self.execute(move |conn| {
            let registro_fecha = record
                .registro_fecha
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| day_key(&Local::now()));

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO students (id, nombre, apellido, registro_fecha, imagen_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.nombre,
                    record.apellido,
                    registro_fecha,
                    record.imagen_path,
                ],
            )
            .with_context(|| format!("failed to insert student {}", record.id))?;

            for embedding in &encoded {
                tx.execute(
                    "INSERT INTO face_embeddings (student_id, embedding) VALUES (?1, ?2)",
                    params![record.id, embedding],
                )?;
            }

            tx.commit().context("failed to commit student insert")?;
            Ok(())
        })
        .await
    }

    pub async fn get_student_by_id(&self, student_id: &str) -> Result<Option<Student>> {
        let student_id = student_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, nombre, apellido, registro_fecha, imagen_path
                 FROM students
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![student_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_student(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_students(&self) -> Result<Vec<Student>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, nombre, apellido, registro_fecha, imagen_path
                 FROM students
                 ORDER BY apellido, nombre",
            )?;

            let mut rows = stmt.query([])?;
            let mut students = Vec::new();
            while let Some(row) = rows.next()? {
                students.push(row_to_student(row)?);
            }
            Ok(students)
        })
        .await
    }

    /// Every enrolled embedding, one entry per embedding (a student may have several).
    pub async fn known_faces(&self) -> Result<Vec<KnownFace>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.student_id, s.nombre, f.embedding
                 FROM face_embeddings f
                 JOIN students s ON s.id = f.student_id
                 ORDER BY f.rowid",
            )?;

            let mut rows = stmt.query([])?;
            let mut faces = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row.get(2)?;
                faces.push(KnownFace {
                    student_id: row.get(0)?,
                    nombre: row.get(1)?,
                    embedding: decode_embedding(&raw)?,
                });
            }
            Ok(faces)
        })
        .await
    }

    /// Deletes a student and, through cascades, their embeddings and records.
    /// Returns the stored image path so the caller can remove the file.
    /// Deletes the student with their embeddings, attendance and participation
    /// rows. Returns the removed record, or `None` when no such student exists.
    pub async fn delete_student(&self, student_id: &str) -> Result<Option<Student>> {
        let student_id = student_id.to_string();
        self.transaction(move |tx| {
            let removed = tx
                .query_row(
                    "SELECT id, nombre, apellido, registro_fecha, imagen_path
                     FROM students
                     WHERE id = ?1",
                    params![student_id],
                    |row| Ok(row_to_student(row)),
                )
                .optional()?
                .transpose()?;

            if removed.is_some() {
                tx.execute("DELETE FROM students WHERE id = ?1", params![student_id])
                    .with_context(|| format!("failed to delete student {student_id}"))?;
            }
            Ok(removed)
        })
        .await
    }
}
