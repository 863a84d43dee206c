//! Student and face-enrollment records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub nombre: String,
    pub apellido: String,
    pub registro_fecha: Option<NaiveDate>,
    pub imagen_path: Option<String>,
}

impl Student {
    pub fn new(id: &str, nombre: &str, apellido: &str) -> Self {
        Self {
            id: id.to_string(),
            nombre: nombre.to_string(),
            apellido: apellido.to_string(),
            registro_fecha: None,
            imagen_path: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.nombre, self.apellido)
    }
}

/// One stored face embedding, joined with the owner's display name.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFace {
    pub student_id: String,
    pub nombre: String,
    pub embedding: Vec<f32>,
}
