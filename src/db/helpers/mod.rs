use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDate};

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_optional_date(value: Option<String>, field: &str) -> Result<Option<NaiveDate>> {
    match value {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("failed to parse {field}"))
            .map(Some),
        None => Ok(None),
    }
}

/// Calendar day key stored in `fecha` columns (local time, ISO format).
pub fn day_key(at: &DateTime<Local>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

pub fn encode_embedding(embedding: &[f32]) -> Result<String> {
    serde_json::to_string(embedding).context("failed to serialize face embedding")
}

pub fn decode_embedding(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw).context("failed to parse stored face embedding")
}
