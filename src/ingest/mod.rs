//! CSV ingestion for bulk campaign uploads
//!
//! The upload format is open-ended: a header row names the columns, a
//! couple of them are recognized (recording URL, agent identity), and
//! everything else passes through to the job payload untouched.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::JobPayload;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("CSV input is empty")]
    Empty,

    #[error("CSV header row is missing or unreadable")]
    MissingHeader,

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

/// Normalize a header cell to the snake_case key space `JobPayload` expects
fn normalize_header(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut prev_underscore = false;
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_whitespace() || c == '-' {
            if !prev_underscore && !out.is_empty() {
                out.push('_');
                prev_underscore = true;
            }
        } else if c.is_uppercase() {
            if i > 0
                && !prev_underscore
                && trimmed
                    .chars()
                    .nth(i - 1)
                    .map(|p| p.is_lowercase() || p.is_numeric())
                    .unwrap_or(false)
            {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_underscore = false;
        } else {
            out.push(c);
            prev_underscore = c == '_';
        }
    }
    out
}

/// Parse CSV text into one payload per data row, in input order
pub fn parse_csv(input: &str) -> Result<Vec<JobPayload>, IngestError> {
    if input.trim().is_empty() {
        return Err(IngestError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|_| IngestError::MissingHeader)?
        .iter()
        .map(normalize_header)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::MissingHeader);
    }

    let mut payloads = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut columns = BTreeMap::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            if header.is_empty() || value.is_empty() {
                continue;
            }
            columns.insert(header.clone(), value.to_string());
        }
        if columns.is_empty() {
            continue;
        }
        payloads.push(JobPayload::from_map(columns));
    }

    if payloads.is_empty() {
        return Err(IngestError::Empty);
    }

    Ok(payloads)
}

/// Build payloads from pre-parsed rows (the JSON upload path)
pub fn payloads_from_rows(rows: Vec<BTreeMap<String, String>>) -> Vec<JobPayload> {
    rows.into_iter()
        .map(|row| {
            let normalized = row
                .into_iter()
                .map(|(k, v)| (normalize_header(&k), v))
                .collect();
            JobPayload::from_map(normalized)
        })
        .collect()
}
