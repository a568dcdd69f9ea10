//! Structured-text parsing and transactional delivery import.
//!
//! Extraction output is CSV: one header row (discarded) followed by data
//! rows of exactly four fields, `date, schedule, location_type,
//! location_name`. Any bad row rejects the whole payload, so an import
//! either lands completely or not at all.

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::PipelineError;
use crate::models::DeliveryRecord;
use crate::store;

/// Date format of the first column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const FIELD_COUNT: usize = 4;

/// Why a structured-text payload was rejected.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("missing CSV header row")]
    MissingHeader,

    #[error("row {row}: expected 4 fields, found {found}")]
    FieldCount { row: usize, found: usize },

    #[error("row {row}: invalid date '{value}': {source}")]
    InvalidDate {
        row: usize,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Parse extraction output into normalized delivery records.
///
/// Rows are numbered from 1 for the header, so the first data row is row 2.
pub fn parse_deliveries(text: &str) -> Result<Vec<DeliveryRecord>, ParseError> {
    let body = strip_code_fence(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut rows = reader.records();
    match rows.next() {
        Some(header) => {
            header?;
        }
        None => return Err(ParseError::MissingHeader),
    }

    let mut records = Vec::new();
    for (idx, row) in rows.enumerate() {
        let row_no = idx + 2;
        let row = row?;
        if row.len() != FIELD_COUNT {
            return Err(ParseError::FieldCount {
                row: row_no,
                found: row.len(),
            });
        }

        let date = NaiveDate::parse_from_str(&row[0], DATE_FORMAT).map_err(|source| {
            ParseError::InvalidDate {
                row: row_no,
                value: row[0].to_string(),
                source,
            }
        })?;

        records.push(DeliveryRecord::normalized(date, &row[1], &row[2], &row[3]));
    }

    Ok(records)
}

/// Drop a surrounding Markdown code fence (```csv ... ```), if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string on the opening fence line.
    match rest.find('\n') {
        Some(pos) => rest[pos + 1..].trim(),
        None => rest.trim(),
    }
}

/// Insert `records` on `conn`. Case folding already happened in parsing.
pub async fn insert_deliveries(
    conn: &mut SqliteConnection,
    records: &[DeliveryRecord],
) -> Result<u64, PipelineError> {
    let mut written = 0u64;
    for record in records {
        sqlx::query(
            "INSERT INTO deliveries (date, schedule, location_type, location_name) VALUES (?, ?, ?, ?)",
        )
        .bind(record.date.format(DATE_FORMAT).to_string())
        .bind(&record.schedule)
        .bind(&record.location_type)
        .bind(&record.location_name)
        .execute(&mut *conn)
        .await?;
        written += 1;
    }
    Ok(written)
}

/// Write an import's deliveries and mark it completed in one transaction.
///
/// Returns `Ok(false)` without writing anything when the import is no longer
/// pending (for example, a concurrent manual run finished it first).
pub async fn commit_import(
    pool: &SqlitePool,
    import_id: i64,
    records: &[DeliveryRecord],
) -> Result<bool, PipelineError> {
    let mut tx = pool.begin().await?;

    let written = insert_deliveries(&mut *tx, records).await?;

    if !store::mark_completed_on(&mut *tx, import_id, Utc::now()).await? {
        tx.rollback().await?;
        tracing::warn!(import_id, "import no longer pending; deliveries discarded");
        return Ok(false);
    }

    tx.commit().await?;
    tracing::debug!(import_id, deliveries = written, "import committed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_and_normalizes_rows() {
        let text = "date,schedule,location_type,location_name\n\
                    2025-03-14,Matutino,COLONIA,Centro\n\
                    2025-03-14,NOCTURNO,Fraccionamiento,Lomas del Sol\n";
        let records = parse_deliveries(text).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            DeliveryRecord {
                date: date(2025, 3, 14),
                schedule: "matutino".into(),
                location_type: "colonia".into(),
                location_name: "Centro".into(),
            }
        );
        assert_eq!(records[1].schedule, "nocturno");
        assert_eq!(records[1].location_type, "fraccionamiento");
        assert_eq!(records[1].location_name, "Lomas del Sol");
    }

    #[test]
    fn quoted_field_may_contain_commas() {
        let text = "date,schedule,location_type,location_name\n\
                    2025-03-15,vespertino,colonia,\"Reforma, Sección 2\"\n";
        let records = parse_deliveries(text).unwrap();
        assert_eq!(records[0].location_name, "Reforma, Sección 2");
    }

    #[test]
    fn header_only_yields_no_records() {
        let records = parse_deliveries("date,schedule,location_type,location_name\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(
            parse_deliveries("   \n"),
            Err(ParseError::MissingHeader)
        ));
    }

    #[test]
    fn short_row_rejects_whole_payload() {
        let text = "date,schedule,location_type,location_name\n\
                    2025-03-14,matutino,colonia,Centro\n\
                    2025-03-14,matutino,colonia\n";
        match parse_deliveries(text) {
            Err(ParseError::FieldCount { row, found }) => {
                assert_eq!(row, 3);
                assert_eq!(found, 3);
            }
            other => panic!("expected FieldCount error, got {:?}", other),
        }
    }

    #[test]
    fn bad_date_rejects_whole_payload() {
        let text = "date,schedule,location_type,location_name\n\
                    14 de marzo,matutino,colonia,Centro\n";
        assert!(matches!(
            parse_deliveries(text),
            Err(ParseError::InvalidDate { row: 2, .. })
        ));
    }

    #[test]
    fn code_fence_is_ignored() {
        let text = "```csv\ndate,schedule,location_type,location_name\n2025-03-14,matutino,colonia,Centro\n```";
        let records = parse_deliveries(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].location_name, "Centro");
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let text = "date, schedule, location_type, location_name\n2025-03-14, Matutino , COLONIA, Centro \n";
        let records = parse_deliveries(text).unwrap();
        assert_eq!(records[0].schedule, "matutino");
        assert_eq!(records[0].location_name, "Centro");
    }
}
