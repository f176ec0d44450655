use crate::ebay::listing::ListingRow;
use crate::ebay::schema::HeaderSchema;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer flush failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv output was not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Header row first, then one record per row, `\n` terminated.
pub fn write_csv(schema: &HeaderSchema, rows: &[ListingRow]) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(&schema.columns)?;
    for row in rows {
        writer.write_record(row.values())?;
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn export_filename(now: DateTime<Utc>) -> String {
    format!("chatbay-ebay-export-{}.csv", now.format("%Y%m%d-%H%M%S"))
}

/// First `max_chars` characters, for chat surfaces that show a preview.
pub fn csv_preview(csv_text: &str, max_chars: usize) -> String {
    csv_text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn writes_header_then_rows_with_quoting() {
        let schema = HeaderSchema {
            name: "mini".into(),
            columns: vec!["Action(SiteID=US|Country=US)".into(), "Description".into()],
            photo_separator: "|",
        };
        let row = ListingRow::project(
            &schema,
            &[
                ("Action", "Add".to_string()),
                ("Description", "<p>Soft, \"vintage\"</p>".to_string()),
            ],
        );
        let text = write_csv(&schema, &[row]).unwrap();
        assert_eq!(
            text,
            "Action(SiteID=US|Country=US),Description\nAdd,\"<p>Soft, \"\"vintage\"\"</p>\"\n"
        );
    }

    #[test]
    fn header_only_when_no_rows() {
        let schema = HeaderSchema::file_exchange();
        let text = write_csv(&schema, &[]).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("Action(SiteID=US|Country=US|Currency=USD|Version=1193),"));
    }

    #[test]
    fn filename_is_timestamped() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(export_filename(now), "chatbay-ebay-export-20260304-050607.csv");
    }
}
