use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use encoding_rs::Encoding;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::errors::ServiceError;

const DEFAULT_CHARSET: &str = "utf-8";
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw upload as received from the multipart form.
#[derive(Debug, Clone)]
pub struct CsvUpload {
    pub bytes: Vec<u8>,
    /// Charset label declared by the client, if any
    pub charset: Option<String>,
}

impl CsvUpload {
    pub fn new(bytes: impl Into<Vec<u8>>, charset: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            charset,
        }
    }

    pub fn utf8(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec(), None)
    }
}

/// Columns a table import accepts.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub allowed: &'static [&'static str],
    pub required: &'static [&'static str],
}

/// Problem found in one cell or one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub column: Option<String>,
    pub message: String,
}

impl RowError {
    pub fn cell(line: usize, column: &str, message: impl Into<String>) -> Self {
        Self {
            line,
            column: Some(column.to_string()),
            message: message.into(),
        }
    }

    pub fn row(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "row {}, column {}: {}", self.line, column, self.message),
            None => write!(f, "row {}: {}", self.line, self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported charset '{0}'")]
    UnknownCharset(String),
    #[error("file is not valid {0} text")]
    Undecodable(String),
    #[error("unknown columns: {}", .0.join(", "))]
    UnknownColumns(Vec<String>),
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("malformed CSV: {0}")]
    Malformed(String),
    #[error("{} invalid rows", .0.len())]
    InvalidRows(Vec<RowError>),
}

impl ImportError {
    /// One message per offending column or row.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::UnknownColumns(columns) => columns
                .iter()
                .map(|c| format!("column {}: unknown column", c))
                .collect(),
            Self::MissingColumns(columns) => columns
                .iter()
                .map(|c| format!("column {}: this column is required", c))
                .collect(),
            Self::InvalidRows(rows) => rows.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl From<ImportError> for ServiceError {
    fn from(err: ImportError) -> Self {
        ServiceError::ImportRejected(err.messages())
    }
}

impl From<Vec<RowError>> for ImportError {
    fn from(rows: Vec<RowError>) -> Self {
        ImportError::InvalidRows(rows)
    }
}

/// Flattens derive-validator failures into per-cell errors for `line`.
pub fn validation_row_errors(line: usize, errors: &validator::ValidationErrors) -> Vec<RowError> {
    let mut out: Vec<RowError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |err| {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value ({})", err.code));
                RowError::cell(line, field, message)
            })
        })
        .collect();
    out.sort_by(|a, b| a.column.cmp(&b.column));
    out
}

/// Decodes the upload using its declared charset, UTF-8 when none is given.
pub fn decode_upload(upload: &CsvUpload) -> Result<String, ImportError> {
    let label = upload
        .charset
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .unwrap_or(DEFAULT_CHARSET);

    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| ImportError::UnknownCharset(label.to_string()))?;

    let (text, had_errors) = encoding.decode_with_bom_removal(&upload.bytes);
    if had_errors {
        return Err(ImportError::Undecodable(encoding.name().to_string()));
    }
    debug!(charset = encoding.name(), bytes = upload.bytes.len(), "Decoded CSV upload");
    Ok(text.into_owned())
}

/// One parsed data row, keyed by header name.
#[derive(Debug, Clone)]
pub struct CsvRow {
    /// 1-based line in the file; the header is line 1
    pub line: usize,
    values: HashMap<String, String>,
}

impl CsvRow {
    /// Cell value, `None` when the column is absent or the cell is blank.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn text(&self, column: &str) -> String {
        self.value(column).map(str::to_string).unwrap_or_default()
    }

    pub fn decimal(&self, column: &str) -> Result<Option<Decimal>, RowError> {
        self.parse_with(column, |raw| {
            Decimal::from_str(raw)
                .or_else(|_| Decimal::from_scientific(raw))
                .map_err(|_| format!("'{}' is not a valid number", raw))
        })
    }

    pub fn integer<T: FromStr>(&self, column: &str) -> Result<Option<T>, RowError> {
        self.parse_with(column, |raw| {
            raw.parse::<T>()
                .map_err(|_| format!("'{}' is not a valid integer", raw))
        })
    }

    pub fn boolean(&self, column: &str) -> Result<Option<bool>, RowError> {
        self.parse_with(column, |raw| match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "t" | "y" => Ok(true),
            "false" | "0" | "no" | "f" | "n" => Ok(false),
            _ => Err(format!("'{}' is not a valid boolean", raw)),
        })
    }

    pub fn timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, RowError> {
        self.parse_with(column, |raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(raw, NAIVE_TIMESTAMP_FORMAT)
                        .map(|naive| naive.and_utc())
                })
                .map_err(|_| format!("'{}' is not a valid timestamp", raw))
        })
    }

    /// `sep`-separated integer list; blank items are skipped.
    pub fn integer_list<T: FromStr>(&self, column: &str, sep: char) -> Result<Vec<T>, RowError> {
        let Some(raw) = self.value(column) else {
            return Ok(Vec::new());
        };
        raw.split(sep)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|_| {
                    RowError::cell(
                        self.line,
                        column,
                        format!("'{}' is not a valid integer", item),
                    )
                })
            })
            .collect()
    }

    fn parse_with<T, F>(&self, column: &str, parse: F) -> Result<Option<T>, RowError>
    where
        F: FnOnce(&str) -> Result<T, String>,
    {
        match self.value(column) {
            None => Ok(None),
            Some(raw) => parse(raw.trim())
                .map(Some)
                .map_err(|msg| RowError::cell(self.line, column, msg)),
        }
    }
}

/// Parses comma-delimited CSV with a header row, checking the header
/// against `schema` before any data row is read.
pub fn read_table(text: &str, schema: &TableSchema) -> Result<Vec<CsvRow>, ImportError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ImportError::Malformed(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    check_headers(&headers, schema)?;

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + 2;
        match record {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|pos| pos.line() as usize)
                    .unwrap_or(line);
                let values = headers
                    .iter()
                    .cloned()
                    .zip(record.iter().map(str::to_string))
                    .collect();
                rows.push(CsvRow { line, values });
            }
            Err(err) => errors.push(RowError::row(line, describe_csv_error(&err))),
        }
    }

    if !errors.is_empty() {
        return Err(ImportError::InvalidRows(errors));
    }
    Ok(rows)
}

fn check_headers(headers: &[String], schema: &TableSchema) -> Result<(), ImportError> {
    let mut seen: Vec<&str> = Vec::with_capacity(headers.len());
    for header in headers {
        if seen.contains(&header.as_str()) {
            return Err(ImportError::DuplicateColumn(header.clone()));
        }
        seen.push(header);
    }

    let unknown: Vec<String> = headers
        .iter()
        .filter(|h| !schema.allowed.contains(&h.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ImportError::UnknownColumns(unknown));
    }

    let missing: Vec<String> = schema
        .required
        .iter()
        .filter(|required| !seen.contains(*required))
        .map(|required| required.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingColumns(missing));
    }
    Ok(())
}

fn describe_csv_error(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} fields, found {}", expected_len, len),
        _ => err.to_string(),
    }
}

/// Renders `header` plus `rows` as CSV text.
pub fn write_table<I>(header: &[&str], rows: I) -> Result<String, ServiceError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(header)
        .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
    for row in rows {
        writer
            .write_record(&row)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ServiceError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    const SCHEMA: TableSchema = TableSchema {
        allowed: &["name", "price", "archived"],
        required: &["name"],
    };

    #[test]
    fn empty_file_yields_no_rows() {
        assert!(read_table("", &SCHEMA).unwrap().is_empty());
        assert!(read_table("name,price\n", &SCHEMA).unwrap().is_empty());
    }

    #[test]
    fn blank_cells_read_as_missing() {
        let rows = read_table("name,price\nIphone 10,\n", &SCHEMA).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].text("name"), "Iphone 10");
        assert_eq!(rows[0].decimal("price").unwrap(), None);
    }

    #[test]
    fn unknown_and_missing_columns_are_reported() {
        assert_matches!(
            read_table("name,colour\nx,red\n", &SCHEMA),
            Err(ImportError::UnknownColumns(cols)) if cols == vec!["colour".to_string()]
        );
        assert_matches!(
            read_table("price\n10\n", &SCHEMA),
            Err(ImportError::MissingColumns(_))
        );
        assert_matches!(
            read_table("name,name\na,b\n", &SCHEMA),
            Err(ImportError::DuplicateColumn(_))
        );
    }

    #[test]
    fn ragged_rows_fail_with_line_numbers() {
        let err = read_table("name,price\na,1\nb,2,3\n", &SCHEMA).unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("row 3:"));
    }

    #[test]
    fn typed_cells_parse_or_name_the_column() {
        let rows = read_table("name,price,archived\nx,12.50,yes\ny,abc,maybe\n", &SCHEMA).unwrap();
        assert_eq!(rows[0].decimal("price").unwrap(), Some(dec!(12.50)));
        assert_eq!(rows[0].boolean("archived").unwrap(), Some(true));

        let err = rows[1].decimal("price").unwrap_err();
        assert_eq!(err.to_string(), "row 3, column price: 'abc' is not a valid number");
        assert!(rows[1].boolean("archived").is_err());
    }

    #[test]
    fn timestamps_accept_rfc3339_and_plain_format() {
        let schema = TableSchema {
            allowed: &["created_at"],
            required: &[],
        };
        let rows = read_table(
            "created_at\n2024-03-01T10:00:00+02:00\n2024-03-01 08:00:00\n",
            &schema,
        )
        .unwrap();
        let a = rows[0].timestamp("created_at").unwrap().unwrap();
        let b = rows[1].timestamp("created_at").unwrap().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decodes_declared_charset() {
        // "Цена" in windows-1251
        let bytes = vec![0xD6, 0xE5, 0xED, 0xE0];
        let upload = CsvUpload::new(bytes, Some("windows-1251".into()));
        assert_eq!(decode_upload(&upload).unwrap(), "Цена");
    }

    #[test]
    fn rejects_unknown_charset_and_bad_utf8() {
        let upload = CsvUpload::new(b"name".to_vec(), Some("klingon".into()));
        assert_matches!(decode_upload(&upload), Err(ImportError::UnknownCharset(_)));

        let upload = CsvUpload::new(vec![b'n', 0xC3, 0x28], None);
        assert_matches!(decode_upload(&upload), Err(ImportError::Undecodable(_)));
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let upload = CsvUpload::new(b"\xEF\xBB\xBFname\nx\n".to_vec(), None);
        let text = decode_upload(&upload).unwrap();
        let rows = read_table(&text, &SCHEMA).unwrap();
        assert_eq!(rows[0].text("name"), "x");
    }

    #[test]
    fn write_table_quotes_when_needed() {
        let csv = write_table(
            &["name", "description"],
            vec![vec!["Phone".to_string(), "fast, small".to_string()]],
        )
        .unwrap();
        assert_eq!(csv, "name,description\nPhone,\"fast, small\"\n");
    }
}
