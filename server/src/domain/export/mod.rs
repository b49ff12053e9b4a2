//! Streaming export engine
//!
//! Turns a pull-based row stream into an HTTP body in the requested file
//! format. The body pulls rows as the client reads, so a dropped response
//! drops the stream and its database connection.

pub mod delimited;
pub mod json;
pub mod xlsx;

use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use serde_json::{Value, json};
use thiserror::Error;

use crate::data::traits::RowStream;
use crate::domain::query::ExportFormat;

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const TSV_CONTENT_TYPE: &str = "text/tab-separated-values";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid response header: {0}")]
    Header(String),
}

/// The record written in place of a row when the stream fails mid-way
pub fn error_record(message: &str) -> Value {
    json!({ "error": message })
}

pub fn content_type(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Csv => CSV_CONTENT_TYPE,
        ExportFormat::Tsv => TSV_CONTENT_TYPE,
        ExportFormat::Xlsx => XLSX_CONTENT_TYPE,
    }
}

pub fn content_disposition(table_name: &str, format: ExportFormat) -> String {
    format!("attachment; filename={}.{}", table_name, format.extension())
}

/// Build a file-download response for `rows`
pub fn respond(
    format: ExportFormat,
    table_name: &str,
    rows: RowStream,
    high_water_mark: usize,
) -> Result<Response, ExportError> {
    let body = match format {
        ExportFormat::Csv => Body::from_stream(delimited::encode(rows, ',', high_water_mark)),
        ExportFormat::Tsv => Body::from_stream(delimited::encode(rows, '\t', high_water_mark)),
        ExportFormat::Xlsx => Body::from_stream(xlsx::stream(rows, high_water_mark)),
    };

    let disposition = HeaderValue::from_str(&content_disposition(table_name, format))
        .map_err(|e| ExportError::Header(e.to_string()))?;
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type(format)),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    tracing::debug!(table = %table_name, %format, "Streaming export");
    Ok(response)
}
