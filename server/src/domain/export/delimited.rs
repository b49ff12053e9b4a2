//! CSV and TSV encoding

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use super::error_record;
use crate::data::traits::RowStream;
use crate::data::types::Row;

/// Render one JSON value as a delimited-file field
pub fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Quote a field when it holds the delimiter, a quote or a line break
pub fn escape_field(s: &str, delimiter: char) -> String {
    if s.contains(delimiter) || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Buffers delimited lines; the header comes from the first row's keys
pub struct DelimitedEncoder {
    delimiter: char,
    header_written: bool,
    buf: String,
}

impl DelimitedEncoder {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            header_written: false,
            buf: String::new(),
        }
    }

    fn push_line<'a>(&mut self, fields: impl Iterator<Item = &'a str>) {
        let mut first = true;
        for field in fields {
            if !first {
                self.buf.push(self.delimiter);
            }
            first = false;
            self.buf.push_str(&escape_field(field, self.delimiter));
        }
        self.buf.push('\n');
    }

    pub fn push_row(&mut self, row: &Row) {
        if !self.header_written {
            self.push_line(row.keys().map(String::as_str));
            self.header_written = true;
        }
        let values: Vec<String> = row.values().map(field_text).collect();
        self.push_line(values.iter().map(String::as_str));
    }

    /// Terminal in-band error line
    pub fn push_error(&mut self, message: &str) {
        let record = error_record(message).to_string();
        self.push_line(std::iter::once(record.as_str()));
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.buf))
    }
}

/// Encode a row stream, yielding chunks of roughly `high_water_mark` bytes
pub fn encode(
    mut rows: RowStream,
    delimiter: char,
    high_water_mark: usize,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut encoder = DelimitedEncoder::new(delimiter);
        while let Some(item) = rows.next().await {
            match item {
                Ok(row) => encoder.push_row(&row),
                Err(e) => {
                    tracing::warn!(error = %e, "Export stream failed");
                    encoder.push_error(&e.to_string());
                    break;
                }
            }
            if encoder.buffered() >= high_water_mark {
                yield Ok(encoder.take());
            }
        }
        if encoder.buffered() > 0 {
            yield Ok(encoder.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataError;
    use serde_json::json;

    fn row(value: Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    async fn collect(rows: Vec<Result<Row, DataError>>, delimiter: char, hwm: usize) -> Vec<String> {
        encode(futures::stream::iter(rows).boxed(), delimiter, hwm)
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain", ','), "plain");
        assert_eq!(escape_field("a,b", ','), "\"a,b\"");
        assert_eq!(escape_field("a,b", '\t'), "a,b");
        assert_eq!(escape_field("say \"hi\"", ','), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines", '\t'), "\"two\nlines\"");
    }

    #[test]
    fn test_field_text() {
        assert_eq!(field_text(&Value::Null), "");
        assert_eq!(field_text(&json!(2.5)), "2.5");
        assert_eq!(field_text(&json!(true)), "true");
        assert_eq!(field_text(&json!("TX")), "TX");
    }

    #[tokio::test]
    async fn test_csv_header_and_rows() {
        let chunks = collect(
            vec![
                Ok(row(json!({ "state": "TX", "name": "Big, River", "size": 1.5 }))),
                Ok(row(json!({ "state": "OK", "name": null, "size": 2 }))),
            ],
            ',',
            1 << 20,
        )
        .await;
        assert_eq!(
            chunks.concat(),
            "state,name,size\nTX,\"Big, River\",1.5\nOK,,2\n"
        );
    }

    #[tokio::test]
    async fn test_tsv_batches_by_high_water_mark() {
        let rows = (0..5)
            .map(|i| Ok(row(json!({ "id": i, "note": "a,b" }))))
            .collect();
        let chunks = collect(rows, '\t', 8).await;
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat().lines().next(), Some("id\tnote"));
        assert!(chunks.concat().contains("0\ta,b\n"));
    }

    #[tokio::test]
    async fn test_error_written_in_band() {
        let chunks = collect(
            vec![
                Ok(row(json!({ "state": "TX" }))),
                Err(DataError::Decode("connection reset".into())),
                Ok(row(json!({ "state": "OK" }))),
            ],
            ',',
            1 << 20,
        )
        .await;
        let body = chunks.concat();
        assert!(body.starts_with("state\nTX\n"));
        assert!(body.contains("connection reset"));
        assert!(!body.contains("OK"));
    }

    #[tokio::test]
    async fn test_empty_stream_yields_nothing() {
        assert!(collect(Vec::new(), ',', 16).await.is_empty());
    }
}
