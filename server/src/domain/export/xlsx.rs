//! Spreadsheet export
//!
//! A blocking writer pulls rows and streams a single-sheet Office Open XML
//! workbook straight into the response body. Zip entries carry trailing data
//! descriptors, so nothing is rewritten and nothing is spooled. Strings are
//! written as inline strings, so no shared-string table is held in memory.

use std::io::{self, Seek, Write};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ExportError, error_record};
use crate::core::constants::XLSX_CHANNEL_CAPACITY;
use crate::data::traits::RowStream;
use crate::data::types::Row;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const SHEET_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#;

const SHEET_TAIL: &str = "</sheetData></worksheet>";

pub const SHEET_PATH: &str = "xl/worksheets/sheet1.xml";

/// Spreadsheet column name for a 0-based index (`A`, `Z`, `AA`, ...)
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Escape text content, dropping control characters XML cannot carry
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn cell_xml(reference: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(format!(r#"<c r="{}"><v>{}</v></c>"#, reference, n)),
        Value::Bool(b) => Some(format!(
            r#"<c r="{}" t="b"><v>{}</v></c>"#,
            reference,
            u8::from(*b)
        )),
        Value::String(s) => Some(inline_string(reference, s)),
        other => Some(inline_string(reference, &other.to_string())),
    }
}

fn inline_string(reference: &str, text: &str) -> String {
    format!(
        r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        reference,
        escape_xml(text)
    )
}

/// Incremental single-sheet workbook writer
pub struct SheetWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    header_written: bool,
    next_row: u32,
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

impl<W: Write + Seek> SheetWriter<W> {
    /// Write the fixed package parts and open the sheet entry
    pub fn start(mut zip: ZipWriter<W>) -> Result<Self, ExportError> {
        for (path, content) in [
            ("[Content_Types].xml", CONTENT_TYPES),
            ("_rels/.rels", ROOT_RELS),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ] {
            zip.start_file(path, entry_options())?;
            zip.write_all(content.as_bytes())?;
        }
        zip.start_file(SHEET_PATH, entry_options())?;
        zip.write_all(SHEET_HEAD.as_bytes())?;

        Ok(Self {
            zip,
            header_written: false,
            next_row: 1,
        })
    }

    fn write_cells<'a>(&mut self, values: impl Iterator<Item = &'a Value>) -> Result<(), ExportError> {
        let r = self.next_row;
        let mut xml = format!(r#"<row r="{}">"#, r);
        for (i, value) in values.enumerate() {
            let reference = format!("{}{}", column_letter(i), r);
            if let Some(cell) = cell_xml(&reference, value) {
                xml.push_str(&cell);
            }
        }
        xml.push_str("</row>");
        self.zip.write_all(xml.as_bytes())?;
        self.next_row += 1;
        Ok(())
    }

    pub fn write_row(&mut self, row: &Row) -> Result<(), ExportError> {
        if !self.header_written {
            let header: Vec<Value> = row.keys().map(|k| Value::String(k.clone())).collect();
            self.write_cells(header.iter())?;
            self.header_written = true;
        }
        self.write_cells(row.values())
    }

    /// Terminal in-band error row
    pub fn write_error(&mut self, message: &str) -> Result<(), ExportError> {
        let record = Value::String(error_record(message).to_string());
        self.write_cells(std::iter::once(&record))
    }

    pub fn finish(mut self) -> Result<W, ExportError> {
        self.zip.write_all(SHEET_TAIL.as_bytes())?;
        Ok(self.zip.finish()?)
    }
}

type Chunk = io::Result<Vec<u8>>;

/// `Write` end of the response body; bytes go out in chunks of at least
/// `high_water_mark`, and a dropped body surfaces as `BrokenPipe`.
struct ChannelSink {
    tx: mpsc::Sender<Chunk>,
    buf: Vec<u8>,
    high_water_mark: usize,
}

impl ChannelSink {
    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.high_water_mark));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.high_water_mark {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Encode `rows` as a workbook, yielding bytes while rows are still arriving
pub fn stream(rows: RowStream, high_water_mark: usize) -> impl Stream<Item = Chunk> {
    let (tx, mut rx) = mpsc::channel::<Chunk>(XLSX_CHANNEL_CAPACITY);
    let errors = tx.clone();
    let handle = tokio::runtime::Handle::current();

    tokio::task::spawn_blocking(move || {
        let sink = ChannelSink {
            tx,
            buf: Vec::with_capacity(high_water_mark),
            high_water_mark: high_water_mark.max(1),
        };
        match write_workbook(&handle, rows, sink) {
            Ok(written) => tracing::debug!(rows = written, "Spreadsheet streamed"),
            Err(e) if is_disconnect(&e) => {
                tracing::debug!("Spreadsheet download abandoned by client");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Spreadsheet export failed");
                let _ = errors.blocking_send(Err(io::Error::other(e.to_string())));
            }
        }
    });

    async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    }
}

fn is_disconnect(e: &ExportError) -> bool {
    let io = match e {
        ExportError::Io(e) => e,
        ExportError::Zip(ZipError::Io(e)) => e,
        _ => return false,
    };
    io.kind() == io::ErrorKind::BrokenPipe
}

fn write_workbook(
    handle: &tokio::runtime::Handle,
    mut rows: RowStream,
    sink: ChannelSink,
) -> Result<u64, ExportError> {
    let mut sheet = SheetWriter::start(ZipWriter::new_stream(sink))?;
    let mut written = 0u64;
    while let Some(item) = handle.block_on(rows.next()) {
        match item {
            Ok(row) => {
                sheet.write_row(&row)?;
                written += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Export stream failed");
                sheet.write_error(&e.to_string())?;
                break;
            }
        }
    }
    drop(rows);
    sheet.finish()?.flush()?;
    Ok(written)
}
