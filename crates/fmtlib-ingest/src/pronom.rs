//! Streaming reader for DROID signature files.
//!
//! The signature file is parsed in a single pass. Only the header context
//! and the one format currently open are held in memory; each format is
//! handed to the sink as soon as its element closes.

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{json, Value as JsonValue};
use tokio::io::AsyncBufRead;
use tracing::trace;

use fmtlib_core::{defaults, Error, Record, Result};

use crate::date::parse_catalog_date;
use crate::sink::FormatSink;

const SIGNATURE_FILE: &str = "FFSignatureFile";
const FILE_FORMAT: &str = "FileFormat";
const EXTENSION: &str = "Extension";

/// The per-format page for a PUID.
pub fn format_url(puid: &str) -> String {
    format!("{}{}", defaults::PRONOM_FORMAT_URL, puid)
}

/// Header context shared by every format in the file.
#[derive(Debug, Clone, Default)]
struct Header {
    version: Option<String>,
    created: Option<NaiveDate>,
}

/// Event handler building one record per `FileFormat` element.
#[derive(Debug, Default)]
pub struct SignatureHandler {
    header: Header,
    pending: Option<Record>,
    extensions: Vec<String>,
    in_extension: bool,
}

impl SignatureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// An element opened.
    pub fn start(&mut self, name: &str, attrs: &[(String, String)]) -> Result<()> {
        let attr = |key: &str| {
            attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        match name {
            SIGNATURE_FILE => {
                self.header.version = attr("Version").map(str::to_string);
                self.header.created = attr("DateCreated").map(parse_catalog_date).transpose()?;
            }
            FILE_FORMAT => {
                let created = self.header.created.ok_or_else(|| {
                    Error::Parse(format!("{} before {} header", FILE_FORMAT, SIGNATURE_FILE))
                })?;
                let puid = attr("PUID")
                    .ok_or_else(|| Error::Parse(format!("{} without PUID", FILE_FORMAT)))?;
                let mimetypes: Vec<&str> = attr("MIMEType")
                    .map(|m| m.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
                    .unwrap_or_default();

                let record = json!({
                    "source": defaults::PRONOM_SOURCE,
                    "source_version": self.header.version,
                    "created_at": created.format("%Y-%m-%d").to_string(),
                    "uid": puid,
                    "name": attr("Name"),
                    "url": format_url(puid),
                    "mimetypes": mimetypes,
                    "version": attr("Version"),
                });
                if let JsonValue::Object(record) = record {
                    self.pending = Some(record);
                }
                self.extensions.clear();
            }
            EXTENSION => self.in_extension = self.pending.is_some(),
            _ => {}
        }
        Ok(())
    }

    /// Character data inside the innermost open element.
    pub fn text(&mut self, text: &str) {
        if self.in_extension {
            let value = text.trim();
            if !value.is_empty() {
                self.extensions.push(value.to_string());
            }
        }
    }

    /// An element closed. Returns the finished record on `FileFormat`.
    pub fn end(&mut self, name: &str) -> Option<Record> {
        match name {
            EXTENSION => {
                self.in_extension = false;
                None
            }
            FILE_FORMAT => {
                let mut record = self.pending.take()?;
                record.insert(
                    "extensions".to_string(),
                    JsonValue::from(std::mem::take(&mut self.extensions)),
                );
                Some(record)
            }
            _ => None,
        }
    }
}

fn local_name(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| Error::Parse(format!("Invalid UTF-8 element name: {}", e)))
}

fn attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| Error::Parse(format!("Bad attribute: {}", e)))?;
            let key = local_name(attr.key.local_name().as_ref())?;
            let value = attr
                .unescape_value()
                .map_err(|e| Error::Parse(format!("Bad attribute value: {}", e)))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

/// Parse a signature file from `reader`, handing every format to `sink`.
///
/// `committed` counts the records the sink accepted, so the caller can report
/// how far a failed run got.
pub async fn ingest_signature_file<R, S>(
    reader: R,
    sink: &S,
    committed: &mut usize,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: FormatSink + ?Sized,
{
    let mut reader = Reader::from_reader(reader);
    reader.trim_text(true);

    let mut handler = SignatureHandler::new();
    let mut buf = Vec::new();

    loop {
        let finished = match reader.read_event_into_async(&mut buf).await {
            Ok(Event::Start(e)) => {
                handler.start(&local_name(e.local_name().as_ref())?, &attributes(&e)?)?;
                None
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.local_name().as_ref())?;
                handler.start(&name, &attributes(&e)?)?;
                handler.end(&name)
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| Error::Parse(format!("Bad text: {}", e)))?;
                handler.text(&text);
                None
            }
            Ok(Event::CData(e)) => {
                handler.text(&String::from_utf8_lossy(&e));
                None
            }
            Ok(Event::End(e)) => handler.end(&local_name(e.local_name().as_ref())?),
            Ok(Event::Eof) => break,
            Ok(_) => None,
            Err(e) => {
                return Err(Error::Parse(format!(
                    "Signature file error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        };
        buf.clear();

        if let Some(record) = finished {
            let format = sink.put(record).await?;
            *committed += 1;
            trace!(uid = %format.uid, "Upserted PRONOM format");
        }
    }
    Ok(())
}
