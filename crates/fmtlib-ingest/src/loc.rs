//! Library of Congress format description documents (FDD).
//!
//! The catalog is a zip archive with one small XML document per format.
//! Each document is parsed on its own; no state carries across documents.
//! Elements are matched by local name, so the FDD namespace prefix does not
//! matter.

use std::io::{Cursor, Read};

use regex::Regex;
use roxmltree::{Document, Node};
use serde_json::{json, Value as JsonValue};
use tracing::trace;

use fmtlib_core::{defaults, Error, Record, Result};

use crate::date::parse_catalog_date;
use crate::sink::FormatSink;

/// Label of the `other` signifier carrying PRONOM identifiers.
const PRONOM_PUID_TAG: &str = "Pronom PUID";

/// The per-format page for an FDD id.
pub fn format_url(id: &str) -> String {
    format!("{}{}.shtml", defaults::LOC_FORMAT_URL, id)
}

/// Element children of `node` following `path` by local name, in document order.
fn select<'a, 'input>(node: Node<'a, 'input>, path: &[&str]) -> Vec<Node<'a, 'input>> {
    let Some((first, rest)) = path.split_first() else {
        return vec![node];
    };
    node.children()
        .filter(|c| c.is_element() && c.tag_name().name() == *first)
        .flat_map(|c| select(c, rest))
        .collect()
}

/// Concatenated text of a node and its descendants.
fn inner_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn texts(nodes: &[Node<'_, '_>], path: &[&str]) -> Vec<String> {
    nodes
        .iter()
        .flat_map(|n| select(*n, path))
        .map(|n| inner_text(n).trim().to_string())
        .collect()
}

/// Normalize one FDD document into a format record.
pub fn parse_fdd(xml: &str) -> Result<Record> {
    let doc = Document::parse(xml).map_err(|e| Error::Parse(format!("FDD document: {}", e)))?;
    let root = doc.root_element();
    if root.tag_name().name() != "FDD" {
        return Err(Error::Parse(format!(
            "Expected FDD root element, found {}",
            root.tag_name().name()
        )));
    }

    let id = root
        .attribute("id")
        .ok_or_else(|| Error::Parse("FDD document without id".to_string()))?;
    let name = root
        .attribute("titleName")
        .ok_or_else(|| Error::Parse(format!("FDD {} without titleName", id)))?;

    let date = select(root, &["properties", "updates", "date"])
        .first()
        .map(|n| inner_text(*n).trim().to_string())
        .ok_or_else(|| Error::Parse(format!("FDD {} without update date", id)))?;
    let created = parse_catalog_date(&date)?;

    let groups = select(root, &["fileTypeSignifiers", "signifiersGroup"]);
    let mimetypes = texts(&groups, &["internetMediaType", "sigValues", "sigValue"]);
    let extensions = texts(&groups, &["fileExtension", "sigValues", "sigValue"]);

    let puid_groups: Vec<Node<'_, '_>> = groups
        .iter()
        .flat_map(|g| select(*g, &["other"]))
        .filter(|other| {
            select(*other, &["tag"])
                .iter()
                .any(|t| inner_text(*t).trim() == PRONOM_PUID_TAG)
        })
        .collect();
    let related_formats: Vec<String> = texts(&puid_groups, &["values", "sigValues", "sigValue"])
        .into_iter()
        .filter(|v| v.contains(defaults::RELATED_FORMAT_MARKER))
        .collect();

    match json!({
        "source": defaults::LOC_SOURCE,
        "source_version": date,
        "created_at": created.format("%Y-%m-%d").to_string(),
        "uid": id,
        "name": name,
        "url": format_url(id),
        "mimetypes": mimetypes,
        "extensions": extensions,
        "related_formats": related_formats,
    }) {
        JsonValue::Object(record) => Ok(record),
        _ => Err(Error::Internal("FDD record is not a map".to_string())),
    }
}

/// Parse every qualifying member of an FDD archive, handing each to `sink`.
///
/// `committed` counts the records the sink accepted.
pub async fn ingest_archive<S>(
    archive: Vec<u8>,
    member_pattern: &Regex,
    sink: &S,
    committed: &mut usize,
) -> Result<()>
where
    S: FormatSink + ?Sized,
{
    let mut archive = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| Error::Parse(format!("FDD archive: {}", e)))?;

    for index in 0..archive.len() {
        let member = {
            let mut file = archive
                .by_index(index)
                .map_err(|e| Error::Parse(format!("FDD archive member {}: {}", index, e)))?;
            if !file.is_file() || !member_pattern.is_match(file.name()) {
                continue;
            }
            let mut xml = String::new();
            file.read_to_string(&mut xml)?;
            (file.name().to_string(), xml)
        };

        let (member_name, xml) = member;
        let record = parse_fdd(&xml)
            .map_err(|e| Error::Parse(format!("{}: {}", member_name, e)))?;
        let format = sink.put(record).await?;
        *committed += 1;
        trace!(uid = %format.uid, member = %member_name, "Upserted LOC format");
    }
    Ok(())
}
