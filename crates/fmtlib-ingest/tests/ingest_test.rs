//! End-to-end ingestion against mocked catalog endpoints.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use fmtlib_core::{Entity, Error, Format, Record, Result};
use fmtlib_ingest::{FormatSink, IngestConfig, Ingestor};

/// Upserts into a map keyed by uid.
#[derive(Default)]
struct MemorySink {
    formats: Mutex<BTreeMap<String, Format>>,
}

impl MemorySink {
    fn get(&self, uid: &str) -> Option<Format> {
        self.formats.lock().unwrap().get(uid).cloned()
    }

    fn uids(&self) -> Vec<String> {
        self.formats.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl FormatSink for MemorySink {
    async fn put(&self, record: Record) -> Result<Format> {
        let uid = record
            .get("uid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("record without uid".to_string()))?
            .to_string();
        let mut formats = self.formats.lock().unwrap();
        let base = match formats.get(&uid) {
            Some(existing) => existing.clone(),
            None => {
                Format::require_fields(&record)?;
                Format::blank()
            }
        };
        let format = base.merge(&record)?;
        formats.insert(uid, format.clone());
        Ok(format)
    }
}

fn config_for(server: &MockServer) -> IngestConfig {
    IngestConfig {
        pronom_index_url: format!("{}/pronom/", server.uri()),
        pronom_link_pattern: format!(
            r"^{}/documents/DROID_SignatureFile_V\d+\.xml$",
            regex::escape(&server.uri())
        ),
        loc_archive_url: format!("{}/formats/fddXML.zip", server.uri()),
        connect_timeout_secs: 5,
        timeout_secs: 30,
        ..IngestConfig::default()
    }
}

const INDEX_PAGE: &str = r#"<html><body>
  <h2>Signature files</h2>
  <ul>
    <li><a href="/documents/DROID_SignatureFile_V99.xml">V99</a></li>
    <li><a href="/documents/DROID_SignatureFile_V120.xml">V120</a></li>
    <li><a href="/documents/DROID_SignatureFile_V100.xml">V100</a></li>
    <li><a href="/documents/container-signature-20240101.xml">Container</a></li>
  </ul>
</body></html>"#;

const SIGNATURE_FILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FFSignatureFile xmlns="http://www.nationalarchives.gov.uk/pronom/SignatureFile"
                 Version="120" DateCreated="2024-03-27T11:11:52">
  <InternalSignatureCollection>
    <InternalSignature ID="1" Specificity="Specific">
      <ByteSequence Reference="BOFoffset"/>
    </InternalSignature>
  </InternalSignatureCollection>
  <FileFormatCollection>
    <FileFormat ID="1" Name="Windows Bitmap" PUID="fmt/114" Version="1.0"
                MIMEType="image/bmp, image/x-ms-bmp">
      <InternalSignatureID>1</InternalSignatureID>
      <Extension>bmp</Extension>
      <Extension>dib</Extension>
    </FileFormat>
    <FileFormat ID="2" Name="Plain Text File" PUID="x-fmt/111"/>
    <FileFormat ID="3" Name="Tagged Image File Format" PUID="fmt/353" MIMEType="image/tiff">
      <Extension>tif</Extension>
      <Extension>tiff</Extension>
    </FileFormat>
  </FileFormatCollection>
</FFSignatureFile>
"#;

async fn mount_index(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/pronom/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INDEX_PAGE))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_latest_pronom_link_uses_natural_order() {
    let server = MockServer::start().await;
    mount_index(&server).await;

    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let link = ingestor.latest_pronom_link().await.unwrap();
    assert_eq!(
        link,
        format!("{}/documents/DROID_SignatureFile_V120.xml", server.uri())
    );
}

#[tokio::test]
async fn test_load_pronom_signatures() {
    let server = MockServer::start().await;
    mount_index(&server).await;
    Mock::given(method("GET"))
        .and(path("/documents/DROID_SignatureFile_V120.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SIGNATURE_FILE))
        .expect(1)
        .mount(&server)
        .await;

    let sink = MemorySink::default();
    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let report = ingestor.load_pronom_signatures(&sink).await.unwrap();

    assert_eq!(report.source, "PRONOM");
    assert_eq!(report.records, 3);
    assert!(report.link.ends_with("DROID_SignatureFile_V120.xml"));
    assert_eq!(sink.uids(), vec!["fmt/114", "fmt/353", "x-fmt/111"]);

    let bmp = sink.get("fmt/114").unwrap();
    assert_eq!(bmp.name, "Windows Bitmap");
    assert_eq!(bmp.source, "PRONOM");
    assert_eq!(bmp.source_version.as_deref(), Some("120"));
    assert_eq!(bmp.version.as_deref(), Some("1.0"));
    assert_eq!(bmp.mimetypes, vec!["image/bmp", "image/x-ms-bmp"]);
    assert_eq!(bmp.extensions, vec!["bmp", "dib"]);
    assert_eq!(bmp.created_at.to_string(), "2024-03-27");
    assert_eq!(
        bmp.url.as_deref(),
        Some("https://www.nationalarchives.gov.uk/PRONOM/fmt/114")
    );

    let text = sink.get("x-fmt/111").unwrap();
    assert!(text.mimetypes.is_empty());
    assert!(text.extensions.is_empty());
}

#[tokio::test]
async fn test_pronom_reingest_replaces_lists() {
    let server = MockServer::start().await;
    mount_index(&server).await;
    Mock::given(method("GET"))
        .and(path("/documents/DROID_SignatureFile_V120.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SIGNATURE_FILE))
        .mount(&server)
        .await;

    let sink = MemorySink::default();
    sink.put(
        json!({
            "uid": "fmt/114",
            "name": "Old name",
            "source": "PRONOM",
            "created_at": "2020-01-01",
            "extensions": ["bmp", "rle"],
        })
        .as_object()
        .cloned()
        .unwrap(),
    )
    .await
    .unwrap();

    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    ingestor.load_pronom_signatures(&sink).await.unwrap();

    let bmp = sink.get("fmt/114").unwrap();
    assert_eq!(bmp.name, "Windows Bitmap");
    assert_eq!(bmp.extensions, vec!["bmp", "dib"]);
}

#[tokio::test]
async fn test_pronom_missing_signature_file_is_request_error() {
    let server = MockServer::start().await;
    mount_index(&server).await;
    Mock::given(method("GET"))
        .and(path("/documents/DROID_SignatureFile_V120.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let sink = MemorySink::default();
    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let err = ingestor.load_pronom_signatures(&sink).await.unwrap_err();
    assert!(matches!(err, Error::Request(_)), "got {:?}", err);
    assert!(sink.uids().is_empty());
}

#[tokio::test]
async fn test_pronom_index_without_links_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pronom/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>none</body></html>"))
        .mount(&server)
        .await;

    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let err = ingestor
        .load_pronom_signatures(&MemorySink::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_pronom_parse_failure_keeps_earlier_records() {
    let server = MockServer::start().await;
    mount_index(&server).await;
    let broken = r#"<FFSignatureFile Version="7" DateCreated="2024-01-01">
      <FileFormatCollection>
        <FileFormat Name="First" PUID="fmt/1"><Extension>one</Extension></FileFormat>
        <FileFormat Name="Second" PUID="fmt/2"></Wrong>
      </FileFormatCollection>
    </FFSignatureFile>"#;
    Mock::given(method("GET"))
        .and(path("/documents/DROID_SignatureFile_V120.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(broken))
        .mount(&server)
        .await;

    let sink = MemorySink::default();
    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let err = ingestor.load_pronom_signatures(&sink).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "got {:?}", err);
    assert_eq!(sink.uids(), vec!["fmt/1"]);
}

const FDD_BMP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fdd:FDD xmlns:fdd="http://www.loc.gov/preservation/digital/formats/schemas/fdd/v1"
         id="fdd000189" titleName="BMP (Microsoft Windows Bitmap)">
  <fdd:properties><fdd:updates><fdd:date>2024-01-19</fdd:date></fdd:updates></fdd:properties>
  <fdd:fileTypeSignifiers>
    <fdd:signifiersGroup>
      <fdd:fileExtension><fdd:sigValues><fdd:sigValue>bmp</fdd:sigValue></fdd:sigValues></fdd:fileExtension>
      <fdd:internetMediaType><fdd:sigValues><fdd:sigValue>image/bmp</fdd:sigValue></fdd:sigValues></fdd:internetMediaType>
      <fdd:other>
        <fdd:tag>Pronom PUID</fdd:tag>
        <fdd:values><fdd:sigValues><fdd:sigValue>fmt/114</fdd:sigValue></fdd:sigValues></fdd:values>
      </fdd:other>
    </fdd:signifiersGroup>
  </fdd:fileTypeSignifiers>
</fdd:FDD>
"#;

const FDD_TIFF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fdd:FDD xmlns:fdd="http://www.loc.gov/preservation/digital/formats/schemas/fdd/v1"
         id="fdd000022" titleName="TIFF, Revision 6.0">
  <fdd:properties><fdd:updates><fdd:date>2023-06-12</fdd:date></fdd:updates></fdd:properties>
  <fdd:fileTypeSignifiers>
    <fdd:signifiersGroup>
      <fdd:fileExtension>
        <fdd:sigValues><fdd:sigValue>tif</fdd:sigValue><fdd:sigValue>tiff</fdd:sigValue></fdd:sigValues>
      </fdd:fileExtension>
    </fdd:signifiersGroup>
  </fdd:fileTypeSignifiers>
</fdd:FDD>
"#;

fn build_archive(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.add_directory("fddXML/", options).unwrap();
    for (name, body) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn mount_archive(server: &MockServer, archive: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path("/formats/fddXML.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(archive),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_load_loc_signatures() {
    let server = MockServer::start().await;
    mount_archive(
        &server,
        build_archive(&[
            ("fddXML/fdd000189.xml", FDD_BMP),
            ("fddXML/readme.txt", "not a format"),
            ("fddXML/fdd000022.xml", FDD_TIFF),
            ("other/fdd000999.xml", "<broken"),
        ]),
    )
    .await;

    let sink = MemorySink::default();
    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let report = ingestor.load_loc_signatures(&sink).await.unwrap();

    assert_eq!(report.source, "LOC");
    assert_eq!(report.records, 2);
    assert_eq!(sink.uids(), vec!["fdd000022", "fdd000189"]);

    let bmp = sink.get("fdd000189").unwrap();
    assert_eq!(bmp.name, "BMP (Microsoft Windows Bitmap)");
    assert_eq!(bmp.source, "LOC");
    assert_eq!(bmp.source_version.as_deref(), Some("2024-01-19"));
    assert_eq!(bmp.mimetypes, vec!["image/bmp"]);
    assert_eq!(bmp.extensions, vec!["bmp"]);
    assert_eq!(bmp.related_formats, vec!["fmt/114"]);

    let tiff = sink.get("fdd000022").unwrap();
    assert_eq!(tiff.extensions, vec!["tif", "tiff"]);
    assert!(tiff.related_formats.is_empty());
}

#[tokio::test]
async fn test_loc_archive_picked_from_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/formats/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="fddXML_v9.zip">v9</a> <a href="fddXML_v10.zip">v10</a> <a href="notes.html">notes</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/formats/fddXML_v10.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(build_archive(&[("fddXML/fdd000189.xml", FDD_BMP)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = IngestConfig {
        loc_index_url: Some(format!("{}/formats/", server.uri())),
        ..config_for(&server)
    };
    let sink = MemorySink::default();
    let ingestor = Ingestor::new(config).unwrap();
    let report = ingestor.load_loc_signatures(&sink).await.unwrap();

    assert!(report.link.ends_with("/formats/fddXML_v10.zip"), "{}", report.link);
    assert_eq!(sink.uids(), vec!["fdd000189"]);
}

#[tokio::test]
async fn test_loc_bad_member_aborts_run() {
    let server = MockServer::start().await;
    mount_archive(
        &server,
        build_archive(&[
            ("fddXML/fdd000189.xml", FDD_BMP),
            ("fddXML/fdd000500.xml", "<FDD id=\"fdd000500\""),
            ("fddXML/fdd000022.xml", FDD_TIFF),
        ]),
    )
    .await;

    let sink = MemorySink::default();
    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let err = ingestor.load_loc_signatures(&sink).await.unwrap_err();
    match err {
        Error::Parse(message) => assert!(message.contains("fdd000500"), "{}", message),
        other => panic!("expected parse error, got {:?}", other),
    }
    assert_eq!(sink.uids(), vec!["fdd000189"]);
}

#[tokio::test]
async fn test_loc_not_a_zip_is_parse_error() {
    let server = MockServer::start().await;
    mount_archive(&server, b"<html>maintenance</html>".to_vec()).await;

    let ingestor = Ingestor::new(config_for(&server)).unwrap();
    let err = ingestor
        .load_loc_signatures(&MemorySink::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "got {:?}", err);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = IngestConfig {
        pronom_link_pattern: "(unclosed".to_string(),
        ..IngestConfig::default()
    };
    assert!(matches!(Ingestor::new(config), Err(Error::Config(_))));

    let config = IngestConfig {
        timeout_secs: 0,
        ..IngestConfig::default()
    };
    assert!(Ingestor::new(config).is_err());

    assert!(Regex::new(&IngestConfig::default().loc_member_pattern)
        .unwrap()
        .is_match("fddXML/fdd000189.xml"));
}
