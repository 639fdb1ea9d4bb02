//! End-to-end tests: upload → normalize → split → embed → store → answer.
//!
//! Everything runs offline: stores live in a `TempDir`, embeddings come from
//! the hashing provider, and answers from a scripted chat model.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use knowba::embedding::HashingProvider;
use knowba::error::{StoreError, StoreWarning};
use knowba::extract::normalize;
use knowba::ingest::{ingest, UploadIntent, UploadRequest};
use knowba::llm::{ChatModel, DeltaStream, LlmError};
use knowba::qa::{QaEngine, SessionContext};
use knowba::store::{EmbedOptions, VectorStores, INDEX_FILE};
use knowba_core::chunk::TextSplitter;
use knowba_core::models::{ChatMessage, Locator, Role};

const DIMS: usize = 128;

/// One-page PDF with `phrase` on its text layer. Offsets in the xref table
/// are computed from the bytes actually written.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

struct Env {
    _tmp: TempDir,
    stores: VectorStores,
    splitter: TextSplitter,
    embedder: Arc<HashingProvider>,
}

fn env() -> Env {
    let tmp = TempDir::new().unwrap();
    let stores = VectorStores::new(
        tmp.path().join("vectorstores"),
        EmbedOptions {
            batch_size: 3,
            concurrency: 2,
        },
    );
    Env {
        _tmp: tmp,
        stores,
        splitter: TextSplitter::new(300, 40).unwrap(),
        embedder: Arc::new(HashingProvider::new(DIMS)),
    }
}

fn upload(store: &str, intent: UploadIntent, files: Vec<(&str, Vec<u8>)>) -> UploadRequest {
    UploadRequest {
        files: files
            .into_iter()
            .map(|(name, bytes)| (name.to_string(), bytes))
            .collect(),
        store: store.to_string(),
        intent,
    }
}

struct ScriptedModel {
    deltas: Vec<&'static str>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(deltas: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            deltas,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let deltas: Vec<Result<String, LlmError>> =
            self.deltas.iter().map(|d| Ok(d.to_string())).collect();
        Ok(futures::stream::iter(deltas).boxed())
    }
}

#[test]
fn normalize_then_split_is_deterministic() {
    let env = env();
    let long_text = "Paragraph one talks about rust.\n\n".repeat(40);
    let inputs: Vec<(&str, Vec<u8>)> = vec![
        ("notes.txt", long_text.into_bytes()),
        ("people.csv", b"name,age\nAda,36\nAlan,41\n".to_vec()),
        ("memo.docx", minimal_docx(&["First paragraph.", "Second paragraph."])),
    ];

    for (name, bytes) in &inputs {
        let a = env.splitter.split(&normalize(bytes, name).unwrap());
        let b = env.splitter.split(&normalize(bytes, name).unwrap());
        assert_eq!(a, b, "{} split differently on a second run", name);
        assert!(!a.is_empty());
        assert!(a.iter().all(|c| c.text.chars().count() <= 300));
    }
}

#[test]
fn three_row_csv_yields_three_chunks() {
    let env = env();
    let file = normalize(b"name,age\nAda,36\nAlan,41\nGrace,85\n", "people.csv").unwrap();
    let chunks = env.splitter.split(&file);
    assert_eq!(chunks.len(), 3);
    let expected = ["name: Ada\nage: 36", "name: Alan\nage: 41", "name: Grace\nage: 85"];
    for (chunk, want) in chunks.iter().zip(expected) {
        assert!(chunk.text.starts_with(want), "{:?}", chunk.text);
    }
    assert_eq!(chunks[2].metadata.locator, Locator::Row { row: 2 });
}

#[tokio::test]
async fn create_load_and_search_round_trip() {
    let env = env();
    let report = ingest(
        &env.stores,
        &env.splitter,
        env.embedder.as_ref(),
        upload(
            "handbook",
            UploadIntent::Create,
            vec![
                ("vacation.txt", b"Employees receive twenty vacation days per year.".to_vec()),
                ("parking.txt", b"Parking permits are issued by facilities.".to_vec()),
                ("security.txt", b"Badges must be worn at all times on site.".to_vec()),
            ],
        ),
    )
    .await
    .unwrap();
    assert_eq!(report.succeeded.len(), 3);

    let fresh = VectorStores::new(env.stores.root(), EmbedOptions::default());
    let handle = fresh.load("handbook").await.unwrap();
    let hits = handle
        .search(
            "Parking permits are issued by facilities.",
            env.embedder.as_ref(),
            2,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].metadata.source, "parking.txt");
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn append_keeps_previous_entries() {
    let env = env();
    ingest(
        &env.stores,
        &env.splitter,
        env.embedder.as_ref(),
        upload(
            "kb",
            UploadIntent::Create,
            vec![("old.txt", b"lighthouse keepers trim the lamp wick".to_vec())],
        ),
    )
    .await
    .unwrap();

    let report = ingest(
        &env.stores,
        &env.splitter,
        env.embedder.as_ref(),
        upload(
            "kb",
            UploadIntent::Append,
            vec![("new.txt", b"glaciers carve valleys over millennia".to_vec())],
        ),
    )
    .await
    .unwrap();
    assert!(report.warnings.is_empty());

    let handle = env.stores.load("kb").await.unwrap();
    assert_eq!(handle.len().await, 2);
    let sources: Vec<String> = handle
        .search("lamp glaciers", env.embedder.as_ref(), 4)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.metadata.source)
        .collect();
    assert!(sources.contains(&"old.txt".to_string()));
    assert!(sources.contains(&"new.txt".to_string()));
}

#[tokio::test]
async fn append_to_corrupt_store_rebuilds_with_warning() {
    let env = env();
    let dir = env.stores.root().join("broken");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(INDEX_FILE), b"\x00\x01 truncated garbage").unwrap();

    let report = ingest(
        &env.stores,
        &env.splitter,
        env.embedder.as_ref(),
        upload(
            "broken",
            UploadIntent::Append,
            vec![("fresh.txt", b"only this survives".to_vec())],
        ),
    )
    .await
    .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(report.warnings[0], StoreWarning::Rebuilt { .. }));

    let fresh = VectorStores::new(env.stores.root(), EmbedOptions::default());
    let handle = fresh.load("broken").await.unwrap();
    assert_eq!(handle.len().await, 1);
    assert_eq!(handle.info().await.unwrap().sources, vec!["fresh.txt".to_string()]);
}

#[tokio::test]
async fn same_pdf_into_two_stores_shares_id_only() {
    let env = env();
    let pdf = minimal_pdf("quarterly revenue grew");

    let a = normalize(&pdf, "report.pdf").unwrap();
    let b = normalize(&pdf, "report.pdf").unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(
        a.units[0].metadata.locator,
        Locator::Page {
            page_number: 1,
            total_pages: 1
        }
    );

    for store in ["first", "second"] {
        let report = ingest(
            &env.stores,
            &env.splitter,
            env.embedder.as_ref(),
            upload(store, UploadIntent::Create, vec![("report.pdf", pdf.clone())]),
        )
        .await
        .unwrap();
        assert_eq!(report.succeeded[0].id, a.id);
    }

    let first = env.stores.load("first").await.unwrap();
    let second = env.stores.load("second").await.unwrap();
    let before = second.len().await;
    first
        .append(
            &env.splitter.split(&normalize(b"extra", "extra.txt").unwrap()),
            env.embedder.as_ref(),
        )
        .await
        .unwrap();
    assert_eq!(second.len().await, before);
    assert_eq!(first.len().await, before + 1);
    assert_eq!(env.stores.list().await.unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn create_rejects_existing_name() {
    let env = env();
    let req = || {
        upload(
            "dup",
            UploadIntent::Create,
            vec![("a.txt", b"alpha".to_vec())],
        )
    };
    ingest(&env.stores, &env.splitter, env.embedder.as_ref(), req())
        .await
        .unwrap();
    let err = ingest(&env.stores, &env.splitter, env.embedder.as_ref(), req())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NameConflict { .. }));
}

#[tokio::test]
async fn grounded_answer_appends_history_once_complete() {
    let env = env();
    let report = ingest(
        &env.stores,
        &env.splitter,
        env.embedder.as_ref(),
        upload(
            "kb",
            UploadIntent::Create,
            vec![("people.csv", b"name,role\nAda,engineer\nGrace,admiral\n".to_vec())],
        ),
    )
    .await
    .unwrap();

    let model = ScriptedModel::new(vec!["Grace ", "is an ", "admiral."]);
    let engine = QaEngine::new(model.clone(), env.embedder.clone(), Default::default());
    let mut ctx = SessionContext::greeted(report.handle);

    let mut stream = engine.answer("What is Grace?", &mut ctx).await.unwrap();
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta.unwrap());
    }
    drop(stream);
    assert_eq!(text, "Grace is an admiral.");

    let turns = ctx.history.turns();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[1], ChatMessage::user("What is Grace?"));
    assert_eq!(turns[2], ChatMessage::assistant("Grace is an admiral."));

    let requests = model.requests.lock().unwrap();
    let system = &requests[0][0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("people.csv, row 1"));
    assert!(system.content.contains("name: Grace\nrole: admiral"));
}

#[tokio::test]
async fn cancelled_answer_leaves_history_unchanged() {
    let env = env();
    let model = ScriptedModel::new(vec!["one", "two", "three"]);
    let engine = QaEngine::new(model, env.embedder.clone(), Default::default());
    let mut ctx = SessionContext::greeted(None);
    let before = ctx.history.clone();

    let mut stream = engine.answer("count to three", &mut ctx).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "one");
    drop(stream);

    assert_eq!(ctx.history, before);

    // A later, complete answer still records normally.
    let text = engine
        .answer("count to three", &mut ctx)
        .await
        .unwrap()
        .collect_answer()
        .await
        .unwrap();
    assert_eq!(text, "onetwothree");
    assert_eq!(ctx.history.len(), before.len() + 2);
}
