//! Core data models used throughout knowba.
//!
//! These types describe uploaded documents after normalization, the chunks
//! derived from them, and the chat turns exchanged with the language model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of document formats the normalizer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
    Txt,
    Csv,
}

impl FileKind {
    /// Detect the format from a filename's extension (case-insensitive).
    ///
    /// Returns `None` for anything outside `pdf`, `docx`, `txt`, `csv`.
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            "txt" => Some(FileKind::Txt),
            "csv" => Some(FileKind::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
            FileKind::Txt => "txt",
            FileKind::Csv => "csv",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where a unit sits inside its source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// A page of a paged format. `page_number` is 1-based.
    Page { page_number: u32, total_pages: u32 },
    /// A data row of a tabular format. `row` is 0-based, header excluded.
    Row { row: u64 },
    /// The whole document.
    Document,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Page {
                page_number,
                total_pages,
            } => write!(f, "page {} of {}", page_number, total_pages),
            Locator::Row { row } => write!(f, "row {}", row),
            Locator::Document => f.write_str("document"),
        }
    }
}

/// Source metadata carried by every unit and every chunk cut from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    /// Original filename of the upload.
    pub source: String,
    pub locator: Locator,
}

impl fmt::Display for UnitMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.locator {
            Locator::Document => f.write_str(&self.source),
            ref loc => write!(f, "{}, {}", self.source, loc),
        }
    }
}

/// One logical text segment of a document: a page, a row, or the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub content: String,
    pub metadata: UnitMetadata,
}

impl Unit {
    /// Build a unit, collapsing newline-bearing whitespace runs and trimming.
    pub fn new(content: &str, metadata: UnitMetadata) -> Self {
        Self {
            content: collapse_newlines(content),
            metadata,
        }
    }
}

/// A normalized upload. Built once from raw bytes and never mutated.
#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    /// Hex SHA-256 of the raw bytes.
    pub id: String,
    pub kind: FileKind,
    /// Upload metadata (at least `uploaded_at`).
    pub metadata: BTreeMap<String, String>,
    pub units: Vec<Unit>,
}

/// A bounded segment of a unit's content, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: UnitMetadata,
    /// Position of this chunk within its unit, starting at 0.
    pub index: usize,
}

/// Replace every whitespace run that contains a newline with a single
/// `\n`, then trim leading and trailing whitespace.
///
/// Whitespace runs without a newline are kept as they are.
pub fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    let mut run_has_newline = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            run_has_newline |= ch == '\n';
            run.push(ch);
            continue;
        }
        if run_has_newline {
            out.push('\n');
        } else {
            out.push_str(&run);
        }
        run.clear();
        run_has_newline = false;
        out.push(ch);
    }

    out.trim().to_string()
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered chat history. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSession {
    turns: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session opened by an assistant greeting.
    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        Self {
            turns: vec![ChatMessage::assistant(greeting)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.turns.push(message);
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
