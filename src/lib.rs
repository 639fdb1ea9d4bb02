//! # knowba
//!
//! Ask questions about your own documents.
//!
//! knowba normalizes uploaded PDF, DOCX, TXT, and CSV files into text units,
//! splits them into overlapping chunks, embeds them into named on-disk
//! vector stores, and answers questions by retrieving the most relevant
//! passages and streaming a grounded completion from a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Normalize │──▶│  Split   │──▶│ Vector store │
//! │ pdf/docx │   │ (extract) │   │ (chunk)  │   │ <root>/<db>/ │
//! │ txt/csv  │   └───────────┘   └──────────┘   └──────┬───────┘
//! └──────────┘                                         │ top-k
//!                                                      ▼
//!                                 question ──▶ ┌──────────────┐ ──▶ deltas
//!                                              │  QA engine   │
//!                                              └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! knowba upload --db handbook --create ./docs
//! knowba ask --db handbook "How many vacation days do I get?"
//! knowba chat --db handbook
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Byte-level normalization of uploads |
//! | [`embedding`] | Embedding providers and batching |
//! | [`store`] | Named persistent vector stores |
//! | [`llm`] | Streaming chat-completion client |
//! | [`qa`] | Retrieval-augmented answering |
//! | [`ingest`] | Upload pipeline |
//! | [`error`] | Error kinds |
//!
//! Pure data types, the chunker, and similarity ranking live in the
//! `knowba-core` crate.

pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod qa;
pub mod store;
