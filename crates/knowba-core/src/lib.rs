//! # knowba core
//!
//! Pure logic shared by the knowba pipeline: document models, the
//! overlapping text splitter, the embedding provider trait, and
//! similarity ranking over stored vectors.
//!
//! This crate does no filesystem or network I/O. Format extraction,
//! persistence, and the service clients live in the `knowba` crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
