//! mapsync - Mirror a local GIS project onto a remote map
//!
//! This crate provides the core functionality for the `mapsync` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (local layers and tree, remote records, payloads)
//! - [`host`] - The host application seam and its project-file implementation
//! - [`transport`] - Blocking HTTP transport
//! - [`api`] - Typed client for the map service
//! - [`storage`] - SQLite database layer
//! - [`sync`] - Reconciliation and publishing
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod storage;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};

/// Escape a value for CSV output (wrap in quotes if it contains commas, quotes, or newlines).
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
