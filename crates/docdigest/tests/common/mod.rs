//! Shared test utilities for docdigest integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp directory and an in-memory queue
//! - Builders for fixture PDFs and configuration files
//! - Fake OCR, extraction, summarization and persistence components

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{fast_queue_settings, TestHarness};
