//! Common test utilities and helpers.
//!
//! This module provides shared functionality for all tests, including:
//! - PDF fixtures built with lopdf (exact text positions) and printpdf
//! - Assertions over the content streams of redacted output

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
