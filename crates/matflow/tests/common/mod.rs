//! Shared utilities for matflow integration tests.
//!
//! - `fakes`: converter and extractor stand-ins that need no external tools
//! - `harness`: a temporary workspace wired to a real SQLite store and a
//!   local object store

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
