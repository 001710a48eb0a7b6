//! DSS qualifier - conformance test engine for UTM Discovery and Synchronization Services
//!
//! This library runs test scenarios against DSS instances implementing
//! ASTM F3548-21 (strategic coordination) and ASTM F3411-22a (network remote
//! ID), and produces reports attributing each check to its participants.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dss;
pub mod report;
pub mod resources;
pub mod scenario;
pub mod scenarios;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use report::TestRunReport;
