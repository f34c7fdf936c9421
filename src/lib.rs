//! Workspace-level test support for abgate.
//!
//! This crate exists only to host the BDD/cucumber suite in `tests/cucumber.rs`.
//! The functionality lives in the member crates:
//! - `abgate-types`: experiment records, report and config schemas
//! - `abgate-stats`: conversion statistics and the recommendation rule
//! - `abgate-domain`: experiment validation and evaluation
//! - `abgate-app`: evaluate use case and Markdown rendering
//! - `abgate` (abgate-cli): CLI interface
