//! Command-line front end for `orca-core`.
//!
//! `orca pull` materializes an artifact into a directory; `orca cat` writes
//! one of its files to stdout.

pub mod cli;
pub mod commands;
pub mod tracing;
