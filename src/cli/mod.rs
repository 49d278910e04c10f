//! Command-line interface for agent-bench.
//!
//! A thin layer over [`crate::runner`]: it maps flags onto a `RunConfig`,
//! wires Ctrl-C to run cancellation and writes the run report.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
