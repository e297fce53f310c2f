//! Tooling Layer
//!
//! The command-line surface over a library.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
