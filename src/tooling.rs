//! Tooling
//!
//! Command-line entry points over a workspace-scoped [`crate::site::Site`].

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
