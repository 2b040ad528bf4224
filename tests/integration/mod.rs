//! Integration tests for the dropsite mirror

mod cli_parse;
mod resource_resolution;
mod scheduling;
mod serving;
mod support;
mod sync_convergence;
