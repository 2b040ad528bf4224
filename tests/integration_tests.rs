//! Integration tests for dropsite

mod integration;
