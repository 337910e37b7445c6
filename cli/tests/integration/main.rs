//! Integration tests for the bulwark CLI
//!
//! These tests spawn the actual binary and test end-to-end behavior. None of
//! them reaches a cloud provider or a host: they cover parsing, validation,
//! dry runs and local state.

mod cli_tests;
mod config_command;
mod plan_commands;
