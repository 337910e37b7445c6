//! Unit tests for bulwark CLI
//!
//! These tests exercise the library surface directly and run fast without
//! external I/O.

mod architecture;
mod property_tests;
