//! Tests for the script engine
//!
//! Organized by feature area

mod control_tests;
mod helpers;
mod parser_tests;
