//! Utility modules for adfotg
//!
//! This module contains common utilities used across the codebase.

pub mod command;

pub use command::{run_tool, ToolOutput};
