//! Command-line interface: argument parsing and the interactive node menu

pub mod commands;
pub mod menu;

pub use commands::{Command, Opt};
