//! Configuration management backed by environment variables

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
