//! Configuration module
//!
//! Layered settings: built-in defaults, then `config.toml` in the platform
//! config directory, then `PREVIEW_*` environment variables.

mod settings;

pub use settings::*;
