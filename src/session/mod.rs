//! Session management module
//!
//! Provides the project session lifecycle:
//! - `ProjectSession` - One workspace plus one running engine
//! - `SessionRegistry` - In-memory map of live sessions
//! - `SessionManager` - Load, update, serve, sweep, and drain
//! - `Reaper` - Timer-driven eviction of aged sessions

mod manager;
mod reaper;
mod registry;
mod types;

pub use manager::*;
pub use reaper::*;
pub use registry::*;
pub use types::*;
