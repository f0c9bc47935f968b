//! Base types shared by every component.
//!
//! Provides the engine-wide error enum and the configuration struct that
//! is built once at startup and passed by reference to every analyzer.

mod config;
mod error;

pub use config::EngineConfig;
pub use error::EngineError;
