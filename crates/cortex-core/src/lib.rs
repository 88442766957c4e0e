//! # cortex-core
//!
//! Configuration and utilities shared by the Cortex relay crates:
//!
//! - **Configuration**: loading, validation, and persistence of the JSON5 config file
//! - **Paths**: resolution of the `~/.cortex` directory layout
//! - **Environment**: typed access to environment overrides and `.env` loading

pub mod config;
pub mod env;
pub mod error;
pub mod paths;

pub use config::Config;
pub use error::ConfigError;
