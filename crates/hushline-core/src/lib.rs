//! Hushline core
//!
//! Shared plumbing for the encryption pipelines:
//!
//! - [`Environment`]: randomness and wall-clock time, swappable for a seeded
//!   simulation environment in tests
//! - [`SystemEnv`]: production environment backed by the OS RNG
//! - [`ClientConfig`]: tunables a host application embeds in its own settings

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod env;

pub use config::{ClientConfig, ConfigError};
pub use env::{Environment, SystemEnv};
