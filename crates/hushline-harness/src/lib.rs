//! Deterministic test harness for Hushline.
//!
//! Test doubles for every boundary the pipelines touch, so cross-crate
//! scenarios run without a network, a clock or an OS RNG:
//!
//! - [`SimEnv`]: seeded ChaCha RNG and a manual wall clock
//! - [`MemoryStorage`]: blob store with failure injection and fetch gates for
//!   forcing concurrent overlap
//! - [`MemoryTransport`]: message log that assigns backend ids
//! - [`CountingCipher`]: AES-GCM with call counters

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod counting_cipher;
pub mod memory_storage;
pub mod memory_transport;
pub mod sim_env;

pub use counting_cipher::CountingCipher;
pub use memory_storage::MemoryStorage;
pub use memory_transport::MemoryTransport;
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv};
