//! Platform Integration Module
//!
//! Grizzly uses a **core + host adapter** architecture. The core exposes a
//! plain operation set; thin adapters bind it to the surrounding display
//! server and to the kernel GEM/KMS interfaces through the traits in `api`.

pub mod api;

pub use api::{GemBackend, KmsOutputs, WindowHost};
