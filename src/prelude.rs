//! Common imports and types used throughout Grizzly.

pub use std::collections::HashMap;
pub use std::sync::{Arc, Mutex};

pub type Result<T> = std::result::Result<T, crate::core::errors::DriverError>;
