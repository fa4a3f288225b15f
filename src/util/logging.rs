//! Standardized logging utility for Grizzly
//!
//! This module provides the `glog!` macro which ensures all driver logs
//! follow the `YYYY-MM-DD HH:MM:SS [MODULE] Message` format.

#[macro_export]
macro_rules! glog {
    ($module:expr, $($arg:tt)*) => {{
        let now = chrono::Local::now();
        eprintln!("{} [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            $module,
            format!($($arg)*)
        );
    }};
}

/// Standardized module identifiers
pub const MAIN: &str = "MAIN";
pub const DEVICE: &str = "DEVICE";
pub const BUFFER: &str = "BUFFER";
pub const SWAP: &str = "SWAP";
pub const SCANOUT: &str = "SCANOUT";
pub const VBLANK: &str = "VBLANK";
pub const SESSION: &str = "SESSION";
