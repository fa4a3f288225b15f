//! Core error types

use thiserror::Error;

/// Core driver errors
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("framebuffer registration failed: {0}")]
    Framebuffer(String),

    #[error("write access requested on a read-locked buffer")]
    Contention,

    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("could not switch output mode: {0}")]
    ModeSwitch(String),

    #[error("surface {0} has no buffer-object backing")]
    MissingBacking(u32),

    #[error("no drawable with id {0}")]
    MissingDrawable(u32),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl DriverError {
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    pub fn framebuffer(msg: impl Into<String>) -> Self {
        Self::Framebuffer(msg.into())
    }

    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    pub fn mode_switch(msg: impl Into<String>) -> Self {
        Self::ModeSwitch(msg.into())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, DriverError>;
