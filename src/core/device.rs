//! Device handle.
//!
//! Owns the low-level GEM/KMS device context and constructs buffer objects.
//! Created once at driver attach, dropped at detach; buffer objects keep
//! their own handle on the backend so they outlive the `Device` value safely.

use std::sync::Arc;

use crate::core::buffer::BufferObject;
use crate::core::errors::Result;
use crate::platform::api::GemBackend;

/// Handle to the display device.
#[derive(Clone)]
pub struct Device {
    gem: Arc<dyn GemBackend>,
}

impl Device {
    pub fn new(gem: Arc<dyn GemBackend>) -> Self {
        Self { gem }
    }

    /// Allocate a buffer object and register a legacy single-plane
    /// framebuffer for it.
    pub fn new_bo_with_depth(
        &self,
        width: u32,
        height: u32,
        depth: u8,
        bpp: u8,
    ) -> Result<Arc<BufferObject>> {
        BufferObject::new(&self.gem, width, height, depth, bpp, 0)
    }

    /// Allocate a buffer object and register a framebuffer with an explicit
    /// four-cc pixel format.
    pub fn new_bo_with_format(
        &self,
        width: u32,
        height: u32,
        pixel_format: u32,
        bpp: u8,
    ) -> Result<Arc<BufferObject>> {
        BufferObject::new(&self.gem, width, height, 0, bpp, pixel_format)
    }

    pub(crate) fn gem(&self) -> &Arc<dyn GemBackend> {
        &self.gem
    }
}
