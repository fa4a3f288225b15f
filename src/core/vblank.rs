//! MSC/vblank query.
//!
//! Reads the current hardware frame counter and timestamp for pacing. Query
//! failures are logged with burst suppression, a dead vblank source would
//! otherwise flood the log once per frame.

use tracing::error;

use crate::core::errors::{DriverError, Result};
use crate::core::session::DisplaySession;
use crate::platform::api::DrawableId;

/// One sample of the hardware frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MscSample {
    /// Media stream counter (vblank sequence number).
    pub msc: u64,
    /// Timestamp in microseconds.
    pub ust: u64,
}

impl DisplaySession {
    /// Current frame count and timestamp. Returns `None` on query failure.
    pub fn get_msc(&mut self) -> Option<MscSample> {
        match self.device.gem().wait_vblank_relative(0) {
            Ok(reply) => Some(MscSample {
                msc: reply.sequence as u64,
                ust: reply.tval_sec as u64 * 1_000_000 + reply.tval_usec as u64,
            }),
            Err(e) => {
                if self.vblank_error_budget > 0 {
                    self.vblank_error_budget -= 1;
                    error!("get vblank counter failed: {}", e);
                }
                None
            }
        }
    }

    /// Wait until the drawable's frame counter satisfies the target.
    pub fn schedule_wait_msc(
        &mut self,
        _drawable: DrawableId,
        _target_msc: u64,
        _divisor: u64,
        _remainder: u64,
    ) -> Result<()> {
        error!("not implemented");
        Err(DriverError::Unsupported("schedule_wait_msc"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::device::Device;
    use crate::core::session::{DisplaySession, SessionConfig};
    use crate::platform::api::{
        AccessMode, AllocFlags, FramebufferId, GemBackend, GemHandle, MemoryGem, NullOutputs,
        VblankReply,
    };

    /// Backend that fails every vblank query but delegates everything else.
    struct NoVblankGem {
        inner: MemoryGem,
    }

    impl GemBackend for NoVblankGem {
        fn alloc(&self, size: usize, flags: AllocFlags) -> crate::core::errors::Result<GemHandle> {
            self.inner.alloc(size, flags)
        }
        fn free(&self, handle: GemHandle) {
            self.inner.free(handle)
        }
        fn export_name(&self, handle: GemHandle) -> crate::core::errors::Result<u32> {
            self.inner.export_name(handle)
        }
        fn map_bo(&self, handle: GemHandle) -> crate::core::errors::Result<*mut u8> {
            self.inner.map_bo(handle)
        }
        fn cpu_acquire(&self, handle: GemHandle, mode: AccessMode) -> crate::core::errors::Result<()> {
            self.inner.cpu_acquire(handle, mode)
        }
        fn cpu_release(&self, handle: GemHandle) -> crate::core::errors::Result<()> {
            self.inner.cpu_release(handle)
        }
        fn add_framebuffer(
            &self,
            width: u32,
            height: u32,
            depth: u8,
            bpp: u8,
            pitch: u32,
            handle: GemHandle,
        ) -> crate::core::errors::Result<FramebufferId> {
            self.inner.add_framebuffer(width, height, depth, bpp, pitch, handle)
        }
        fn add_framebuffer_planar(
            &self,
            width: u32,
            height: u32,
            pixel_format: u32,
            handles: &[GemHandle],
            pitches: &[u32],
            offsets: &[u32],
        ) -> crate::core::errors::Result<FramebufferId> {
            self.inner
                .add_framebuffer_planar(width, height, pixel_format, handles, pitches, offsets)
        }
        fn remove_framebuffer(&self, fb: FramebufferId) -> crate::core::errors::Result<()> {
            self.inner.remove_framebuffer(fb)
        }
        fn wait_vblank_relative(&self, _sequence: u32) -> crate::core::errors::Result<VblankReply> {
            Err(DriverError::hardware("no vblank source"))
        }
    }

    #[test]
    fn test_get_msc_success() {
        let device = Device::new(Arc::new(MemoryGem::new()));
        let mut session =
            DisplaySession::new(device, Box::new(NullOutputs), SessionConfig::default()).unwrap();

        let first = session.get_msc().unwrap();
        let second = session.get_msc().unwrap();
        assert!(second.msc > first.msc);
    }

    #[test]
    fn test_get_msc_failure_is_rate_limited() {
        let device = Device::new(Arc::new(NoVblankGem { inner: MemoryGem::new() }));
        let mut session =
            DisplaySession::new(device, Box::new(NullOutputs), SessionConfig::default()).unwrap();

        for _ in 0..8 {
            assert!(session.get_msc().is_none());
        }
        // the log budget is exhausted, further failures stay quiet
        assert_eq!(session.vblank_error_budget, 0);
    }

    #[test]
    fn test_schedule_wait_msc_unsupported() {
        let device = Device::new(Arc::new(MemoryGem::new()));
        let mut session =
            DisplaySession::new(device, Box::new(NullOutputs), SessionConfig::default()).unwrap();

        assert!(matches!(
            session.schedule_wait_msc(1, 0, 0, 0),
            Err(DriverError::Unsupported(_))
        ));
    }
}
