//! Buffer objects.
//!
//! A `BufferObject` is a reference-counted handle to a region of
//! display-capable memory, registered as a hardware framebuffer at creation.
//! Shared ownership is expressed with `Arc`: drawable storage, scanout slots
//! and in-flight swap commands each hold a clone, and the framebuffer is
//! unregistered and the memory freed exactly once, when the last clone drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::errors::{DriverError, Result};
use crate::platform::api::{AccessMode, AllocFlags, FramebufferId, GemBackend, GemHandle};

/// CPU access-fence state. Nested acquires of the same mode are legal; only
/// the transitions 0→1 and 1→0 touch the hardware fence.
struct CpuFence {
    exclusive: bool,
    depth: u32,
}

pub struct BufferObject {
    gem: Arc<dyn GemBackend>,
    handle: GemHandle,
    size: usize,
    fb_id: Option<FramebufferId>,
    width: u32,
    height: u32,
    pitch: u32,
    depth: u8,
    bpp: u8,
    pixel_format: u32,
    /// Cross-process name, exported lazily on first request.
    name: Mutex<Option<u32>>,
    /// CPU mapping, established lazily on first request.
    mapping: Mutex<Option<*mut u8>>,
    fence: Mutex<CpuFence>,
    dirty: AtomicBool,
}

// Safety: the cached mapping points into a device-owned region that lives as
// long as the handle; all mutable state sits behind Mutex/atomics.
unsafe impl Send for BufferObject {}
unsafe impl Sync for BufferObject {}

impl BufferObject {
    /// Allocate backing memory and register the framebuffer. A nonzero
    /// `depth` selects legacy single-plane registration; depth 0 registers
    /// with the four-cc `pixel_format` instead. Registration failure frees
    /// the fresh allocation; no partially-constructed object is returned.
    pub(crate) fn new(
        gem: &Arc<dyn GemBackend>,
        width: u32,
        height: u32,
        depth: u8,
        bpp: u8,
        pixel_format: u32,
    ) -> Result<Arc<Self>> {
        // align rows to 64 bytes, the display engine requires it
        let pitch = (((width * bpp as u32 + 7) / 8) + 63) / 64 * 64;
        let size = (height * pitch) as usize;
        let flags = AllocFlags::NONCONTIG;

        let handle = match gem.alloc(size, flags) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("alloc (size: {} flags: {:?}) failed: {}", size, flags, e);
                return Err(e);
            }
        };
        tracing::debug!("Created [BO:{}] {{size: {} flags: {:?}}}", handle, size, flags);

        let registered = if depth != 0 {
            gem.add_framebuffer(width, height, depth, bpp, pitch, handle)
        } else {
            gem.add_framebuffer_planar(width, height, pixel_format, &[handle], &[pitch], &[0])
        };
        let fb_id = match registered {
            Ok(fb) => {
                tracing::debug!(
                    "[BO:{}] [FB:{}] Added FB: {{{}x{} depth: {} bpp: {} pitch: {}}}",
                    handle, fb, width, height, depth, bpp, pitch
                );
                fb
            }
            Err(e) => {
                tracing::error!(
                    "[BO:{}] add FB {{{}x{} depth: {} bpp: {} pitch: {}}} failed: {}",
                    handle, width, height, depth, bpp, pitch, e
                );
                gem.free(handle);
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            gem: Arc::clone(gem),
            handle,
            size,
            fb_id: Some(fb_id),
            width,
            height,
            pitch,
            depth,
            bpp,
            pixel_format,
            name: Mutex::new(None),
            mapping: Mutex::new(None),
            fence: Mutex::new(CpuFence {
                exclusive: false,
                depth: 0,
            }),
            dirty: AtomicBool::new(true),
        }))
    }

    /// Stable cross-process name for the memory, exported once and cached.
    pub fn flink_name(&self) -> Result<u32> {
        let mut name = self.name.lock().unwrap();
        if let Some(n) = *name {
            return Ok(n);
        }
        match self.gem.export_name(self.handle) {
            Ok(n) => {
                *name = Some(n);
                Ok(n)
            }
            Err(e) => {
                tracing::error!("[BO:{}] name export failed: {}", self.handle, e);
                Err(e)
            }
        }
    }

    /// CPU mapping of the memory, established once and cached.
    pub fn map(&self) -> Result<*mut u8> {
        let mut mapping = self.mapping.lock().unwrap();
        if let Some(ptr) = *mapping {
            return Ok(ptr);
        }
        match self.gem.map_bo(self.handle) {
            Ok(ptr) => {
                *mapping = Some(ptr);
                tracing::debug!("[BO:{}] mapped {} bytes", self.handle, self.size);
                Ok(ptr)
            }
            Err(e) => {
                tracing::error!("[BO:{}] map failed: {}", self.handle, e);
                Err(e)
            }
        }
    }

    /// Acquire the CPU fence for `mode` access. Requesting write access
    /// while the buffer is held read-only fails with a contention error and
    /// leaves the fence untouched; callers serialize at a higher layer
    /// rather than blocking here. Completing a write acquire marks the
    /// buffer dirty.
    pub fn prepare_cpu_access(&self, mode: AccessMode) -> Result<()> {
        let mut fence = self.fence.lock().unwrap();
        if fence.depth > 0 {
            if mode == AccessMode::Write && !fence.exclusive {
                tracing::error!(
                    "[BO:{}] attempting to acquire read locked surface for write",
                    self.handle
                );
                return Err(DriverError::Contention);
            }
            fence.depth += 1;
            return Ok(());
        }
        self.gem.cpu_acquire(self.handle, mode).map_err(|e| {
            tracing::error!("[BO:{}] CPU fence acquire failed: {}", self.handle, e);
            e
        })?;
        fence.exclusive = mode == AccessMode::Write;
        fence.depth = 1;
        if fence.exclusive {
            self.dirty.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Release one level of CPU fence; only the outermost release issues the
    /// hardware release. Releasing without a matching acquire is a
    /// programming error.
    pub fn finish_cpu_access(&self) -> Result<()> {
        let mut fence = self.fence.lock().unwrap();
        assert!(
            fence.depth > 0,
            "[BO:{}] CPU fence release without matching acquire",
            self.handle
        );
        fence.depth -= 1;
        if fence.depth != 0 {
            return Ok(());
        }
        self.gem.cpu_release(self.handle).map_err(|e| {
            tracing::error!("[BO:{}] CPU fence release failed: {}", self.handle, e);
            e
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }

    pub fn handle(&self) -> GemHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn bpp(&self) -> u8 {
        self.bpp
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        (self.bpp as u32 + 7) / 8
    }

    pub fn pixel_format(&self) -> u32 {
        self.pixel_format
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Registered framebuffer id, if any.
    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.fb_id
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        let fence = self
            .fence
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(
            fence.depth == 0,
            "[BO:{}] dropped while CPU fence held (depth {})",
            self.handle,
            fence.depth
        );
        if let Some(fb) = self.fb_id {
            tracing::debug!("[BO:{}] [FB:{}] size: {}", self.handle, fb, self.size);
            if let Err(e) = self.gem.remove_framebuffer(fb) {
                // a dangling kernel framebuffer handle is an unrecoverable leak
                tracing::error!("[BO:{}] Remove [FB:{}] failed: {}", self.handle, fb, e);
                panic!("kernel framebuffer {} left dangling", fb);
            }
        }
        self.gem.free(self.handle);
    }
}

impl std::fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferObject")
            .field("handle", &self.handle)
            .field("fb_id", &self.fb_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pitch", &self.pitch)
            .field("depth", &self.depth)
            .field("bpp", &self.bpp)
            .finish()
    }
}
