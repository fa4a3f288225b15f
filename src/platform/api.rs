//! Platform API traits
//!
//! These traits define what the surrounding system must implement for the
//! core to drive it: the kernel GEM/KMS device (`GemBackend`), the output
//! programming layer (`KmsOutputs`), and the windowing system that owns
//! drawables and pixel surfaces (`WindowHost`).
//!
//! An in-memory `GemBackend` (`MemoryGem`) and no-op output/window stubs are
//! provided for headless runs and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::core::buffer::BufferObject;
use crate::core::device::Device;
use crate::core::errors::{DriverError, Result};
use crate::core::swap::SwapToken;

/// Stable drawable identifier. Drawables may be destroyed while operations
/// referencing them are outstanding, so the core never holds a live drawable
/// reference, only this id, re-resolved through `WindowHost`.
pub type DrawableId = u32;

/// Pixel-surface identifier. Surfaces are owned by the window system and
/// reference counted through `WindowHost::surface_ref`/`surface_unref`.
pub type SurfaceId = u32;

/// Kernel memory-object handle.
pub type GemHandle = u32;

/// Kernel framebuffer identifier, usable as a scanout/flip source.
pub type FramebufferId = u32;

bitflags! {
    /// Allocation policy bits for buffer-object memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Physically non-contiguous backing is acceptable.
        const NONCONTIG = 1 << 0;
        /// Memory must be reachable by the display engine.
        const SCANOUT = 1 << 1;
    }
}

/// CPU access mode for the fence acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    /// A top-level window, potentially bound to a scanout.
    Window,
    /// An off-screen surface; never flip-eligible.
    Pixmap,
}

/// Snapshot of a drawable's geometry, fetched by stable id.
#[derive(Debug, Clone, Copy)]
pub struct DrawableInfo {
    pub kind: DrawableKind,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bpp: u8,
}

/// Reply from a relative vblank query.
#[derive(Debug, Clone, Copy)]
pub struct VblankReply {
    pub sequence: u32,
    pub tval_sec: u32,
    pub tval_usec: u32,
}

/// Error from page-flip issuance. Some outputs may already have been
/// programmed before the failure; their completion events will still arrive.
#[derive(Debug, Clone, thiserror::Error)]
#[error("page flip failed after {queued} output(s): {reason}")]
pub struct PageFlipError {
    pub queued: u32,
    pub reason: String,
}

/// Kernel GEM/KMS device primitives.
///
/// One call here corresponds to one ioctl on the real device; the backend
/// performs no policy of its own.
pub trait GemBackend: Send + Sync {
    /// Allocate `size` bytes of display-capable memory.
    fn alloc(&self, size: usize, flags: AllocFlags) -> Result<GemHandle>;

    /// Free a memory object. The caller guarantees no framebuffer still
    /// references the handle.
    fn free(&self, handle: GemHandle);

    /// Export a stable cross-process name for the memory object.
    fn export_name(&self, handle: GemHandle) -> Result<u32>;

    /// Map the memory object for CPU access.
    fn map_bo(&self, handle: GemHandle) -> Result<*mut u8>;

    /// Acquire the CPU fence (shared for read, exclusive for write).
    fn cpu_acquire(&self, handle: GemHandle, mode: AccessMode) -> Result<()>;

    /// Release the CPU fence.
    fn cpu_release(&self, handle: GemHandle) -> Result<()>;

    /// Register a legacy single-plane framebuffer over the memory object.
    fn add_framebuffer(
        &self,
        width: u32,
        height: u32,
        depth: u8,
        bpp: u8,
        pitch: u32,
        handle: GemHandle,
    ) -> Result<FramebufferId>;

    /// Register a framebuffer with an explicit four-cc pixel format.
    fn add_framebuffer_planar(
        &self,
        width: u32,
        height: u32,
        pixel_format: u32,
        handles: &[GemHandle],
        pitches: &[u32],
        offsets: &[u32],
    ) -> Result<FramebufferId>;

    /// Unregister a framebuffer.
    fn remove_framebuffer(&self, fb: FramebufferId) -> Result<()>;

    /// Relative vblank query: wait `sequence` frames from now (0 = just read
    /// the current counter and timestamp).
    fn wait_vblank_relative(&self, sequence: u32) -> Result<VblankReply>;
}

/// Output programming layer (CRTC side).
pub trait KmsOutputs: Send {
    /// Program a page flip to `src_fb` on every output bound to the
    /// drawable. Returns the number of outputs for which an asynchronous
    /// completion event carrying `token` will arrive; 0 means no output
    /// needed reprogramming and the flip is logically complete.
    fn page_flip(
        &mut self,
        drawable: DrawableId,
        src_fb: FramebufferId,
        token: SwapToken,
    ) -> std::result::Result<u32, PageFlipError>;

    /// Switch the bound outputs to flip mode. Returns false on failure.
    fn set_flip_mode(&mut self) -> bool;

    /// Switch the bound outputs to blit mode. Returns false on failure.
    fn set_blit_mode(&mut self) -> bool;

    /// Block for the next batch of hardware completion events and return
    /// their swap tokens. Used only by the teardown drain.
    fn wait_for_event(&mut self) -> Result<Vec<SwapToken>>;
}

/// The windowing system that owns drawables and pixel surfaces.
pub trait WindowHost {
    /// Resolve a drawable by stable id. `None` if it has been destroyed.
    fn lookup_drawable(&self, id: DrawableId) -> Option<DrawableInfo>;

    /// The pixel surface currently providing a drawable's storage. For a
    /// window this may change between frames, so it is always re-resolved.
    fn drawable_surface(&self, id: DrawableId) -> Option<SurfaceId>;

    /// Create an off-screen pixel surface with one ownership reference.
    /// `scanout` hints that flip-capable memory should back it.
    fn create_surface(&mut self, width: u32, height: u32, depth: u8, scanout: bool)
        -> Result<SurfaceId>;

    /// Take one ownership reference on a surface.
    fn surface_ref(&mut self, id: SurfaceId);

    /// Drop one ownership reference; the host destroys the surface when the
    /// count reaches zero.
    fn surface_unref(&mut self, id: SurfaceId);

    /// The buffer object backing a surface, if any.
    fn surface_bo(&self, id: SurfaceId) -> Option<Arc<BufferObject>>;

    /// Rebind a surface to a different buffer object, dropping its reference
    /// to the previous one.
    fn surface_set_bo(&mut self, id: SurfaceId, bo: Arc<BufferObject>);

    /// Swap the storage identities of two surfaces. A completed flip
    /// logically exchanges which surface is the front one.
    fn exchange_surfaces(&mut self, a: SurfaceId, b: SurfaceId);

    /// Synchronously copy a `width`×`height` area from `src` to `dst`.
    fn copy_area(&mut self, src: SurfaceId, dst: SurfaceId, width: u32, height: u32)
        -> Result<()>;

    /// Bump the drawable's change serial so client-visible buffers are
    /// re-validated on the next frame.
    fn bump_serial(&mut self, drawable: DrawableId);
}

// ============================================================================
// In-memory GEM backend
// ============================================================================

struct MemoryBo {
    data: Box<[u8]>,
    name: Option<u32>,
    fenced: bool,
}

#[derive(Default)]
struct MemoryGemState {
    next_handle: GemHandle,
    next_name: u32,
    next_fb: FramebufferId,
    buffers: HashMap<GemHandle, MemoryBo>,
    framebuffers: HashMap<FramebufferId, GemHandle>,
    sequence: u64,
    acquires: u32,
    releases: u32,
    name_exports: u32,
    map_calls: u32,
    framebuffer_failures: u32,
}

/// In-memory `GemBackend` for headless runs and tests. Buffers live on the
/// heap, names and framebuffer ids are synthesized, and the vblank counter
/// advances on every query.
pub struct MemoryGem {
    state: Mutex<MemoryGemState>,
}

impl MemoryGem {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryGemState::default()),
        }
    }

    /// Number of live memory objects.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    /// Number of registered framebuffers.
    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().unwrap().framebuffers.len()
    }

    /// Hardware fence acquires issued so far.
    pub fn fence_acquires(&self) -> u32 {
        self.state.lock().unwrap().acquires
    }

    /// Hardware fence releases issued so far.
    pub fn fence_releases(&self) -> u32 {
        self.state.lock().unwrap().releases
    }

    /// Name-export calls issued so far.
    pub fn name_exports(&self) -> u32 {
        self.state.lock().unwrap().name_exports
    }

    /// Map calls issued so far.
    pub fn map_calls(&self) -> u32 {
        self.state.lock().unwrap().map_calls
    }

    /// Make the next `count` framebuffer registrations fail.
    pub fn inject_framebuffer_failure(&self, count: u32) {
        self.state.lock().unwrap().framebuffer_failures = count;
    }
}

impl Default for MemoryGem {
    fn default() -> Self {
        Self::new()
    }
}

impl GemBackend for MemoryGem {
    fn alloc(&self, size: usize, _flags: AllocFlags) -> Result<GemHandle> {
        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.buffers.insert(
            handle,
            MemoryBo {
                data: vec![0u8; size].into_boxed_slice(),
                name: None,
                fenced: false,
            },
        );
        Ok(handle)
    }

    fn free(&self, handle: GemHandle) {
        let mut state = self.state.lock().unwrap();
        if state.buffers.remove(&handle).is_none() {
            tracing::warn!("free of unknown handle {}", handle);
        }
    }

    fn export_name(&self, handle: GemHandle) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        state.name_exports += 1;
        state.next_name += 1;
        let next = state.next_name;
        let bo = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| DriverError::hardware(format!("unknown handle {}", handle)))?;
        Ok(*bo.name.get_or_insert(next))
    }

    fn map_bo(&self, handle: GemHandle) -> Result<*mut u8> {
        let mut state = self.state.lock().unwrap();
        state.map_calls += 1;
        let bo = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| DriverError::hardware(format!("unknown handle {}", handle)))?;
        Ok(bo.data.as_mut_ptr())
    }

    fn cpu_acquire(&self, handle: GemHandle, _mode: AccessMode) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.acquires += 1;
        let bo = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| DriverError::hardware(format!("unknown handle {}", handle)))?;
        if bo.fenced {
            return Err(DriverError::hardware(format!("handle {} already fenced", handle)));
        }
        bo.fenced = true;
        Ok(())
    }

    fn cpu_release(&self, handle: GemHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.releases += 1;
        let bo = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| DriverError::hardware(format!("unknown handle {}", handle)))?;
        bo.fenced = false;
        Ok(())
    }

    fn add_framebuffer(
        &self,
        _width: u32,
        height: u32,
        _depth: u8,
        _bpp: u8,
        pitch: u32,
        handle: GemHandle,
    ) -> Result<FramebufferId> {
        let mut state = self.state.lock().unwrap();
        if state.framebuffer_failures > 0 {
            state.framebuffer_failures -= 1;
            return Err(DriverError::framebuffer("injected failure"));
        }
        let size = state
            .buffers
            .get(&handle)
            .map(|bo| bo.data.len())
            .ok_or_else(|| DriverError::framebuffer(format!("unknown handle {}", handle)))?;
        if (height * pitch) as usize > size {
            return Err(DriverError::framebuffer(format!(
                "handle {} too small for {}x{} pitch",
                handle, height, pitch
            )));
        }
        state.next_fb += 1;
        let fb = state.next_fb;
        state.framebuffers.insert(fb, handle);
        Ok(fb)
    }

    fn add_framebuffer_planar(
        &self,
        width: u32,
        height: u32,
        _pixel_format: u32,
        handles: &[GemHandle],
        pitches: &[u32],
        _offsets: &[u32],
    ) -> Result<FramebufferId> {
        let handle = *handles
            .first()
            .ok_or_else(|| DriverError::framebuffer("no plane handles"))?;
        let pitch = *pitches
            .first()
            .ok_or_else(|| DriverError::framebuffer("no plane pitches"))?;
        self.add_framebuffer(width, height, 0, 0, pitch, handle)
    }

    fn remove_framebuffer(&self, fb: FramebufferId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .framebuffers
            .remove(&fb)
            .map(|_| ())
            .ok_or_else(|| DriverError::framebuffer(format!("unknown framebuffer {}", fb)))
    }

    fn wait_vblank_relative(&self, sequence: u32) -> Result<VblankReply> {
        let mut state = self.state.lock().unwrap();
        state.sequence = state.sequence.wrapping_add(1 + sequence as u64);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(VblankReply {
            sequence: state.sequence as u32,
            tval_sec: now.as_secs() as u32,
            tval_usec: now.subsec_micros(),
        })
    }
}

// ============================================================================
// Stub output layer
// ============================================================================

/// `KmsOutputs` stub with no outputs bound: mode switches succeed, every
/// flip completes logically (zero events), the event pump is always empty.
pub struct NullOutputs;

impl KmsOutputs for NullOutputs {
    fn page_flip(
        &mut self,
        _drawable: DrawableId,
        _src_fb: FramebufferId,
        _token: SwapToken,
    ) -> std::result::Result<u32, PageFlipError> {
        Ok(0)
    }

    fn set_flip_mode(&mut self) -> bool {
        true
    }

    fn set_blit_mode(&mut self) -> bool {
        true
    }

    fn wait_for_event(&mut self) -> Result<Vec<SwapToken>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Stub window host
// ============================================================================

struct StubSurface {
    refcnt: u32,
    bo: Option<Arc<BufferObject>>,
}

/// Minimal `WindowHost` backed by plain tables, for headless runs and tests.
pub struct StubWindowHost {
    device: Device,
    drawables: HashMap<DrawableId, DrawableInfo>,
    drawable_surfaces: HashMap<DrawableId, SurfaceId>,
    surfaces: HashMap<SurfaceId, StubSurface>,
    next_surface: SurfaceId,
    /// Completed area copies, for inspection.
    pub copies: u32,
    /// Drawables whose change serial was bumped, in order.
    pub serial_bumps: Vec<DrawableId>,
}

impl StubWindowHost {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            drawables: HashMap::new(),
            drawable_surfaces: HashMap::new(),
            surfaces: HashMap::new(),
            next_surface: 0,
            copies: 0,
            serial_bumps: Vec::new(),
        }
    }

    /// Register a drawable and give it a BO-backed storage surface.
    pub fn add_drawable(&mut self, id: DrawableId, info: DrawableInfo) -> Result<SurfaceId> {
        let bo = self
            .device
            .new_bo_with_depth(info.width, info.height, info.depth, info.bpp)?;
        let surface = self.insert_surface(Some(bo));
        self.drawables.insert(id, info);
        self.drawable_surfaces.insert(id, surface);
        Ok(surface)
    }

    /// Forget a drawable, as the window system does on destroy. Its storage
    /// surface keeps whatever references are still held on it.
    pub fn remove_drawable(&mut self, id: DrawableId) {
        self.drawables.remove(&id);
        if let Some(surface) = self.drawable_surfaces.remove(&id) {
            self.surface_unref(surface);
        }
    }

    /// Insert a surface with one ownership reference and an optional backing.
    pub fn insert_surface(&mut self, bo: Option<Arc<BufferObject>>) -> SurfaceId {
        self.next_surface += 1;
        let id = self.next_surface;
        self.surfaces.insert(id, StubSurface { refcnt: 1, bo });
        id
    }

    /// Current ownership count of a surface, if it is still alive.
    pub fn refcount(&self, id: SurfaceId) -> Option<u32> {
        self.surfaces.get(&id).map(|s| s.refcnt)
    }

    /// Point a drawable at a different storage surface, as the window system
    /// does when it reallocates window storage.
    pub fn set_drawable_surface(&mut self, drawable: DrawableId, surface: SurfaceId) {
        self.drawable_surfaces.insert(drawable, surface);
    }
}

impl WindowHost for StubWindowHost {
    fn lookup_drawable(&self, id: DrawableId) -> Option<DrawableInfo> {
        self.drawables.get(&id).copied()
    }

    fn drawable_surface(&self, id: DrawableId) -> Option<SurfaceId> {
        self.drawable_surfaces.get(&id).copied()
    }

    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        depth: u8,
        _scanout: bool,
    ) -> Result<SurfaceId> {
        let bpp = if depth > 16 { 32 } else { 16 };
        let bo = self.device.new_bo_with_depth(width, height, depth, bpp)?;
        Ok(self.insert_surface(Some(bo)))
    }

    fn surface_ref(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.refcnt += 1;
        }
    }

    fn surface_unref(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            tracing::warn!("unref of unknown surface {}", id);
            return;
        };
        assert!(surface.refcnt > 0);
        surface.refcnt -= 1;
        if surface.refcnt == 0 {
            self.surfaces.remove(&id);
        }
    }

    fn surface_bo(&self, id: SurfaceId) -> Option<Arc<BufferObject>> {
        self.surfaces.get(&id).and_then(|s| s.bo.clone())
    }

    fn surface_set_bo(&mut self, id: SurfaceId, bo: Arc<BufferObject>) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.bo = Some(bo);
        }
    }

    fn exchange_surfaces(&mut self, a: SurfaceId, b: SurfaceId) {
        if a == b {
            return;
        }
        let bo_a = self.surfaces.get(&a).and_then(|s| s.bo.clone());
        let bo_b = self.surfaces.get(&b).and_then(|s| s.bo.clone());
        if let Some(surface) = self.surfaces.get_mut(&a) {
            surface.bo = bo_b;
        }
        if let Some(surface) = self.surfaces.get_mut(&b) {
            surface.bo = bo_a;
        }
    }

    fn copy_area(
        &mut self,
        src: SurfaceId,
        dst: SurfaceId,
        _width: u32,
        _height: u32,
    ) -> Result<()> {
        if !self.surfaces.contains_key(&src) || !self.surfaces.contains_key(&dst) {
            return Err(DriverError::hardware(format!(
                "copy between unknown surfaces {} -> {}",
                src, dst
            )));
        }
        self.copies += 1;
        Ok(())
    }

    fn bump_serial(&mut self, drawable: DrawableId) {
        self.serial_bumps.push(drawable);
    }
}
