//! Client-visible buffer wrappers.
//!
//! A `DrawableBuffer` associates a BO-backed pixel surface with a buffer
//! attachment on a drawable. The front attachment always resolves to the
//! drawable's own storage (which the window system may reallocate between
//! frames), other attachments own an off-screen surface created here.

use tracing::{debug, error, warn};

use crate::core::errors::{DriverError, Result};
use crate::core::session::DisplaySession;
use crate::platform::api::{DrawableId, SurfaceId, WindowHost};

/// Buffer attachment point on a drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Front,
    Back,
}

impl Attachment {
    pub fn is_front(self) -> bool {
        self == Attachment::Front
    }
}

/// A client-visible buffer bound to one attachment of a drawable.
///
/// `previous_canflip` caches the flip-eligibility of the previous frame so
/// the scheduler can tell whether the buffer should be re-allocated, e.g.
/// into scanout-able memory if the drawable became flippable. Re-allocating
/// every frame would be pointless overhead; the drawable's change serial is
/// only bumped when eligibility actually transitions.
#[derive(Debug)]
pub struct DrawableBuffer {
    pub attachment: Attachment,
    /// The pixel surface backing this attachment. One ownership reference is
    /// held for the wrapper's lifetime.
    pub surface: SurfaceId,
    /// Cross-process name of the backing memory, handed to the client.
    pub name: u32,
    pub pitch: u32,
    /// Bytes per pixel.
    pub cpp: u32,
    /// Client-requested format code, passed through untouched.
    pub format: u32,
    pub(crate) previous_canflip: Option<bool>,
}

impl DisplaySession {
    /// Create a buffer for one attachment of a drawable.
    ///
    /// `format` is the client-side buffer format, which may differ from the
    /// drawable format (color conversion happens when blitting to front).
    /// The front attachment wraps the drawable's own storage surface; other
    /// attachments get a fresh off-screen surface, placed in scanout-capable
    /// memory when the drawable is currently flip-eligible.
    pub fn create_buffer(
        &mut self,
        host: &mut dyn WindowHost,
        drawable: DrawableId,
        attachment: Attachment,
        format: u32,
    ) -> Result<DrawableBuffer> {
        let draw = host
            .lookup_drawable(drawable)
            .ok_or(DriverError::MissingDrawable(drawable))?;
        debug!(
            "drawable={}, attachment={:?}, format={:08x}",
            drawable, attachment, format
        );

        let surface = if attachment.is_front() {
            let surface = host
                .drawable_surface(drawable)
                .ok_or(DriverError::MissingDrawable(drawable))?;
            host.surface_ref(surface);
            surface
        } else {
            let scanout = self.can_flip(&draw, None);
            host.create_surface(draw.width, draw.height, draw.depth, scanout)?
        };

        let bo = match host.surface_bo(surface) {
            Some(bo) => bo,
            None => {
                error!(
                    "attempting to wrap surface {} with no buffer object backing",
                    surface
                );
                host.surface_unref(surface);
                return Err(DriverError::MissingBacking(surface));
            }
        };

        let name = match bo.flink_name() {
            Ok(name) => name,
            Err(e) => {
                error!("could not get buffer name: {}", e);
                host.surface_unref(surface);
                return Err(e);
            }
        };

        // Without a registered framebuffer the display cannot scan this
        // memory out directly; swaps will fall back to blitting.
        if self.can_flip(&draw, None) && !attachment.is_front() && bo.framebuffer().is_none() {
            warn!("surface {} has no framebuffer, flips unavailable", surface);
        }

        Ok(DrawableBuffer {
            attachment,
            surface,
            name,
            pitch: bo.pitch(),
            cpp: (draw.bpp as u32 + 7) / 8,
            format,
            previous_canflip: None,
        })
    }

    /// Destroy a buffer, dropping exactly one ownership reference on its
    /// surface. The drawable may already be gone; only the surface is
    /// touched here.
    pub fn destroy_buffer(&mut self, host: &mut dyn WindowHost, buf: DrawableBuffer) {
        debug!("destroy buffer surface={}", buf.surface);
        host.surface_unref(buf.surface);
    }

    /// Re-synchronize the client-visible name with the surface's current
    /// buffer object. Flips rename storage beneath the wrapper, so the name
    /// is refreshed whenever the buffer is handed out again.
    pub fn reuse_buffer_notify(
        &mut self,
        host: &mut dyn WindowHost,
        buf: &mut DrawableBuffer,
    ) -> Result<()> {
        let bo = host
            .surface_bo(buf.surface)
            .ok_or(DriverError::MissingBacking(buf.surface))?;
        buf.name = bo.flink_name()?;
        Ok(())
    }
}
