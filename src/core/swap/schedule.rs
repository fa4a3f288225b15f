//! Swap scheduling.
//!
//! Decides per request whether a buffer swap can be realized as a zero-copy
//! page flip or must fall back to a blit, issues the operation, and
//! finalizes completion, including partial multi-output failure and
//! drawables that disappear while a flip is outstanding.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::core::buffer::{BufferObject, DrawableBuffer};
use crate::core::errors::{DriverError, Result};
use crate::core::session::DisplaySession;
use crate::core::swap::{SwapCommand, SwapKind, SwapOutcome, SwapState, SwapToken};
use crate::platform::api::{DrawableId, DrawableInfo, DrawableKind, SurfaceId, WindowHost};

/// Resolve the surface a buffer reads from or writes to. The front
/// attachment resolves to the drawable's own storage, freshly each time:
/// the window system can reallocate it beneath us between frames.
fn resolve_surface(
    host: &dyn WindowHost,
    drawable: DrawableId,
    buf: &DrawableBuffer,
) -> Result<SurfaceId> {
    if buf.attachment.is_front() {
        host.drawable_surface(drawable)
            .ok_or(DriverError::MissingDrawable(drawable))
    } else {
        Ok(buf.surface)
    }
}

impl DisplaySession {
    /// Whether a swap on this drawable can be realized as a page flip.
    /// Re-evaluated every swap: the drawable can change size or scanout
    /// binding between frames.
    pub fn can_flip(&self, draw: &DrawableInfo, bo: Option<&Arc<BufferObject>>) -> bool {
        if draw.kind != DrawableKind::Window {
            return false;
        }
        if let Some(bo) = bo {
            if bo.width() != draw.width || bo.height() != draw.height {
                return false;
            }
        }
        self.scanouts
            .slot_for_drawable(draw)
            .is_some_and(|slot| slot.bo.is_some())
    }

    /// Schedule a swap of `src` into `dst` on the drawable.
    ///
    /// Flip-eligible swaps are issued as page flips across every bound
    /// output and complete asynchronously through `swap_complete`; anything
    /// else is blitted and completes before this returns. Either way the
    /// completion handler runs exactly once, unless the swap fails before
    /// issue, in which case it never runs and an error is returned.
    pub fn schedule_swap(
        &mut self,
        host: &mut dyn WindowHost,
        drawable: DrawableId,
        dst: &mut DrawableBuffer,
        src: &mut DrawableBuffer,
        handler: super::SwapHandler,
    ) -> Result<()> {
        let draw = host
            .lookup_drawable(drawable)
            .ok_or(DriverError::MissingDrawable(drawable))?;
        let src_surface = resolve_surface(host, drawable, src)?;
        let dst_surface = resolve_surface(host, drawable, dst)?;

        debug!("{:?} -> {:?}", src.attachment, dst.attachment);

        // keep both surfaces alive for the command's lifetime
        host.surface_ref(src_surface);
        host.surface_ref(dst_surface);
        let abort = |host: &mut dyn WindowHost| {
            host.surface_unref(src_surface);
            host.surface_unref(dst_surface);
        };

        let src_bo = match host.surface_bo(src_surface) {
            Some(bo) => bo,
            None => {
                abort(host);
                return Err(DriverError::MissingBacking(src_surface));
            }
        };

        let mut cmd = SwapCommand::new(drawable, src_surface, dst_surface, draw.x, draw.y, handler);
        let new_canflip = self.can_flip(&draw, Some(&src_bo));

        // If we can flip using an output scanout, promote the destination to
        // the scanout buffer; otherwise route it at the device fallback.
        if new_canflip && !self.pending_geometry_change {
            let slot_bo = match self
                .scanouts
                .slot_for_drawable(&draw)
                .and_then(|slot| slot.bo.clone())
            {
                Some(bo) => bo,
                None => {
                    abort(host);
                    return Err(DriverError::MissingBacking(dst_surface));
                }
            };
            host.surface_set_bo(dst_surface, slot_bo);
            if !self.kms.set_flip_mode() {
                error!("Could not set flip mode");
                abort(host);
                return Err(DriverError::mode_switch("flip"));
            }
        } else {
            host.surface_set_bo(dst_surface, Arc::clone(&self.fallback_scanout));
            if !self.kms.set_blit_mode() {
                error!("Could not set blit mode");
                abort(host);
                return Err(DriverError::mode_switch("blit"));
            }
        }

        // obtain an extra reference on both surfaces to keep them from going
        // away while we await the page flip event
        host.surface_ref(src_surface);
        host.surface_ref(dst_surface);
        self.pending_flips += 1;

        let src_fb = src_bo.framebuffer();
        let dst_fb = host.surface_bo(dst_surface).and_then(|bo| bo.framebuffer());

        // A transition between flippable and non-flippable (or a pending
        // output-geometry change, which invalidates the back buffer too)
        // forces client buffers to be re-allocated next frame: either into
        // scanout-able memory, or out of scarce scanout memory.
        if src.previous_canflip.is_some_and(|p| p != new_canflip)
            || dst.previous_canflip.is_some_and(|p| p != new_canflip)
            || self.pending_geometry_change
        {
            host.bump_serial(drawable);
        }
        src.previous_canflip = Some(new_canflip);
        dst.previous_canflip = Some(new_canflip);

        if src_fb.is_some() && dst_fb.is_some() && new_canflip && !self.pending_geometry_change {
            let src_fb = src_fb.unwrap_or_default();
            debug!("can flip: {} -> {}", src_fb, dst_fb.unwrap_or_default());
            cmd.kind = SwapKind::Flip;
            cmd.state = SwapState::FlipRequested;
            let token = self.next_token();
            match self.kms.page_flip(drawable, src_fb, token) {
                Err(e) => {
                    // error while flipping; bail, finalizing once the
                    // already-programmed outputs settle
                    error!("page flip failed: {}", e);
                    cmd.failed = true;
                    cmd.pending = if self.config.use_flip_events { e.queued } else { 0 };
                    if cmd.pending == 0 {
                        self.complete_command(host, cmd);
                    } else {
                        self.inflight.insert(token, cmd);
                    }
                    Err(DriverError::hardware(e.to_string()))
                }
                Ok(events) => {
                    // zero events means no output needed reprogramming:
                    // treat the flip as already complete
                    if events == 0 {
                        cmd.fake_flip = true;
                    }
                    cmd.pending = if self.config.use_flip_events { events } else { 0 };
                    if cmd.pending == 0 {
                        self.complete_command(host, cmd);
                    } else {
                        self.inflight.insert(token, cmd);
                    }
                    Ok(())
                }
            }
        } else {
            // fallback to blit; a failed copy drops the frame but the
            // client is still notified, it must not wait forever
            if let Err(e) = host.copy_area(src_surface, dst_surface, draw.width, draw.height) {
                error!("swap blit failed: {}", e);
            }
            cmd.kind = SwapKind::Blit;
            cmd.state = SwapState::BlitComplete;
            self.complete_command(host, cmd);
            // the blit path is what absorbs a pending resize
            self.pending_geometry_change = false;
            Ok(())
        }
    }

    /// Resume an outstanding swap command: one completion signal arrived for
    /// one output. Finalizes the command when the last signal lands. Tokens
    /// that miss the table are stray events, not errors.
    pub fn swap_complete(&mut self, host: &mut dyn WindowHost, token: SwapToken) {
        let Some(cmd) = self.inflight.get_mut(&token) else {
            warn!("completion event for unknown swap token {}", token);
            return;
        };
        cmd.pending -= 1;
        if cmd.pending > 0 {
            return;
        }
        if let Some(cmd) = self.inflight.remove(&token) {
            self.complete_command(host, cmd);
        }
    }

    /// Finalize a settled command: notify, update the scanout registry,
    /// release the references taken at schedule time, destroy the command.
    pub(crate) fn complete_command(&mut self, host: &mut dyn WindowHost, mut cmd: SwapCommand) {
        if !cmd.failed {
            // the drawable may have been destroyed while the flip was
            // outstanding; then there is nothing to notify, only cleanup
            if host.lookup_drawable(cmd.drawable).is_some() {
                if cmd.kind == SwapKind::Flip && !cmd.fake_flip {
                    // a flip exchanges which surface is the front one
                    host.exchange_surfaces(cmd.src_surface, cmd.dst_surface);
                }

                if let Some(handler) = cmd.handler.take() {
                    let outcome = match cmd.kind {
                        SwapKind::Flip => SwapOutcome::FlipComplete,
                        SwapKind::Blit => SwapOutcome::BlitComplete,
                    };
                    handler(cmd.drawable, outcome);
                }

                match cmd.kind {
                    SwapKind::Blit => {
                        // a blit bypassed scanout tracking, every cached
                        // record is stale now
                        self.scanouts.invalidate_all();
                    }
                    SwapKind::Flip => {
                        if let Some(dst_bo) = host.surface_bo(cmd.dst_surface) {
                            self.scanouts.validate_bo(&dst_bo);
                            if !cmd.fake_flip {
                                self.scanouts.set_current(cmd.x, cmd.y, &dst_bo);
                            }
                        }
                    }
                }
            }
        }

        // drop the references obtained prior to the swap
        host.surface_unref(cmd.src_surface);
        host.surface_unref(cmd.src_surface);
        host.surface_unref(cmd.dst_surface);
        host.surface_unref(cmd.dst_surface);
        self.pending_flips -= 1;

        cmd.state = SwapState::Complete;
        debug!("swap {:?} complete (drawable={})", cmd.kind, cmd.drawable);
    }

    /// Synchronously copy the whole drawable area from `src` to `dst`.
    pub fn copy_region(
        &mut self,
        host: &mut dyn WindowHost,
        drawable: DrawableId,
        dst: &DrawableBuffer,
        src: &DrawableBuffer,
    ) -> Result<()> {
        let draw = host
            .lookup_drawable(drawable)
            .ok_or(DriverError::MissingDrawable(drawable))?;
        let src_surface = resolve_surface(host, drawable, src)?;
        let dst_surface = resolve_surface(host, drawable, dst)?;
        debug!(
            "drawable={}, dst={} ({}), src={} ({})",
            drawable, dst.surface, dst_surface, src.surface, src_surface
        );
        host.copy_area(src_surface, dst_surface, draw.width, draw.height)
    }
}
