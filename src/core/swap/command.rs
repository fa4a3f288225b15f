//! Swap commands.
//!
//! One `SwapCommand` exists per in-flight swap request. A flip may be
//! outstanding on several outputs at once; the command carries a completion
//! countdown and is finalized exactly once, when the countdown reaches zero.
//! Outstanding commands are keyed by an opaque token so that the hardware
//! event path can resume them without holding any live reference.

use crate::platform::api::{DrawableId, SurfaceId};

/// Opaque token identifying an outstanding swap command across the hardware
/// event boundary.
pub type SwapToken = u64;

/// Swap command lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// Constructed, not yet issued.
    Pending,
    /// A page flip was issued; completion events are outstanding.
    FlipRequested,
    /// The blit fallback ran synchronously.
    BlitComplete,
    /// Finalized. The command is destroyed in this state.
    Complete,
}

/// How the swap was realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    Flip,
    Blit,
}

/// What the completion callback is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    FlipComplete,
    BlitComplete,
}

/// Completion notification, invoked once the swap fully settles and the
/// drawable still exists.
pub type SwapHandler = Box<dyn FnOnce(DrawableId, SwapOutcome) + Send>;

pub struct SwapCommand {
    /// Stable drawable id, not a live reference: the drawable can be
    /// destroyed while we wait for the page flip event.
    pub(crate) drawable: DrawableId,
    pub(crate) src_surface: SurfaceId,
    pub(crate) dst_surface: SurfaceId,
    pub(crate) state: SwapState,
    pub(crate) kind: SwapKind,
    /// The flip was logically immediate: no output needed reprogramming.
    pub(crate) fake_flip: bool,
    pub(crate) failed: bool,
    /// Outstanding completion signals.
    pub(crate) pending: u32,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) handler: Option<SwapHandler>,
}

impl SwapCommand {
    pub(crate) fn new(
        drawable: DrawableId,
        src_surface: SurfaceId,
        dst_surface: SurfaceId,
        x: i32,
        y: i32,
        handler: SwapHandler,
    ) -> Self {
        Self {
            drawable,
            src_surface,
            dst_surface,
            state: SwapState::Pending,
            kind: SwapKind::Blit,
            fake_flip: false,
            failed: false,
            pending: 0,
            x,
            y,
            handler: Some(handler),
        }
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn kind(&self) -> SwapKind {
        self.kind
    }
}
