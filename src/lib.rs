// Grizzly
//
// Buffer-object lifecycle and swap scheduling core for a display-server
// graphics driver. Manages the memory objects backing on-screen drawables
// and decides per frame whether a buffer swap becomes a zero-copy page flip
// or a blit, synchronized to vblank timing.

pub mod core;
pub mod platform;
pub mod prelude;
pub mod util;

// Re-export the operation surface at crate root
pub use crate::core::errors::{DriverError, Result};
pub use crate::core::{
    Attachment, BufferObject, Device, DisplaySession, DrawableBuffer, MscSample, OutputGeometry,
    SessionConfig, SwapKind, SwapOutcome, SwapToken,
};
