pub mod buffer;
pub mod device;
pub mod errors;
pub mod scanout;
pub mod session;
pub mod swap;
pub mod vblank;

// Re-export key types
pub use buffer::{Attachment, BufferObject, DrawableBuffer};
pub use device::Device;
pub use scanout::{OutputGeometry, ScanoutRegistry, ScanoutSlot};
pub use session::{DisplaySession, SessionConfig};
pub use swap::{SwapKind, SwapOutcome, SwapToken};
pub use vblank::MscSample;
