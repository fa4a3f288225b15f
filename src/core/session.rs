//! Display session.
//!
//! The explicitly owned driver state: scanout registry, in-flight flip
//! counter, pending-geometry-change flag, fallback scanout buffer and the
//! table of outstanding swap commands. Created at driver attach, torn down
//! at detach, no hidden singletons.

use tracing::{debug, error, info, warn};

use crate::core::buffer::BufferObject;
use crate::core::device::Device;
use crate::core::scanout::{OutputGeometry, ScanoutRegistry};
use crate::core::swap::{SwapCommand, SwapToken};
use crate::platform::api::{KmsOutputs, WindowHost};
use crate::prelude::*;

/// Session construction parameters.
pub struct SessionConfig {
    /// Await one completion event per flipped output. When false, every
    /// flip path finalizes immediately instead.
    pub use_flip_events: bool,
    /// Geometry of the active outputs, one scanout slot each.
    pub outputs: Vec<OutputGeometry>,
    /// Dimensions and format of the fallback scanout buffer.
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bpp: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_flip_events: true,
            outputs: vec![OutputGeometry {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
            }],
            width: 1920,
            height: 1080,
            depth: 24,
            bpp: 32,
        }
    }
}

/// Driver display state for one attach/detach cycle.
pub struct DisplaySession {
    pub(crate) device: Device,
    pub(crate) kms: Box<dyn KmsOutputs>,
    pub scanouts: ScanoutRegistry,
    /// The buffer every blit-mode destination is routed at.
    pub(crate) fallback_scanout: Arc<BufferObject>,
    /// Swaps issued but not yet finalized.
    pub(crate) pending_flips: usize,
    /// Output geometry changed (hotplug/resize) and no blit has absorbed it
    /// yet; flips are suppressed until then.
    pub(crate) pending_geometry_change: bool,
    /// Outstanding swap commands, keyed by the token carried in hardware
    /// completion events.
    pub(crate) inflight: HashMap<SwapToken, SwapCommand>,
    next_token: SwapToken,
    pub(crate) config: SessionConfig,
    /// Remaining vblank-failure log messages before suppression.
    pub(crate) vblank_error_budget: u32,
}

impl DisplaySession {
    /// Attach: allocate the fallback scanout buffer and set up one scanout
    /// slot per configured output.
    pub fn new(device: Device, kms: Box<dyn KmsOutputs>, config: SessionConfig) -> Result<Self> {
        let fallback_scanout =
            device.new_bo_with_depth(config.width, config.height, config.depth, config.bpp)?;
        let scanouts = ScanoutRegistry::new(&config.outputs);
        crate::glog!(
            crate::util::logging::SESSION,
            "display session attached: {} output(s), fallback scanout {}x{}",
            scanouts.len(),
            config.width,
            config.height
        );
        Ok(Self {
            device,
            kms,
            scanouts,
            fallback_scanout,
            pending_flips: 0,
            pending_geometry_change: false,
            inflight: HashMap::new(),
            next_token: 0,
            config,
            vblank_error_budget: 5,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The buffer blit-mode destinations are routed at.
    pub fn fallback_scanout(&self) -> &Arc<BufferObject> {
        &self.fallback_scanout
    }

    /// Number of swaps issued but not yet finalized.
    pub fn pending_flips(&self) -> usize {
        self.pending_flips
    }

    /// Note an output-geometry change (hotplug, resize). Flips are
    /// suppressed until a blit has absorbed it.
    pub fn note_geometry_change(&mut self) {
        self.pending_geometry_change = true;
    }

    pub fn has_pending_geometry_change(&self) -> bool {
        self.pending_geometry_change
    }

    pub(crate) fn next_token(&mut self) -> SwapToken {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    /// Detach: drain outstanding flips through the event pump, then drop the
    /// registry. An outstanding hardware flip event must never fire into
    /// freed state.
    pub fn detach(mut self, host: &mut dyn WindowHost) {
        while self.pending_flips > 0 {
            debug!("waiting on {} outstanding flip(s)..", self.pending_flips);
            match self.kms.wait_for_event() {
                Ok(tokens) => {
                    if tokens.is_empty() {
                        warn!("event pump returned no events, abandoning drain");
                        break;
                    }
                    for token in tokens {
                        self.swap_complete(host, token);
                    }
                }
                Err(e) => {
                    error!("event pump failed during detach: {}", e);
                    break;
                }
            }
        }
        info!("display session detached");
    }
}
