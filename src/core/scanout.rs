//! Scanout registry.
//!
//! One slot per active display output, recording which buffer object the
//! output is currently scanning out and whether that record is valid. A
//! completed flip validates the matching slot; a blit bypasses hardware
//! scanout tracking entirely, so it invalidates every slot.

use std::sync::Arc;

use crate::core::buffer::BufferObject;
use crate::platform::api::DrawableInfo;

/// Geometry of one display output in screen coordinates.
#[derive(Debug, Clone, Copy)]
pub struct OutputGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Per-output scanout record.
pub struct ScanoutSlot {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// The buffer object the output currently scans out, shared with
    /// whatever swap command last promoted it.
    pub bo: Option<Arc<BufferObject>>,
    /// False until a flip targeting this slot completes.
    pub valid: bool,
}

pub struct ScanoutRegistry {
    slots: Vec<ScanoutSlot>,
}

impl ScanoutRegistry {
    pub fn new(outputs: &[OutputGeometry]) -> Self {
        let slots = outputs
            .iter()
            .map(|o| ScanoutSlot {
                x: o.x,
                y: o.y,
                width: o.width,
                height: o.height,
                bo: None,
                valid: false,
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[ScanoutSlot] {
        &self.slots
    }

    /// The slot whose output geometry matches the drawable, if any. A
    /// drawable is considered bound to an output when it covers it exactly.
    pub fn slot_for_drawable(&self, draw: &DrawableInfo) -> Option<&ScanoutSlot> {
        self.slots.iter().find(|s| {
            s.x == draw.x && s.y == draw.y && s.width == draw.width && s.height == draw.height
        })
    }

    /// Bind a buffer object to a slot, as the mode-configuration layer does
    /// when it programs an output.
    pub fn bind(&mut self, index: usize, bo: Arc<BufferObject>) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.bo = Some(bo);
        }
    }

    /// Invalidate every slot. Used after a blit completion.
    pub fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            slot.valid = false;
        }
    }

    /// Mark the slot scanning out `bo` valid. At most one slot matches.
    pub fn validate_bo(&mut self, bo: &Arc<BufferObject>) -> bool {
        for slot in &mut self.slots {
            if slot.bo.as_ref().is_some_and(|b| Arc::ptr_eq(b, bo)) {
                slot.valid = true;
                return true;
            }
        }
        false
    }

    /// Record that the output at position (x, y) now scans out `bo`.
    pub fn set_current(&mut self, x: i32, y: i32, bo: &Arc<BufferObject>) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.x == x && s.y == y) {
            slot.bo = Some(Arc::clone(bo));
        }
    }
}
