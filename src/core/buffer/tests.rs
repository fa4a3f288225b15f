use std::sync::Arc;

use crate::core::device::Device;
use crate::core::errors::DriverError;
use crate::core::session::{DisplaySession, SessionConfig};
use crate::platform::api::{AccessMode, GemBackend, MemoryGem, NullOutputs, StubWindowHost, WindowHost};
use crate::platform::api::{DrawableInfo, DrawableKind};

use super::Attachment;

fn gem() -> Arc<MemoryGem> {
    Arc::new(MemoryGem::new())
}

fn window_info(width: u32, height: u32) -> DrawableInfo {
    DrawableInfo {
        kind: DrawableKind::Window,
        x: 0,
        y: 0,
        width,
        height,
        depth: 24,
        bpp: 32,
    }
}

#[test]
fn test_pitch_is_64_byte_aligned() {
    let device = Device::new(gem());

    // 64*32/8 = 256, already aligned
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();
    assert_eq!(bo.pitch(), 256);
    assert_eq!(bo.size(), 64 * 256);

    // 100*32/8 = 400, rounds up to 448
    let bo = device.new_bo_with_depth(100, 10, 24, 32).unwrap();
    assert_eq!(bo.pitch(), 448);
}

#[test]
fn test_refcount_lifecycle() {
    let gem = gem();
    let device = Device::new(gem.clone());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    assert_eq!(Arc::strong_count(&bo), 1);
    let a = Arc::clone(&bo);
    let b = Arc::clone(&bo);
    assert_eq!(Arc::strong_count(&bo), 3);

    drop(a);
    drop(b);
    assert_eq!(Arc::strong_count(&bo), 1);
    assert_eq!(gem.live_buffers(), 1);
    assert_eq!(gem.live_framebuffers(), 1);

    // the last drop unregisters the framebuffer and frees the memory, once
    drop(bo);
    assert_eq!(gem.live_buffers(), 0);
    assert_eq!(gem.live_framebuffers(), 0);
}

#[test]
fn test_fb_registration_failure_frees_allocation() {
    let gem = gem();
    let device = Device::new(gem.clone());

    gem.inject_framebuffer_failure(1);
    let result = device.new_bo_with_depth(64, 64, 24, 32);
    assert!(matches!(result, Err(DriverError::Framebuffer(_))));
    // no leak: the fresh allocation was freed with the failed registration
    assert_eq!(gem.live_buffers(), 0);
}

#[test]
fn test_format_bo_registers_planar_fb() {
    let gem = gem();
    let device = Device::new(gem.clone());

    // 'XR24' four-cc
    let bo = device.new_bo_with_format(64, 64, 0x34325258, 32).unwrap();
    assert_eq!(bo.depth(), 0);
    assert_eq!(bo.pixel_format(), 0x34325258);
    assert!(bo.framebuffer().is_some());
    assert_eq!(gem.live_framebuffers(), 1);
}

#[test]
fn test_new_bo_starts_dirty() {
    let device = Device::new(gem());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();
    assert!(bo.is_dirty());
    bo.clear_dirty();
    assert!(!bo.is_dirty());
}

#[test]
fn test_write_acquire_marks_dirty() {
    let device = Device::new(gem());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();
    bo.clear_dirty();

    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    assert!(!bo.is_dirty());
    bo.finish_cpu_access().unwrap();

    bo.prepare_cpu_access(AccessMode::Write).unwrap();
    assert!(bo.is_dirty());
    bo.finish_cpu_access().unwrap();
}

#[test]
fn test_write_while_read_held_is_contention() {
    let gem = gem();
    let device = Device::new(gem.clone());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    assert!(matches!(
        bo.prepare_cpu_access(AccessMode::Write),
        Err(DriverError::Contention)
    ));

    // depth unchanged: a single release drops the hardware fence
    bo.finish_cpu_access().unwrap();
    assert_eq!(gem.fence_acquires(), 1);
    assert_eq!(gem.fence_releases(), 1);
}

#[test]
fn test_nested_acquires_issue_one_hardware_fence() {
    let gem = gem();
    let device = Device::new(gem.clone());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    assert_eq!(gem.fence_acquires(), 1);

    bo.finish_cpu_access().unwrap();
    bo.finish_cpu_access().unwrap();
    assert_eq!(gem.fence_releases(), 0);
    bo.finish_cpu_access().unwrap();
    assert_eq!(gem.fence_releases(), 1);
}

#[test]
fn test_nested_write_under_write_is_legal() {
    let device = Device::new(gem());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    bo.prepare_cpu_access(AccessMode::Write).unwrap();
    bo.prepare_cpu_access(AccessMode::Write).unwrap();
    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    bo.finish_cpu_access().unwrap();
    bo.finish_cpu_access().unwrap();
    bo.finish_cpu_access().unwrap();
}

#[test]
fn test_hw_acquire_failure_leaves_fence_untouched() {
    let gem = gem();
    let device = Device::new(gem.clone());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    // fence the handle behind the object's back so the next acquire fails
    gem.cpu_acquire(bo.handle(), AccessMode::Read).unwrap();
    assert!(bo.prepare_cpu_access(AccessMode::Read).is_err());
    gem.cpu_release(bo.handle()).unwrap();

    // state was not mutated by the failure: a fresh acquire works
    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    bo.finish_cpu_access().unwrap();
}

#[test]
#[should_panic(expected = "release without matching acquire")]
fn test_release_without_acquire_is_fatal() {
    let device = Device::new(gem());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();
    let _ = bo.finish_cpu_access();
}

#[test]
#[should_panic(expected = "dropped while CPU fence held")]
fn test_drop_while_fenced_is_fatal() {
    let device = Device::new(gem());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();
    bo.prepare_cpu_access(AccessMode::Read).unwrap();
    drop(bo);
}

#[test]
fn test_flink_name_exported_once() {
    let gem = gem();
    let device = Device::new(gem.clone());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    let first = bo.flink_name().unwrap();
    let second = bo.flink_name().unwrap();
    assert_eq!(first, second);
    assert_eq!(gem.name_exports(), 1);
}

#[test]
fn test_map_established_once() {
    let gem = gem();
    let device = Device::new(gem.clone());
    let bo = device.new_bo_with_depth(64, 64, 24, 32).unwrap();

    let first = bo.map().unwrap();
    let second = bo.map().unwrap();
    assert_eq!(first, second);
    assert_eq!(gem.map_calls(), 1);
}

// ============================================================================
// DrawableBuffer
// ============================================================================

fn buffer_rig() -> (Arc<MemoryGem>, StubWindowHost, DisplaySession) {
    let gem = gem();
    let device = Device::new(gem.clone());
    let host = StubWindowHost::new(device.clone());
    let session =
        DisplaySession::new(device, Box::new(NullOutputs), SessionConfig::default()).unwrap();
    (gem, host, session)
}

#[test]
fn test_front_buffer_wraps_drawable_storage() {
    let (_gem, mut host, mut session) = buffer_rig();
    let surface = host.add_drawable(7, window_info(640, 480)).unwrap();

    let buf = session
        .create_buffer(&mut host, 7, Attachment::Front, 0)
        .unwrap();
    assert_eq!(buf.surface, surface);
    assert_eq!(host.refcount(surface), Some(2));
    assert!(buf.name != 0);
    assert_eq!(buf.cpp, 4);

    session.destroy_buffer(&mut host, buf);
    assert_eq!(host.refcount(surface), Some(1));
}

#[test]
fn test_back_buffer_owns_fresh_surface() {
    let (_gem, mut host, mut session) = buffer_rig();
    let front = host.add_drawable(7, window_info(640, 480)).unwrap();

    let buf = session
        .create_buffer(&mut host, 7, Attachment::Back, 0)
        .unwrap();
    assert_ne!(buf.surface, front);
    assert_eq!(host.refcount(buf.surface), Some(1));

    let bo = host.surface_bo(buf.surface).unwrap();
    assert_eq!(buf.pitch, bo.pitch());

    // destruction drops the only reference and the surface with it
    let surface = buf.surface;
    session.destroy_buffer(&mut host, buf);
    assert_eq!(host.refcount(surface), None);
}

#[test]
fn test_unbacked_surface_is_rejected() {
    let (_gem, mut host, mut session) = buffer_rig();
    host.add_drawable(7, window_info(640, 480)).unwrap();
    let bare = host.insert_surface(None);
    host.set_drawable_surface(7, bare);

    let result = session.create_buffer(&mut host, 7, Attachment::Front, 0);
    assert!(matches!(result, Err(DriverError::MissingBacking(_))));
    // the reference taken during creation was given back
    assert_eq!(host.refcount(bare), Some(1));
}

#[test]
fn test_create_buffer_for_missing_drawable() {
    let (_gem, mut host, mut session) = buffer_rig();
    let result = session.create_buffer(&mut host, 99, Attachment::Front, 0);
    assert!(matches!(result, Err(DriverError::MissingDrawable(99))));
}

#[test]
fn test_reuse_notify_refreshes_name() {
    let (_gem, mut host, mut session) = buffer_rig();
    host.add_drawable(7, window_info(640, 480)).unwrap();

    let mut buf = session
        .create_buffer(&mut host, 7, Attachment::Back, 0)
        .unwrap();
    let old_name = buf.name;

    // a flip renamed the storage beneath the wrapper
    let other = session.device().new_bo_with_depth(640, 480, 24, 32).unwrap();
    host.surface_set_bo(buf.surface, Arc::clone(&other));

    session.reuse_buffer_notify(&mut host, &mut buf).unwrap();
    assert_ne!(buf.name, old_name);
    assert_eq!(buf.name, other.flink_name().unwrap());
}
