use std::sync::Arc;

use anyhow::Result;
use grizzly::glog;
use grizzly::platform::api::{AccessMode, MemoryGem, NullOutputs, StubWindowHost};
use grizzly::util::logging;
use grizzly::{Device, DisplaySession, SessionConfig};

fn main() -> Result<()> {
    // Initialize logging
    // Set default log level to info
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,grizzly=debug");
    }
    // Initialize logging with standardized format
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S".to_string(),
        ))
        .with_ansi(false)
        .init();

    // Headless smoke run over the in-memory backend (real frontends bind the
    // platform traits to the actual device and window system)
    let gem = Arc::new(MemoryGem::new());
    let device = Device::new(gem.clone());
    let mut host = StubWindowHost::new(device.clone());
    let mut session = DisplaySession::new(device.clone(), Box::new(NullOutputs), SessionConfig::default())?;

    let bo = device.new_bo_with_depth(64, 64, 24, 32)?;
    glog!(
        logging::MAIN,
        "allocated probe buffer: {}x{} pitch={} name={}",
        bo.width(),
        bo.height(),
        bo.pitch(),
        bo.flink_name()?
    );

    bo.prepare_cpu_access(AccessMode::Write)?;
    bo.finish_cpu_access()?;
    glog!(logging::MAIN, "CPU fence round-trip ok, dirty={}", bo.is_dirty());

    if let Some(sample) = session.get_msc() {
        glog!(logging::MAIN, "vblank: msc={} ust={}", sample.msc, sample.ust);
    }

    drop(bo);
    session.detach(&mut host);
    glog!(logging::MAIN, "live buffers at exit: {}", gem.live_buffers());

    Ok(())
}
