//! Ctrl+C handling for the synchronous binaries.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder;

/// Returns a flag that stays `true` until Ctrl+C is received.
pub fn running_until_ctrl_c() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);

    thread::spawn(move || {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Ctrl+C handling unavailable: {}", e);
                return;
            }
        };

        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            flag.store(false, Ordering::Relaxed);
        }
    });

    running
}
