//! Frame rate counters.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    inferred_frames: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            inferred_frames: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_inferred(&self) {
        self.inferred_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_inferred(&self) -> u64 {
        self.inferred_frames.swap(0, Ordering::Relaxed)
    }
}

/// Log captured and inferred frames per second every two seconds.
pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captured_frames = METER.get_reset_captured();
            let inferred_frames = METER.get_reset_inferred();
            let elapsed = start.elapsed().as_secs_f32();

            if captured_frames > 0 {
                log::info!(
                    "Captured frames per second: {:.2}",
                    captured_frames as f32 / elapsed
                );
            }
            if inferred_frames > 0 {
                log::info!(
                    "Inferred frames per second: {:.2}",
                    inferred_frames as f32 / elapsed
                );
            }
        }
    })
}
