//! Device construction helpers

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use teleop_rec::config::AppConfig;
use teleop_rec::devices::Device;

/// Device replaying a fixed script of reads, then returning `None`
pub struct ScriptedDevice<T> {
    script: VecDeque<Option<T>>,
    connected: bool,
    reads: Arc<Mutex<usize>>,
    panic_on: Option<usize>,
}

impl<T> ScriptedDevice<T> {
    pub fn new(script: impl IntoIterator<Item = Option<T>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            connected: false,
            reads: Arc::new(Mutex::new(0)),
            panic_on: None,
        }
    }

    /// Panic on the `n`th read (1-based), like a crashing driver
    pub fn panic_on(mut self, n: usize) -> Self {
        self.panic_on = Some(n);
        self
    }

    /// Shared counter of read calls
    pub fn read_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.reads)
    }
}

impl<T: Send + 'static> Device<T> for ScriptedDevice<T> {
    fn connect(&mut self) -> bool {
        self.connected = true;
        true
    }

    fn disconnect(&mut self) -> bool {
        self.connected = false;
        true
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read(&mut self) -> Option<T> {
        let n = {
            let mut reads = self.reads.lock().unwrap();
            *reads += 1;
            *reads
        };
        let next = self.script.pop_front().flatten();
        if self.panic_on == Some(n) {
            panic!("scripted driver fault on read {}", n);
        }
        next
    }
}

/// Configuration for short threaded tests
pub fn fast_config(save_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.collector.max_fps = 50.0;
    config.collector.warmup_secs = 0.1;
    config.collector.join_timeout_ms = 1000;
    config.storage.save_dir = save_dir.to_path_buf();
    config.devices.camera.width = 16;
    config.devices.camera.height = 12;
    config
}
