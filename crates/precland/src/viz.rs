//! Background vector visualization fed from the control loop.
//!
//! The loop publishes into a latest-value slot and never waits for the
//! renderer; a worker thread drains the slot at a capped rate, so a slow
//! renderer only ever sees the newest vectors.

use log::{debug, info};
use nalgebra::Vector3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Draws one set of vectors, arranged tip to tail.
pub trait VectorRenderer: Send + 'static {
    fn render(&mut self, vectors: &[Vector3<f64>]);
}

/// Renderer that logs the chain of vectors and the tip of each.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl VectorRenderer for LogRenderer {
    fn render(&mut self, vectors: &[Vector3<f64>]) {
        let mut tip = Vector3::zeros();
        let mut chain = Vec::with_capacity(vectors.len());
        for v in vectors {
            tip += v;
            chain.push(format!(
                "[{:+.3} {:+.3} {:+.3}] -> ({:+.3} {:+.3} {:+.3})",
                v.x, v.y, v.z, tip.x, tip.y, tip.z
            ));
        }
        info!(target: "precland::viz", "{}", chain.join(" | "));
    }
}

struct Shared {
    latest: Mutex<Option<Vec<Vector3<f64>>>>,
    running: AtomicBool,
    rendered: AtomicU64,
}

/// Owned visualization worker with a `start` / `publish` / `stop` lifecycle.
pub struct VectorSink {
    shared: Arc<Shared>,
    period: Duration,
    worker: Option<JoinHandle<()>>,
}

impl VectorSink {
    pub const DEFAULT_RATE_HZ: f64 = 60.0;

    /// Sink that renders at most `rate_hz` times per second.
    pub fn new(rate_hz: f64) -> Self {
        let rate = if rate_hz.is_finite() && rate_hz > 0.0 {
            rate_hz
        } else {
            Self::DEFAULT_RATE_HZ
        };
        Self {
            shared: Arc::new(Shared {
                latest: Mutex::new(None),
                running: AtomicBool::new(false),
                rendered: AtomicU64::new(0),
            }),
            period: Duration::from_secs_f64(1.0 / rate),
            worker: None,
        }
    }

    /// Spawn the worker. Returns false if it is already running.
    pub fn start(&mut self, mut renderer: impl VectorRenderer) -> bool {
        if self.worker.is_some() {
            return false;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let period = self.period;
        self.worker = Some(thread::spawn(move || {
            while shared.running.load(Ordering::SeqCst) {
                let next = shared.latest.lock().take();
                if let Some(vectors) = next {
                    renderer.render(&vectors);
                    shared.rendered.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(period);
            }
        }));
        debug!("visualization started at {:.0} Hz", 1.0 / self.period.as_secs_f64());
        true
    }

    /// Replace the pending vectors; anything not yet rendered is dropped.
    pub fn publish(&self, vectors: Vec<Vector3<f64>>) {
        *self.shared.latest.lock() = Some(vectors);
    }

    /// Signal the worker and wait for it to exit.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
            debug!("visualization stopped after {} renders", self.rendered());
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of vector sets rendered so far.
    #[inline]
    pub fn rendered(&self) -> u64 {
        self.shared.rendered.load(Ordering::SeqCst)
    }
}

impl Default for VectorSink {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RATE_HZ)
    }
}

impl Drop for VectorSink {
    fn drop(&mut self) {
        self.stop();
    }
}
