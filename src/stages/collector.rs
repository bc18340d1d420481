//! Stage that keeps a copy of every window it sees.

use crate::dispatch::event::AudioEvent;
use crate::dispatch::stage::{Flow, Stage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Collects window copies for inspection from another thread.
///
/// Clones share the same storage, so a test can keep one clone and hand the
/// other to a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct CollectorStage {
    windows: Arc<Mutex<Vec<Vec<f32>>>>,
    finished: Arc<AtomicUsize>,
    stop_after: Option<usize>,
}

impl CollectorStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Flow::Stop` once `windows` windows have been collected.
    pub fn stopping_after(mut self, windows: usize) -> Self {
        self.stop_after = Some(windows);
        self
    }

    /// Copies of the windows collected so far.
    pub fn windows(&self) -> Vec<Vec<f32>> {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// How many times `on_finished` has run.
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Stage for CollectorStage {
    fn process(&mut self, event: &mut AudioEvent<'_>) -> Flow {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.push(event.samples().to_vec());
        Flow::from(self.stop_after != Some(windows.len()))
    }

    fn on_finished(&mut self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
