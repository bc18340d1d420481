//! Hands window copies to another thread.

use crate::defaults;
use crate::dispatch::event::AudioEvent;
use crate::dispatch::stage::{Flow, Stage};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A window copied out of the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCopy {
    pub samples: Vec<f32>,
    pub overlap: usize,
    pub timestamp_seconds: f64,
}

/// Forwards each window to a consumer thread (a UI, a recorder) without
/// blocking the dispatcher.
///
/// When the receiver falls behind the window is dropped and counted.
/// Finishing the stage closes the channel.
pub struct ForwardStage {
    sender: Option<Sender<WindowCopy>>,
    dropped: Arc<AtomicU64>,
}

impl ForwardStage {
    /// Creates the stage and the receiving end, holding up to `capacity` windows.
    pub fn new(capacity: usize) -> (Self, Receiver<WindowCopy>) {
        let (sender, receiver) = bounded(capacity);
        let stage = Self {
            sender: Some(sender),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (stage, receiver)
    }

    pub fn with_default_capacity() -> (Self, Receiver<WindowCopy>) {
        Self::new(defaults::FORWARD_BUFFER)
    }

    /// Counter of windows dropped because the channel was full.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl Stage for ForwardStage {
    fn process(&mut self, event: &mut AudioEvent<'_>) -> Flow {
        let Some(sender) = self.sender.as_ref() else {
            return Flow::Continue;
        };
        let copy = WindowCopy {
            samples: event.samples().to_vec(),
            overlap: event.overlap(),
            timestamp_seconds: event.timestamp_seconds(),
        };
        match sender.try_send(copy) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("forward receiver gone, no longer forwarding");
                self.sender = None;
            }
        }
        Flow::Continue
    }

    fn on_finished(&mut self) {
        self.sender = None;
    }

    fn name(&self) -> &'static str {
        "forward"
    }
}
