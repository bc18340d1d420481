//! Processing stage abstraction.

use crate::dispatch::event::AudioEvent;

/// Control-flow result of a single stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the window to the next stage.
    Continue,
    /// Skip the remaining stages and end the run after this window.
    Stop,
}

impl Flow {
    pub fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

impl From<bool> for Flow {
    fn from(keep_going: bool) -> Self {
        if keep_going {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }
}

/// A processing stage in the consumer chain.
///
/// Stages run on the dispatcher thread, one after another, for every window.
/// A stage that blocks in `process` stalls the whole run.
pub trait Stage: Send + 'static {
    /// Processes one window.
    fn process(&mut self, event: &mut AudioEvent<'_>) -> Flow;

    /// Called exactly once when the run ends or the stage is removed.
    ///
    /// Release devices, flush writers and close channels here.
    fn on_finished(&mut self) {}

    /// Returns the name of this stage for logging.
    fn name(&self) -> &'static str {
        "stage"
    }
}

/// Adapts a closure into a [`Stage`].
pub struct FnStage<F> {
    name: &'static str,
    f: F,
}

impl<F> FnStage<F>
where
    F: FnMut(&mut AudioEvent<'_>) -> Flow + Send + 'static,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut AudioEvent<'_>) -> Flow + Send + 'static,
{
    fn process(&mut self, event: &mut AudioEvent<'_>) -> Flow {
        (self.f)(event)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
