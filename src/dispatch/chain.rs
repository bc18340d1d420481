//! Ordered stage chain with early stop and detach.

use crate::dispatch::event::AudioEvent;
use crate::dispatch::stage::{Flow, Stage};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Identifies a stage registered with a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out stage ids. Clones share the counter so ids can be reserved
/// from another thread before the stage reaches the chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct StageIds(Arc<AtomicU64>);

impl StageIds {
    pub(crate) fn next(&self) -> StageId {
        StageId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

struct Entry {
    id: StageId,
    stage: Box<dyn Stage>,
}

/// Stages invoked in registration order for every window.
#[derive(Default)]
pub struct ConsumerChain {
    entries: Vec<Entry>,
    ids: StageIds,
    /// Entries already visited in the window being dispatched.
    cursor: usize,
}

impl ConsumerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ids(&self) -> StageIds {
        self.ids.clone()
    }

    /// Appends a stage; it sees every window dispatched from now on.
    pub fn add(&mut self, stage: Box<dyn Stage>) -> StageId {
        let id = self.ids.next();
        self.insert(id, stage);
        id
    }

    /// Appends a stage under an id reserved through [`StageIds`].
    pub(crate) fn insert(&mut self, id: StageId, stage: Box<dyn Stage>) {
        debug!(stage = stage.name(), id = %id, "stage added");
        self.entries.push(Entry { id, stage });
    }

    /// Removes a stage and finalizes it immediately.
    ///
    /// Returns false if no stage has that id.
    pub fn detach(&mut self, id: StageId) -> bool {
        match self.take(id) {
            Some(mut stage) => {
                stage.on_finished();
                true
            }
            None => false,
        }
    }

    /// Removes a stage without finalizing it.
    pub fn take(&mut self, id: StageId) -> Option<Box<dyn Stage>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let entry = self.entries.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        debug!(stage = entry.stage.name(), id = %id, "stage removed");
        Some(entry.stage)
    }

    /// Runs the window through each stage until one asks to stop.
    pub fn dispatch(&mut self, event: &mut AudioEvent<'_>) -> Flow {
        self.dispatch_with(event, |_| {})
    }

    /// Like [`dispatch`](Self::dispatch), calling `between` after every stage.
    ///
    /// `between` may detach stages. A stage detached there is skipped for the
    /// rest of the window.
    pub fn dispatch_with(
        &mut self,
        event: &mut AudioEvent<'_>,
        mut between: impl FnMut(&mut Self),
    ) -> Flow {
        self.cursor = 0;
        while let Some(entry) = self.entries.get_mut(self.cursor) {
            self.cursor += 1;
            if entry.stage.process(event).is_stop() {
                debug!(stage = entry.stage.name(), "stage requested stop");
                self.cursor = 0;
                return Flow::Stop;
            }
            between(self);
        }
        self.cursor = 0;
        Flow::Continue
    }

    /// Calls `on_finished` on every stage, in registration order.
    pub fn finish_all(&mut self) {
        for entry in &mut self.entries {
            entry.stage.on_finished();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.stage.name()).collect()
    }
}

impl fmt::Debug for ConsumerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerChain")
            .field("stages", &self.names())
            .finish()
    }
}
