//! Overlapping-window dispatch.
//!
//! Raw bytes are decoded into a fixed-size window of normalized samples that
//! slides forward by `buffer_size - overlap` frames per iteration. Every
//! window is passed, in order, through the registered stages on a single
//! thread.

pub mod chain;
pub mod dispatcher;
pub mod event;
pub mod signal;
pub mod stage;
pub mod window;

pub use chain::{ConsumerChain, StageId};
pub use dispatcher::{DispatchState, Dispatcher, DispatcherConfig, DispatcherHandle};
pub use event::AudioEvent;
pub use signal::StopSignal;
pub use stage::{FnStage, Flow, Stage};
pub use window::{Fill, FirstWindow, TailPolicy, WindowBuffer};
