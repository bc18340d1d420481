//! The dispatch run loop.
//!
//! A [`Dispatcher`] owns a byte source, a [`WindowBuffer`] and a
//! [`ConsumerChain`]. [`Dispatcher::run`] pulls overlapping windows from the
//! source and hands each one through the chain until the source ends, a stage
//! returns [`Flow::Stop`](crate::dispatch::stage::Flow::Stop), or a stop is requested through a
//! [`DispatcherHandle`].
//!
//! ```text
//! Created ──run()──▶ Running ──end of data / Flow::Stop / stop()──▶ Stopped
//!    │                                                                ▲
//!    └───────────────────────────stop()───────────────────────────────┘
//! ```

use crate::audio::codec::SampleCodec;
use crate::audio::format::AudioFormat;
use crate::audio::source::{ByteSource, StreamSource};
use crate::audio::wav::WavSource;
use crate::dispatch::chain::{ConsumerChain, StageId, StageIds};
use crate::dispatch::event::AudioEvent;
use crate::dispatch::signal::StopSignal;
use crate::dispatch::stage::Stage;
use crate::dispatch::window::{Fill, FirstWindow, TailPolicy, WindowBuffer, check_buffer_size};
use crate::error::{DispatchError, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Window geometry and edge policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Window length in frames.
    pub buffer_size: usize,
    /// Frames shared by consecutive windows.
    pub overlap: usize,
    pub first_window: FirstWindow,
    pub tail: TailPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            buffer_size: crate::defaults::BUFFER_SIZE,
            overlap: crate::defaults::OVERLAP,
            first_window: FirstWindow::default(),
            tail: TailPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(buffer_size: usize, overlap: usize) -> Self {
        Self {
            buffer_size,
            overlap,
            ..Self::default()
        }
    }

    pub fn with_first_window(mut self, first_window: FirstWindow) -> Self {
        self.first_window = first_window;
        self
    }

    pub fn with_tail(mut self, tail: TailPolicy) -> Self {
        self.tail = tail;
        self
    }

    /// Fresh frames per window. Zero for an invalid geometry.
    pub fn step_size(&self) -> usize {
        self.buffer_size.saturating_sub(self.overlap)
    }

    /// Checks the window geometry.
    ///
    /// # Errors
    /// `ConfigInvalidValue` for an empty window or one above
    /// [`MAX_BUFFER_SIZE`](crate::defaults::MAX_BUFFER_SIZE) frames,
    /// `InvalidWindow` when the overlap is not smaller than the window.
    pub fn validate(&self) -> Result<()> {
        check_buffer_size(self.buffer_size)?;
        if self.overlap >= self.buffer_size {
            return Err(DispatchError::InvalidWindow {
                buffer_size: self.buffer_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Number of windows a run over `total_frames` frames dispatches when no
    /// stage stops it early.
    pub fn expected_windows(&self, total_frames: u64) -> u64 {
        let buffer = self.buffer_size as u64;
        let step = self.step_size() as u64;
        if step == 0 {
            return 0;
        }
        let pads = self.tail == TailPolicy::ZeroPad;

        match self.first_window {
            FirstWindow::ZeroPad => total_frames / step + u64::from(pads && total_frames % step != 0),
            FirstWindow::Full if total_frames < buffer => u64::from(pads && total_frames > 0),
            FirstWindow::Full => {
                let rest = total_frames - buffer;
                1 + rest / step + u64::from(pads && rest % step != 0)
            }
        }
    }
}

/// Lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Created => "created",
            DispatchState::Running => "running",
            DispatchState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

enum Command {
    Add(StageId, Box<dyn Stage>),
    Remove(StageId),
}

/// Stages queued by a handle while a window was being dispatched.
type Deferred = Vec<(StageId, Box<dyn Stage>)>;

/// Applies handle commands that arrive while a window is in the chain.
///
/// Removals take effect at once; additions wait for the next window.
fn apply_between(
    commands: &Receiver<Command>,
    deferred: &mut Deferred,
    chain: &mut ConsumerChain,
) {
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Add(id, stage) => deferred.push((id, stage)),
            Command::Remove(id) => {
                if let Some(index) = deferred.iter().position(|(queued, _)| *queued == id) {
                    let (_, mut stage) = deferred.remove(index);
                    stage.on_finished();
                } else if !chain.detach(id) {
                    debug!(id = %id, "remove ignored, no such stage");
                }
            }
        }
    }
}

/// State visible to handles on other threads.
#[derive(Debug, Default)]
struct Shared {
    stop: StopSignal,
    bytes_processed: AtomicU64,
    windows: AtomicU64,
    finished: AtomicBool,
    /// Guards the command channel so no command slips in after the final drain.
    accepting: Mutex<bool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            accepting: Mutex::new(true),
            ..Self::default()
        }
    }

    fn send(&self, commands: &Sender<Command>, command: Command) -> Result<()> {
        let accepting = self.accepting.lock().unwrap_or_else(|e| e.into_inner());
        if !*accepting {
            return Err(DispatchError::AlreadyStopped);
        }
        commands
            .send(command)
            .map_err(|_| DispatchError::AlreadyStopped)
    }

    fn close(&self) {
        *self.accepting.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }
}

/// Drives a byte source through the consumer chain, one window at a time.
pub struct Dispatcher<S: ByteSource = Box<dyn ByteSource>> {
    source: S,
    window: WindowBuffer,
    chain: ConsumerChain,
    config: DispatcherConfig,
    format: AudioFormat,
    total_bytes: Option<u64>,
    state: DispatchState,
    shared: Arc<Shared>,
    commands_tx: Sender<Command>,
    commands_rx: Receiver<Command>,
    deferred: Deferred,
}

impl<S: ByteSource> Dispatcher<S> {
    /// Builds a dispatcher over `source`, which delivers bytes in `format`.
    ///
    /// # Errors
    /// Configuration errors: unsupported format, empty window or an overlap
    /// not smaller than the window. Nothing is read from the source.
    pub fn new(source: S, format: AudioFormat, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let codec = SampleCodec::new(format)?;
        let window = WindowBuffer::new(codec, config.buffer_size, config.overlap)?
            .with_tail_policy(config.tail);
        let (commands_tx, commands_rx) = unbounded();

        debug!(
            format = %format,
            buffer_size = config.buffer_size,
            overlap = config.overlap,
            "dispatcher created"
        );

        Ok(Self {
            total_bytes: source.total_bytes(),
            source,
            window,
            chain: ConsumerChain::new(),
            config,
            format,
            state: DispatchState::Created,
            shared: Arc::new(Shared::new()),
            commands_tx,
            commands_rx,
            deferred: Vec::new(),
        })
    }

    /// Registers a stage at the end of the chain.
    ///
    /// # Errors
    /// `AlreadyStopped` once the run has ended.
    pub fn add_stage(&mut self, stage: impl Stage) -> Result<StageId> {
        self.add_boxed_stage(Box::new(stage))
    }

    pub fn add_boxed_stage(&mut self, stage: Box<dyn Stage>) -> Result<StageId> {
        if self.state == DispatchState::Stopped {
            return Err(DispatchError::AlreadyStopped);
        }
        Ok(self.chain.add(stage))
    }

    /// Removes a stage. Its `on_finished` runs now unless the run has already
    /// finalized it. Returns false for an unknown id.
    pub fn remove_stage(&mut self, id: StageId) -> bool {
        if self.state == DispatchState::Stopped {
            return self.chain.take(id).is_some();
        }
        self.chain.detach(id)
    }

    /// Handle for controlling the dispatcher from other threads.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::clone(&self.shared),
            commands: self.commands_tx.clone(),
            ids: self.chain.ids(),
            format: self.format,
            total_bytes: self.total_bytes,
        }
    }

    /// Processes the whole source on the calling thread.
    ///
    /// Returns once the dispatcher is stopped. Does nothing if the dispatcher
    /// has already run. Read failures end the run like end of data.
    pub fn run(&mut self) {
        if self.state != DispatchState::Created {
            debug!(state = %self.state, "run ignored");
            return;
        }
        self.state = DispatchState::Running;
        debug!("dispatcher running");

        if self.shared.stop.is_raised() {
            self.finish();
            return;
        }
        self.source.attach_stop_signal(self.shared.stop.clone());

        let mut fill = self.read_first();
        let mut overlap = match self.config.first_window {
            FirstWindow::ZeroPad => self.window.overlap(),
            FirstWindow::Full => 0,
        };

        loop {
            self.apply_commands();

            if !fill.is_dispatchable() {
                if let Fill::Short { bytes } = fill {
                    debug!(bytes, "discarding short final window");
                }
                break;
            }
            if self.shared.stop.is_raised() {
                break;
            }

            let position = self.shared.bytes_processed.load(Ordering::SeqCst);
            let commands = &self.commands_rx;
            let deferred = &mut self.deferred;
            let mut event = AudioEvent::new(
                self.window.samples_mut(),
                overlap,
                &self.format,
                position,
                self.total_bytes,
            );
            let flow = self.chain.dispatch_with(&mut event, |chain| {
                apply_between(commands, deferred, chain)
            });

            self.shared
                .bytes_processed
                .fetch_add(fill.bytes() as u64, Ordering::SeqCst);
            let windows = self.shared.windows.fetch_add(1, Ordering::SeqCst) + 1;
            trace!(window = windows, position, "window dispatched");

            if flow.is_stop() || matches!(fill, Fill::Padded { .. }) {
                break;
            }

            overlap = self.window.overlap();
            fill = self.read_next();
        }

        self.finish();
    }

    /// Runs on a dedicated thread, returning the dispatcher when done.
    pub fn spawn(mut self) -> io::Result<JoinHandle<Self>>
    where
        S: 'static,
    {
        thread::Builder::new()
            .name("audio-dispatch".to_string())
            .spawn(move || {
                self.run();
                self
            })
    }

    /// Stops the dispatcher. Idempotent.
    ///
    /// Stages are finalized and the source closed on the first call.
    pub fn stop(&mut self) {
        self.shared.stop.raise();
        self.finish();
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == DispatchState::Stopped
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    pub fn bytes_processed(&self) -> u64 {
        self.shared.bytes_processed.load(Ordering::SeqCst)
    }

    pub fn windows_dispatched(&self) -> u64 {
        self.shared.windows.load(Ordering::SeqCst)
    }

    /// Stream time consumed so far.
    pub fn elapsed_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.bytes_processed())
    }

    /// Length of the source in seconds, `None` for live sources.
    pub fn total_duration_seconds(&self) -> Option<f64> {
        self.total_bytes
            .map(|bytes| self.format.bytes_to_seconds(bytes))
    }

    /// Length of the source in bytes, `None` for live sources.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Length of the source in frames, `None` for live sources.
    pub fn total_frames(&self) -> Option<u64> {
        self.total_bytes
            .map(|bytes| bytes / self.format.frame_size() as u64)
    }

    fn read_first(&mut self) -> Fill {
        let stopped = self.shared.stop.is_raised();
        let result = match self.config.first_window {
            FirstWindow::ZeroPad => self.window.slide(&mut self.source, stopped),
            FirstWindow::Full => self.window.fill_first(&mut self.source, stopped),
        };
        Self::settle(result)
    }

    fn read_next(&mut self) -> Fill {
        let stopped = self.shared.stop.is_raised();
        Self::settle(self.window.slide(&mut self.source, stopped))
    }

    fn settle(result: Result<Fill>) -> Fill {
        result.unwrap_or_else(|e| {
            warn!(error = %e, "source read failed, ending run");
            Fill::Exhausted
        })
    }

    fn apply_commands(&mut self) {
        for (id, stage) in self.deferred.drain(..) {
            self.chain.insert(id, stage);
        }
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                Command::Add(id, stage) => self.chain.insert(id, stage),
                Command::Remove(id) => {
                    if !self.chain.detach(id) {
                        debug!(id = %id, "remove ignored, no such stage");
                    }
                }
            }
        }
    }

    /// Finalize protocol: runs once, on every exit path.
    fn finish(&mut self) {
        if self.state == DispatchState::Stopped {
            return;
        }
        self.state = DispatchState::Stopped;
        self.shared.stop.raise();

        // Stages queued by handles still get their single on_finished call.
        self.shared.close();
        self.apply_commands();
        self.chain.finish_all();

        if let Err(e) = self.source.close() {
            warn!(error = %e, "failed to close source");
        }
        self.shared.finished.store(true, Ordering::SeqCst);

        debug!(
            windows = self.windows_dispatched(),
            elapsed = self.elapsed_seconds(),
            "dispatcher stopped"
        );
    }
}

impl Dispatcher<WavSource> {
    /// Dispatcher over a WAV file, in the format its header declares.
    pub fn from_wav_file(path: &Path, config: DispatcherConfig) -> Result<Self> {
        let source = WavSource::open(path)?;
        let format = source.format();
        Self::new(source, format, config)
    }
}

impl<R: Read + Send> Dispatcher<StreamSource<R>> {
    /// Dispatcher over headerless bytes in `format`.
    pub fn from_reader(reader: R, format: AudioFormat, config: DispatcherConfig) -> Result<Self> {
        Self::new(StreamSource::new(reader), format, config)
    }
}

#[cfg(feature = "cpal-audio")]
impl Dispatcher<crate::audio::capture::CaptureSource> {
    /// Dispatcher over a capture device. `None` selects the default device.
    pub fn from_microphone(
        device: Option<&str>,
        sample_rate: u32,
        config: DispatcherConfig,
    ) -> Result<Self> {
        let source = crate::audio::capture::CaptureSource::open(device, sample_rate)?;
        let format = source.format();
        Self::new(source, format, config)
    }
}

impl<S: ByteSource> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("format", &self.format)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// Thread-safe control surface of a [`Dispatcher`].
///
/// Additions are applied before the next window. Removals are applied as soon
/// as the stage currently processing a window returns, or before the next
/// window when the dispatcher is between windows.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    ids: StageIds,
    format: AudioFormat,
    total_bytes: Option<u64>,
}

impl DispatcherHandle {
    /// Requests a stop. Idempotent; observed before the next window.
    pub fn stop(&self) {
        if self.shared.stop.raise() {
            debug!("stop requested");
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop.is_raised()
    }

    /// True once the dispatcher has finalized its stages and closed the source.
    pub fn is_stopped(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    pub fn windows_dispatched(&self) -> u64 {
        self.shared.windows.load(Ordering::SeqCst)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.format
            .bytes_to_seconds(self.shared.bytes_processed.load(Ordering::SeqCst))
    }

    pub fn total_duration_seconds(&self) -> Option<f64> {
        self.total_bytes
            .map(|bytes| self.format.bytes_to_seconds(bytes))
    }

    /// Queues a stage; it sees windows from the next iteration on.
    ///
    /// # Errors
    /// `AlreadyStopped` once the dispatcher has finalized.
    pub fn add_stage(&self, stage: impl Stage) -> Result<StageId> {
        let id = self.ids.next();
        self.shared
            .send(&self.commands, Command::Add(id, Box::new(stage)))?;
        Ok(id)
    }

    /// Queues removal of a stage, which is finalized when it is detached.
    ///
    /// Called from inside a stage, the removal is applied before the next
    /// stage runs, so a later stage never sees the current window. Ids that
    /// are unknown or already removed are ignored when the command is
    /// applied.
    ///
    /// # Errors
    /// `AlreadyStopped` once the dispatcher has finalized.
    pub fn remove_stage(&self, id: StageId) -> Result<()> {
        self.shared.send(&self.commands, Command::Remove(id))
    }
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("stop_requested", &self.stop_requested())
            .field("is_stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::MockByteSource;
    use crate::dispatch::stage::{FnStage, Flow};
    use std::sync::atomic::AtomicUsize;

    fn mono16(rate: f32) -> AudioFormat {
        AudioFormat::mono_16bit(rate)
    }

    #[derive(Default, Clone)]
    struct Counts {
        processed: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    struct Counting {
        counts: Counts,
        stop_at: Option<usize>,
    }

    impl Stage for Counting {
        fn process(&mut self, _event: &mut AudioEvent<'_>) -> Flow {
            let n = self.counts.processed.fetch_add(1, Ordering::SeqCst) + 1;
            Flow::from(self.stop_at != Some(n))
        }

        fn on_finished(&mut self) {
            self.counts.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn counting(counts: &Counts) -> Counting {
        Counting {
            counts: counts.clone(),
            stop_at: None,
        }
    }

    #[test]
    fn rejects_invalid_geometry() {
        let source = MockByteSource::new(Vec::new());
        let result = Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(4, 4));
        assert!(matches!(result, Err(DispatchError::InvalidWindow { .. })));
    }

    #[test]
    fn construction_reads_nothing() {
        let source = MockByteSource::new(vec![0; 64]);
        let reads = source.read_counter();

        let dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(4, 2)).unwrap();

        assert_eq!(dispatcher.state(), DispatchState::Created);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_consumes_source_and_finalizes() {
        let source = MockByteSource::new(vec![0; 32]).with_known_length();
        let closed = source.closed_flag();
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(4, 2)).unwrap();
        dispatcher.add_stage(counting(&counts)).unwrap();

        dispatcher.run();

        assert!(dispatcher.is_stopped());
        assert_eq!(counts.processed.load(Ordering::SeqCst), 8);
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(dispatcher.bytes_processed(), 32);
        assert_eq!(dispatcher.total_frames(), Some(16));
    }

    #[test]
    fn second_run_is_ignored() {
        let source = MockByteSource::new(vec![0; 8]);
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        dispatcher.add_stage(counting(&counts)).unwrap();

        dispatcher.run();
        dispatcher.run();

        assert_eq!(counts.processed.load(Ordering::SeqCst), 4);
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_before_run_finalizes_without_reading() {
        let source = MockByteSource::new(vec![0; 8]);
        let reads = source.read_counter();
        let closes = source.close_counter();
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        dispatcher.add_stage(counting(&counts)).unwrap();

        dispatcher.stop();
        dispatcher.stop();
        dispatcher.run();

        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(counts.processed.load(Ordering::SeqCst), 0);
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_stop_before_run_skips_all_windows() {
        let source = MockByteSource::new(vec![0; 8]);
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        dispatcher.add_stage(counting(&counts)).unwrap();
        let handle = dispatcher.handle();

        handle.stop();
        assert!(!handle.is_stopped());
        dispatcher.run();

        assert!(handle.is_stopped());
        assert_eq!(counts.processed.load(Ordering::SeqCst), 0);
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_after_stop_is_rejected() {
        let source = MockByteSource::new(Vec::new());
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        let handle = dispatcher.handle();
        dispatcher.stop();

        let counts = Counts::default();
        assert!(matches!(
            dispatcher.add_stage(counting(&counts)),
            Err(DispatchError::AlreadyStopped)
        ));
        assert!(matches!(
            handle.add_stage(counting(&counts)),
            Err(DispatchError::AlreadyStopped)
        ));
    }

    #[test]
    fn remove_after_stop_does_not_finalize_twice() {
        let source = MockByteSource::new(vec![0; 4]);
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        let id = dispatcher.add_stage(counting(&counts)).unwrap();

        dispatcher.run();
        assert!(dispatcher.remove_stage(id));

        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queued_stage_is_finalized_even_if_never_run() {
        let source = MockByteSource::new(Vec::new());
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        let handle = dispatcher.handle();
        let counts = Counts::default();
        handle.add_stage(counting(&counts)).unwrap();

        dispatcher.stop();

        assert_eq!(counts.processed.load(Ordering::SeqCst), 0);
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_oversized_window() {
        let source = MockByteSource::new(Vec::new());
        let config = DispatcherConfig::new(usize::MAX / 2, 0);
        let result = Dispatcher::new(source, mono16(8000.0), config);
        assert!(matches!(
            result,
            Err(DispatchError::ConfigInvalidValue { ref key, .. }) if key == "buffer_size"
        ));

        let limit = crate::defaults::MAX_BUFFER_SIZE;
        assert!(DispatcherConfig::new(limit, 0).validate().is_ok());
        assert!(DispatcherConfig::new(limit + 1, 0).validate().is_err());
    }

    #[test]
    fn removal_from_earlier_stage_applies_before_later_stages() {
        let source = MockByteSource::new(vec![0; 8]);
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        let handle = dispatcher.handle();
        let target_id: Arc<Mutex<Option<StageId>>> = Arc::default();

        let slot = Arc::clone(&target_id);
        dispatcher
            .add_stage(FnStage::new("remover", move |_: &mut AudioEvent<'_>| {
                if let Some(id) = slot.lock().unwrap().take() {
                    handle.remove_stage(id).unwrap();
                }
                Flow::Continue
            }))
            .unwrap();

        let target = Counts::default();
        let id = dispatcher.add_stage(counting(&target)).unwrap();
        *target_id.lock().unwrap() = Some(id);

        let finished_when_seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&finished_when_seen);
        let watched = target.clone();
        dispatcher
            .add_stage(FnStage::new("observer", move |_: &mut AudioEvent<'_>| {
                log.lock()
                    .unwrap()
                    .push(watched.finished.load(Ordering::SeqCst));
                Flow::Continue
            }))
            .unwrap();

        dispatcher.run();

        assert_eq!(target.processed.load(Ordering::SeqCst), 0);
        assert_eq!(target.finished.load(Ordering::SeqCst), 1);
        assert_eq!(*finished_when_seen.lock().unwrap(), vec![1, 1]);
        assert_eq!(dispatcher.stage_names(), vec!["remover", "observer"]);
    }

    #[test]
    fn stage_added_and_removed_within_one_window_is_finalized_once() {
        let source = MockByteSource::new(vec![0; 8]);
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        let handle = dispatcher.handle();
        let transient = Counts::default();
        let queued = transient.clone();
        let mut pending = true;
        dispatcher
            .add_stage(FnStage::new("churn", move |_: &mut AudioEvent<'_>| {
                if pending {
                    pending = false;
                    let id = handle.add_stage(counting(&queued)).unwrap();
                    handle.remove_stage(id).unwrap();
                }
                Flow::Continue
            }))
            .unwrap();

        dispatcher.run();

        assert_eq!(transient.processed.load(Ordering::SeqCst), 0);
        assert_eq!(transient.finished.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stage_names(), vec!["churn"]);
    }

    #[test]
    fn removing_an_unknown_stage_through_the_handle_is_ignored() {
        let source = MockByteSource::new(vec![0; 8]);
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        let gone = Counts::default();
        let gone_id = dispatcher.add_stage(counting(&gone)).unwrap();
        assert!(dispatcher.remove_stage(gone_id));
        let kept = Counts::default();
        dispatcher.add_stage(counting(&kept)).unwrap();

        dispatcher.handle().remove_stage(gone_id).unwrap();
        dispatcher.run();

        assert_eq!(gone.finished.load(Ordering::SeqCst), 1);
        assert_eq!(kept.processed.load(Ordering::SeqCst), 4);
        assert_eq!(kept.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_error_ends_run_cleanly() {
        let source = MockByteSource::new(vec![0; 64])
            .with_max_chunk(4)
            .with_read_failure_after(2);
        let closed = source.closed_flag();
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        dispatcher.add_stage(counting(&counts)).unwrap();

        dispatcher.run();

        assert_eq!(counts.processed.load(Ordering::SeqCst), 2);
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn close_failure_still_stops() {
        let source = MockByteSource::new(vec![0; 4]).with_close_failure();
        let counts = Counts::default();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();
        dispatcher.add_stage(counting(&counts)).unwrap();

        dispatcher.run();

        assert!(dispatcher.is_stopped());
        assert_eq!(counts.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timing_reports_elapsed_and_total() {
        let source = MockByteSource::new(vec![0; 16000]).with_known_length();
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(1000, 0)).unwrap();

        assert_eq!(dispatcher.total_duration_seconds(), Some(1.0));
        assert_eq!(dispatcher.elapsed_seconds(), 0.0);
        dispatcher.run();
        assert!((dispatcher.elapsed_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn live_source_has_no_duration() {
        let source = MockByteSource::new(Vec::new());
        let dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();

        assert_eq!(dispatcher.total_duration_seconds(), None);
        assert_eq!(dispatcher.handle().total_duration_seconds(), None);
    }

    #[test]
    fn event_position_advances_by_step() {
        let source = MockByteSource::new(vec![0; 24]);
        let positions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&positions);
        let mut dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(4, 1)).unwrap();
        dispatcher
            .add_stage(FnStage::new("positions", move |event: &mut AudioEvent<'_>| {
                seen.lock().unwrap().push(event.bytes_processed());
                Flow::Continue
            }))
            .unwrap();

        dispatcher.run();

        assert_eq!(*positions.lock().unwrap(), vec![0, 6, 12, 18]);
    }

    #[test]
    fn spawn_returns_finished_dispatcher() {
        let source = MockByteSource::new(vec![0; 8]);
        let dispatcher =
            Dispatcher::new(source, mono16(8000.0), DispatcherConfig::new(2, 0)).unwrap();

        let dispatcher = dispatcher.spawn().unwrap().join().unwrap();

        assert!(dispatcher.is_stopped());
        assert_eq!(dispatcher.windows_dispatched(), 4);
    }

    #[test]
    fn expected_windows_zero_pad() {
        let config = DispatcherConfig::new(4, 2);
        assert_eq!(config.expected_windows(8), 4);
        assert_eq!(config.expected_windows(9), 4);
        assert_eq!(config.expected_windows(1), 0);
        assert_eq!(config.with_tail(TailPolicy::ZeroPad).expected_windows(9), 5);
    }

    #[test]
    fn expected_windows_full_first() {
        let config = DispatcherConfig::new(4, 2).with_first_window(FirstWindow::Full);
        assert_eq!(config.expected_windows(4), 1);
        assert_eq!(config.expected_windows(3), 0);
        assert_eq!(config.expected_windows(8), 3);
        assert_eq!(config.expected_windows(9), 3);

        let padded = config.with_tail(TailPolicy::ZeroPad);
        assert_eq!(padded.expected_windows(3), 1);
        assert_eq!(padded.expected_windows(9), 4);
        assert_eq!(padded.expected_windows(0), 0);
    }

    #[test]
    fn state_display() {
        assert_eq!(DispatchState::Running.to_string(), "running");
    }
}
