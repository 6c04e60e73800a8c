//! Decoder pump
//!
//! Owns one decode thread per substream. Access units queued by the
//! reassembler are pulled by the decode engine in FIFO order; decoded PCM is
//! handed to a render sink together with its PTS and the current media to
//! common clock transform.
//!
//! Two locks cross the thread boundary:
//! - the queue lock guards pending units, the exit request and the terminal
//!   status, and pairs with a condvar that wakes the worker
//! - the render lock guards the sink, transform, volume, output format and
//!   the last PTS handed to the sink
//!
//! Decode errors are tolerated up to a budget. Slow failures (decode calls
//! that took longer than the long-error threshold) have a much smaller budget
//! than quick ones; once either is exhausted the pump goes terminal and
//! rejects every further enqueue until `shutdown`.

use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ReceiverConfig;
use crate::decoder::{AccessUnitSource, DecodeEngine, DecoderFactory};
use crate::error::{DecodeError, PumpError};
use crate::output::{RenderSink, RenderSinkFactory, volume_gain};
use crate::pipeline::clock::{ClockTransform, CommonClock};
use crate::pipeline::health::ReceiverHealth;
use crate::pipeline::types::{AccessUnit, CodecFormat, DecodedUnit, OutputFormat};

pub const DEFAULT_VOLUME: u8 = 0xFF;

/// Collaborators shared by every pump of a session
#[derive(Clone)]
pub struct PumpContext {
    pub decoders: Arc<dyn DecoderFactory>,
    pub sinks: Arc<dyn RenderSinkFactory>,
    pub clock: Arc<dyn CommonClock>,
    pub health: Arc<ReceiverHealth>,
    pub config: ReceiverConfig,
}

#[derive(Debug, Clone, Copy)]
struct ErrorBudget {
    max_errors: u32,
    max_long_errors: u32,
    long_threshold: Duration,
}

impl ErrorBudget {
    fn from_config(config: &ReceiverConfig) -> Self {
        Self {
            max_errors: config.max_decode_errors,
            max_long_errors: config.max_long_decode_errors,
            long_threshold: config.long_decode_error_threshold(),
        }
    }
}

struct QueueState {
    units: VecDeque<AccessUnit>,
    exit_requested: bool,
    status: Option<PumpError>,
}

struct RenderState {
    sink: Option<Box<dyn RenderSink>>,
    format: Option<OutputFormat>,
    transform: Option<ClockTransform>,
    volume: u8,
    last_queued_pts: Option<i64>,
}

struct PumpShared {
    queue: Mutex<QueueState>,
    wake: Condvar,
    render: Mutex<RenderState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PumpShared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(QueueState {
                units: VecDeque::new(),
                exit_requested: false,
                status: None,
            }),
            wake: Condvar::new(),
            render: Mutex::new(RenderState {
                sink: None,
                format: None,
                transform: None,
                volume: DEFAULT_VOLUME,
                last_queued_pts: None,
            }),
        }
    }

    fn pull(&self) -> Option<AccessUnit> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(unit) = queue.units.pop_front() {
                return Some(unit);
            }
            if queue.exit_requested {
                return None;
            }
            queue = self
                .wake
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn exit_requested(&self) -> bool {
        lock(&self.queue).exit_requested
    }

    fn set_status(&self, status: PumpError) {
        let mut queue = lock(&self.queue);
        if queue.status.is_none() {
            queue.status = Some(status);
        }
    }

    fn teardown_sink(&self, new_format: Option<OutputFormat>) {
        let mut render = lock(&self.render);
        if let Some(mut sink) = render.sink.take() {
            sink.stop();
        }
        if let Some(format) = new_format {
            render.format = Some(format);
        }
    }
}

/// Handle a decode engine pulls access units through
pub struct PumpSource<'a> {
    shared: &'a PumpShared,
}

impl AccessUnitSource for PumpSource<'_> {
    fn pull(&mut self) -> Option<AccessUnit> {
        self.shared.pull()
    }
}

/// Per-substream decode/render pump
pub struct DecoderPump {
    shared: Arc<PumpShared>,
    /// Doubles as the init lock: held across initialize and shutdown
    worker: Mutex<Option<JoinHandle<()>>>,
    ctx: PumpContext,
}

impl DecoderPump {
    pub fn new(ctx: PumpContext) -> Self {
        Self {
            shared: Arc::new(PumpShared::new()),
            worker: Mutex::new(None),
            ctx,
        }
    }

    /// Create the decode engine for `format` and start the decode thread.
    ///
    /// A no-op when the pump is already running.
    pub fn initialize(&self, format: &CodecFormat) -> Result<(), PumpError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        if format.sample_rate() == 0 || format.channels() == 0 {
            return Err(PumpError::InvalidArgument(format!(
                "sample rate {} / channel count {}",
                format.sample_rate(),
                format.channels()
            )));
        }

        let engine = self
            .ctx
            .decoders
            .create(format)
            .map_err(|e| PumpError::DecoderCreation(e.to_string()))?;

        lock(&self.shared.render).format = Some(format.output_format());
        lock(&self.shared.queue).exit_requested = false;

        let job = Worker {
            shared: Arc::clone(&self.shared),
            engine,
            format: format.clone(),
            sinks: Arc::clone(&self.ctx.sinks),
            health: Arc::clone(&self.ctx.health),
            budget: ErrorBudget::from_config(&self.ctx.config),
        };

        let handle = thread::Builder::new()
            .name("trtp-decode-pump".to_string())
            .spawn(move || job.run())
            .map_err(|e| {
                lock(&self.shared.render).format = None;
                PumpError::ThreadSpawn(e.to_string())
            })?;

        *worker = Some(handle);
        info!("DecoderPump: initialized for {}", format);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// Queue an access unit for decode.
    ///
    /// On failure the unit is handed back along with the pump's terminal
    /// status.
    pub fn enqueue(&self, unit: AccessUnit) -> Result<(), (AccessUnit, PumpError)> {
        {
            let mut queue = lock(&self.shared.queue);
            if let Some(status) = &queue.status {
                return Err((unit, status.clone()));
            }
            queue.units.push_back(unit);
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Block until a unit is queued or shutdown is requested.
    pub fn pull(&self) -> Option<AccessUnit> {
        self.shared.pull()
    }

    pub fn source(&self) -> PumpSource<'_> {
        PumpSource {
            shared: &self.shared,
        }
    }

    pub fn status(&self) -> Option<PumpError> {
        lock(&self.shared.queue).status.clone()
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.shared.queue).units.len()
    }

    pub fn set_clock_transform(&self, transform: ClockTransform) {
        let mut render = lock(&self.shared.render);
        if render.transform == Some(transform) {
            return;
        }
        render.transform = Some(transform);

        if let Some(sink) = render.sink.as_mut()
            && let Err(e) = sink.set_transform(&transform)
        {
            error!("DecoderPump: failed to set media time transform: {}", e);
        }
    }

    pub fn clock_transform(&self) -> Option<ClockTransform> {
        lock(&self.shared.render).transform
    }

    pub fn set_volume(&self, volume: u8) {
        let mut render = lock(&self.shared.render);
        if render.volume == volume {
            return;
        }
        render.volume = volume;

        if let Some(sink) = render.sink.as_mut()
            && let Err(e) = sink.set_volume(volume_gain(volume))
        {
            warn!("DecoderPump: failed to set volume: {}", e);
        }
    }

    pub fn volume(&self) -> u8 {
        lock(&self.shared.render).volume
    }

    pub fn last_queued_pts(&self) -> Option<i64> {
        lock(&self.shared.render).last_queued_pts
    }

    /// Whether the most recently rendered sample plays out within
    /// `threshold_us` of common-clock now.
    ///
    /// Without a rendered sample, a transform or a readable clock there is
    /// no basis for a prediction, so the answer is `false`.
    pub fn is_approaching_underflow(&self, threshold_us: i64) -> bool {
        let render = lock(&self.shared.render);
        let (Some(pts), Some(transform)) = (render.last_queued_pts, render.transform) else {
            return false;
        };

        let now = match self.ctx.clock.now() {
            Ok(now) => now,
            Err(e) => {
                debug!("DecoderPump: {}", e);
                return false;
            }
        };

        let Some(deadline) = transform.forward(pts) else {
            return false;
        };

        now as i128 + threshold_us as i128 - deadline as i128 > 0
    }

    /// Stop the decode thread and return the pump to its initial state.
    pub fn shutdown(&self) {
        let mut worker = lock(&self.worker);

        lock(&self.shared.queue).exit_requested = true;
        self.shared.wake.notify_all();

        if let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            error!("DecoderPump: decode thread panicked");
        }

        {
            let mut queue = lock(&self.shared.queue);
            let dropped = queue.units.len();
            queue.units.clear();
            queue.exit_requested = false;
            queue.status = None;
            if dropped > 0 {
                debug!("DecoderPump: released {} pending access units", dropped);
            }
        }

        let mut render = lock(&self.shared.render);
        if let Some(mut sink) = render.sink.take() {
            sink.stop();
        }
        render.format = None;
        render.transform = None;
        render.volume = DEFAULT_VOLUME;
        render.last_queued_pts = None;
    }
}

impl Drop for DecoderPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the decode thread
struct Worker {
    shared: Arc<PumpShared>,
    engine: Box<dyn DecodeEngine>,
    format: CodecFormat,
    sinks: Arc<dyn RenderSinkFactory>,
    health: Arc<ReceiverHealth>,
    budget: ErrorBudget,
}

impl Worker {
    fn run(mut self) {
        if let Err(e) = self.engine.start(&self.format) {
            error!("DecoderPump: work thread failed to start decoder: {}", e);
            self.health.record_fatal();
            self.shared
                .set_status(PumpError::DecoderStart(e.to_string()));
            return;
        }

        let mut consecutive_errors = 0u32;
        let mut consecutive_long_errors = 0u32;
        let mut rendered = 0u64;

        while !self.shared.exit_requested() {
            let started = Instant::now();
            let result = {
                let mut source = PumpSource {
                    shared: &self.shared,
                };
                self.engine.read(&mut source)
            };
            let elapsed = started.elapsed();

            match result {
                Ok(Some(decoded)) => {
                    consecutive_errors = 0;
                    consecutive_long_errors = 0;
                    if let Err(e) = self.render(decoded) {
                        error!("DecoderPump: {}", e);
                        self.health.record_fatal();
                        self.shared.set_status(e);
                        break;
                    }
                    rendered += 1;
                }
                Ok(None) => {
                    debug!("DecoderPump: successful decode, but no buffer produced");
                }
                Err(DecodeError::FormatChanged) => {
                    info!("DecoderPump: decoder output format changed, rebuilding renderer");
                    self.shared.teardown_sink(self.engine.output_format());
                }
                Err(e) => {
                    if self.shared.exit_requested() {
                        break;
                    }

                    consecutive_errors += 1;
                    if elapsed >= self.budget.long_threshold {
                        consecutive_long_errors += 1;
                    }
                    self.health.record_decode_failure();
                    warn!("DecoderPump: failed to decode data: {}", e);

                    if consecutive_errors >= self.budget.max_errors
                        || consecutive_long_errors >= self.budget.max_long_errors
                    {
                        error!(
                            "DecoderPump: maximum decode error threshold reached ({} consecutive errors, {} taking over {:?}; last took {:?})",
                            consecutive_errors,
                            consecutive_long_errors,
                            self.budget.long_threshold,
                            elapsed
                        );
                        self.health.record_fatal();
                        self.shared.set_status(PumpError::BudgetExhausted {
                            errors: consecutive_errors,
                            long_errors: consecutive_long_errors,
                            last: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        self.engine.stop();
        self.shared.teardown_sink(None);
        info!("DecoderPump: work thread finished ({} buffers rendered)", rendered);
    }

    /// Hand one decoded buffer to the sink, building the sink on first use.
    ///
    /// Only a missing PTS is an error; sink trouble drops this buffer alone.
    fn render(&self, decoded: DecodedUnit) -> Result<(), PumpError> {
        let Some(pts) = decoded.pts else {
            return Err(PumpError::MissingTimestamp);
        };

        let mut render = lock(&self.shared.render);

        if render.sink.is_none() {
            let Some(format) = render.format else {
                warn!("DecoderPump: no output format, dropping audio payload");
                self.health.record_render_drop();
                return Ok(());
            };
            let Some(transform) = render.transform else {
                warn!("DecoderPump: no media time transform yet, dropping audio payload");
                self.health.record_render_drop();
                return Ok(());
            };

            let mut sink = match self.sinks.construct(format.channels, format.sample_rate) {
                Ok(sink) => sink,
                Err(e) => {
                    error!("DecoderPump: failed to set up audio renderer: {}", e);
                    self.health.record_render_drop();
                    return Ok(());
                }
            };
            if let Err(e) = sink.set_transform(&transform) {
                error!("DecoderPump: failed to set media time transform on renderer: {}", e);
                self.health.record_render_drop();
                return Ok(());
            }
            if let Err(e) = sink.set_volume(volume_gain(render.volume)) {
                warn!("DecoderPump: failed to set volume: {}", e);
            }
            sink.start();
            render.sink = Some(sink);
        }

        let len = decoded.data.len();
        let submitted = match render.sink.as_mut() {
            Some(sink) => match sink.allocate_buffer(len) {
                Ok(mut buffer) => {
                    buffer.clear();
                    buffer.extend_from_slice(&decoded.data);
                    sink.submit(buffer.freeze(), pts)
                }
                Err(e) => Err(e),
            },
            None => return Ok(()),
        };

        match submitted {
            Ok(()) => {
                render.last_queued_pts = Some(pts);
                self.health.record_render(len);
            }
            Err(e) => {
                error!(
                    "DecoderPump: failed to queue {} byte audio buffer with media PTS {}: {}",
                    len, pts, e
                );
                self.health.record_render_drop();
            }
        }
        Ok(())
    }
}
