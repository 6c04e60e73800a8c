//! Scripted collaborators for unit tests

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::decoder::{AccessUnitSource, DecodeEngine, DecoderFactory};
use crate::error::{ClockError, DecodeError, RenderError};
use crate::output::{RenderSink, RenderSinkFactory};
use crate::pipeline::clock::{ClockTransform, CommonClock};
use crate::pipeline::types::{AccessUnit, CodecFormat, CodecKind, DecodedUnit, OutputFormat};

pub fn mp3_format(sample_rate: u32, channels: u32) -> CodecFormat {
    CodecFormat::Mp3 {
        sample_rate,
        channels,
    }
}

pub fn unit(data: &[u8], pts: Option<i64>) -> AccessUnit {
    AccessUnit::new(Bytes::copy_from_slice(data), pts, CodecKind::Mpeg1Audio)
}

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// What the scripted engine does with the next access unit it pulls
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Pass,
    SlowPass(Duration),
    Fail,
    SlowFail(Duration),
    FormatChanged,
    NoOutput,
}

#[derive(Default)]
struct ScriptState {
    steps: Mutex<VecDeque<Step>>,
    formats: Mutex<Vec<CodecFormat>>,
    output_format: Mutex<Option<OutputFormat>>,
    fail_create: Mutex<bool>,
    fail_start: Mutex<bool>,
    created: AtomicUsize,
    reads: AtomicUsize,
    stopped: AtomicUsize,
}

/// Decoder factory whose engines follow a shared script; unscripted reads
/// pass the access unit through untouched.
#[derive(Clone, Default)]
pub struct ScriptedDecoderFactory {
    state: Arc<ScriptState>,
}

impl ScriptedDecoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.state.steps.lock().unwrap().extend(steps);
    }

    pub fn fail_create(&self, fail: bool) {
        *self.state.fail_create.lock().unwrap() = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        *self.state.fail_start.lock().unwrap() = fail;
    }

    pub fn set_output_format(&self, format: Option<OutputFormat>) {
        *self.state.output_format.lock().unwrap() = format;
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Formats passed to `create`, in order
    pub fn formats(&self) -> Vec<CodecFormat> {
        self.state.formats.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.state.stopped.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for ScriptedDecoderFactory {
    fn create(&self, format: &CodecFormat) -> Result<Box<dyn DecodeEngine>, DecodeError> {
        if *self.state.fail_create.lock().unwrap() {
            return Err(DecodeError::Failed("scripted create failure".into()));
        }
        self.state.created.fetch_add(1, Ordering::SeqCst);
        self.state.formats.lock().unwrap().push(format.clone());
        Ok(Box::new(ScriptedEngine {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedEngine {
    state: Arc<ScriptState>,
}

impl DecodeEngine for ScriptedEngine {
    fn start(&mut self, _format: &CodecFormat) -> Result<(), DecodeError> {
        if *self.state.fail_start.lock().unwrap() {
            return Err(DecodeError::Failed("scripted start failure".into()));
        }
        Ok(())
    }

    fn read(&mut self, source: &mut dyn AccessUnitSource) -> Result<Option<DecodedUnit>, DecodeError> {
        let Some(unit) = source.pull() else {
            return Err(DecodeError::EndOfStream);
        };
        let step = self
            .state
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Pass);

        let result = match step {
            Step::Pass => Ok(Some(DecodedUnit {
                data: unit.data,
                pts: unit.pts,
            })),
            Step::SlowPass(delay) => {
                std::thread::sleep(delay);
                Ok(Some(DecodedUnit {
                    data: unit.data,
                    pts: unit.pts,
                }))
            }
            Step::Fail => Err(DecodeError::Failed("scripted failure".into())),
            Step::SlowFail(delay) => {
                std::thread::sleep(delay);
                Err(DecodeError::Failed("scripted slow failure".into()))
            }
            Step::FormatChanged => Err(DecodeError::FormatChanged),
            Step::NoOutput => Ok(None),
        };
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn stop(&mut self) {
        self.state.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn output_format(&self) -> Option<OutputFormat> {
        *self.state.output_format.lock().unwrap()
    }
}

#[derive(Default)]
struct SinkLog {
    submitted: Mutex<Vec<(Bytes, i64)>>,
    formats: Mutex<Vec<(u32, u32)>>,
    transforms: Mutex<Vec<ClockTransform>>,
    volumes: Mutex<Vec<f32>>,
    construct_failures: AtomicUsize,
    submit_failures: AtomicUsize,
    constructed: AtomicUsize,
    stopped: AtomicUsize,
}

/// Sink factory recording everything its sinks are asked to do
#[derive(Clone, Default)]
pub struct RecordingSinkFactory {
    log: Arc<SinkLog>,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl RecordingSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` constructions
    pub fn fail_constructs(&self, n: usize) {
        self.log.construct_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` submissions
    pub fn fail_submits(&self, n: usize) {
        self.log.submit_failures.store(n, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<(Bytes, i64)> {
        self.log.submitted.lock().unwrap().clone()
    }

    /// (channels, sample rate) of every constructed sink
    pub fn formats(&self) -> Vec<(u32, u32)> {
        self.log.formats.lock().unwrap().clone()
    }

    pub fn transforms(&self) -> Vec<ClockTransform> {
        self.log.transforms.lock().unwrap().clone()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.log.volumes.lock().unwrap().clone()
    }

    pub fn constructed(&self) -> usize {
        self.log.constructed.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.log.stopped.load(Ordering::SeqCst)
    }
}

impl RenderSinkFactory for RecordingSinkFactory {
    fn construct(&self, channels: u32, sample_rate: u32) -> Result<Box<dyn RenderSink>, RenderError> {
        if take_failure(&self.log.construct_failures) {
            return Err(RenderError("scripted construct failure".into()));
        }
        self.log.constructed.fetch_add(1, Ordering::SeqCst);
        self.log
            .formats
            .lock()
            .unwrap()
            .push((channels, sample_rate));
        Ok(Box::new(RecordingSink {
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingSink {
    log: Arc<SinkLog>,
}

impl RenderSink for RecordingSink {
    fn set_transform(&mut self, transform: &ClockTransform) -> Result<(), RenderError> {
        self.log.transforms.lock().unwrap().push(*transform);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), RenderError> {
        self.log.volumes.lock().unwrap().push(volume);
        Ok(())
    }

    fn allocate_buffer(&mut self, len: usize) -> Result<BytesMut, RenderError> {
        Ok(BytesMut::with_capacity(len))
    }

    fn submit(&mut self, buffer: Bytes, pts: i64) -> Result<(), RenderError> {
        if take_failure(&self.log.submit_failures) {
            return Err(RenderError("scripted submit failure".into()));
        }
        self.log.submitted.lock().unwrap().push((buffer, pts));
        Ok(())
    }

    fn start(&mut self) {}

    fn stop(&mut self) {
        self.log.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Common clock whose reading is set by the test; `None` reads as an error
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Option<i64>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Option<i64>) {
        *self.now.lock().unwrap() = now;
    }
}

impl CommonClock for ManualClock {
    fn now(&self) -> Result<i64, ClockError> {
        self.now
            .lock()
            .unwrap()
            .ok_or_else(|| ClockError("manual clock unset".into()))
    }
}
