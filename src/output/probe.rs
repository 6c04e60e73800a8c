//! Render sink that only accounts for what it is given
//!
//! Each submitted buffer is mapped onto the common clock and compared with
//! the current reading, so late delivery shows up in the stats and the log.

use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::RenderError;
use crate::output::{RenderSink, RenderSinkFactory};
use crate::pipeline::clock::{ClockTransform, CommonClock};

/// Counters shared by every sink a [`LoggingSinkFactory`] builds
#[derive(Debug, Default)]
pub struct SinkStats {
    pub sinks_built: AtomicU64,
    pub buffers: AtomicU64,
    pub bytes: AtomicU64,
    /// Buffers whose playout time had already passed on arrival
    pub late_buffers: AtomicU64,
    /// Playout slack of the most recent buffer, microseconds
    pub last_lead_us: AtomicI64,
}

impl SinkStats {
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn late_buffers(&self) -> u64 {
        self.late_buffers.load(Ordering::Relaxed)
    }

    pub fn last_lead_us(&self) -> i64 {
        self.last_lead_us.load(Ordering::Relaxed)
    }
}

pub struct LoggingSinkFactory {
    clock: Arc<dyn CommonClock>,
    stats: Arc<SinkStats>,
}

impl LoggingSinkFactory {
    pub fn new(clock: Arc<dyn CommonClock>) -> Self {
        Self {
            clock,
            stats: Arc::new(SinkStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }
}

impl RenderSinkFactory for LoggingSinkFactory {
    fn construct(&self, channels: u32, sample_rate: u32) -> Result<Box<dyn RenderSink>, RenderError> {
        if channels == 0 || sample_rate == 0 {
            return Err(RenderError(format!(
                "unplayable format {}Hz x{}",
                sample_rate, channels
            )));
        }
        self.stats.sinks_built.fetch_add(1, Ordering::Relaxed);
        info!("LoggingSink: opened {}Hz x{}", sample_rate, channels);
        Ok(Box::new(LoggingSink {
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
            transform: None,
            volume: 1.0,
            running: false,
        }))
    }
}

struct LoggingSink {
    clock: Arc<dyn CommonClock>,
    stats: Arc<SinkStats>,
    transform: Option<ClockTransform>,
    volume: f32,
    running: bool,
}

impl RenderSink for LoggingSink {
    fn set_transform(&mut self, transform: &ClockTransform) -> Result<(), RenderError> {
        if transform.a_to_b_denom == 0 {
            return Err(RenderError("transform has zero denominator".into()));
        }
        self.transform = Some(*transform);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), RenderError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(RenderError(format!("volume {} out of range", volume)));
        }
        self.volume = volume;
        Ok(())
    }

    fn allocate_buffer(&mut self, len: usize) -> Result<BytesMut, RenderError> {
        Ok(BytesMut::with_capacity(len))
    }

    fn submit(&mut self, buffer: Bytes, pts: i64) -> Result<(), RenderError> {
        if !self.running {
            return Err(RenderError("sink not started".into()));
        }
        let transform = self
            .transform
            .ok_or_else(|| RenderError("no media time transform".into()))?;
        let playout = transform
            .forward(pts)
            .ok_or_else(|| RenderError(format!("pts {} does not map to common time", pts)))?;

        self.stats.buffers.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);

        match self.clock.now() {
            Ok(now) => {
                let lead = playout.saturating_sub(now);
                self.stats.last_lead_us.store(lead, Ordering::Relaxed);
                if lead < 0 {
                    self.stats.late_buffers.fetch_add(1, Ordering::Relaxed);
                    warn!("LoggingSink: buffer pts {} is {}us late", pts, -lead);
                } else {
                    debug!(
                        "LoggingSink: {} bytes at pts {} (plays in {}us, gain {:.2})",
                        buffer.len(),
                        pts,
                        lead,
                        self.volume
                    );
                }
            }
            Err(e) => debug!("LoggingSink: {}", e),
        }
        Ok(())
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        if self.running {
            info!("LoggingSink: stopped");
        }
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;

    #[test]
    fn test_tracks_lead_and_lateness() {
        let clock = ManualClock::new();
        clock.set(Some(1_000));
        let factory = LoggingSinkFactory::new(Arc::new(clock.clone()));
        let stats = factory.stats();

        let mut sink = factory.construct(2, 48000).unwrap();
        sink.set_transform(&ClockTransform::identity()).unwrap();
        assert!(sink.submit(Bytes::from_static(&[0; 8]), 5_000).is_err());

        sink.start();
        sink.submit(Bytes::from_static(&[0; 8]), 5_000).unwrap();
        assert_eq!(stats.last_lead_us(), 4_000);
        assert_eq!(stats.late_buffers(), 0);

        sink.submit(Bytes::from_static(&[0; 4]), 500).unwrap();
        assert_eq!(stats.late_buffers(), 1);
        assert_eq!(stats.buffers(), 2);
        assert_eq!(stats.bytes(), 12);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let factory = LoggingSinkFactory::new(Arc::new(ManualClock::new()));
        assert!(factory.construct(0, 48000).is_err());

        let mut sink = factory.construct(1, 8000).unwrap();
        assert!(sink.set_volume(1.5).is_err());
        assert!(sink.set_transform(&ClockTransform::default()).is_err());

        sink.start();
        assert!(sink.submit(Bytes::from_static(&[0; 2]), 0).is_err());
    }
}
