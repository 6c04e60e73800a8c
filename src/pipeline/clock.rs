//! Shared-clock access and media-time transforms

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::error::ClockError;

/// Affine mapping between media time (`a`) and common time (`b`).
///
/// `b = b_zero + (a - a_zero) * a_to_b_numer / a_to_b_denom`
///
/// On the wire the transform occupies 24 bytes, big-endian, in field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockTransform {
    pub a_zero: i64,
    pub b_zero: i64,
    pub a_to_b_numer: i32,
    pub a_to_b_denom: u32,
}

impl ClockTransform {
    pub const WIRE_LEN: usize = 24;

    /// Identity transform (media time == common time).
    pub fn identity() -> Self {
        Self {
            a_zero: 0,
            b_zero: 0,
            a_to_b_numer: 1,
            a_to_b_denom: 1,
        }
    }

    /// Map a media timestamp into common time.
    ///
    /// Returns `None` for a degenerate transform (zero denominator) or when
    /// the result does not fit in an `i64`.
    pub fn forward(&self, a: i64) -> Option<i64> {
        if self.a_to_b_denom == 0 {
            return None;
        }
        let delta = (a as i128 - self.a_zero as i128) * self.a_to_b_numer as i128;
        let b = self.b_zero as i128 + delta / self.a_to_b_denom as i128;
        i64::try_from(b).ok()
    }

    /// Map a common-time value back into media time.
    pub fn reverse(&self, b: i64) -> Option<i64> {
        if self.a_to_b_numer == 0 {
            return None;
        }
        let delta = (b as i128 - self.b_zero as i128) * self.a_to_b_denom as i128;
        let a = self.a_zero as i128 + delta / self.a_to_b_numer as i128;
        i64::try_from(a).ok()
    }

    pub fn from_wire(buf: &[u8; Self::WIRE_LEN]) -> Self {
        let mut a_zero = [0u8; 8];
        let mut b_zero = [0u8; 8];
        let mut numer = [0u8; 4];
        let mut denom = [0u8; 4];
        a_zero.copy_from_slice(&buf[0..8]);
        b_zero.copy_from_slice(&buf[8..16]);
        numer.copy_from_slice(&buf[16..20]);
        denom.copy_from_slice(&buf[20..24]);
        Self {
            a_zero: i64::from_be_bytes(a_zero),
            b_zero: i64::from_be_bytes(b_zero),
            a_to_b_numer: i32::from_be_bytes(numer),
            a_to_b_denom: u32::from_be_bytes(denom),
        }
    }

    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..8].copy_from_slice(&self.a_zero.to_be_bytes());
        out[8..16].copy_from_slice(&self.b_zero.to_be_bytes());
        out[16..20].copy_from_slice(&self.a_to_b_numer.to_be_bytes());
        out[20..24].copy_from_slice(&self.a_to_b_denom.to_be_bytes());
        out
    }
}

/// Readable shared time domain, in microseconds.
pub trait CommonClock: Send + Sync {
    fn now(&self) -> Result<i64, ClockError>;
}

/// Common clock backed by the local monotonic clock
///
/// Reports microseconds elapsed since the clock was created, shifted by an
/// adjustable offset. Useful when transmitter and receiver share a host, or
/// when an external sync service steers the offset.
///
/// Cloning shares the base and the offset.
#[derive(Clone)]
pub struct LocalCommonClock {
    base: Arc<Instant>,
    offset: Arc<AtomicI64>,
}

impl LocalCommonClock {
    pub fn new() -> Self {
        Self::with_base(Instant::now())
    }

    pub fn with_base(base: Instant) -> Self {
        Self {
            base: Arc::new(base),
            offset: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Set the offset (microseconds) added to every reading
    pub fn set_offset(&self, micros: i64) {
        self.offset.store(micros, Ordering::Relaxed);
    }

    /// Slew the offset by a signed delta
    pub fn adjust_offset(&self, delta_micros: i64) {
        self.offset.fetch_add(delta_micros, Ordering::Relaxed);
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }
}

impl Default for LocalCommonClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CommonClock for LocalCommonClock {
    fn now(&self) -> Result<i64, ClockError> {
        let elapsed = i64::try_from(self.base.elapsed().as_micros())
            .map_err(|_| ClockError("elapsed time overflow".to_string()))?;
        Ok(elapsed + self.offset.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for LocalCommonClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommonClock")
            .field("elapsed", &self.base.elapsed())
            .field("offset", &self.offset())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_forward_identity() {
        let t = ClockTransform::identity();
        assert_eq!(t.forward(12_345), Some(12_345));
        assert_eq!(t.reverse(12_345), Some(12_345));
    }

    #[test]
    fn test_forward_scaled() {
        // 90kHz media clock into microseconds, media 0 at common 1s
        let t = ClockTransform {
            a_zero: 0,
            b_zero: 1_000_000,
            a_to_b_numer: 100,
            a_to_b_denom: 9,
        };
        assert_eq!(t.forward(90_000), Some(2_000_000));
        assert_eq!(t.reverse(2_000_000), Some(90_000));
    }

    #[test]
    fn test_degenerate_transform() {
        let t = ClockTransform {
            a_to_b_denom: 0,
            ..ClockTransform::identity()
        };
        assert_eq!(t.forward(1), None);

        let t = ClockTransform {
            a_to_b_numer: i32::MAX,
            ..ClockTransform::identity()
        };
        assert_eq!(t.forward(i64::MAX), None);
    }

    #[test]
    fn test_wire_layout() {
        let t = ClockTransform {
            a_zero: -5,
            b_zero: 0x0102_0304_0506_0708,
            a_to_b_numer: -3,
            a_to_b_denom: 7,
        };
        let wire = t.to_wire();
        assert_eq!(&wire[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&wire[20..24], &[0, 0, 0, 7]);
        assert_eq!(ClockTransform::from_wire(&wire), t);
    }

    #[test]
    fn test_local_clock_offset() {
        let clock = LocalCommonClock::new();
        thread::sleep(Duration::from_millis(5));
        let before = clock.now().unwrap();
        assert!(before >= 5_000);

        clock.set_offset(1_000_000);
        let after = clock.now().unwrap();
        assert!(after - before >= 1_000_000);

        clock.adjust_offset(-500_000);
        assert_eq!(clock.offset(), 500_000);
    }
}
