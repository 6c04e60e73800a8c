//! RTP session dispatch
//!
//! Splits incoming datagrams by SSRC, watches each SSRC's sequence numbers
//! and hands TRTP fragments to the matching substream. A marker bit marks
//! the first fragment of an access unit.

use bytes::Bytes;
use log::{debug, error, info, warn};
use std::collections::HashMap;

use crate::decoder::pump::PumpContext;
use crate::error::{FragmentError, PumpError, ReceiveError};
use crate::pipeline::clock::ClockTransform;
use crate::pipeline::receiver::substream::{FragmentOutcome, Substream};
use crate::protocol::rtp::{RtpHeader, TRTP_PAYLOAD_TYPE};

struct SubstreamEntry {
    substream: Substream,
    expected_seq: Option<u16>,
}

pub struct Session {
    ctx: PumpContext,
    substreams: HashMap<u32, SubstreamEntry>,
    transform: Option<ClockTransform>,
}

impl Session {
    pub fn new(ctx: PumpContext) -> Self {
        Self {
            ctx,
            substreams: HashMap::new(),
            transform: None,
        }
    }

    /// Route one RTP datagram to its substream.
    pub fn process_datagram(
        &mut self,
        datagram: &Bytes,
    ) -> Result<(u32, FragmentOutcome), ReceiveError> {
        let (rtp, payload) = match RtpHeader::parse(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.ctx.health.record_network_error();
                return Err(e.into());
            }
        };
        if rtp.payload_type != TRTP_PAYLOAD_TYPE {
            self.ctx.health.record_network_error();
            return Err(ReceiveError::PayloadType(rtp.payload_type));
        }

        let ssrc = rtp.ssrc;
        let entry = self.substreams.entry(ssrc).or_insert_with(|| {
            info!("Session: new substream 0x{:08x}", ssrc);
            let mut substream = Substream::new(ssrc, self.ctx.clone());
            if let Some(transform) = self.transform {
                substream.process_clock_transform(transform);
            }
            SubstreamEntry {
                substream,
                expected_seq: None,
            }
        });

        if let Some(expected) = entry.expected_seq
            && expected != rtp.sequence_number
        {
            self.ctx.health.record_sequence_gap();
            if entry.substream.discard_in_progress() {
                debug!(
                    "Session: substream 0x{:08x} seq discontinuity (expected {}, got {}), dropped partial unit",
                    ssrc, expected, rtp.sequence_number
                );
            }
        }
        entry.expected_seq = Some(rtp.sequence_number.wrapping_add(1));

        self.ctx.health.record_fragment();
        let result = if rtp.marker {
            entry
                .substream
                .process_fragment_start(&payload, rtp.timestamp)
        } else {
            entry.substream.process_fragment_continuation(&payload)
        };

        match result {
            Ok(outcome) => Ok((ssrc, outcome)),
            Err(e) => {
                self.ctx.health.record_fragment_drop();
                match &e {
                    FragmentError::PumpRejected(_) => {
                        error!("Session: substream 0x{:08x} halted: {}", ssrc, e)
                    }
                    e if e.is_anomaly() => warn!("Session: substream 0x{:08x}: {}", ssrc, e),
                    _ => debug!("Session: substream 0x{:08x}: {}", ssrc, e),
                }
                Err(ReceiveError::Fragment { ssrc, source: e })
            }
        }
    }

    /// Apply a media to common time transform to every substream, present
    /// and future.
    pub fn set_clock_transform(&mut self, transform: ClockTransform) {
        self.transform = Some(transform);
        for entry in self.substreams.values_mut() {
            entry.substream.process_clock_transform(transform);
        }
    }

    pub fn is_about_to_underflow(&self) -> bool {
        self.substreams
            .values()
            .any(|entry| entry.substream.is_about_to_underflow())
    }

    /// Substreams stopped by a fatal decode error, with that error
    pub fn fatal_substreams(&self) -> Vec<(u32, PumpError)> {
        let mut fatal: Vec<_> = self
            .substreams
            .iter()
            .filter_map(|(ssrc, entry)| entry.substream.status().map(|s| (*ssrc, s.clone())))
            .collect();
        fatal.sort_by_key(|(ssrc, _)| *ssrc);
        fatal
    }

    pub fn substream(&self, ssrc: u32) -> Option<&Substream> {
        self.substreams.get(&ssrc).map(|entry| &entry.substream)
    }

    /// Tear down a substream. It comes back fresh if its SSRC shows up again.
    pub fn remove_substream(&mut self, ssrc: u32) -> bool {
        match self.substreams.remove(&ssrc) {
            Some(mut entry) => {
                entry.substream.shutdown();
                info!("Session: removed substream 0x{:08x}", ssrc);
                true
            }
            None => false,
        }
    }

    pub fn substream_count(&self) -> usize {
        self.substreams.len()
    }

    pub fn shutdown(&mut self) {
        for (ssrc, mut entry) in self.substreams.drain() {
            debug!("Session: shutting down substream 0x{:08x}", ssrc);
            entry.substream.shutdown();
        }
        self.transform = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiverConfig;
    use crate::pipeline::health::ReceiverHealth;
    use crate::pipeline::types::CodecKind;
    use crate::protocol::packet::{AudioPayload, TrtpPacket};
    use crate::protocol::rtp::make_ssrc;
    use crate::test_support::{
        ManualClock, RecordingSinkFactory, ScriptedDecoderFactory, wait_until,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        decoders: ScriptedDecoderFactory,
        sinks: RecordingSinkFactory,
        clock: ManualClock,
        health: Arc<ReceiverHealth>,
        session: Session,
    }

    fn fixture() -> Fixture {
        let decoders = ScriptedDecoderFactory::new();
        let sinks = RecordingSinkFactory::new();
        let clock = ManualClock::new();
        let health = Arc::new(ReceiverHealth::new());
        let session = Session::new(PumpContext {
            decoders: Arc::new(decoders.clone()),
            sinks: Arc::new(sinks.clone()),
            clock: Arc::new(clock.clone()),
            health: Arc::clone(&health),
            config: ReceiverConfig::default(),
        });
        Fixture {
            decoders,
            sinks,
            clock,
            health,
            session,
        }
    }

    /// RTP datagrams for one MP3 access unit, split at `max_payload`
    fn datagrams(ssrc: u32, first_seq: u16, pts: i64, len: usize, max_payload: usize) -> Vec<Bytes> {
        let mut frame = vec![0xFF, 0xFB, 0x90, 0x64];
        frame.resize(len, 0x5A);
        let encoded = TrtpPacket::audio(
            Some(pts),
            AudioPayload::new(CodecKind::Mpeg1Audio, Bytes::from(frame)),
        )
        .encode()
        .unwrap();

        encoded
            .fragment(max_payload)
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, fragment)| {
                RtpHeader {
                    marker: i == 0,
                    payload_type: TRTP_PAYLOAD_TYPE,
                    sequence_number: first_seq.wrapping_add(i as u16),
                    timestamp: encoded.rtp_timestamp,
                    ssrc,
                }
                .write(fragment)
            })
            .collect()
    }

    fn deliver(session: &mut Session, packets: &[Bytes]) -> Vec<Result<(u32, FragmentOutcome), ReceiveError>> {
        packets
            .iter()
            .map(|p| session.process_datagram(p))
            .collect()
    }

    #[test]
    fn test_routes_by_ssrc() {
        let mut f = fixture();
        f.session.set_clock_transform(ClockTransform::identity());
        let a = make_ssrc(1, 0, 0);
        let b = make_ssrc(1, 0, 1);

        let a_packets = datagrams(a, 10, 1000, 200, 64);
        let b_packets = datagrams(b, 500, 2000, 200, 64);
        for (pa, pb) in a_packets.iter().zip(&b_packets) {
            f.session.process_datagram(pa).unwrap();
            f.session.process_datagram(pb).unwrap();
        }

        assert_eq!(f.session.substream_count(), 2);
        assert!(wait_until(WAIT, || f.sinks.submitted().len() == 2));
        let mut pts: Vec<i64> = f.sinks.submitted().iter().map(|(_, pts)| *pts).collect();
        pts.sort();
        assert_eq!(pts, vec![1000, 2000]);
        assert_eq!(f.health.units_completed(), 2);
        assert_eq!(f.health.sequence_gaps(), 0);
    }

    #[test]
    fn test_sequence_gap_drops_partial_unit() {
        let mut f = fixture();
        let ssrc = make_ssrc(7, 1, 1);
        let packets = datagrams(ssrc, 0xFFFE, 1, 200, 64);
        assert!(packets.len() >= 4);

        // lose the second fragment
        f.session.process_datagram(&packets[0]).unwrap();
        let err = f.session.process_datagram(&packets[2]).unwrap_err();
        assert_eq!(
            err,
            ReceiveError::Fragment {
                ssrc,
                source: FragmentError::NothingInProgress
            }
        );
        assert_eq!(f.health.sequence_gaps(), 1);
        assert!(!f.session.substream(ssrc).unwrap().is_accumulating());

        // sequence numbers wrap cleanly across 0xFFFF
        let next = datagrams(ssrc, 0xFFFE_u16.wrapping_add(packets.len() as u16), 2, 200, 64);
        for result in deliver(&mut f.session, &next) {
            result.unwrap();
        }
        assert_eq!(f.health.units_completed(), 1);
        assert_eq!(f.decoders.created(), 1);
    }

    #[test]
    fn test_rejects_foreign_datagrams() {
        let mut f = fixture();
        assert!(matches!(
            f.session.process_datagram(&Bytes::from_static(&[0x80, 100, 0, 1])),
            Err(ReceiveError::Rtp(_))
        ));

        let other = RtpHeader {
            marker: true,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 0,
            ssrc: 1,
        }
        .write(&[1, 2, 3]);
        assert_eq!(
            f.session.process_datagram(&other),
            Err(ReceiveError::PayloadType(96))
        );
        assert_eq!(f.health.network_errors(), 2);
        assert_eq!(f.session.substream_count(), 0);
    }

    #[test]
    fn test_transform_reaches_late_substreams() {
        let mut f = fixture();
        let transform = ClockTransform {
            b_zero: 1_000_000,
            ..ClockTransform::identity()
        };
        f.session.set_clock_transform(transform);

        let ssrc = make_ssrc(2, 0, 0);
        for result in deliver(&mut f.session, &datagrams(ssrc, 0, 5_000, 100, 1400)) {
            result.unwrap();
        }
        let substream = f.session.substream(ssrc).unwrap();
        assert_eq!(substream.pump().clock_transform(), Some(transform));
        assert!(wait_until(WAIT, || substream.pump().last_queued_pts() == Some(5_000)));

        // last sample plays at 1_005_000; threshold is 50ms
        f.clock.set(Some(900_000));
        assert!(!f.session.is_about_to_underflow());
        f.clock.set(Some(960_000));
        assert!(f.session.is_about_to_underflow());
    }

    #[test]
    fn test_fatal_substreams_are_reported() {
        let mut f = fixture();
        f.decoders.fail_start(true);
        let ssrc = make_ssrc(3, 0, 0);

        let mut seq = 0u16;
        let mut halted = false;
        for pts in 0..50 {
            let packets = datagrams(ssrc, seq, pts, 100, 1400);
            seq = seq.wrapping_add(packets.len() as u16);
            if let Err(ReceiveError::Fragment { source, .. }) = f.session.process_datagram(&packets[0])
                && source.is_fatal()
            {
                halted = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(halted);

        let fatal = f.session.fatal_substreams();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].0, ssrc);
        assert!(matches!(fatal[0].1, PumpError::DecoderStart(_)));

        assert!(f.session.remove_substream(ssrc));
        assert!(!f.session.remove_substream(ssrc));
        assert!(f.session.fatal_substreams().is_empty());
    }

    #[test]
    fn test_shutdown_stops_every_pump() {
        let mut f = fixture();
        f.session.set_clock_transform(ClockTransform::identity());
        for sub in 0..3u8 {
            let ssrc = make_ssrc(9, 0, sub);
            for result in deliver(&mut f.session, &datagrams(ssrc, 0, 1, 100, 1400)) {
                result.unwrap();
            }
        }
        assert_eq!(f.decoders.created(), 3);

        f.session.shutdown();
        assert_eq!(f.session.substream_count(), 0);
        assert_eq!(f.decoders.stopped(), 3);
    }
}
