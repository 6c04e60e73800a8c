//! Receive stage for the receiver pipeline
//!
//! Drains RTP datagrams from a channel into a [`Session`]. Session calls can
//! block (tearing down a decoder pump joins its thread), so the loop runs on
//! the blocking pool.

use crate::error::{FragmentError, ReceiveError};
use crate::pipeline::PipelineStage;
use crate::pipeline::receiver::session::Session;
use crate::pipeline::receiver::substream::FragmentOutcome;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use log::{error, info};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Receive stage: routes raw datagrams into the TRTP session
pub struct ReceiveStage {
    session: Option<Session>,
    input_rx: Option<mpsc::Receiver<Bytes>>,
    stats_interval: Duration,
}

impl ReceiveStage {
    pub fn new(session: Session) -> Self {
        Self {
            session: Some(session),
            input_rx: None,
            stats_interval: Duration::from_secs(30),
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Set the raw datagram input channel
    pub fn set_input(&mut self, rx: mpsc::Receiver<Bytes>) {
        self.input_rx = Some(rx);
    }

    /// Create the input channel and return its sending half
    pub fn take_input(&mut self, depth: usize) -> mpsc::Sender<Bytes> {
        let (tx, rx) = mpsc::channel::<Bytes>(depth);
        self.input_rx = Some(rx);
        tx
    }
}

/// Drop substreams that went terminal so their SSRC starts over.
fn reset_fatal_substreams(session: &mut Session) {
    for (ssrc, status) in session.fatal_substreams() {
        error!(
            "ReceiveStage: substream 0x{:08x} stopped ({}), resetting",
            ssrc, status
        );
        session.remove_substream(ssrc);
    }
}

fn drain(mut session: Session, mut input_rx: mpsc::Receiver<Bytes>, stats_interval: Duration) -> u64 {
    let mut total_datagrams = 0u64;
    let mut units = 0u64;
    let mut last_stats = Instant::now();

    while let Some(datagram) = input_rx.blocking_recv() {
        total_datagrams += 1;
        if total_datagrams == 1 {
            info!("ReceiveStage: first datagram received ({} bytes)", datagram.len());
        }

        match session.process_datagram(&datagram) {
            Ok((_, FragmentOutcome::Queued)) => units += 1,
            Ok((_, FragmentOutcome::Pending)) => {}
            Err(ReceiveError::Fragment {
                source: FragmentError::PumpRejected(_),
                ..
            }) => reset_fatal_substreams(&mut session),
            Err(_) => {}
        }

        // Log stats periodically
        if last_stats.elapsed() >= stats_interval {
            info!(
                "ReceiveStage: {} datagrams, {} access units, {} substreams",
                total_datagrams,
                units,
                session.substream_count()
            );
            last_stats = Instant::now();
        }
    }

    session.shutdown();
    total_datagrams
}

#[async_trait]
impl PipelineStage for ReceiveStage {
    async fn run(&mut self) -> Result<()> {
        let input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;
        let session = self
            .session
            .take()
            .ok_or_else(|| anyhow::anyhow!("Session already consumed"))?;
        let stats_interval = self.stats_interval;

        info!("ReceiveStage: started");
        let total = tokio::task::spawn_blocking(move || drain(session, input_rx, stats_interval))
            .await
            .map_err(|e| anyhow::anyhow!("ReceiveStage worker failed: {}", e))?;

        info!("ReceiveStage: finished ({} total datagrams)", total);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ReceiveStage"
    }
}
