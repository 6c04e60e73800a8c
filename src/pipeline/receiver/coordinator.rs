//! Receiver pipeline coordinator
//!
//! Builds the session, spawns the receive stage and health monitoring, and
//! tracks the receiver lifecycle.

use crate::config::ReceiverConfig;
use crate::decoder::DecoderFactory;
use crate::decoder::pump::PumpContext;
use crate::output::RenderSinkFactory;
use crate::pipeline::PipelineStage;
use crate::pipeline::clock::CommonClock;
use crate::pipeline::health::{HealthAlert, HealthMonitor, ReceiverHealth};
use crate::pipeline::receiver::receive_stage::ReceiveStage;
use crate::pipeline::receiver::session::Session;
use crate::pipeline::state::PipelineState;
use anyhow::Result;
use bytes::Bytes;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Coordinates the receiver pipeline: Socket → Receive → Session → Pumps
pub struct ReceiverCoordinator {
    config: ReceiverConfig,
    health: Arc<ReceiverHealth>,
    state: PipelineState,
    stage_task: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl ReceiverCoordinator {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            health: Arc::new(ReceiverHealth::new()),
            state: PipelineState::Idle,
            stage_task: None,
            background: Vec::new(),
        }
    }

    pub fn health(&self) -> &Arc<ReceiverHealth> {
        &self.health
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn transition(&mut self, target: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            anyhow::bail!("invalid receiver transition {} -> {}", self.state, target);
        }
        self.state = target;
        Ok(())
    }

    /// Launch the receiver pipeline
    ///
    /// Returns the sender datagrams are pushed into. Dropping every clone of
    /// it lets the receive stage drain and finish.
    pub fn launch_pipeline(
        &mut self,
        decoders: Arc<dyn DecoderFactory>,
        sinks: Arc<dyn RenderSinkFactory>,
        clock: Arc<dyn CommonClock>,
    ) -> Result<mpsc::Sender<Bytes>> {
        self.transition(PipelineState::Initializing)?;

        let session = Session::new(PumpContext {
            decoders,
            sinks,
            clock,
            health: Arc::clone(&self.health),
            config: self.config.clone(),
        });
        let mut stage =
            ReceiveStage::new(session).with_stats_interval(self.config.stats_interval());
        let datagram_tx = stage.take_input(self.config.receive_queue_depth);

        self.stage_task = Some(tokio::spawn(async move {
            if let Err(e) = stage.run().await {
                error!("{} error: {}", stage.name(), e);
            }
        }));

        // Health alerts
        let (alert_tx, mut alert_rx) = mpsc::channel::<HealthAlert>(16);
        let monitor = HealthMonitor::new(Arc::clone(&self.health), alert_tx)
            .with_stall_threshold(self.config.stall_threshold());
        self.background.push(tokio::spawn(async move {
            monitor.run().await;
        }));
        self.background.push(tokio::spawn(async move {
            while let Some(alert) = alert_rx.recv().await {
                warn!("Receiver health alert: {}", alert);
            }
        }));

        // Periodic summary
        let health = Arc::clone(&self.health);
        let interval = self.config.stats_interval();
        self.background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("Receiver pipeline health: {}", health.summary());
            }
        }));

        self.transition(PipelineState::Running {
            started_at: Instant::now(),
        })?;
        info!("ReceiverCoordinator: pipeline started");
        Ok(datagram_tx)
    }

    /// Stop the pipeline
    ///
    /// Waits for the receive stage to drain, so every datagram sender must
    /// already be dropped.
    pub async fn stop(&mut self) -> Result<()> {
        self.transition(PipelineState::Stopping)?;

        for task in self.background.drain(..) {
            task.abort();
        }
        if let Some(task) = self.stage_task.take()
            && let Err(e) = task.await
        {
            error!("ReceiverCoordinator: receive stage ended abnormally: {}", e);
        }

        self.transition(PipelineState::Stopped)?;
        info!(
            "ReceiverCoordinator: pipeline stopped ({})",
            self.health.summary()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ManualClock, RecordingSinkFactory, ScriptedDecoderFactory};

    #[tokio::test]
    async fn test_lifecycle() {
        let mut coordinator = ReceiverCoordinator::new(ReceiverConfig::default());
        assert_eq!(*coordinator.state(), PipelineState::Idle);

        let tx = coordinator
            .launch_pipeline(
                Arc::new(ScriptedDecoderFactory::new()),
                Arc::new(RecordingSinkFactory::new()),
                Arc::new(ManualClock::new()),
            )
            .unwrap();
        assert!(coordinator.state().is_running());

        tx.send(Bytes::from_static(&[0x80])).await.unwrap();
        drop(tx);

        coordinator.stop().await.unwrap();
        assert_eq!(*coordinator.state(), PipelineState::Stopped);
        assert_eq!(coordinator.health().network_errors(), 1);

        assert!(
            coordinator
                .launch_pipeline(
                    Arc::new(ScriptedDecoderFactory::new()),
                    Arc::new(RecordingSinkFactory::new()),
                    Arc::new(ManualClock::new()),
                )
                .is_err()
        );
    }
}
