//! Task that owns the bitrate controller.
//!
//! Every mutation of bitrate state happens on one tokio task; everything
//! else talks to it through a cloneable [`BitrateHandle`].

use crate::bitrate::{BitrateController, BitrateSnapshot};
use livecast_core::{BitrateConfig, LiveCastError, NetworkEvent, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Messages understood by the controller task.
#[derive(Debug)]
pub enum BitrateCommand {
    Event(NetworkEvent),
    SetMaxVideoBitrate(u32),
    SetMaxAudioBitrate(u32),
    ApplyConfig(BitrateConfig),
    CheckDisconnect,
    Snapshot(oneshot::Sender<BitrateSnapshot>),
    Shutdown,
}

/// Cloneable handle to a running bitrate controller.
#[derive(Debug, Clone)]
pub struct BitrateHandle {
    tx: mpsc::UnboundedSender<BitrateCommand>,
}

impl BitrateHandle {
    /// Move `controller` onto its own task and publish its starting ceilings.
    pub fn spawn(controller: BitrateController) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(controller, rx));
        (Self { tx }, task)
    }

    fn send(&self, command: BitrateCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| LiveCastError::ChannelClosed("bitrate controller"))
    }

    /// Forward a sink event.
    pub fn report(&self, event: NetworkEvent) -> Result<()> {
        self.send(BitrateCommand::Event(event))
    }

    pub fn set_max_video_bitrate(&self, bitrate: u32) -> Result<()> {
        self.send(BitrateCommand::SetMaxVideoBitrate(bitrate))
    }

    pub fn set_max_audio_bitrate(&self, bitrate: u32) -> Result<()> {
        self.send(BitrateCommand::SetMaxAudioBitrate(bitrate))
    }

    pub fn apply_config(&self, config: BitrateConfig) -> Result<()> {
        self.send(BitrateCommand::ApplyConfig(config))
    }

    pub fn check_disconnect(&self) -> Result<()> {
        self.send(BitrateCommand::CheckDisconnect)
    }

    pub async fn snapshot(&self) -> Result<BitrateSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(BitrateCommand::Snapshot(tx))?;
        rx.await
            .map_err(|_| LiveCastError::ChannelClosed("bitrate controller"))
    }

    /// Ask the task to stop after the commands already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BitrateCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn run(mut controller: BitrateController, mut rx: mpsc::UnboundedReceiver<BitrateCommand>) {
    controller.publish_initial();
    while let Some(command) = rx.recv().await {
        match command {
            BitrateCommand::Event(event) => {
                controller.handle_event(event, Instant::now());
            }
            BitrateCommand::SetMaxVideoBitrate(bitrate) => {
                controller.set_max_video_bitrate(bitrate);
            }
            BitrateCommand::SetMaxAudioBitrate(bitrate) => {
                controller.set_max_audio_bitrate(bitrate);
            }
            BitrateCommand::ApplyConfig(config) => {
                controller.apply_config(config);
            }
            BitrateCommand::CheckDisconnect => {
                controller.check_disconnect(Instant::now());
            }
            BitrateCommand::Snapshot(reply) => {
                let _ = reply.send(controller.snapshot());
            }
            BitrateCommand::Shutdown => break,
        }
    }
    info!("Bitrate controller stopped");
}

/// Poll the controller's disconnect check every `period` until the
/// controller goes away.
pub fn spawn_watchdog(handle: BitrateHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if handle.check_disconnect().is_err() {
                debug!("Disconnect watchdog stopped");
                break;
            }
        }
    })
}
