//! A streaming session: both processing tasks, the bitrate controller and
//! its disconnect watchdog, wired to one sink.

use crate::audio::AudioProcessor;
use crate::clock::{HostClock, MediaClock};
use crate::video::{VideoProcessor, VideoStats};
use livecast_audio::AudioLevels;
use livecast_control::{spawn_watchdog, BitrateController, BitrateHandle, BitrateSnapshot};
use livecast_core::{
    AudioFrame, AudioTrack, MediaKind, NetworkEvent, PipelineConfig, Result, StreamSink,
    VideoFrame,
};
use livecast_gpu::{FrameRotator, RotationBackend};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A sample handed over by the capture source.
#[derive(Debug, Clone)]
pub enum CapturedSample {
    Video(VideoFrame),
    Audio(AudioFrame, AudioTrack),
}

impl CapturedSample {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Audio(_, AudioTrack::App) => MediaKind::AudioApp,
            Self::Audio(_, AudioTrack::Mic) => MediaKind::AudioMic,
        }
    }
}

/// Everything that runs for one outbound stream.
pub struct Session<B: RotationBackend> {
    video: VideoProcessor<B>,
    audio: AudioProcessor,
    bitrate: BitrateHandle,
    bitrate_task: Option<JoinHandle<()>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    config_tx: watch::Sender<PipelineConfig>,
    disconnected: watch::Receiver<bool>,
    clock: Arc<dyn MediaClock>,
}

impl<B: RotationBackend> Session<B> {
    /// Start a session on the host clock. Must be called inside a tokio
    /// runtime.
    pub fn start(backend: B, sink: Arc<dyn StreamSink>, config: PipelineConfig) -> Result<Self> {
        Self::with_clock(backend, sink, config, Arc::new(HostClock::new()))
    }

    /// Start a session whose latency measurements use `clock`.
    pub fn with_clock(
        backend: B,
        sink: Arc<dyn StreamSink>,
        config: PipelineConfig,
        clock: Arc<dyn MediaClock>,
    ) -> Result<Self> {
        config.validate()?;

        let (disconnect_tx, disconnected) = watch::channel(false);
        let disconnect_tx = Arc::new(disconnect_tx);
        let reconnect_tx = Arc::clone(&disconnect_tx);
        let controller =
            BitrateController::new(config.bitrate.clone(), Arc::clone(&sink), Instant::now())
                .with_disconnect_callback(Box::new(move || {
                    disconnect_tx.send_replace(true);
                }))
                .with_reconnect_callback(Box::new(move || {
                    reconnect_tx.send_replace(false);
                }));
        let (bitrate, bitrate_task) = BitrateHandle::spawn(controller);
        let watchdog = spawn_watchdog(bitrate.clone(), config.bitrate.watchdog_period());

        let (config_tx, _) = watch::channel(config);
        let video = VideoProcessor::spawn(
            backend,
            Arc::clone(&sink),
            config_tx.subscribe(),
            Arc::clone(&clock),
        );
        let audio = AudioProcessor::spawn(sink, bitrate.clone(), config_tx.subscribe());
        info!("Session started");

        Ok(Self {
            video,
            audio,
            bitrate,
            bitrate_task: Some(bitrate_task),
            watchdog: Mutex::new(Some(watchdog)),
            config_tx,
            disconnected,
            clock,
        })
    }

    /// Queue a captured video frame. Returns `false` if it was dropped.
    pub fn push_video(&self, frame: VideoFrame) -> bool {
        self.video.push(frame)
    }

    /// Queue a captured audio frame. Returns `false` if it was dropped.
    pub fn push_audio(&self, frame: AudioFrame, track: AudioTrack) -> bool {
        self.audio.push(frame, track)
    }

    /// Route a sample to the matching processing task.
    pub fn push(&self, sample: CapturedSample) -> bool {
        match sample {
            CapturedSample::Video(frame) => self.push_video(frame),
            CapturedSample::Audio(frame, track) => self.push_audio(frame, track),
        }
    }

    /// Forward a network event from the sink to the bitrate controller.
    pub fn report_network(&self, event: NetworkEvent) {
        if self.bitrate.report(event).is_err() {
            debug!("Bitrate controller stopped, dropping {:?}", event);
        }
    }

    pub fn set_max_video_bitrate(&self, bitrate: u32) {
        if self.bitrate.set_max_video_bitrate(bitrate).is_err() {
            debug!("Bitrate controller stopped, ignoring max video bitrate");
        }
    }

    /// Validate and publish a new configuration. The processing tasks pick
    /// it up before their next frame.
    pub fn update_config(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let previous = self.config_tx.borrow().bitrate.clone();
        if config.bitrate != previous {
            self.bitrate.apply_config(config.bitrate.clone())?;
        }
        let period = config.bitrate.watchdog_period();
        if period != previous.watchdog_period() {
            self.restart_watchdog(period);
        }
        self.config_tx.send_replace(config);
        Ok(())
    }

    fn restart_watchdog(&self, period: Duration) {
        let mut watchdog = self.watchdog.lock();
        if let Some(old) = watchdog.take() {
            old.abort();
        }
        debug!("Disconnect watchdog now polls every {:?}", period);
        *watchdog = Some(spawn_watchdog(self.bitrate.clone(), period));
    }

    pub fn config(&self) -> PipelineConfig {
        self.config_tx.borrow().clone()
    }

    pub fn levels(&self) -> watch::Receiver<AudioLevels> {
        self.audio.levels()
    }

    pub async fn bitrate_snapshot(&self) -> Result<BitrateSnapshot> {
        self.bitrate.snapshot().await
    }

    pub fn video_stats(&self) -> VideoStats {
        self.video.stats()
    }

    pub fn rotator(&self) -> &Arc<FrameRotator<B>> {
        self.video.rotator()
    }

    pub fn clock(&self) -> &Arc<dyn MediaClock> {
        &self.clock
    }

    /// Whether the watchdog has reported the connection lost and no status
    /// report has arrived since.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    /// Wait for the watchdog to report the connection lost.
    ///
    /// Returns `false` if the bitrate controller stopped first.
    pub async fn disconnected(&self) -> bool {
        let mut rx = self.disconnected.clone();
        let lost = rx.wait_for(|lost| *lost).await.is_ok();
        lost
    }

    /// Stop everything: drain the video task and release GPU resources,
    /// then the audio task, then the bitrate controller and watchdog.
    pub async fn shutdown(mut self) {
        info!("Session shutting down");
        self.video.shutdown().await;
        self.audio.shutdown().await;

        self.bitrate.shutdown();
        if let Some(task) = self.bitrate_task.take() {
            if let Err(e) = task.await {
                warn!("Bitrate task ended abnormally: {}", e);
            }
        }
        if let Some(watchdog) = self.watchdog.get_mut().take() {
            watchdog.abort();
            let _ = watchdog.await;
        }
        info!("Session stopped");
    }
}
