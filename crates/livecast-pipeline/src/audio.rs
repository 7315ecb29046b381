//! Audio processing task: gain, metering and the audio bitrate ceiling.

use livecast_audio::{apply_gain, pcm_bitrate, AudioLevels, LevelMeter};
use livecast_control::BitrateHandle;
use livecast_core::{AudioConfig, AudioFrame, AudioTrack, PipelineConfig, StreamSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Audio frames waiting for the audio task before new ones are dropped.
pub const AUDIO_QUEUE_CAPACITY: usize = 256;

struct AudioJob {
    frame: AudioFrame,
    track: AudioTrack,
}

/// Owns the audio task.
pub struct AudioProcessor {
    tx: Option<mpsc::Sender<AudioJob>>,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    levels: watch::Receiver<AudioLevels>,
}

impl AudioProcessor {
    /// Start the audio task. Must be called inside a tokio runtime.
    pub fn spawn(
        sink: Arc<dyn StreamSink>,
        bitrate: BitrateHandle,
        config: watch::Receiver<PipelineConfig>,
    ) -> Self {
        let audio = config.borrow().audio.clone();
        let meter = LevelMeter::new(&audio);
        let levels = meter.subscribe();
        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);

        let worker = AudioWorker {
            sink,
            bitrate,
            config,
            audio,
            meter,
            active: Arc::clone(&active),
            bitrate_configured: false,
        };
        let task = tokio::spawn(worker.run(rx));

        Self {
            tx: Some(tx),
            active,
            task: Some(task),
            levels,
        }
    }

    /// Queue a captured audio frame. Returns `false` if it was dropped.
    pub fn push(&self, frame: AudioFrame, track: AudioTrack) -> bool {
        let Some(tx) = self.tx.as_ref().filter(|_| self.is_active()) else {
            return false;
        };
        match tx.try_send(AudioJob { frame, track }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Audio queue full, dropping {} frame", track.name());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Published per-track levels.
    pub fn levels(&self) -> watch::Receiver<AudioLevels> {
        self.levels.clone()
    }

    /// Stop the task after the frame in progress. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.active.store(false, Ordering::Release);
        self.tx.take();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Audio task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for AudioProcessor {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

struct AudioWorker {
    sink: Arc<dyn StreamSink>,
    bitrate: BitrateHandle,
    config: watch::Receiver<PipelineConfig>,
    audio: AudioConfig,
    meter: LevelMeter,
    active: Arc<AtomicBool>,
    bitrate_configured: bool,
}

impl AudioWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<AudioJob>) {
        while let Some(job) = rx.recv().await {
            if !self.active.load(Ordering::Acquire) {
                continue;
            }
            self.refresh_config();
            self.process(job);
        }
        info!("Audio task drained");
    }

    fn process(&mut self, AudioJob { frame, track }: AudioJob) {
        if !self.bitrate_configured {
            self.bitrate_configured = true;
            self.configure_bitrate(&frame);
        }

        let gain = match track {
            AudioTrack::App => self.audio.app_gain,
            AudioTrack::Mic => self.audio.mic_gain,
        };
        let frame = apply_gain(frame, gain);

        if self.audio.metering {
            self.meter.observe(&frame, track, Instant::now());
        }
        self.sink.append_audio(frame, track);
    }

    /// The first frame fixes the audio bitrate ceiling to its PCM rate.
    fn configure_bitrate(&self, frame: &AudioFrame) {
        let format = frame.format;
        let bitrate = pcm_bitrate(&format);
        info!(
            "Audio format: {} Hz, {} channels, {:.1} kbps",
            format.sample_rate,
            format.channels,
            bitrate as f64 / 1000.0
        );
        if self.bitrate.set_max_audio_bitrate(bitrate).is_err() {
            warn!("Bitrate controller gone, audio bitrate not updated");
        }
    }

    fn refresh_config(&mut self) {
        if !self.config.has_changed().unwrap_or(false) {
            return;
        }
        self.audio = self.config.borrow_and_update().audio.clone();
        self.meter.apply_config(&self.audio);
        debug!("Applying audio configuration");
    }
}
