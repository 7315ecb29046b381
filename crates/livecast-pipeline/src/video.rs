//! Video processing task.
//!
//! Frames are drained from the queue in arrival order. For each frame the
//! task feeds the depth controller, then waits for an inflight permit and
//! submits the rotation; completions are awaited on their own tasks and
//! appended to the sink as they resolve, possibly out of order.

use crate::clock::MediaClock;
use livecast_control::BufferDepthController;
use livecast_core::{PipelineConfig, RotationAngle, StreamSink, VideoFrame};
use livecast_gpu::{FrameRotator, RotationBackend};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Frames waiting for the video task before new ones are dropped.
pub const VIDEO_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct VideoCounters {
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Frame counts since the processor started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    /// Frames accepted into the queue.
    pub received: u64,
    /// Rotated frames handed to the sink.
    pub delivered: u64,
    /// Frames lost to a full queue, shutdown or a failed rotation.
    pub dropped: u64,
}

/// Owns the video task and the rotation engine it drives.
pub struct VideoProcessor<B: RotationBackend> {
    tx: Option<mpsc::Sender<VideoFrame>>,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    rotator: Arc<FrameRotator<B>>,
    counters: Arc<VideoCounters>,
}

impl<B: RotationBackend> VideoProcessor<B> {
    /// Start the video task. Must be called inside a tokio runtime.
    pub fn spawn(
        backend: B,
        sink: Arc<dyn StreamSink>,
        config: watch::Receiver<PipelineConfig>,
        clock: Arc<dyn MediaClock>,
    ) -> Self {
        let initial = config.borrow().clone();
        let rotator = Arc::new(FrameRotator::new(backend, &initial.rotation));
        let active = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(VideoCounters::default());
        let (tx, rx) = mpsc::channel(VIDEO_QUEUE_CAPACITY);

        let worker = VideoWorker {
            rotator: Arc::clone(&rotator),
            depth: BufferDepthController::new(&initial.depth),
            angle: initial.rotation.angle,
            sink,
            config,
            clock,
            active: Arc::clone(&active),
            counters: Arc::clone(&counters),
            completions: JoinSet::new(),
        };
        let task = tokio::spawn(worker.run(rx));

        Self {
            tx: Some(tx),
            active,
            task: Some(task),
            rotator,
            counters,
        }
    }

    /// Queue a captured frame. Returns `false` if it was dropped.
    pub fn push(&self, frame: VideoFrame) -> bool {
        let Some(tx) = self.tx.as_ref().filter(|_| self.is_active()) else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Video queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn rotator(&self) -> &Arc<FrameRotator<B>> {
        &self.rotator
    }

    pub fn stats(&self) -> VideoStats {
        VideoStats {
            received: self.counters.received.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the task and release GPU resources.
    ///
    /// Queued frames that have not started are discarded; rotations already
    /// submitted finish first. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.active.store(false, Ordering::Release);
        self.tx.take();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Video task ended abnormally: {}", e);
            }
        }
        self.rotator.teardown();
    }
}

impl<B: RotationBackend> Drop for VideoProcessor<B> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

struct VideoWorker<B: RotationBackend> {
    rotator: Arc<FrameRotator<B>>,
    depth: BufferDepthController,
    angle: RotationAngle,
    sink: Arc<dyn StreamSink>,
    config: watch::Receiver<PipelineConfig>,
    clock: Arc<dyn MediaClock>,
    active: Arc<AtomicBool>,
    counters: Arc<VideoCounters>,
    completions: JoinSet<()>,
}

impl<B: RotationBackend> VideoWorker<B> {
    async fn run(mut self, mut rx: mpsc::Receiver<VideoFrame>) {
        self.publish_depth(self.depth.current_depth());

        while let Some(frame) = rx.recv().await {
            self.reap_completions();
            if !self.active.load(Ordering::Acquire) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.refresh_config();
            self.process(frame).await;
        }

        while let Some(result) = self.completions.join_next().await {
            if let Err(e) = result {
                warn!("Rotation completion task failed: {}", e);
            }
        }
        info!("Video task drained");
    }

    async fn process(&mut self, frame: VideoFrame) {
        if let Some(timing) = frame.timing {
            if let Some(depth) = self.depth.observe(&timing, self.clock.now_secs()) {
                self.publish_depth(depth);
            }
        }

        let Some(pending) = self.rotator.submit(frame, self.angle).await else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);
        self.completions.spawn(async move {
            match pending.wait().await {
                Some(rotated) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    sink.append_video(rotated);
                }
                None => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    fn reap_completions(&mut self) {
        while let Some(result) = self.completions.try_join_next() {
            if let Err(e) = result {
                warn!("Rotation completion task failed: {}", e);
            }
        }
    }

    fn refresh_config(&mut self) {
        if !self.config.has_changed().unwrap_or(false) {
            return;
        }
        let config = self.config.borrow_and_update().clone();
        debug!("Applying video configuration");
        self.rotator.apply_settings(&config.rotation);
        self.angle = config.rotation.angle;
        if let Some(depth) = self.depth.apply_config(&config.depth) {
            self.publish_depth(depth);
        }
    }

    fn publish_depth(&self, depth: usize) {
        if let Err(e) = self.sink.set_queue_depth(depth) {
            warn!("Sink rejected queue depth {}: {}", depth, e);
        }
    }
}
