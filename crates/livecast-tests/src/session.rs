//! Full sessions on the CPU backend.

use crate::support::{nv12_frame, wait_until, RecordingSink};
use livecast_core::{
    AudioFrame, AudioTrack, MediaKind, NetworkEvent, NetworkReport, PipelineConfig, RotationAngle,
    SampleBlock, StreamSink,
};
use livecast_gpu::CpuRotator;
use livecast_pipeline::{CapturedSample, MediaClock, Session};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Clock the test moves by hand.
#[derive(Default)]
struct ManualClock(Mutex<f64>);

impl ManualClock {
    fn set(&self, secs: f64) {
        *self.0.lock() = secs;
    }
}

impl MediaClock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.0.lock()
    }
}

fn start(sink: &Arc<RecordingSink>, config: PipelineConfig) -> Session<CpuRotator> {
    Session::start(
        CpuRotator::new(),
        Arc::clone(sink) as Arc<dyn StreamSink>,
        config,
    )
    .unwrap()
}

#[tokio::test]
async fn session_rotates_video_and_processes_audio() {
    let sink = Arc::new(RecordingSink::default());
    let mut config = PipelineConfig::default();
    config.depth.initial_depth = Some(3);
    config.audio.app_gain = 0.5;
    let session = start(&sink, config);

    for i in 0..10 {
        assert!(session.push_video(nv12_frame(64, 32, i)));
    }
    assert!(session.push_audio(AudioFrame::from_i16(44_100, 1, vec![1000, -1000]), AudioTrack::App));
    assert!(session.push_audio(AudioFrame::from_i16(44_100, 1, vec![1000, -1000]), AudioTrack::Mic));

    wait_until(|| sink.video.lock().len() == 10 && sink.audio.lock().len() == 2).await;
    let snapshot = session.bitrate_snapshot().await.unwrap();
    let stats = session.video_stats();
    let rotator = Arc::clone(session.rotator());
    session.shutdown().await;

    assert!(sink
        .video
        .lock()
        .iter()
        .all(|f| (f.width(), f.height()) == (32, 64) && f.timing.is_some()));
    assert_eq!(stats.delivered, 10);
    assert_eq!(sink.depths.lock().first(), Some(&3));

    let audio = sink.audio.lock();
    assert_eq!(audio[0].0.blocks[0], SampleBlock::I16(vec![500, -500]));
    assert_eq!(audio[1].0.blocks[0], SampleBlock::I16(vec![1000, -1000]));

    // The first audio frame sets the audio ceiling to its PCM rate.
    assert_eq!(snapshot.audio_bitrate, 44_100 * 16);
    assert_eq!(*sink.audio_bitrates.lock(), vec![128_000, 705_600]);

    assert!(rotator.is_torn_down());
    assert!(rotator.pool().is_empty());
    assert_eq!(rotator.inflight().held(), 0);
}

#[tokio::test]
async fn depth_follows_render_latency() {
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(ManualClock::default());
    let mut config = PipelineConfig::default();
    config.depth.initial_depth = Some(3);
    config.depth.adjust_interval_secs = 0.0;
    let session = Session::with_clock(
        CpuRotator::new(),
        Arc::clone(&sink) as Arc<dyn StreamSink>,
        config,
        Arc::clone(&clock) as Arc<dyn MediaClock>,
    )
    .unwrap();

    // Every frame is rendered 250 ms after its presentation time.
    for i in 0..6 {
        clock.set(i as f64 / 30.0 + 0.25);
        assert!(session.push_video(nv12_frame(32, 32, i)));
        wait_until(|| sink.video.lock().len() == i as usize + 1).await;
    }
    session.shutdown().await;

    assert_eq!(*sink.depths.lock(), vec![3, 4, 5]);
}

#[tokio::test]
async fn config_updates_reach_the_video_task() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, PipelineConfig::default());

    assert!(session.push_video(nv12_frame(64, 32, 0)));
    wait_until(|| sink.video.lock().len() == 1).await;

    let mut invalid = session.config();
    invalid.rotation.output_width = 100;
    assert!(session.update_config(invalid).is_err());

    let mut config = session.config();
    config.rotation.angle = RotationAngle::Deg0;
    session.update_config(config).unwrap();
    assert_eq!(session.config().rotation.angle, RotationAngle::Deg0);
    assert_eq!(session.config().rotation.output_width, 0);

    assert!(session.push_video(nv12_frame(64, 32, 1)));
    wait_until(|| sink.video.lock().len() == 2).await;
    session.shutdown().await;

    let video = sink.video.lock();
    assert_eq!((video[0].width(), video[0].height()), (32, 64));
    assert_eq!((video[1].width(), video[1].height()), (64, 32));
}

#[tokio::test]
async fn captured_samples_route_by_kind() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, PipelineConfig::default());

    let samples = vec![
        CapturedSample::Video(nv12_frame(16, 16, 0)),
        CapturedSample::Audio(AudioFrame::from_f32(48_000, 2, vec![0.1; 4]), AudioTrack::App),
        CapturedSample::Audio(AudioFrame::from_f32(48_000, 2, vec![0.1; 4]), AudioTrack::Mic),
    ];
    let kinds: Vec<_> = samples.iter().map(CapturedSample::kind).collect();
    assert_eq!(kinds, vec![MediaKind::Video, MediaKind::AudioApp, MediaKind::AudioMic]);

    for sample in samples {
        assert!(session.push(sample));
    }
    wait_until(|| sink.video.lock().len() == 1 && sink.audio.lock().len() == 2).await;
    session.shutdown().await;

    let tracks: Vec<_> = sink.audio.lock().iter().map(|(_, track)| *track).collect();
    assert_eq!(tracks, vec![AudioTrack::App, AudioTrack::Mic]);
}

#[tokio::test(start_paused = true)]
async fn session_surfaces_disconnect() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, PipelineConfig::default());
    assert!(!session.is_disconnected());

    session.report_network(NetworkEvent::Status(NetworkReport {
        current_bytes_out_per_second: 500_000,
        total_bytes_out: 500_000,
        current_queue_bytes_out: 0,
    }));
    let lost = tokio::time::timeout(Duration::from_secs(10), session.disconnected())
        .await
        .unwrap();
    assert!(lost);
    assert!(session.is_disconnected());
    assert!(session.bitrate_snapshot().await.unwrap().disconnect_reported);

    session.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_session_keeps_running() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, PipelineConfig::default());

    let mut broken = nv12_frame(64, 32, 0);
    broken.buffer.planes[0].stride = 16;
    broken.buffer.planes[0].data.truncate(16 * 32);
    assert!(session.push_video(broken));
    assert!(session.push_video(nv12_frame(64, 32, 1)));

    wait_until(|| sink.video.lock().len() == 1).await;
    let stats = session.video_stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 1);

    assert!(session.push_video(nv12_frame(64, 32, 2)));
    wait_until(|| sink.video.lock().len() == 2).await;
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_when_reports_resume() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, PipelineConfig::default());

    session.report_network(NetworkEvent::Status(NetworkReport {
        current_bytes_out_per_second: 500_000,
        total_bytes_out: 500_000,
        current_queue_bytes_out: 0,
    }));
    assert!(tokio::time::timeout(Duration::from_secs(10), session.disconnected())
        .await
        .unwrap());

    session.report_network(NetworkEvent::Reset);
    session.bitrate_snapshot().await.unwrap();
    assert!(session.is_disconnected());

    session.report_network(NetworkEvent::Status(NetworkReport {
        current_bytes_out_per_second: 500_000,
        total_bytes_out: 1_000_000,
        current_queue_bytes_out: 0,
    }));
    assert!(!session.bitrate_snapshot().await.unwrap().disconnect_reported);
    assert!(!session.is_disconnected());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn watchdog_follows_period_updates() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, PipelineConfig::default());

    let mut config = session.config();
    config.bitrate.watchdog_period_secs = 30.0;
    session.update_config(config).unwrap();
    session.report_network(NetworkEvent::Status(NetworkReport {
        current_bytes_out_per_second: 500_000,
        total_bytes_out: 500_000,
        current_queue_bytes_out: 0,
    }));

    // The old 1 s watchdog would have fired after 5 s of silence.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!session.bitrate_snapshot().await.unwrap().disconnect_reported);
    assert!(!session.is_disconnected());

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(session.bitrate_snapshot().await.unwrap().disconnect_reported);
    assert!(session.is_disconnected());

    session.shutdown().await;
}
