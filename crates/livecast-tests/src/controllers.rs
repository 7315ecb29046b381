//! Depth and bitrate controllers end to end.

use crate::support::RecordingSink;
use livecast_control::{spawn_watchdog, BitrateController, BitrateHandle, BufferDepthController};
use livecast_core::{BitrateConfig, DepthConfig, NetworkEvent, NetworkReport, StreamSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn status(bytes_per_second: u64) -> NetworkEvent {
    NetworkEvent::Status(NetworkReport {
        current_bytes_out_per_second: bytes_per_second,
        total_bytes_out: 0,
        current_queue_bytes_out: 0,
    })
}

fn spawn_controller(sink: &Arc<RecordingSink>) -> (BitrateHandle, tokio::task::JoinHandle<()>) {
    let controller = BitrateController::new(
        BitrateConfig::default(),
        Arc::clone(sink) as Arc<dyn StreamSink>,
        Instant::now(),
    );
    BitrateHandle::spawn(controller)
}

#[test]
fn high_latency_walks_depth_to_max_and_holds() {
    let mut controller = BufferDepthController::new(&DepthConfig {
        min_depth: 3,
        max_depth: 5,
        initial_depth: Some(3),
        adjust_interval_secs: 0.0,
        log_interval_secs: 60.0,
        fixed_target_fps: Some(30.0),
    });

    let mut changes = Vec::new();
    // One seeding frame, then five evaluation cycles at 250 ms latency.
    for i in 0..6 {
        let pts = i as f64 / 30.0;
        if let Some(depth) = controller.observe_secs(pts, Some(1.0 / 30.0), pts + 0.25) {
            changes.push(depth);
        }
    }

    assert_eq!(changes, vec![4, 5]);
    assert_eq!(controller.current_depth(), 5);
    assert!((controller.smoothed_latency().unwrap() - 0.25).abs() < 1e-9);
}

#[test]
fn high_latency_walks_depth_to_max_with_default_interval() {
    let mut controller = BufferDepthController::new(&DepthConfig {
        initial_depth: Some(3),
        ..DepthConfig::default()
    });

    let mut changes = Vec::new();
    // 18 seconds of 30 fps, five evaluation cycles 3 s apart and more.
    for i in 0..30 * 18 {
        let pts = i as f64 / 30.0;
        if let Some(depth) = controller.observe_secs(pts, Some(1.0 / 30.0), pts + 0.25) {
            changes.push(depth);
        }
    }

    assert_eq!(changes, vec![4, 5]);
    assert_eq!(controller.current_depth(), 5);
    assert!(controller.history().sample_count(5) > 300);
}

#[test]
fn low_latency_and_fast_frames_walk_depth_down() {
    let mut controller = BufferDepthController::new(&DepthConfig {
        min_depth: 3,
        max_depth: 5,
        initial_depth: Some(5),
        adjust_interval_secs: 0.0,
        log_interval_secs: 60.0,
        fixed_target_fps: Some(30.0),
    });

    for i in 0..6 {
        let pts = i as f64 / 30.0;
        controller.observe_secs(pts, Some(1.0 / 30.0), pts + 0.01);
    }
    assert_eq!(controller.current_depth(), 3);
}

#[tokio::test(start_paused = true)]
async fn warmup_then_step_down_to_floor() {
    let sink = Arc::new(RecordingSink::default());
    let (handle, task) = spawn_controller(&sink);

    // 800 kbps against a 4 Mbps ceiling, ignored during warm-up.
    handle.report(status(100_000)).unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    handle.report(status(100_000)).unwrap();
    assert_eq!(handle.snapshot().await.unwrap().video_bitrate, 4_000_000);

    tokio::time::advance(Duration::from_secs(6)).await;
    for _ in 0..8 {
        handle.report(status(100_000)).unwrap();
    }
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.video_bitrate, 2_000_000);

    // Each step is 15% lower until the floor, which is sent once.
    let sent = sink.video_bitrates.lock().clone();
    assert_eq!(sent[0], 4_000_000);
    assert_eq!(sent[1], 3_400_000);
    assert_eq!(*sent.last().unwrap(), 2_000_000);
    assert_eq!(sent.iter().filter(|b| **b == 2_000_000).count(), 1);
    for pair in sent.windows(2) {
        assert!(pair[1] < pair[0]);
    }

    // Reset jumps back to the ceiling.
    handle.report(NetworkEvent::Reset).unwrap();
    assert_eq!(handle.snapshot().await.unwrap().video_bitrate, 4_000_000);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn insufficient_bandwidth_then_step_up_and_hold() {
    let sink = Arc::new(RecordingSink::default());
    let (handle, task) = spawn_controller(&sink);

    // 2.5 Mbps measured during warm-up.
    handle.report(status(312_500)).unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;

    handle.report(NetworkEvent::InsufficientBandwidth).unwrap();
    assert_eq!(handle.snapshot().await.unwrap().video_bitrate, 2_250_000);

    for _ in 0..6 {
        handle.report(status(312_500)).unwrap();
    }
    let snapshot = handle.snapshot().await.unwrap();
    handle.shutdown();
    task.await.unwrap();

    let sent = sink.video_bitrates.lock().clone();
    assert_eq!(&sent[..2], &[4_000_000, 2_250_000]);
    let ups = &sent[2..];
    // Four 5% steps, then the link no longer keeps up with the ceiling.
    assert_eq!(ups.len(), 4);
    let mut previous = 2_250_000f64;
    for &bitrate in ups {
        let ratio = bitrate as f64 / previous;
        assert!((ratio - 1.05).abs() < 1e-6, "ratio {ratio}");
        previous = bitrate as f64;
    }
    assert_eq!(snapshot.video_bitrate, *ups.last().unwrap());
    assert!(snapshot.video_bitrate as f64 * 0.95 > 2_500_000.0);
}

#[tokio::test(start_paused = true)]
async fn sink_rejection_still_advances_state() {
    let sink = Arc::new(RecordingSink::default());
    sink.reject.store(true, Ordering::SeqCst);
    let (handle, task) = spawn_controller(&sink);

    handle.report(status(100_000)).unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;
    handle.report(status(100_000)).unwrap();
    handle.report(status(100_000)).unwrap();

    assert_eq!(handle.snapshot().await.unwrap().video_bitrate, 2_890_000);
    handle.shutdown();
    task.await.unwrap();
    assert_eq!(*sink.video_bitrates.lock(), vec![4_000_000, 3_400_000, 2_890_000]);
}

#[tokio::test(start_paused = true)]
async fn watchdog_reports_each_outage_once() {
    let sink = Arc::new(RecordingSink::default());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let controller = BitrateController::new(
        BitrateConfig::default(),
        Arc::clone(&sink) as Arc<dyn StreamSink>,
        Instant::now(),
    )
    .with_disconnect_callback(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let (handle, task) = BitrateHandle::spawn(controller);
    let watchdog = spawn_watchdog(handle.clone(), Duration::from_secs(1));

    // Nothing fires before the first report.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // Steady reports keep it quiet.
    for _ in 0..8 {
        handle.report(status(500_000)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // First outage.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Recovery re-arms, second outage fires again.
    handle.report(status(500_000)).unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 2);

    handle.shutdown();
    task.await.unwrap();
    watchdog.await.unwrap();
}
