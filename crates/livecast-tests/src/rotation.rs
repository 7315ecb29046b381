//! Rotation engine driven through the CPU backend.

use crate::support::nv12_frame;
use livecast_core::{Resampling, RotationAngle, RotationConfig};
use livecast_gpu::{CpuRotator, FrameRotator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn rotator(config: RotationConfig) -> Arc<FrameRotator<CpuRotator>> {
    Arc::new(FrameRotator::new(CpuRotator::new(), &config))
}

#[tokio::test]
async fn quarter_turns_swap_dimensions() {
    let rotator = rotator(RotationConfig::default());
    for angle in RotationAngle::ALL {
        let out = rotator.rotate(nv12_frame(64, 32, 0), angle).await.unwrap();
        let expected = if angle.swaps_dimensions() { (32, 64) } else { (64, 32) };
        assert_eq!((out.width(), out.height()), expected, "{angle:?}");
        assert!(out.buffer.is_well_formed());
    }
}

#[tokio::test]
async fn output_override_wins_for_every_angle() {
    let rotator = rotator(RotationConfig {
        output_width: 48,
        output_height: 20,
        ..RotationConfig::default()
    });
    for angle in RotationAngle::ALL {
        let out = rotator.rotate(nv12_frame(64, 32, 0), angle).await.unwrap();
        assert_eq!((out.width(), out.height()), (48, 20), "{angle:?}");
    }
}

#[tokio::test]
async fn identity_rotation_preserves_pixels_in_both_modes() {
    for resampling in [Resampling::Nearest, Resampling::Bicubic] {
        let rotator = rotator(RotationConfig {
            resampling,
            ..RotationConfig::default()
        });
        let input = nv12_frame(40, 24, 3);
        let out = rotator
            .rotate(input.clone(), RotationAngle::Deg0)
            .await
            .unwrap();

        assert_eq!(out.timing, input.timing);
        for (src, dst) in input.buffer.planes.iter().zip(out.buffer.planes.iter()) {
            for y in 0..src.height {
                assert_eq!(src.row(y), dst.row(y), "{resampling:?} row {y}");
            }
        }
    }
}

#[tokio::test]
async fn half_turn_mirrors_luma() {
    let rotator = rotator(RotationConfig {
        resampling: Resampling::Nearest,
        ..RotationConfig::default()
    });
    let input = nv12_frame(16, 8, 0);
    let out = rotator
        .rotate(input.clone(), RotationAngle::Deg180)
        .await
        .unwrap();

    let src = input.buffer.luma().unwrap();
    let dst = out.buffer.luma().unwrap();
    for y in 0..8u32 {
        for x in 0..16usize {
            assert_eq!(dst.row(y)[x], src.row(7 - y)[15 - x]);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_respect_budget() {
    let rotator = rotator(RotationConfig {
        max_inflight: Some(2),
        ..RotationConfig::default()
    });
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..24 {
        let rotator = Arc::clone(&rotator);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let pending = rotator
                .submit(nv12_frame(128, 72, i), RotationAngle::Deg90)
                .await
                .unwrap();
            let held = rotator.inflight().held();
            peak.fetch_max(held, Ordering::SeqCst);
            assert!(held <= rotator.inflight().budget());
            pending.wait().await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_some());
    }

    assert_eq!(rotator.inflight().budget(), 2);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(rotator.inflight().held(), 0);
    assert_eq!(rotator.inflight().available(), 2);
}

#[tokio::test]
async fn pool_bounded_across_frame_sizes() {
    let rotator = rotator(RotationConfig {
        max_pool_size: 3,
        angle: RotationAngle::Deg0,
        ..RotationConfig::default()
    });
    for (i, width) in [16u32, 32, 48, 64, 80].into_iter().enumerate() {
        let out = rotator
            .rotate(nv12_frame(width, 16, i as i64), RotationAngle::Deg0)
            .await
            .unwrap();
        assert_eq!(out.width(), width);
        assert!(rotator.pool().len() <= 3);
    }

    let stats = rotator.pool().stats();
    assert_eq!(stats.allocations, 5);
    assert_eq!(stats.evictions, 2);
    // The three most recent sizes survive.
    assert!(!rotator.pool().contains(16, 16));
    assert!(!rotator.pool().contains(32, 16));
    assert!(rotator.pool().contains(80, 16));

    // Same size again is a hit.
    rotator
        .rotate(nv12_frame(80, 16, 9), RotationAngle::Deg0)
        .await
        .unwrap();
    assert_eq!(rotator.pool().stats().hits, 1);
}

#[tokio::test]
async fn teardown_rejects_new_frames_and_clears_pool() {
    let rotator = rotator(RotationConfig::default());
    assert!(rotator
        .rotate(nv12_frame(32, 16, 0), RotationAngle::Deg90)
        .await
        .is_some());
    assert_eq!(rotator.pool().len(), 1);

    rotator.teardown();
    assert!(rotator.is_torn_down());
    assert!(rotator.pool().is_empty());
    assert!(rotator
        .rotate(nv12_frame(32, 16, 1), RotationAngle::Deg90)
        .await
        .is_none());
}
