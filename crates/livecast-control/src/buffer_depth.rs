//! Buffer depth controller.
//!
//! Learns the send-side queue depth from live frame timing. Each video frame
//! updates smoothed FPS and render latency; at most once per adjust interval
//! the controller decides whether to grow, shrink or keep the depth, and
//! prefers whichever depth has historically delivered the best FPS.

use crate::ema::Ema;
use livecast_core::{DepthConfig, SampleTiming};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

const EMA_ALPHA: f64 = 0.2;
const HYSTERESIS_MARGIN: f64 = 0.05;
const HIGH_LATENCY_SECS: f64 = 0.2;
const LOW_LATENCY_SECS: f64 = 0.05;
const LOW_FPS_RATIO: f64 = 0.6;
const HIGH_FPS_RATIO: f64 = 1.05;
const DEFAULT_TARGET_FPS: f64 = 30.0;

/// Samples a depth needs before its history is trusted.
pub const MIN_HISTORY_SAMPLES: usize = 3;
/// Most recent samples kept per depth.
pub const HISTORY_CAPACITY: usize = 600;

/// Starting depth for a machine with `cpus` cores.
pub fn initial_depth_for(cpus: usize) -> usize {
    match cpus {
        n if n >= 8 => 4,
        n if n >= 4 => 3,
        _ => 2,
    }
}

/// Smoothed FPS observed under each depth.
#[derive(Debug, Clone, Default)]
pub struct PerformanceHistory {
    samples: BTreeMap<usize, VecDeque<f64>>,
}

impl PerformanceHistory {
    pub fn record(&mut self, depth: usize, fps: f64) {
        let samples = self.samples.entry(depth).or_default();
        if samples.len() == HISTORY_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(fps);
    }

    pub fn sample_count(&self, depth: usize) -> usize {
        self.samples.get(&depth).map_or(0, VecDeque::len)
    }

    pub fn average(&self, depth: usize) -> Option<f64> {
        let samples = self.samples.get(&depth).filter(|s| !s.is_empty())?;
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Depth with the best average FPS among depths with enough samples.
    ///
    /// On a tie the `proposal` is kept if it is among the best; otherwise
    /// the lowest tied depth wins.
    pub fn best_depth(&self, proposal: usize) -> Option<usize> {
        let qualified = self
            .samples
            .iter()
            .filter(|(_, s)| s.len() >= MIN_HISTORY_SAMPLES)
            .filter_map(|(depth, _)| Some((*depth, self.average(*depth)?)));

        let mut best: Option<(usize, f64)> = None;
        for (depth, avg) in qualified {
            match best {
                Some((_, best_avg)) if avg < best_avg => {}
                Some((_, best_avg)) if avg == best_avg && depth != proposal => {}
                _ => best = Some((depth, avg)),
            }
        }
        best.map(|(depth, _)| depth)
    }

    /// A depth that beat `proposal` by more than `margin` FPS on average.
    ///
    /// `None` unless `proposal` has enough samples of its own to compare.
    pub fn preferred_over(&self, proposal: usize, margin: f64) -> Option<usize> {
        if self.sample_count(proposal) < MIN_HISTORY_SAMPLES {
            return None;
        }
        let proposal_avg = self.average(proposal)?;
        let best = self.best_depth(proposal)?;
        let best_avg = self.average(best)?;
        (best != proposal && best_avg > proposal_avg + margin).then_some(best)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Direction of the last depth change, for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthTrend {
    Up,
    Down,
    Steady,
}

impl DepthTrend {
    fn between(previous: usize, current: usize) -> Self {
        match current.cmp(&previous) {
            std::cmp::Ordering::Greater => Self::Up,
            std::cmp::Ordering::Less => Self::Down,
            std::cmp::Ordering::Equal => Self::Steady,
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            Self::Up => "↑",
            Self::Down => "↓",
            Self::Steady => "-",
        }
    }
}

/// Adaptive buffer depth controller. Owned by the video processing task.
#[derive(Debug)]
pub struct BufferDepthController {
    min_depth: usize,
    max_depth: usize,
    adjust_interval: f64,
    log_interval: f64,
    fixed_target_fps: Option<f64>,
    target_fps: f64,

    current_depth: usize,
    last_applied: usize,
    depth_at_last_log: usize,

    last_pts: Option<f64>,
    fps: Ema,
    latency: Ema,
    last_stable_fps: f64,
    last_adjust: Option<f64>,
    last_log: Option<f64>,

    history: PerformanceHistory,
}

impl BufferDepthController {
    pub fn new(config: &DepthConfig) -> Self {
        let min_depth = config.min_depth;
        let max_depth = config.max_depth.max(min_depth);
        let initial = config
            .initial_depth
            .unwrap_or_else(|| initial_depth_for(num_cpus::get()))
            .clamp(min_depth, max_depth);

        Self {
            min_depth,
            max_depth,
            adjust_interval: config.adjust_interval_secs,
            log_interval: config.log_interval_secs,
            fixed_target_fps: config.fixed_target_fps,
            target_fps: config.fixed_target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            current_depth: initial,
            last_applied: initial,
            depth_at_last_log: initial,
            last_pts: None,
            fps: Ema::new(EMA_ALPHA),
            latency: Ema::new(EMA_ALPHA),
            last_stable_fps: 0.0,
            last_adjust: None,
            last_log: None,
            history: PerformanceHistory::default(),
        }
    }

    /// Apply new settings. Returns the depth to push to the sink when the
    /// new bounds moved the current depth.
    pub fn apply_config(&mut self, config: &DepthConfig) -> Option<usize> {
        self.min_depth = config.min_depth;
        self.max_depth = config.max_depth.max(config.min_depth);
        self.adjust_interval = config.adjust_interval_secs;
        self.log_interval = config.log_interval_secs;
        self.fixed_target_fps = config.fixed_target_fps;
        if let Some(fps) = config.fixed_target_fps {
            self.target_fps = fps;
        }

        let clamped = self.current_depth.clamp(self.min_depth, self.max_depth);
        self.apply(clamped)
    }

    pub fn set_adjust_interval(&mut self, secs: f64) {
        self.adjust_interval = secs;
    }

    /// Observe a frame's timing. `now` shares the presentation time base.
    ///
    /// Returns the new depth when it should be sent to the sink.
    pub fn observe(&mut self, timing: &SampleTiming, now: f64) -> Option<usize> {
        self.observe_secs(timing.pts.to_seconds_f64(), timing.duration_secs(), now)
    }

    /// [`observe`](Self::observe) with plain seconds.
    pub fn observe_secs(&mut self, pts: f64, duration: Option<f64>, now: f64) -> Option<usize> {
        match self.fixed_target_fps {
            Some(fps) => self.target_fps = fps,
            None => {
                if let Some(d) = duration.filter(|d| *d > 0.0) {
                    self.target_fps = 1.0 / d;
                }
            }
        }

        // The first frame only seeds the timestamp.
        let last_pts = self.last_pts.replace(pts)?;
        let delta = pts - last_pts;
        if delta.is_nan() || delta <= 0.0 {
            return None;
        }

        let fps = self.fps.update(1.0 / delta);
        let latency = self.latency.update(now - pts);
        self.history.record(self.current_depth, fps);

        let mut change = None;
        if self.last_adjust.map_or(true, |t| now - t >= self.adjust_interval) {
            self.last_adjust = Some(now);
            change = self.evaluate(fps, latency);
        }

        if self.last_log.map_or(true, |t| now - t >= self.log_interval) {
            self.last_log = Some(now);
            let trend = DepthTrend::between(self.depth_at_last_log, self.current_depth);
            self.depth_at_last_log = self.current_depth;
            info!(
                fps = fps as u32,
                latency = format_args!("{:.3}", latency),
                depth = self.current_depth,
                "Buffer depth {} {}",
                self.current_depth,
                trend.arrow()
            );
        }

        change
    }

    fn evaluate(&mut self, fps: f64, latency: f64) -> Option<usize> {
        let target = self.target_fps;
        let drifted = (fps - self.last_stable_fps).abs() > target * HYSTERESIS_MARGIN;
        let latency_out_of_band = latency > HIGH_LATENCY_SECS || latency < LOW_LATENCY_SECS;
        if !(drifted || latency_out_of_band) {
            return None;
        }
        self.last_stable_fps = fps;

        let starved = latency > HIGH_LATENCY_SECS || fps < target * LOW_FPS_RATIO;
        let mut proposal = if starved {
            (self.current_depth + 1).min(self.max_depth)
        } else if latency < LOW_LATENCY_SECS || fps > target * HIGH_FPS_RATIO {
            self.current_depth.saturating_sub(1).max(self.min_depth)
        } else {
            self.current_depth
        };

        // History never vetoes a step up forced by latency or low FPS.
        let stepping_up = starved && proposal > self.current_depth;
        if !stepping_up {
            if let Some(best) = self
                .history
                .preferred_over(proposal, target * HYSTERESIS_MARGIN)
            {
                debug!("History prefers depth {} over {}", best, proposal);
                proposal = best;
            }
        }

        self.apply(proposal.clamp(self.min_depth, self.max_depth))
    }

    fn apply(&mut self, depth: usize) -> Option<usize> {
        if depth == self.last_applied {
            return None;
        }
        info!("Buffer depth {} -> {}", self.last_applied, depth);
        self.current_depth = depth;
        self.last_applied = depth;
        Some(depth)
    }

    pub fn current_depth(&self) -> usize {
        self.current_depth
    }

    pub fn smoothed_fps(&self) -> Option<f64> {
        self.fps.value()
    }

    pub fn smoothed_latency(&self) -> Option<f64> {
        self.latency.value()
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn history(&self) -> &PerformanceHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: usize, adjust_interval_secs: f64) -> DepthConfig {
        DepthConfig {
            initial_depth: Some(initial),
            adjust_interval_secs,
            ..DepthConfig::default()
        }
    }

    /// Feed frames at `fps` with a constant render latency; one evaluation
    /// per frame when the adjust interval is 0.
    fn run(controller: &mut BufferDepthController, frames: usize, fps: f64, latency: f64) -> Vec<Option<usize>> {
        let start = controller.last_pts.unwrap_or(0.0);
        (1..=frames)
            .map(|i| {
                let pts = start + i as f64 / fps;
                controller.observe_secs(pts, None, pts + latency)
            })
            .collect()
    }

    #[test]
    fn test_initial_depth_for_cpus() {
        assert_eq!(initial_depth_for(10), 4);
        assert_eq!(initial_depth_for(4), 3);
        assert_eq!(initial_depth_for(2), 2);
    }

    #[test]
    fn test_initial_depth_clamped_into_bounds() {
        let controller = BufferDepthController::new(&config(2, 3.0));
        assert_eq!(controller.current_depth(), 3);
    }

    #[test]
    fn test_first_frame_only_seeds() {
        let mut controller = BufferDepthController::new(&config(3, 0.0));
        assert_eq!(controller.observe_secs(1.0, None, 1.3), None);
        assert_eq!(controller.smoothed_fps(), None);
        assert_eq!(controller.history().sample_count(3), 0);
    }

    #[test]
    fn test_non_increasing_pts_ignored() {
        let mut controller = BufferDepthController::new(&config(3, 0.0));
        controller.observe_secs(1.0, None, 1.3);
        assert_eq!(controller.observe_secs(1.0, None, 1.3), None);
        assert_eq!(controller.observe_secs(0.5, None, 1.3), None);
        assert_eq!(controller.smoothed_fps(), None);
    }

    #[test]
    fn test_high_latency_steps_up_then_holds() {
        let mut controller = BufferDepthController::new(&config(3, 0.0));
        controller.observe_secs(0.0, None, 0.25);
        let changes = run(&mut controller, 5, 30.0, 0.25);
        assert_eq!(changes, vec![Some(4), Some(5), None, None, None]);
        assert_eq!(controller.current_depth(), 5);
    }

    #[test]
    fn test_low_latency_steps_down_to_min() {
        let mut controller = BufferDepthController::new(&config(5, 0.0));
        controller.observe_secs(0.0, None, 0.01);
        let changes = run(&mut controller, 2, 30.0, 0.01);
        assert_eq!(changes, vec![Some(4), Some(3)]);
        assert_eq!(controller.current_depth(), 3);
    }

    #[test]
    fn test_in_band_latency_and_stable_fps_holds() {
        let mut controller = BufferDepthController::new(&config(4, 0.0));
        controller.observe_secs(0.0, None, 0.1);
        let changes = run(&mut controller, 10, 30.0, 0.1);
        assert!(changes.iter().all(Option::is_none));
        assert_eq!(controller.current_depth(), 4);
    }

    #[test]
    fn test_adjust_interval_limits_evaluations() {
        let mut controller = BufferDepthController::new(&config(3, 3.0));
        controller.observe_secs(0.0, None, 0.25);
        // 60 frames over two seconds: only the first one evaluates.
        let changes = run(&mut controller, 60, 30.0, 0.25);
        assert_eq!(changes.iter().flatten().count(), 1);
        assert_eq!(controller.current_depth(), 4);
    }

    #[test]
    fn test_target_follows_duration_when_not_fixed() {
        let mut cfg = config(3, 3.0);
        cfg.fixed_target_fps = None;
        let mut controller = BufferDepthController::new(&cfg);
        controller.observe_secs(0.0, Some(1.0 / 60.0), 0.1);
        assert!((controller.target_fps() - 60.0).abs() < 1e-9);

        let mut fixed = BufferDepthController::new(&config(3, 3.0));
        fixed.observe_secs(0.0, Some(1.0 / 60.0), 0.1);
        assert_eq!(fixed.target_fps(), 30.0);
    }

    #[test]
    fn test_history_best_depth() {
        let mut history = PerformanceHistory::default();
        for _ in 0..3 {
            history.record(3, 28.0);
            history.record(4, 30.0);
        }
        history.record(5, 60.0);
        // Depth 5 has too few samples to count.
        assert_eq!(history.best_depth(3), Some(4));
    }

    #[test]
    fn test_history_tie_break() {
        let mut history = PerformanceHistory::default();
        for _ in 0..3 {
            history.record(3, 30.0);
            history.record(4, 30.0);
            history.record(5, 30.0);
        }
        assert_eq!(history.best_depth(4), Some(4));
        assert_eq!(history.best_depth(6), Some(3));
        assert_eq!(PerformanceHistory::default().best_depth(3), None);
    }

    #[test]
    fn test_history_preference_needs_samples_and_margin() {
        let mut history = PerformanceHistory::default();
        for _ in 0..3 {
            history.record(4, 30.0);
        }
        history.record(5, 20.0);
        // Depth 5 has nothing to compare yet.
        assert_eq!(history.preferred_over(5, 1.5), None);

        history.record(5, 29.0);
        history.record(5, 29.0);
        // Average 26 against 30: outside the margin.
        assert_eq!(history.preferred_over(5, 1.5), Some(4));
        assert_eq!(history.preferred_over(5, 5.0), None);
        assert_eq!(history.preferred_over(4, 1.5), None);
    }

    #[test]
    fn test_latency_walk_with_default_interval() {
        let mut controller = BufferDepthController::new(&DepthConfig {
            initial_depth: Some(3),
            ..DepthConfig::default()
        });
        let mut changes = Vec::new();
        // 18 seconds at 30 fps, always 250 ms behind.
        for i in 0..30 * 18 {
            let pts = i as f64 / 30.0;
            if let Some(depth) = controller.observe_secs(pts, None, pts + 0.25) {
                changes.push(depth);
            }
        }
        assert_eq!(changes, vec![4, 5]);
        assert_eq!(controller.current_depth(), 5);
    }

    #[test]
    fn test_history_pulls_depth_back_down() {
        let mut controller = BufferDepthController::new(&config(4, 0.0));
        let mut pts = 0.0;
        let mut feed = |controller: &mut BufferDepthController, frames: usize, fps: f64, latency: f64| {
            let mut changes = Vec::new();
            for _ in 0..frames {
                if let Some(depth) = controller.observe_secs(pts, None, pts + latency) {
                    changes.push(depth);
                }
                pts += 1.0 / fps;
            }
            changes
        };

        // Depth 4 runs at a steady 30 fps.
        assert!(feed(&mut controller, 31, 30.0, 0.1).is_empty());
        // Latency forces a step up.
        assert_eq!(feed(&mut controller, 10, 30.0, 0.25), vec![5]);
        // Depth 5 turns out slower; history goes back to 4 and stays.
        assert_eq!(feed(&mut controller, 12, 20.0, 0.1), vec![4]);
        assert_eq!(controller.current_depth(), 4);
    }

    #[test]
    fn test_history_capacity() {
        let mut history = PerformanceHistory::default();
        for i in 0..HISTORY_CAPACITY + 10 {
            history.record(3, i as f64);
        }
        assert_eq!(history.sample_count(3), HISTORY_CAPACITY);
    }

    #[test]
    fn test_apply_config_clamps_depth() {
        let mut controller = BufferDepthController::new(&config(5, 3.0));
        let narrowed = DepthConfig {
            min_depth: 2,
            max_depth: 4,
            ..DepthConfig::default()
        };
        assert_eq!(controller.apply_config(&narrowed), Some(4));
        assert_eq!(controller.apply_config(&narrowed), None);
    }
}
