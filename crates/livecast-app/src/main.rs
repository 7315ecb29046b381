//! LiveCast - adaptive live capture pipeline demo
//!
//! Feeds synthetic capture through a full session into a logging sink over
//! a simulated link of fixed capacity.

mod capture;
mod sink;

use anyhow::{anyhow, bail, Context, Result};
use capture::SyntheticCapture;
use livecast_core::{AudioTrack, FrameRate, PipelineConfig, StreamSink};
use livecast_gpu::{CpuRotator, GpuContext, RotationBackend, WgpuRotator};
use livecast_pipeline::Session;
use sink::{LoggingSink, SimulatedLink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    duration: Duration,
    width: u32,
    height: u32,
    capacity_bps: u64,
    /// Stop reporting network status after this long.
    drop_after: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: None,
            duration: Duration::from_secs(30),
            width: 1280,
            height: 720,
            capacity_bps: 3_000_000,
            drop_after: None,
        }
    }
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        while let Some(arg) = args.next() {
            let mut value = || args.next().ok_or_else(|| anyhow!("missing value for {arg}"));
            match arg.as_str() {
                "--config" => options.config = Some(PathBuf::from(value()?)),
                "--seconds" => options.duration = parse_secs(&value()?)?,
                "--size" => {
                    let size = value()?;
                    let (w, h) = size
                        .split_once('x')
                        .ok_or_else(|| anyhow!("size must look like 1280x720, got {size}"))?;
                    options.width = w.parse()?;
                    options.height = h.parse()?;
                }
                "--capacity-kbps" => options.capacity_bps = value()?.parse::<u64>()? * 1000,
                "--drop-after" => options.drop_after = Some(parse_secs(&value()?)?),
                other => bail!("unknown argument {other}"),
            }
        }
        if options.width == 0 || options.height == 0 {
            bail!("frame size must be non-zero");
        }
        Ok(options)
    }
}

fn parse_secs(text: &str) -> Result<Duration> {
    let secs: f64 = text.parse()?;
    if !(secs.is_finite() && secs >= 0.0) {
        bail!("invalid duration {text}");
    }
    Ok(Duration::from_secs_f64(secs))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse(std::env::args().skip(1))?;
    let config = match &options.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    info!("LiveCast starting...");

    let gpu = match GpuContext::new().await {
        Ok(context) => WgpuRotator::new(&context),
        Err(e) => Err(e),
    };
    match gpu {
        Ok(backend) => run(backend, &options, config).await,
        Err(e) => {
            warn!("GPU rotation unavailable ({}), falling back to CPU", e);
            run(CpuRotator::new(), &options, config).await
        }
    }
}

async fn run<B: RotationBackend>(backend: B, options: &Options, config: PipelineConfig) -> Result<()> {
    let sink = Arc::new(LoggingSink::default());
    let session = Session::start(backend, Arc::clone(&sink) as Arc<dyn StreamSink>, config)?;
    let levels = session.levels();

    let mut capture = SyntheticCapture::new(options.width, options.height, FrameRate::FPS_30);
    let mut link = SimulatedLink::new(options.capacity_bps);
    let link_down_at = options.drop_after.map(|after| Instant::now() + after);

    let network_period = Duration::from_secs(1);
    let mut video_tick = interval(Duration::from_secs_f64(1.0 / capture.rate().to_fps_f64()));
    let mut audio_tick = interval(Duration::from_millis(20));
    let mut network_tick = interval(network_period);
    for ticker in [&mut video_tick, &mut audio_tick, &mut network_tick] {
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }
    let deadline = sleep(options.duration);
    tokio::pin!(deadline);

    info!(
        "Streaming {}x{} for {:.0}s over a {} kbps link",
        options.width,
        options.height,
        options.duration.as_secs_f64(),
        options.capacity_bps / 1000
    );

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Capture finished");
                break;
            }
            lost = session.disconnected() => {
                if lost {
                    warn!("Connection lost, ending session");
                }
                break;
            }
            _ = video_tick.tick() => {
                let pts = session.clock().now_secs();
                session.push_video(capture.video_frame(pts));
            }
            _ = audio_tick.tick() => {
                for track in AudioTrack::ALL {
                    session.push_audio(capture.audio_frame(track), track);
                }
            }
            _ = network_tick.tick() => {
                let link_up = link_down_at.map_or(true, |at| Instant::now() < at);
                if link_up {
                    let offered = sink.video_bitrate() as u64 + sink.audio_bitrate() as u64;
                    for event in link.tick(offered, network_period) {
                        session.report_network(event);
                    }
                }
                let current = *levels.borrow();
                debug!("Audio levels {}", serde_json::to_string(&current)?);
            }
        }
    }

    let stats = session.video_stats();
    let bitrate = session.bitrate_snapshot().await?;
    session.shutdown().await;

    info!(
        "Video: {} received, {} delivered, {} dropped",
        stats.received, stats.delivered, stats.dropped
    );
    info!(
        "Final video bitrate {} kbps (ceiling {} kbps)",
        bitrate.video_bitrate / 1000,
        bitrate.max_video_bitrate / 1000
    );
    info!("Sink: {}", sink.summary());
    Ok(())
}
