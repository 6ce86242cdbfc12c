use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use myy_playback::core::{DisplayFrame, PlayerConfig};
use myy_playback::player::{
    CpalAudioDevice, FfmpegBackend, FrameSink, PlayerController, PlayerEvent, RenderTarget,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// 无窗口模式下的显示目标：只统计帧数并周期输出日志
struct LoggingTarget {
    presented: AtomicU64,
}

impl RenderTarget for LoggingTarget {
    fn present(&self, frame: DisplayFrame) {
        let count = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 || count % 250 == 0 {
            info!(
                "🖼️ 第 {} 帧 {}x{} {:?} pts={:?}",
                count, frame.width, frame.height, frame.format, frame.pts
            );
        }
    }
}

/// 无窗口播放器：播放一个媒体文件并输出日志
#[derive(Parser, Debug)]
#[command(name = "myy_playback")]
struct Args {
    /// 媒体文件路径或 file:// URL
    media: String,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 不打开音频设备，只输出视频
    #[arg(long)]
    no_audio: bool,
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playback 启动");

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");

    let sink = if args.no_audio {
        FrameSink::new()
    } else {
        FrameSink::with_audio_device(Arc::new(CpalAudioDevice))
    };
    let sink = Arc::new(sink);
    let target = Arc::new(LoggingTarget {
        presented: AtomicU64::new(0),
    });

    let interval = config.position_interval();
    let mut controller = PlayerController::new(Arc::new(FfmpegBackend), sink, config);
    let render_target: Arc<dyn RenderTarget> = target.clone();
    controller.set_render_target(Some(render_target));

    let events = controller.events();
    controller.open_media(&args.media);

    loop {
        controller.poll();

        let mut finished = false;
        for event in events.try_iter() {
            match event {
                PlayerEvent::MediaChanged => {
                    info!(
                        "📺 {} 时长 {}",
                        controller.resolution_text(),
                        controller.duration_text()
                    );
                }
                PlayerEvent::MediaOpenFailed(path) => {
                    bail!("无法打开媒体: {}", path.display());
                }
                PlayerEvent::PlayingChanged(playing) => {
                    info!("{}", if playing { "▶️ 播放" } else { "⏸️ 停止" });
                }
                PlayerEvent::PositionChanged(_) => {}
                PlayerEvent::PlaybackFinished => finished = true,
            }
        }
        if finished {
            break;
        }

        thread::sleep(interval);
    }

    let presented = target.presented.load(Ordering::Relaxed);
    if presented == 0 {
        warn!("⚠️ 没有显示任何视频帧");
    }
    info!("🏁 播放完成，共显示 {} 帧", presented);
    Ok(())
}
