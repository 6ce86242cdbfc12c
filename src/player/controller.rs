use crate::core::{format_hms, MediaInfo, PlaybackState, PlayerConfig};
use crate::player::demuxer_factory::{OpenOutcome, SourceFactory};
use crate::player::demuxer_source::MediaBackend;
use crate::player::engine::PlaybackEngine;
use crate::player::frame_sink::{FrameSink, RenderTarget};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// 控制端事件（由外壳在自己的线程上消费）
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    MediaChanged,
    MediaOpenFailed(PathBuf),
    PlayingChanged(bool),
    PositionChanged(f64),
    PlaybackFinished,
}

/// 播放控制器 - 外壳与引擎之间的一层
///
/// 负责异步打开、自动播放、位置刷新和播放结束检测。
/// 外壳需要按 `config.position_interval()` 周期调用 `poll()`。
pub struct PlayerController {
    engine: PlaybackEngine,
    backend: Arc<dyn MediaBackend>,
    config: PlayerConfig,
    open_tx: Sender<OpenOutcome>,
    open_rx: Receiver<OpenOutcome>,
    event_tx: Sender<PlayerEvent>,
    event_rx: Receiver<PlayerEvent>,
    pending_open: Option<PathBuf>,
    position: f64,
    tracking_position: bool,
}

impl PlayerController {
    pub fn new(backend: Arc<dyn MediaBackend>, sink: Arc<FrameSink>, config: PlayerConfig) -> Self {
        let mut engine = PlaybackEngine::new(backend.clone(), sink);
        engine.apply_config(&config);

        let (open_tx, open_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        Self {
            engine,
            backend,
            config,
            open_tx,
            open_rx,
            event_tx,
            event_rx,
            pending_open: None,
            position: 0.0,
            tracking_position: false,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // 只要控制器存在接收端就存在，send 不会失败
        let _ = self.event_tx.send(event);
    }

    /// 事件接收端
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    /// 打开媒体（支持 file:// URL），探测在子线程中进行
    pub fn open_media(&mut self, path: &str) {
        let local_path = normalize_media_path(path);
        if !local_path.is_file() {
            warn!("⚠️ 文件不存在: {}", local_path.display());
            self.emit(PlayerEvent::MediaOpenFailed(local_path));
            return;
        }

        // 先停止并关闭之前的媒体，打开失败时不会残留旧文件
        self.stop();
        if self.engine.is_open() {
            self.engine.close();
            self.emit(PlayerEvent::MediaChanged);
        }

        info!("📂 打开文件: {}", local_path.display());
        self.pending_open = Some(local_path.clone());
        SourceFactory::open_async(
            self.backend.clone(),
            local_path,
            self.config.probe,
            self.open_tx.clone(),
        );
    }

    /// 周期调用：处理打开结果、刷新位置、检测播放结束
    pub fn poll(&mut self) {
        while let Ok(outcome) = self.open_rx.try_recv() {
            self.handle_open_outcome(outcome);
        }

        if !self.tracking_position {
            return;
        }

        let position = self.engine.position();
        if position != self.position {
            self.position = position;
            self.emit(PlayerEvent::PositionChanged(position));
        }

        if self.engine.status() == PlaybackState::Done {
            info!("🏁 播放结束");
            self.engine.stop();
            self.tracking_position = false;
            self.position = 0.0;
            self.emit(PlayerEvent::PositionChanged(0.0));
            self.emit(PlayerEvent::PlayingChanged(false));
            self.emit(PlayerEvent::PlaybackFinished);
        }
    }

    fn handle_open_outcome(&mut self, outcome: OpenOutcome) {
        match outcome {
            OpenOutcome::Opened(mut source) => {
                if self.pending_open.as_deref() != source.file_path() {
                    debug!("丢弃过期的打开结果: {:?}", source.file_path());
                    source.close();
                    return;
                }
                let path = self.pending_open.take().unwrap_or_default();

                info!(
                    "✅ 媒体已就绪: {} 分辨率 {:?} 时长 {:.2}s 视频 {} 音频 {}",
                    path.display(),
                    source.video_resolution(),
                    source.duration_seconds(),
                    source.video_codec_name(),
                    source.audio_codec_name()
                );

                if let Err(e) = self.engine.attach_source(source) {
                    error!("❌ 附加媒体源失败: {}", e);
                    self.emit(PlayerEvent::MediaOpenFailed(path));
                    return;
                }
                self.emit(PlayerEvent::MediaChanged);

                // 打开成功后自动播放
                self.play();
            }
            OpenOutcome::Failed { path, error } => {
                if self.pending_open.as_deref() != Some(path.as_path()) {
                    debug!("丢弃过期的打开失败结果: {}", path.display());
                    return;
                }
                self.pending_open = None;
                error!("❌ 打开媒体失败: {} - {}", path.display(), error);
                self.emit(PlayerEvent::MediaOpenFailed(path));
            }
        }
    }

    pub fn play(&mut self) {
        if !self.engine.is_open() {
            return;
        }

        self.engine.set_volume(self.config.effective_volume());
        if let Err(e) = self.engine.play() {
            warn!("⚠️ 播放失败: {}", e);
            return;
        }
        self.tracking_position = true;
        self.emit(PlayerEvent::PlayingChanged(self.is_playing()));
    }

    pub fn pause(&mut self) {
        self.engine.pause();
        self.tracking_position = false;
        self.emit(PlayerEvent::PlayingChanged(false));
    }

    pub fn stop(&mut self) {
        self.engine.stop();
        self.tracking_position = false;
        self.position = 0.0;
        self.emit(PlayerEvent::PositionChanged(0.0));
        self.emit(PlayerEvent::PlayingChanged(false));
    }

    pub fn toggle_play_pause(&mut self) {
        if self.engine.status() == PlaybackState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn close_media(&mut self) {
        self.stop();
        self.engine.close();
        self.emit(PlayerEvent::MediaChanged);
    }

    /// 设置音量 0 - 100，立即生效
    pub fn set_volume(&mut self, volume: i32) {
        self.config.set_volume(volume);
        self.engine.set_volume(self.config.effective_volume());
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.config.muted = muted;
        self.engine.set_volume(self.config.effective_volume());
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn apply_config(&mut self, config: PlayerConfig) {
        self.engine.apply_config(&config);
        self.config = config;
    }

    pub fn set_render_target(&self, target: Option<Arc<dyn RenderTarget>>) {
        self.engine.set_render_target(target);
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn is_playing(&self) -> bool {
        self.engine.status() == PlaybackState::Playing
    }

    pub fn has_media(&self) -> bool {
        self.engine.is_open()
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.engine
            .source()
            .and_then(|s| s.file_path())
            .map(Path::to_path_buf)
    }

    pub fn media_info(&self) -> MediaInfo {
        self.engine.media_info()
    }

    /// 最近一次刷新的播放位置（秒）
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn position_text(&self) -> String {
        format_hms(self.position)
    }

    pub fn duration_text(&self) -> String {
        format_hms(self.engine.media_info().duration)
    }

    /// "宽×高"，没有视频时为 "-"
    pub fn resolution_text(&self) -> String {
        let info = self.engine.media_info();
        if info.width == 0 || info.height == 0 {
            "-".to_string()
        } else {
            format!("{}×{}", info.width, info.height)
        }
    }
}

/// 把拖放得到的 file:// URL 转成本地路径，其余输入原样当作路径
pub fn normalize_media_path(input: &str) -> PathBuf {
    Url::parse(input)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(input))
}
