use crate::core::{
    MediaInfo, OpenError, ProbeLimits, Result, StreamKind, StreamSelection,
};
use crate::player::demuxer_source::{AudioDecoder, DemuxerSource, MediaBackend, VideoDecoder};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 播放期间从 MediaSource 借出的上下文
///
/// 解封装器交给解封装线程，两个解码器分别交给对应的解码线程；
/// 线程 join 后通过 `MediaSource::restore_contexts` 归还。
#[derive(Default)]
pub struct SourceContexts {
    pub demuxer: Option<Box<dyn DemuxerSource>>,
    pub video_decoder: Option<Box<VideoDecoder>>,
    pub audio_decoder: Option<Box<AudioDecoder>>,
}

/// 媒体源 - 一个已打开的容器及其选中的音视频解码上下文
///
/// 打开后 `StreamSelection` 不再变化；缺少的流对应的元数据为空 / 0。
pub struct MediaSource {
    backend: Arc<dyn MediaBackend>,
    probe: ProbeLimits,
    file_path: Option<PathBuf>,
    contexts: SourceContexts,
    selection: StreamSelection,
    duration: f64,
    bit_rate: i64,
    opened: bool,
}

impl MediaSource {
    pub fn new(backend: Arc<dyn MediaBackend>, probe: ProbeLimits) -> Self {
        Self {
            backend,
            probe,
            file_path: None,
            contexts: SourceContexts::default(),
            selection: StreamSelection::default(),
            duration: 0.0,
            bit_rate: 0,
            opened: false,
        }
    }

    pub fn set_file_path(&mut self, path: impl Into<PathBuf>) {
        self.file_path = Some(path.into());
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// 打开容器并为最佳视频流 / 音频流各打开一个解码器
    ///
    /// 只要有一路解码器成功就算打开成功。重复调用会先关闭之前的状态。
    pub fn open(&mut self) -> std::result::Result<(), OpenError> {
        self.close();

        let path = match &self.file_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => return Err(OpenError::InvalidPath),
        };

        let demuxer = self.backend.open_container(&path, &self.probe).map_err(|e| {
            error!("❌ 无法解析容器 {}: {}", path.display(), e);
            OpenError::DemuxFailed(e.to_string())
        })?;

        let mut selection = StreamSelection::default();
        let mut video_decoder = None;
        let mut audio_decoder = None;

        if let Some(index) = demuxer.best_stream(StreamKind::Video) {
            match demuxer.open_video_decoder(index) {
                Ok((decoder, params)) => {
                    video_decoder = Some(decoder);
                    selection.video = Some(params);
                }
                Err(e) => warn!("⚠️ 视频解码器打开失败（流 #{}）: {}", index, e),
            }
        } else {
            debug!("没有视频流");
        }

        if let Some(index) = demuxer.best_stream(StreamKind::Audio) {
            match demuxer.open_audio_decoder(index) {
                Ok((decoder, params)) => {
                    audio_decoder = Some(decoder);
                    selection.audio = Some(params);
                }
                Err(e) => warn!("⚠️ 音频解码器打开失败（流 #{}）: {}", index, e),
            }
        } else {
            debug!("没有音频流");
        }

        if video_decoder.is_none() && audio_decoder.is_none() {
            error!("❌ {} 中没有可解码的流", path.display());
            return Err(OpenError::NoDecodableStream);
        }

        self.duration = demuxer.duration_seconds();
        self.bit_rate = demuxer.bit_rate();
        self.contexts = SourceContexts {
            demuxer: Some(demuxer),
            video_decoder,
            audio_decoder,
        };
        self.selection = selection;
        self.opened = true;

        info!(
            "✅ 媒体已打开: {} (视频: {}, 音频: {}, 时长: {:.2}s)",
            path.display(),
            self.selection.has_video(),
            self.selection.has_audio(),
            self.duration
        );
        Ok(())
    }

    /// 释放所有上下文；可重复调用
    pub fn close(&mut self) {
        if self.opened {
            debug!("关闭媒体源: {:?}", self.file_path);
        }
        self.contexts = SourceContexts::default();
        self.selection = StreamSelection::default();
        self.duration = 0.0;
        self.bit_rate = 0;
        self.opened = false;
    }

    /// 上下文借出期间仍然返回 true
    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn selection(&self) -> &StreamSelection {
        &self.selection
    }

    /// 借出解封装器和解码器（交给工作线程）
    pub fn take_contexts(&mut self) -> SourceContexts {
        std::mem::take(&mut self.contexts)
    }

    /// 归还工作线程用完的上下文
    pub fn restore_contexts(&mut self, contexts: SourceContexts) {
        if !self.opened {
            // 借出期间被关闭：直接丢弃
            return;
        }
        if contexts.demuxer.is_some() {
            self.contexts.demuxer = contexts.demuxer;
        }
        if contexts.video_decoder.is_some() {
            self.contexts.video_decoder = contexts.video_decoder;
        }
        if contexts.audio_decoder.is_some() {
            self.contexts.audio_decoder = contexts.audio_decoder;
        }
    }

    /// 回到开头：Seek 到 0 并清空解码器缓冲
    pub fn rewind(&mut self) -> Result<()> {
        if let Some(decoder) = self.contexts.video_decoder.as_mut() {
            decoder.flush();
        }
        if let Some(decoder) = self.contexts.audio_decoder.as_mut() {
            decoder.flush();
        }
        match self.contexts.demuxer.as_mut() {
            Some(demuxer) => demuxer.seek(0),
            None => Ok(()),
        }
    }

    /// 视频分辨率（无视频流时为 0x0）
    pub fn video_resolution(&self) -> (u32, u32) {
        self.selection
            .video
            .as_ref()
            .map(|v| (v.width, v.height))
            .unwrap_or((0, 0))
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration
    }

    /// 码率（kbps）
    pub fn bit_rate_kbps(&self) -> f64 {
        self.bit_rate as f64 / 1000.0
    }

    pub fn video_codec_name(&self) -> String {
        self.selection
            .video
            .as_ref()
            .map(|v| v.codec_name.clone())
            .unwrap_or_default()
    }

    pub fn audio_codec_name(&self) -> String {
        self.selection
            .audio
            .as_ref()
            .map(|a| a.codec_name.clone())
            .unwrap_or_default()
    }

    pub fn video_frame_rate(&self) -> f64 {
        self.selection.video.as_ref().map(|v| v.frame_rate).unwrap_or(0.0)
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.selection.audio.as_ref().map(|a| a.sample_rate).unwrap_or(0)
    }

    pub fn audio_channels(&self) -> u16 {
        self.selection.audio.as_ref().map(|a| a.channels).unwrap_or(0)
    }

    /// 元数据快照
    pub fn media_info(&self) -> MediaInfo {
        let (width, height) = self.video_resolution();
        MediaInfo {
            duration: self.duration_seconds(),
            bit_rate: self.bit_rate_kbps(),
            width,
            height,
            fps: self.video_frame_rate(),
            video_codec: self.video_codec_name(),
            audio_codec: self.audio_codec_name(),
            sample_rate: self.audio_sample_rate(),
            channels: self.audio_channels(),
        }
    }
}
