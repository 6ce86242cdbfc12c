use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, ChannelLayout, Rational};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 播放状态
///
/// 只有 `PlaybackEngine` 持有唯一的权威副本，其他线程只读取快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlaybackState {
    /// 未加载或已停止
    Stopped = 0,
    /// 正在初始化输出并创建线程
    Loading = 1,
    Playing = 2,
    /// 线程存活但阻塞在暂停门上
    Paused = 3,
    /// 解封装已读到末尾，解码线程仍在排空队列
    EndOfStream = 4,
    /// 所有解码线程已结束，等待控制端调用 stop()
    Done = 5,
}

impl PlaybackState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Loading,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            4 => PlaybackState::EndOfStream,
            5 => PlaybackState::Done,
            _ => PlaybackState::Stopped,
        }
    }
}

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// 解封装得到的媒体包（可跨线程传递）
pub struct MediaPacket {
    pub stream_index: usize,
    pub packet: ffmpeg::Packet,
}

/// 视频流参数（打开解码器时确定）
#[derive(Debug, Clone)]
pub struct VideoParams {
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    pub pixel_format: format::Pixel,
    pub time_base: Rational,
    pub frame_rate: f64,
    pub codec_name: String,
}

/// 音频流参数（打开解码器时确定）
#[derive(Debug, Clone)]
pub struct AudioParams {
    pub stream_index: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
    pub sample_format: format::Sample,
    pub time_base: Rational,
    pub codec_name: String,
}

/// 选中的音视频流，打开后不再变化
#[derive(Debug, Clone, Default)]
pub struct StreamSelection {
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
}

impl StreamSelection {
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,      // 总时长（秒）
    pub bit_rate: f64,      // 码率（kbps）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 输出给渲染目标的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    YUV420P,
    /// 10-bit：Y 平面 + UV 交错平面，每分量 16 bit
    P010,
}

/// 一个紧凑排列的像素平面
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// 可直接显示的视频帧
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub pts: Option<f64>,   // 显示时间戳（秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// PCM 输出格式（S16 交错）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    /// 每个采样帧（所有声道）的字节数
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// 播放统计（各线程原子累加）
#[derive(Debug, Default)]
pub struct PlaybackStats {
    pub packets_demuxed: AtomicU64,
    pub video_frames_delivered: AtomicU64,
    pub video_frames_dropped: AtomicU64,
    pub audio_frames_played: AtomicU64,
}

impl PlaybackStats {
    pub fn reset(&self) {
        self.packets_demuxed.store(0, Ordering::Relaxed);
        self.video_frames_delivered.store(0, Ordering::Relaxed);
        self.video_frames_dropped.store(0, Ordering::Relaxed);
        self.audio_frames_played.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_demuxed: self.packets_demuxed.load(Ordering::Relaxed),
            video_frames_delivered: self.video_frames_delivered.load(Ordering::Relaxed),
            video_frames_dropped: self.video_frames_dropped.load(Ordering::Relaxed),
            audio_frames_played: self.audio_frames_played.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub packets_demuxed: u64,
    pub video_frames_delivered: u64,
    pub video_frames_dropped: u64,
    pub audio_frames_played: u64,
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferStatus {
    /// 视频数据包队列长度
    pub video_packets: usize,

    /// 音频数据包队列长度
    pub audio_packets: usize,

    pub stats: StatsSnapshot,
}

/// 流时间戳转秒
pub fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// 秒数格式化为 "HH:MM:SS"
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
