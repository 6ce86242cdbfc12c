use crate::core::{AudioParams, MediaPacket, ProbeLimits, Result, StreamKind, VideoParams};
use ffmpeg_next as ffmpeg;
use std::path::Path;

/// 媒体后端 - 负责打开容器
///
/// 默认实现是 FFmpeg（见 `FfmpegBackend`），测试中可以替换成脚本化的假后端。
pub trait MediaBackend: Send + Sync {
    /// 打开容器并读取流信息，探测必须受 `limits` 约束
    fn open_container(&self, path: &Path, limits: &ProbeLimits) -> Result<Box<dyn DemuxerSource>>;
}

/// Demuxer 数据源抽象接口
///
/// 运行期间只有解封装线程持有它；其余时间归 `MediaSource` 所有。
pub trait DemuxerSource: Send {
    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// Seek 到指定位置（毫秒）
    fn seek(&mut self, timestamp_ms: i64) -> Result<()>;

    /// 指定类型的最佳流索引
    fn best_stream(&self, kind: StreamKind) -> Option<usize>;

    /// 为视频流打开解码器
    fn open_video_decoder(&self, stream_index: usize) -> Result<(Box<VideoDecoder>, VideoParams)>;

    /// 为音频流打开解码器
    fn open_audio_decoder(&self, stream_index: usize) -> Result<(Box<AudioDecoder>, AudioParams)>;

    /// 容器时长（秒），未知时为 0
    fn duration_seconds(&self) -> f64;

    /// 容器总码率（bit/s），未知时为 0
    fn bit_rate(&self) -> i64;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 单路流的解码上下文
///
/// 只有对应的解码线程会调用它。
pub trait StreamDecoder<F>: Send {
    /// 送入一个包；失败时该包被跳过
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()>;

    /// 送入结束标记，之后可以取出内部缓冲的帧
    fn send_eof(&mut self) -> Result<()>;

    /// 取出下一帧；None 表示需要更多输入或已经结束
    fn receive_frame(&mut self) -> Result<Option<F>>;

    /// 清空内部缓冲（重新开始播放前调用）
    fn flush(&mut self);
}

pub type VideoDecoder = dyn StreamDecoder<ffmpeg::frame::Video>;
pub type AudioDecoder = dyn StreamDecoder<ffmpeg::frame::Audio>;
