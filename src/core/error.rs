use crate::core::PlaybackState;
use thiserror::Error;

/// 打开媒体源失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("未设置文件路径")]
    InvalidPath,

    #[error("无法解析容器: {0}")]
    DemuxFailed(String),

    #[error("没有可解码的视频流或音频流")]
    NoDecodableStream,
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("打开失败: {0}")]
    Open(#[from] OpenError),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("输出初始化失败: {0}")]
    SinkInitFailed(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("没有打开的媒体")]
    NotOpen,

    #[error("当前状态 {0:?} 不允许该操作")]
    InvalidState(PlaybackState),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
