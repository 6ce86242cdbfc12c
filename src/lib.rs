//! myy_playback - 基于 FFmpeg 的媒体播放引擎核心
//!
//! - `core`：类型、时钟、配置、错误
//! - `player`：包队列、媒体源、输出端、播放引擎与控制器

pub mod core;
pub mod player;
