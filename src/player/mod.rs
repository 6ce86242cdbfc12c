// 播放器核心模块

pub mod packet_queue;
pub mod demuxer_source; // Demuxer / 解码器抽象接口
pub mod demuxer;
pub mod decoder;
pub mod media_source;
pub mod demuxer_thread; // Demuxer 线程管理
pub mod demuxer_factory; // 异步打开
pub mod sync;
pub mod audio_output;
pub mod frame_sink;
pub mod engine;
pub mod controller;

#[cfg(test)]
pub(crate) mod test_support;

pub use packet_queue::{PacketQueue, DEFAULT_QUEUE_CAPACITY};
pub use demuxer_source::{DemuxerSource, MediaBackend, StreamDecoder};
pub use demuxer::{Demuxer, FfmpegBackend};
pub use decoder::{FfmpegAudioDecoder, FfmpegVideoDecoder};
pub use media_source::MediaSource;
pub use demuxer_thread::DemuxerThread;
pub use demuxer_factory::{OpenOutcome, SourceFactory};
pub use audio_output::{AudioDevice, AudioOutput, CpalAudioDevice};
pub use frame_sink::{FrameSink, RenderTarget, VideoConfig};
pub use engine::PlaybackEngine;
pub use controller::{normalize_media_path, PlayerController, PlayerEvent};
