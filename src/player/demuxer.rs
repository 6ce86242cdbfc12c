use crate::core::{AudioParams, MediaPacket, PlayerError, ProbeLimits, Result, StreamKind, VideoParams};
use crate::player::decoder::{FfmpegAudioDecoder, FfmpegVideoDecoder};
use crate::player::demuxer_source::{AudioDecoder, DemuxerSource, MediaBackend, VideoDecoder};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media};
use log::{debug, info};
use std::path::Path;

/// FFmpeg 后端
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn open_container(&self, path: &Path, limits: &ProbeLimits) -> Result<Box<dyn DemuxerSource>> {
        Ok(Box::new(Demuxer::open(path, limits)?))
    }
}

/// 解封装器 - 负责读取媒体文件并分离音视频流
pub struct Demuxer {
    input_ctx: format::context::Input,
    source_path: String, // 媒体源路径（用于描述）
}

impl Demuxer {
    /// 打开媒体文件
    ///
    /// 探测大小和分析时长都受限，避免在调用线程上长时间阻塞。
    pub fn open(path: &Path, limits: &ProbeLimits) -> Result<Self> {
        info!("正在打开文件: {}", path.display());

        let mut options = ffmpeg::Dictionary::new();
        options.set("probesize", &limits.probe_size.to_string());
        options.set("analyzeduration", &limits.analyze_duration_us.to_string());

        let input_ctx = format::input_with_dictionary(&path, options)
            .map_err(|e| PlayerError::Other(format!("无法打开文件: {}", e)))?;

        debug!(
            "容器格式: {}, 流数量: {}",
            input_ctx.format().name(),
            input_ctx.nb_streams()
        );

        Ok(Self {
            input_ctx,
            source_path: path.display().to_string(),
        })
    }

    fn stream(&self, stream_index: usize) -> Result<format::stream::Stream> {
        self.input_ctx
            .stream(stream_index)
            .ok_or_else(|| PlayerError::Other(format!("流索引不存在: {}", stream_index)))
    }
}

impl DemuxerSource for Demuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(MediaPacket {
                stream_index: packet.stream(),
                packet,
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        let timestamp = timestamp_ms * 1000; // 毫秒转微秒
        self.input_ctx.seek(timestamp, ..timestamp)?;
        Ok(())
    }

    fn best_stream(&self, kind: StreamKind) -> Option<usize> {
        let medium = match kind {
            StreamKind::Video => media::Type::Video,
            StreamKind::Audio => media::Type::Audio,
        };
        self.input_ctx.streams().best(medium).map(|s| s.index())
    }

    fn open_video_decoder(&self, stream_index: usize) -> Result<(Box<VideoDecoder>, VideoParams)> {
        let stream = self.stream(stream_index)?;
        let parameters = stream.parameters();

        // 先获取编解码器名称（在 parameters 被移动前）
        let codec_name = parameters.id().name().to_string();

        let context = codec::context::Context::from_parameters(parameters)?;
        let decoder = context.decoder().video()?;

        let fps = stream.avg_frame_rate();
        let frame_rate = if fps.denominator() > 0 {
            fps.numerator() as f64 / fps.denominator() as f64
        } else {
            0.0
        };

        let params = VideoParams {
            stream_index,
            width: decoder.width(),
            height: decoder.height(),
            pixel_format: decoder.format(),
            time_base: stream.time_base(),
            frame_rate,
            codec_name,
        };

        debug!(
            "视频解码器: {} {}x{}, 格式: {:?}, {:.3} fps",
            params.codec_name, params.width, params.height, params.pixel_format, params.frame_rate
        );

        Ok((Box::new(FfmpegVideoDecoder::new(decoder)), params))
    }

    fn open_audio_decoder(&self, stream_index: usize) -> Result<(Box<AudioDecoder>, AudioParams)> {
        let stream = self.stream(stream_index)?;
        let parameters = stream.parameters();
        let codec_name = parameters.id().name().to_string();

        let context = codec::context::Context::from_parameters(parameters)?;
        let decoder = context.decoder().audio()?;

        let channels = decoder.channels();
        let mut channel_layout = decoder.channel_layout();
        if channel_layout.is_empty() {
            channel_layout = ffmpeg::ChannelLayout::default(channels as i32);
        }

        let params = AudioParams {
            stream_index,
            sample_rate: decoder.rate(),
            channels,
            channel_layout,
            sample_format: decoder.format(),
            time_base: stream.time_base(),
            codec_name,
        };

        debug!(
            "音频解码器: {} {} Hz, {} 声道, 格式: {:?}",
            params.codec_name, params.sample_rate, params.channels, params.sample_format
        );

        Ok((Box::new(FfmpegAudioDecoder::new(decoder)), params))
    }

    fn duration_seconds(&self) -> f64 {
        let duration = self.input_ctx.duration();
        if duration > 0 {
            duration as f64 / 1_000_000.0 // 微秒转秒
        } else {
            0.0
        }
    }

    fn bit_rate(&self) -> i64 {
        self.input_ctx.bit_rate().max(0)
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
