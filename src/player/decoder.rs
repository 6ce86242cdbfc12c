use crate::core::{PlayerError, Result};
use crate::player::demuxer_source::StreamDecoder;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, util};
use log::debug;

/// receive_frame 的 EAGAIN / EOF 都表示“暂时没有帧”
fn no_frame_available(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Eof)
        || matches!(err, ffmpeg::Error::Other { errno } if *errno == util::error::EAGAIN)
}

/// FFmpeg 视频解码上下文
pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
}

impl FfmpegVideoDecoder {
    pub fn new(decoder: codec::decoder::Video) -> Self {
        Self { decoder }
    }
}

impl StreamDecoder<util::frame::Video> for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| PlayerError::DecodeError(format!("视频包被拒绝: {}", e)))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.decoder.send_eof()?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<util::frame::Video>> {
        let mut decoded_frame = util::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded_frame) {
            Ok(()) => Ok(Some(decoded_frame)),
            Err(e) if no_frame_available(&e) => Ok(None),
            Err(e) => Err(PlayerError::DecodeError(format!("视频解码错误: {}", e))),
        }
    }

    fn flush(&mut self) {
        debug!("flush 视频解码器");
        self.decoder.flush();
    }
}

/// FFmpeg 音频解码上下文
pub struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
}

impl FfmpegAudioDecoder {
    pub fn new(decoder: codec::decoder::Audio) -> Self {
        Self { decoder }
    }
}

impl StreamDecoder<util::frame::Audio> for FfmpegAudioDecoder {
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| PlayerError::DecodeError(format!("音频包被拒绝: {}", e)))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.decoder.send_eof()?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<util::frame::Audio>> {
        let mut decoded_frame = util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut decoded_frame) {
            Ok(()) => Ok(Some(decoded_frame)),
            Err(e) if no_frame_available(&e) => Ok(None),
            Err(e) => Err(PlayerError::DecodeError(format!("音频解码错误: {}", e))),
        }
    }

    fn flush(&mut self) {
        debug!("flush 音频解码器");
        self.decoder.flush();
    }
}
