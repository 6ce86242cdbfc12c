//! 测试用的脚本化后端、显示目标和音频输出

use crate::core::{
    AudioParams, DisplayFrame, MediaPacket, OutputFormat, PlayerError, ProbeLimits, Result,
    StreamKind, VideoParams,
};
use crate::player::audio_output::{AudioDevice, AudioOutput};
use crate::player::demuxer_source::{
    AudioDecoder, DemuxerSource, MediaBackend, StreamDecoder, VideoDecoder,
};
use crate::player::frame_sink::RenderTarget;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{sample, Pixel, Sample};
use ffmpeg_next::util::frame;
use ffmpeg_next::{ChannelLayout, Rational};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;
pub const DATA_STREAM: usize = 2;

pub const FPS: i32 = 25;
pub const SAMPLE_RATE: u32 = 44100;
pub const SAMPLES_PER_FRAME: usize = 1024;

/// 脚本化媒体文件的描述
#[derive(Debug, Clone)]
pub struct MediaScript {
    pub video_frames: usize,
    pub audio_frames: usize,
    /// 额外的数据流包（不应进入任何队列）
    pub data_packets: usize,
    pub width: u32,
    pub height: u32,
    pub fail_open: bool,
    pub fail_video_decoder: bool,
    pub fail_audio_decoder: bool,
    /// 读取到第 N 个包时返回读取错误
    pub fail_read_at: Option<usize>,
    /// 该 pts 的视频包会被解码器拒绝
    pub corrupt_video_pts: Option<i64>,
    /// 解码到该 pts 的视频包时解码线程 panic
    pub panic_video_pts: Option<i64>,
    /// 每次读包前的延迟
    pub read_delay: Option<Duration>,
}

impl MediaScript {
    pub fn video_only(video_frames: usize) -> Self {
        Self::audio_video(video_frames, 0)
    }

    pub fn audio_video(video_frames: usize, audio_frames: usize) -> Self {
        Self {
            video_frames,
            audio_frames,
            data_packets: 0,
            width: 64,
            height: 48,
            fail_open: false,
            fail_video_decoder: false,
            fail_audio_decoder: false,
            fail_read_at: None,
            corrupt_video_pts: None,
            panic_video_pts: None,
            read_delay: None,
        }
    }

    fn duration(&self) -> f64 {
        let video = self.video_frames as f64 / FPS as f64;
        let audio = (self.audio_frames * SAMPLES_PER_FRAME) as f64 / SAMPLE_RATE as f64;
        video.max(audio)
    }

    /// 按时间交错排列的 (流索引, pts)
    fn packet_plan(&self) -> Vec<(usize, i64)> {
        let mut plan: Vec<(f64, usize, i64)> = Vec::new();
        for i in 0..self.video_frames {
            plan.push((i as f64 / FPS as f64, VIDEO_STREAM, i as i64));
        }
        for i in 0..self.audio_frames {
            let pts = (i * SAMPLES_PER_FRAME) as i64;
            plan.push((pts as f64 / SAMPLE_RATE as f64, AUDIO_STREAM, pts));
        }
        for i in 0..self.data_packets {
            plan.push((i as f64 * 0.1, DATA_STREAM, i as i64));
        }
        plan.sort_by(|a, b| a.0.total_cmp(&b.0));
        plan.into_iter().map(|(_, stream, pts)| (stream, pts)).collect()
    }
}

/// 脚本化后端
pub struct ScriptedBackend {
    script: MediaScript,
    failing_paths: Vec<PathBuf>,
    opens: AtomicUsize,
    seeks: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(script: MediaScript) -> Self {
        Self {
            script,
            failing_paths: Vec::new(),
            opens: AtomicUsize::new(0),
            seeks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 打开这个路径时按容器无法解析处理
    pub fn with_failing_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing_paths.push(path.into());
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn seek_count(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }
}

impl MediaBackend for ScriptedBackend {
    fn open_container(&self, path: &Path, _limits: &ProbeLimits) -> Result<Box<dyn DemuxerSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_open || self.failing_paths.iter().any(|p| p == path) {
            return Err(PlayerError::Other("无法识别的容器".to_string()));
        }
        Ok(Box::new(ScriptedDemuxer {
            plan: self.script.packet_plan(),
            cursor: 0,
            script: self.script.clone(),
            seeks: self.seeks.clone(),
        }))
    }
}

struct ScriptedDemuxer {
    script: MediaScript,
    plan: Vec<(usize, i64)>,
    cursor: usize,
    seeks: Arc<AtomicUsize>,
}

impl DemuxerSource for ScriptedDemuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        if let Some(delay) = self.script.read_delay {
            std::thread::sleep(delay);
        }
        if self.script.fail_read_at == Some(self.cursor) {
            return Err(PlayerError::Other("读取失败".to_string()));
        }
        let Some(&(stream_index, pts)) = self.plan.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let mut packet = ffmpeg::Packet::new(16);
        packet.set_stream(stream_index);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(pts));
        Ok(Some(MediaPacket {
            stream_index,
            packet,
        }))
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        if timestamp_ms == 0 {
            self.cursor = 0;
        }
        Ok(())
    }

    fn best_stream(&self, kind: StreamKind) -> Option<usize> {
        match kind {
            StreamKind::Video if self.script.video_frames > 0 => Some(VIDEO_STREAM),
            StreamKind::Audio if self.script.audio_frames > 0 => Some(AUDIO_STREAM),
            _ => None,
        }
    }

    fn open_video_decoder(&self, stream_index: usize) -> Result<(Box<VideoDecoder>, VideoParams)> {
        if self.script.fail_video_decoder {
            return Err(PlayerError::DecodeError("不支持的视频编码".to_string()));
        }
        let params = VideoParams {
            stream_index,
            width: self.script.width,
            height: self.script.height,
            pixel_format: Pixel::YUV420P,
            time_base: Rational::new(1, FPS),
            frame_rate: FPS as f64,
            codec_name: "rawvideo".to_string(),
        };
        let decoder = ScriptedVideoDecoder {
            width: self.script.width,
            height: self.script.height,
            pending: VecDeque::new(),
            corrupt_pts: self.script.corrupt_video_pts,
            panic_pts: self.script.panic_video_pts,
        };
        Ok((Box::new(decoder), params))
    }

    fn open_audio_decoder(&self, stream_index: usize) -> Result<(Box<AudioDecoder>, AudioParams)> {
        if self.script.fail_audio_decoder {
            return Err(PlayerError::DecodeError("不支持的音频编码".to_string()));
        }
        let params = AudioParams {
            stream_index,
            sample_rate: SAMPLE_RATE,
            channels: 2,
            channel_layout: ChannelLayout::STEREO,
            sample_format: Sample::I16(sample::Type::Packed),
            time_base: Rational::new(1, SAMPLE_RATE as i32),
            codec_name: "pcm_s16le".to_string(),
        };
        let decoder = ScriptedAudioDecoder {
            pending: VecDeque::new(),
        };
        Ok((Box::new(decoder), params))
    }

    fn duration_seconds(&self) -> f64 {
        self.script.duration()
    }

    fn bit_rate(&self) -> i64 {
        128_000
    }

    fn description(&self) -> String {
        "Scripted Demuxer".to_string()
    }
}

struct ScriptedVideoDecoder {
    width: u32,
    height: u32,
    pending: VecDeque<i64>,
    corrupt_pts: Option<i64>,
    panic_pts: Option<i64>,
}

impl StreamDecoder<frame::Video> for ScriptedVideoDecoder {
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        let pts = packet.pts().unwrap_or(0);
        if self.corrupt_pts == Some(pts) {
            return Err(PlayerError::DecodeError("损坏的视频包".to_string()));
        }
        if self.panic_pts == Some(pts) {
            panic!("scripted video decoder panic at pts {}", pts);
        }
        self.pending.push_back(pts);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<frame::Video>> {
        Ok(self
            .pending
            .pop_front()
            .map(|pts| video_frame(Pixel::YUV420P, self.width, self.height, pts)))
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

struct ScriptedAudioDecoder {
    pending: VecDeque<i64>,
}

impl StreamDecoder<frame::Audio> for ScriptedAudioDecoder {
    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.pending.push_back(packet.pts().unwrap_or(0));
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<frame::Audio>> {
        Ok(self
            .pending
            .pop_front()
            .map(|pts| audio_frame(SAMPLES_PER_FRAME, pts)))
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

/// 全零的视频帧
pub fn video_frame(format: Pixel, width: u32, height: u32, pts: i64) -> frame::Video {
    let mut frame = frame::Video::new(format, width, height);
    for index in 0..frame.planes() {
        frame.data_mut(index).fill(0);
    }
    frame.set_pts(Some(pts));
    frame
}

/// 静音的 S16 立体声音频帧
pub fn audio_frame(samples: usize, pts: i64) -> frame::Audio {
    let mut frame = frame::Audio::new(
        Sample::I16(sample::Type::Packed),
        samples,
        ChannelLayout::STEREO,
    );
    frame.set_rate(SAMPLE_RATE);
    frame.data_mut(0).fill(0);
    frame.set_pts(Some(pts));
    frame
}

/// 记录收到的帧；可选择阻塞在 present 中直到 release()
pub struct CountingTarget {
    frames: AtomicUsize,
    last: Mutex<Option<DisplayFrame>>,
    blocked: Mutex<bool>,
    cond: Condvar,
}

impl CountingTarget {
    pub fn new() -> Self {
        Self {
            frames: AtomicUsize::new(0),
            last: Mutex::new(None),
            blocked: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn blocked() -> Self {
        let target = Self::new();
        *target.blocked.lock() = true;
        target
    }

    pub fn release(&self) {
        *self.blocked.lock() = false;
        self.cond.notify_all();
    }

    pub fn frame_count(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<DisplayFrame> {
        self.last.lock().clone()
    }
}

impl RenderTarget for CountingTarget {
    fn present(&self, frame: DisplayFrame) {
        {
            let mut blocked = self.blocked.lock();
            while *blocked {
                self.cond.wait(&mut blocked);
            }
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(frame);
    }
}

/// 测试输出的消费方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// 立即消费所有数据
    Instant,
    /// 永远是满的
    Blocked,
    /// 按采样率实时消费
    Realtime,
}

pub struct TestAudioOutput {
    format: OutputFormat,
    mode: OutputMode,
    capacity: usize,
    written: AtomicUsize,
    started: Mutex<Option<Instant>>,
    volume: AtomicU32,
}

impl TestAudioOutput {
    fn new(format: OutputFormat, mode: OutputMode) -> Self {
        Self {
            format,
            mode,
            capacity: format.sample_rate as usize * format.bytes_per_frame() / 5,
            written: AtomicUsize::new(0),
            started: Mutex::new(None),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }

    fn consumed(&self) -> usize {
        match *self.started.lock() {
            Some(start) => {
                let bytes_per_second = self.format.sample_rate as f64 * self.format.bytes_per_frame() as f64;
                (start.elapsed().as_secs_f64() * bytes_per_second) as usize
            }
            None => 0,
        }
    }
}

impl AudioOutput for TestAudioOutput {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn bytes_free(&self) -> usize {
        match self.mode {
            OutputMode::Instant => self.capacity,
            OutputMode::Blocked => 0,
            OutputMode::Realtime => {
                let buffered = self.bytes_written().saturating_sub(self.consumed());
                self.capacity.saturating_sub(buffered)
            }
        }
    }

    fn write(&self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.bytes_free());
        if accepted > 0 {
            self.started.lock().get_or_insert_with(Instant::now);
            self.written.fetch_add(accepted, Ordering::SeqCst);
        }
        accepted
    }

    fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::SeqCst);
    }
}

/// 测试音频设备：按请求的格式打开 TestAudioOutput
pub struct TestAudioDevice {
    mode: OutputMode,
    fail: AtomicBool,
    last: Mutex<Option<Arc<TestAudioOutput>>>,
}

impl TestAudioDevice {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            fail: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        let device = Self::new(OutputMode::Instant);
        device.fail.store(true, Ordering::SeqCst);
        device
    }

    pub fn last_output(&self) -> Option<Arc<TestAudioOutput>> {
        self.last.lock().clone()
    }
}

impl AudioDevice for TestAudioDevice {
    fn open(&self, requested: OutputFormat) -> Result<Arc<dyn AudioOutput>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlayerError::AudioError("设备不可用".to_string()));
        }
        let output = Arc::new(TestAudioOutput::new(requested, self.mode));
        *self.last.lock() = Some(output.clone());
        Ok(output)
    }
}
