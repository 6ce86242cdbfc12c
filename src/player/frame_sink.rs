use crate::core::{
    pts_to_seconds, DisplayFrame, MediaClock, OutputFormat, PixelFormat, Plane, PlayerError,
    RenderMode, Result, ScaleFilter,
};
use crate::player::audio_output::{AudioDevice, AudioOutput};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{sample, Pixel, Sample};
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::util::frame;
use ffmpeg_next::{ChannelLayout, Rational};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 音频设备写满时的等待粒度
const AUDIO_WRITE_BACKOFF: Duration = Duration::from_millis(5);

/// 视频显示目标（窗口 / 纹理上传等，由外壳实现）
pub trait RenderTarget: Send + Sync {
    fn present(&self, frame: DisplayFrame);
}

/// 视频输出配置（下次 init_video 时生效）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoConfig {
    pub render_mode: RenderMode,
    pub scale_filter: ScaleFilter,
    pub output_size: Option<(u32, u32)>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Native,
            scale_filter: ScaleFilter::Bilinear,
            output_size: None,
        }
    }
}

/// SwsContext 不是 Send；它只在持有 video 锁的线程上使用
struct Scaler(scaling::Context);

unsafe impl Send for Scaler {}

/// SwrContext 不是 Send；它只在持有 audio 锁的线程上使用
struct Resampler(resampling::Context);

unsafe impl Send for Resampler {}

struct VideoPath {
    source: (Pixel, u32, u32),
    out_width: u32,
    out_height: u32,
    target: PixelFormat,
    scaler: Option<Scaler>, // None 表示直通
}

impl VideoPath {
    fn build(format: Pixel, width: u32, height: u32, config: &VideoConfig) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PlayerError::SinkInitFailed(format!(
                "无效的视频尺寸: {}x{}",
                width, height
            )));
        }

        let (out_width, out_height) = match config.output_size {
            Some((w, h)) if w > 0 && h > 0 => (w, h),
            _ => (width, height),
        };
        let scaling_needed = (out_width, out_height) != (width, height);

        let target = match config.render_mode {
            RenderMode::Rgba => PixelFormat::RGBA,
            RenderMode::Native if format == Pixel::YUV420P => PixelFormat::YUV420P,
            RenderMode::Native if is_high_bit_depth(format) => PixelFormat::P010,
            RenderMode::Native => PixelFormat::RGBA,
        };

        let scaler = if target == PixelFormat::YUV420P && !scaling_needed {
            None
        } else {
            let context = scaling::Context::get(
                format,
                width,
                height,
                ffmpeg_pixel(target),
                out_width,
                out_height,
                scale_flags(config.scale_filter),
            )
            .map_err(|e| PlayerError::SinkInitFailed(format!("创建 SwsContext 失败: {}", e)))?;
            Some(Scaler(context))
        };

        debug!(
            "视频输出: {:?} {}x{} -> {:?} {}x{} ({})",
            format,
            width,
            height,
            target,
            out_width,
            out_height,
            if scaler.is_some() { "转换" } else { "直通" }
        );

        Ok(Self {
            source: (format, width, height),
            out_width,
            out_height,
            target,
            scaler,
        })
    }

    fn convert(&mut self, frame: &frame::Video, pts: Option<f64>) -> Result<DisplayFrame> {
        match self.scaler.as_mut() {
            Some(scaler) => {
                let mut converted = frame::Video::empty();
                scaler
                    .0
                    .run(frame, &mut converted)
                    .map_err(|e| PlayerError::DecodeError(format!("像素格式转换失败: {}", e)))?;
                Ok(pack_frame(&converted, self.target, self.out_width, self.out_height, pts))
            }
            None => Ok(pack_frame(frame, self.target, self.out_width, self.out_height, pts)),
        }
    }
}

struct AudioPath {
    resampler: Resampler,
    source: (Sample, ChannelLayout, u32),
    output: Arc<dyn AudioOutput>,
    format: OutputFormat,
    time_base: Rational,
}

impl AudioPath {
    fn make_resampler(
        format: Sample,
        layout: ChannelLayout,
        rate: u32,
        output: OutputFormat,
    ) -> Result<Resampler> {
        let context = resampling::Context::get(
            format,
            layout,
            rate,
            Sample::I16(sample::Type::Packed),
            ChannelLayout::default(output.channels as i32),
            output.sample_rate,
        )
        .map_err(|e| PlayerError::SinkInitFailed(format!("创建 SwrContext 失败: {}", e)))?;
        Ok(Resampler(context))
    }
}

/// 帧输出 - 把解码后的帧转换为可显示 / 可播放的形式
///
/// 音频时钟归它所有：只由音频路径写入，视频线程和位置查询无锁读取。
pub struct FrameSink {
    video: Mutex<Option<VideoPath>>,
    audio: Mutex<Option<AudioPath>>,
    video_config: Mutex<VideoConfig>,
    render_target: Mutex<Option<Arc<dyn RenderTarget>>>,
    audio_device: Mutex<Option<Arc<dyn AudioDevice>>>,
    output_handle: Mutex<Option<Arc<dyn AudioOutput>>>,
    volume: AtomicU32,
    audio_clock: MediaClock,
    video_clock: MediaClock,
    abort: AtomicBool,
}

impl FrameSink {
    pub fn new() -> Self {
        Self {
            video: Mutex::new(None),
            audio: Mutex::new(None),
            video_config: Mutex::new(VideoConfig::default()),
            render_target: Mutex::new(None),
            audio_device: Mutex::new(None),
            output_handle: Mutex::new(None),
            volume: AtomicU32::new(1.0f32.to_bits()),
            audio_clock: MediaClock::new(),
            video_clock: MediaClock::new(),
            abort: AtomicBool::new(false),
        }
    }

    pub fn with_audio_device(device: Arc<dyn AudioDevice>) -> Self {
        let sink = Self::new();
        sink.set_audio_device(Some(device));
        sink
    }

    /// 初始化视频路径
    pub fn init_video(&self, width: u32, height: u32, pixel_format: Pixel) -> Result<()> {
        let config = *self.video_config.lock();
        let path = VideoPath::build(pixel_format, width, height, &config)?;
        *self.video.lock() = Some(path);
        self.video_clock.reset();
        self.abort.store(false, Ordering::Release);
        Ok(())
    }

    /// 初始化音频路径：打开输出设备并按设备实际格式创建重采样器
    pub fn init_audio(
        &self,
        sample_rate: u32,
        channel_layout: ChannelLayout,
        sample_format: Sample,
        time_base: Rational,
    ) -> Result<()> {
        self.release_audio();

        let device = self
            .audio_device
            .lock()
            .clone()
            .ok_or_else(|| PlayerError::SinkInitFailed("没有可用的音频设备".to_string()))?;

        let output = device
            .open(OutputFormat::default())
            .map_err(|e| PlayerError::SinkInitFailed(e.to_string()))?;
        let format = output.format();

        let resampler = AudioPath::make_resampler(sample_format, channel_layout, sample_rate, format)?;
        output.set_volume(self.volume());

        info!(
            "🔊 音频输出: {} Hz {:?} -> {} Hz {} 声道 S16",
            sample_rate, sample_format, format.sample_rate, format.channels
        );

        *self.output_handle.lock() = Some(output.clone());
        *self.audio.lock() = Some(AudioPath {
            resampler,
            source: (sample_format, channel_layout, sample_rate),
            output,
            format,
            time_base,
        });
        self.audio_clock.reset();
        self.abort.store(false, Ordering::Release);
        Ok(())
    }

    /// 转换一帧视频并交给显示目标；没有显示目标时静默丢弃
    pub fn process_video_frame(&self, frame: &frame::Video, pts: Option<f64>) -> Result<()> {
        let mut video = self.video.lock();
        let Some(path) = video.as_mut() else {
            return Ok(());
        };

        if let Some(seconds) = pts {
            self.video_clock.set(seconds);
        }

        let Some(target) = self.render_target.lock().clone() else {
            return Ok(());
        };

        let source = (frame.format(), frame.width(), frame.height());
        if source != path.source {
            debug!("视频帧参数变化: {:?} -> {:?}，重建转换器", path.source, source);
            let config = *self.video_config.lock();
            *path = VideoPath::build(source.0, source.1, source.2, &config)?;
        }

        let display = path.convert(frame, pts)?;
        drop(video);

        target.present(display);
        Ok(())
    }

    /// 重采样一帧音频并写入输出设备
    ///
    /// 设备写满时以 5ms 为步长等待，直到写完或被中止；中止时不更新时钟。
    pub fn process_audio_frame(&self, mut frame: frame::Audio) -> Result<()> {
        let mut audio = self.audio.lock();
        let Some(path) = audio.as_mut() else {
            return Ok(());
        };

        if frame.channel_layout().is_empty() {
            frame.set_channel_layout(path.source.1);
        }
        let source = (frame.format(), frame.channel_layout(), frame.rate());
        if source != path.source {
            debug!("音频帧参数变化，重建重采样器");
            path.resampler = AudioPath::make_resampler(source.0, source.1, source.2, path.format)?;
            path.source = source;
        }

        let estimated = frame.samples() as u64 * path.format.sample_rate as u64
            / source.2.max(1) as u64
            + 256;
        let mut converted = frame::Audio::new(
            Sample::I16(sample::Type::Packed),
            estimated as usize,
            ChannelLayout::default(path.format.channels as i32),
        );
        path.resampler
            .0
            .run(&frame, &mut converted)
            .map_err(|e| PlayerError::DecodeError(format!("音频重采样失败: {}", e)))?;

        let bytes_per_frame = path.format.bytes_per_frame();
        let total = converted.samples() * bytes_per_frame;
        let data = &converted.data(0)[..total];

        let mut written = 0;
        while written < total {
            if self.abort.load(Ordering::Acquire) {
                return Ok(());
            }
            let free = path.output.bytes_free();
            let chunk = free.min(total - written) / bytes_per_frame * bytes_per_frame;
            if chunk == 0 {
                thread::sleep(AUDIO_WRITE_BACKOFF);
                continue;
            }
            let accepted = path.output.write(&data[written..written + chunk]);
            if accepted == 0 {
                thread::sleep(AUDIO_WRITE_BACKOFF);
            }
            written += accepted;
        }

        let played = converted.samples() as f64 / path.format.sample_rate as f64;
        match frame.pts().or_else(|| frame.timestamp()) {
            Some(pts) => self.audio_clock.set(pts_to_seconds(pts, path.time_base) + played),
            None => {
                self.audio_clock.advance(played);
            }
        }
        Ok(())
    }

    /// 音频主时钟（秒）
    pub fn audio_clock(&self) -> f64 {
        self.audio_clock.get()
    }

    /// 最后一帧送显视频的时间戳（秒）
    pub fn video_clock(&self) -> f64 {
        self.video_clock.get()
    }

    /// 让音频写入循环在一个等待步长内退出
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// 释放转换器和输出设备；可重复调用
    pub fn cleanup(&self) {
        self.video.lock().take();
        self.release_audio();
    }

    fn release_audio(&self) {
        if self.audio.lock().take().is_some() {
            debug!("释放音频输出");
        }
        self.output_handle.lock().take();
    }

    pub fn has_audio_output(&self) -> bool {
        self.output_handle.lock().is_some()
    }

    pub fn set_render_target(&self, target: Option<Arc<dyn RenderTarget>>) {
        *self.render_target.lock() = target;
    }

    pub fn set_audio_device(&self, device: Option<Arc<dyn AudioDevice>>) {
        *self.audio_device.lock() = device;
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        if let Some(output) = self.output_handle.lock().as_ref() {
            output.set_volume(volume);
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_video_config(
        &self,
        render_mode: RenderMode,
        scale_filter: ScaleFilter,
        output_size: Option<(u32, u32)>,
    ) {
        *self.video_config.lock() = VideoConfig {
            render_mode,
            scale_filter,
            output_size,
        };
        if self.video.lock().is_some() {
            warn!("视频输出配置将在下次播放时生效");
        }
    }
}

impl Default for FrameSink {
    fn default() -> Self {
        Self::new()
    }
}

fn scale_flags(filter: ScaleFilter) -> scaling::Flags {
    match filter {
        ScaleFilter::Point => scaling::Flags::POINT,
        ScaleFilter::FastBilinear => scaling::Flags::FAST_BILINEAR,
        ScaleFilter::Bilinear => scaling::Flags::BILINEAR,
        ScaleFilter::Bicubic => scaling::Flags::BICUBIC,
        ScaleFilter::Lanczos => scaling::Flags::LANCZOS,
    }
}

fn ffmpeg_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::RGBA => Pixel::RGBA,
        PixelFormat::YUV420P => Pixel::YUV420P,
        PixelFormat::P010 => Pixel::P010LE,
    }
}

/// 每个分量超过 8 bit 的格式（10-bit HDR 等）
fn is_high_bit_depth(format: Pixel) -> bool {
    unsafe {
        let descriptor = ffmpeg::ffi::av_pix_fmt_desc_get(format.into());
        !descriptor.is_null() && (*descriptor).comp[0].depth > 8
    }
}

/// 把帧数据拷贝成紧凑排列的平面
fn pack_frame(
    frame: &frame::Video,
    format: PixelFormat,
    width: u32,
    height: u32,
    pts: Option<f64>,
) -> DisplayFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);

    // (每行字节数, 行数)
    let layout: Vec<(usize, usize)> = match format {
        PixelFormat::RGBA => vec![(w * 4, h)],
        PixelFormat::YUV420P => vec![(w, h), (cw, ch), (cw, ch)],
        PixelFormat::P010 => vec![(w * 2, h), (cw * 4, ch)],
    };

    let planes = layout
        .into_iter()
        .enumerate()
        .map(|(index, (row_bytes, rows))| {
            let stride = frame.stride(index);
            let src = frame.data(index);
            let mut data = Vec::with_capacity(row_bytes * rows);
            for row in 0..rows {
                let start = row * stride;
                data.extend_from_slice(&src[start..start + row_bytes]);
            }
            Plane {
                data,
                stride: row_bytes,
            }
        })
        .collect();

    DisplayFrame {
        pts,
        width,
        height,
        format,
        planes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::test_support::{
        audio_frame, video_frame, CountingTarget, OutputMode, TestAudioDevice,
    };
    use std::time::Instant;

    fn sink_with_target() -> (FrameSink, Arc<CountingTarget>) {
        let sink = FrameSink::new();
        let target = Arc::new(CountingTarget::new());
        sink.set_render_target(Some(target.clone()));
        (sink, target)
    }

    #[test]
    fn test_yuv420p_passthrough() {
        let (sink, target) = sink_with_target();
        sink.init_video(64, 48, Pixel::YUV420P).unwrap();
        sink.process_video_frame(&video_frame(Pixel::YUV420P, 64, 48, 0), Some(0.0))
            .unwrap();

        let frame = target.last_frame().unwrap();
        assert_eq!(frame.format, PixelFormat::YUV420P);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].data.len(), 64 * 48);
        assert_eq!(frame.planes[1].data.len(), 32 * 24);
        assert_eq!(frame.planes[2].stride, 32);
        assert_eq!(frame.pts, Some(0.0));
    }

    #[test]
    fn test_rgba_mode_and_scaling() {
        let (sink, target) = sink_with_target();
        sink.set_video_config(RenderMode::Rgba, ScaleFilter::Bicubic, Some((32, 24)));
        sink.init_video(64, 48, Pixel::YUV420P).unwrap();
        sink.process_video_frame(&video_frame(Pixel::YUV420P, 64, 48, 3), Some(0.12))
            .unwrap();

        let frame = target.last_frame().unwrap();
        assert_eq!(frame.format, PixelFormat::RGBA);
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.planes.len(), 1);
        assert_eq!(frame.planes[0].data.len(), 32 * 24 * 4);
    }

    #[test]
    fn test_high_bit_depth_becomes_p010() {
        let (sink, target) = sink_with_target();
        sink.init_video(64, 48, Pixel::YUV420P10LE).unwrap();
        sink.process_video_frame(&video_frame(Pixel::YUV420P10LE, 64, 48, 0), None)
            .unwrap();

        let frame = target.last_frame().unwrap();
        assert_eq!(frame.format, PixelFormat::P010);
        assert_eq!(frame.planes.len(), 2);
        assert_eq!(frame.planes[0].data.len(), 64 * 2 * 48);
        assert_eq!(frame.planes[1].data.len(), 32 * 4 * 24);
    }

    #[test]
    fn test_other_formats_become_rgba() {
        let (sink, target) = sink_with_target();
        sink.init_video(64, 48, Pixel::YUV444P).unwrap();
        sink.process_video_frame(&video_frame(Pixel::YUV444P, 64, 48, 0), None)
            .unwrap();
        assert_eq!(target.last_frame().unwrap().format, PixelFormat::RGBA);
    }

    #[test]
    fn test_without_target_frames_are_dropped() {
        let sink = FrameSink::new();
        sink.init_video(64, 48, Pixel::YUV420P).unwrap();
        sink.process_video_frame(&video_frame(Pixel::YUV420P, 64, 48, 5), Some(0.2))
            .unwrap();
        assert_eq!(sink.video_clock(), 0.2);
    }

    #[test]
    fn test_init_video_rejects_empty_size() {
        let sink = FrameSink::new();
        assert!(matches!(
            sink.init_video(0, 48, Pixel::YUV420P),
            Err(PlayerError::SinkInitFailed(_))
        ));
    }

    #[test]
    fn test_init_audio_without_device() {
        let sink = FrameSink::new();
        let result = sink.init_audio(
            44100,
            ChannelLayout::STEREO,
            Sample::I16(sample::Type::Packed),
            Rational::new(1, 44100),
        );
        assert!(matches!(result, Err(PlayerError::SinkInitFailed(_))));
    }

    #[test]
    fn test_audio_frame_advances_clock() {
        let device = Arc::new(TestAudioDevice::new(OutputMode::Instant));
        let sink = FrameSink::with_audio_device(device.clone());
        sink.init_audio(
            44100,
            ChannelLayout::STEREO,
            Sample::I16(sample::Type::Packed),
            Rational::new(1, 44100),
        )
        .unwrap();

        sink.process_audio_frame(audio_frame(1024, 44100)).unwrap();
        let expected = (44100.0 + 1024.0) / 44100.0;
        assert!((sink.audio_clock() - expected).abs() < 0.01);

        let output = device.last_output().unwrap();
        assert!(output.bytes_written() > 0);
        assert_eq!(output.bytes_written() % 4, 0);
    }

    #[test]
    fn test_audio_frame_without_pts_advances_by_duration() {
        let device = Arc::new(TestAudioDevice::new(OutputMode::Instant));
        let sink = FrameSink::with_audio_device(device);
        sink.init_audio(
            44100,
            ChannelLayout::STEREO,
            Sample::I16(sample::Type::Packed),
            Rational::new(1, 44100),
        )
        .unwrap();

        for _ in 0..2 {
            let mut frame = audio_frame(1024, 0);
            frame.set_pts(None);
            sink.process_audio_frame(frame).unwrap();
        }
        let expected = 2.0 * 1024.0 / 44100.0;
        assert!((sink.audio_clock() - expected).abs() < 0.01);
        assert!(sink.audio_clock() > 1024.0 / 44100.0);
    }

    #[test]
    fn test_abort_exits_audio_pacing() {
        let device = Arc::new(TestAudioDevice::new(OutputMode::Blocked));
        let sink = Arc::new(FrameSink::with_audio_device(device));
        sink.init_audio(
            44100,
            ChannelLayout::STEREO,
            Sample::I16(sample::Type::Packed),
            Rational::new(1, 44100),
        )
        .unwrap();

        let worker = {
            let sink = sink.clone();
            thread::spawn(move || sink.process_audio_frame(audio_frame(1024, 0)))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!worker.is_finished());

        let start = Instant::now();
        sink.request_abort();
        assert!(worker.join().unwrap().is_ok());
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(sink.audio_clock(), 0.0);
    }

    #[test]
    fn test_volume_and_cleanup() {
        let device = Arc::new(TestAudioDevice::new(OutputMode::Instant));
        let sink = FrameSink::with_audio_device(device.clone());
        sink.set_volume(1.5);
        assert_eq!(sink.volume(), 1.0);

        sink.init_audio(
            48000,
            ChannelLayout::MONO,
            Sample::F32(sample::Type::Planar),
            Rational::new(1, 48000),
        )
        .unwrap();
        sink.set_volume(0.3);
        assert_eq!(device.last_output().unwrap().volume(), 0.3);
        assert!(sink.has_audio_output());

        sink.cleanup();
        sink.cleanup();
        assert!(!sink.has_audio_output());
        // 清理后送入的帧被忽略
        sink.process_audio_frame(audio_frame(256, 0)).unwrap();
    }
}
