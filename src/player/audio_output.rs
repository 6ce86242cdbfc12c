use crate::core::{OutputFormat, PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::ArrayQueue;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 已打开的 PCM 输出（S16 交错）
///
/// `write` 从不阻塞：写不下的部分由调用方稍后重试。
pub trait AudioOutput: Send + Sync {
    /// 设备实际使用的格式（可能与请求的不同）
    fn format(&self) -> OutputFormat;

    /// 当前还能写入的字节数
    fn bytes_free(&self) -> usize;

    /// 写入 PCM 数据，返回实际接受的字节数
    fn write(&self, data: &[u8]) -> usize;

    /// 设置音量 (0.0 - 1.0)
    fn set_volume(&self, volume: f32);
}

/// 音频设备 - 按请求的格式打开输出
pub trait AudioDevice: Send + Sync {
    fn open(&self, requested: OutputFormat) -> Result<Arc<dyn AudioOutput>>;
}

/// 输出缓冲时长（毫秒）
const RING_DURATION_MS: usize = 200;

/// 有界无锁采样环 - 解码线程写入，cpal 回调读取
pub struct SampleRing {
    samples: ArrayQueue<i16>,
}

impl SampleRing {
    pub fn for_format(format: OutputFormat) -> Self {
        let capacity =
            format.sample_rate as usize * format.channels as usize * RING_DURATION_MS / 1000;
        Self {
            samples: ArrayQueue::new(capacity.max(format.channels as usize)),
        }
    }

    pub fn bytes_free(&self) -> usize {
        (self.samples.capacity() - self.samples.len()) * 2
    }

    /// 按小端 i16 写入，只接受完整采样
    pub fn write_bytes(&self, data: &[u8]) -> usize {
        let mut accepted = 0;
        for pair in data.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            if self.samples.push(sample).is_err() {
                break;
            }
            accepted += 2;
        }
        accepted
    }

    /// 填充设备缓冲区，数据不足时补静音
    pub fn fill(&self, out: &mut [f32], volume: f32) {
        for sample in out.iter_mut() {
            *sample = match self.samples.pop() {
                Some(value) => value as f32 / 32768.0 * volume,
                None => 0.0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// cpal::Stream 在部分平台上不是 Send/Sync，
/// 这里只在创建时 play() 一次，之后仅在 drop 时访问，不会并发使用
struct StreamHandle(#[allow(dead_code)] Stream);

unsafe impl Send for StreamHandle {}
unsafe impl Sync for StreamHandle {}

/// 默认系统音频设备（cpal）
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalAudioDevice;

impl AudioDevice for CpalAudioDevice {
    fn open(&self, requested: OutputFormat) -> Result<Arc<dyn AudioOutput>> {
        Ok(Arc::new(CpalOutput::new(requested)?))
    }
}

/// 音频输出 - 使用 cpal 播放音频
pub struct CpalOutput {
    format: OutputFormat,
    ring: Arc<SampleRing>,
    volume: Arc<AtomicU32>,
    _stream: StreamHandle,
}

impl CpalOutput {
    /// 创建并启动音频输出（支持非标准配置自动回退）
    pub fn new(requested: OutputFormat) -> Result<Self> {
        info!(
            "初始化音频输出: {} Hz, {} 声道",
            requested.sample_rate, requested.channels
        );

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let config = Self::select_config(&device, requested)?;
        let format = OutputFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let ring = Arc::new(SampleRing::for_format(format));
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));

        let callback_ring = ring.clone();
        let callback_volume = volume.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = f32::from_bits(callback_volume.load(Ordering::Relaxed));
                    callback_ring.fill(data, vol);
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        info!("音频输出已启动: {} Hz, {} 声道", format.sample_rate, format.channels);

        Ok(Self {
            format,
            ring,
            volume,
            _stream: StreamHandle(stream),
        })
    }

    /// 选择设备支持的配置：优先使用请求的格式，否则依次尝试标准配置
    fn select_config(device: &Device, requested: OutputFormat) -> Result<StreamConfig> {
        let make_config = |rate: u32, channels: u16| StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let config = make_config(requested.sample_rate, requested.channels);
        if supported.iter().any(|s| Self::is_config_compatible(&config, s)) {
            return Ok(config);
        }

        warn!(
            "⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置",
            requested.sample_rate, requested.channels
        );

        let fallback_configs = [
            (48000, 2), // 最常见
            (44100, 2), // CD 音质
            (48000, 1),
            (44100, 1),
            (22050, 1),
            (22050, 2),
        ];

        for (fb_rate, fb_channels) in fallback_configs {
            let fb_config = make_config(fb_rate, fb_channels);
            if supported.iter().any(|s| Self::is_config_compatible(&fb_config, s)) {
                info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                return Ok(fb_config);
            }
        }

        Err(PlayerError::AudioError(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            requested.sample_rate, requested.channels
        )))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        rate_in_range && channels_match
    }
}

impl AudioOutput for CpalOutput {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn bytes_free(&self) -> usize {
        self.ring.bytes_free()
    }

    fn write(&self, data: &[u8]) -> usize {
        self.ring.write_bytes(data)
    }

    fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        debug!("音频输出已停止（剩余 {} 个采样）", self.ring.len());
    }
}
