use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 视频输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// 尽量保留原始格式：8-bit YUV420P 直通，10-bit 转 P010，其余转 RGBA
    Native,
    /// 全部转换为 RGBA（纹理上传路径）
    Rgba,
}

/// 缩放 / 像素格式转换的滤波质量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    /// 最近邻 - 最快
    Point,
    FastBilinear,
    /// 默认
    Bilinear,
    Bicubic,
    /// 质量最高，开销最大
    Lanczos,
}

/// 探测限制 - 避免打开文件时长时间阻塞调用方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeLimits {
    /// 最多探测的字节数
    pub probe_size: u64,
    /// 最长分析时长（微秒）
    pub analyze_duration_us: u64,
}

impl Default for ProbeLimits {
    fn default() -> Self {
        Self {
            probe_size: 1_000_000,
            analyze_duration_us: 500_000,
        }
    }
}

/// 播放器配置（由外部传入，核心不负责持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 音量 0 - 100
    pub volume: u8,
    pub muted: bool,
    pub render_mode: RenderMode,
    pub scale_filter: ScaleFilter,
    /// 输出尺寸（None 表示保持源分辨率）
    pub output_size: Option<(u32, u32)>,
    pub video_queue_capacity: usize,
    pub audio_queue_capacity: usize,
    pub probe: ProbeLimits,
    /// 控制端刷新播放位置的间隔
    pub position_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: 80,
            muted: false,
            render_mode: RenderMode::Native,
            scale_filter: ScaleFilter::Bilinear,
            output_size: None,
            video_queue_capacity: 128,
            audio_queue_capacity: 128,
            probe: ProbeLimits::default(),
            position_interval_ms: 200,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载，缺失字段使用默认值
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: PlayerConfig = serde_json::from_str(text)?;
        config.volume = config.volume.min(100);
        Ok(config)
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 100) as u8;
    }

    /// 实际增益 0.0 - 1.0（静音时为 0）
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume as f32 / 100.0
        }
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms.max(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_volume() {
        let mut config = PlayerConfig::default();
        assert!((config.effective_volume() - 0.8).abs() < f32::EPSILON);

        config.set_volume(150);
        assert_eq!(config.volume, 100);
        config.set_volume(-5);
        assert_eq!(config.volume, 0);

        config.set_volume(50);
        config.muted = true;
        assert_eq!(config.effective_volume(), 0.0);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PlayerConfig::from_json(
            r#"{ "volume": 250, "scale_filter": "lanczos", "output_size": [640, 360] }"#,
        )
        .unwrap();
        assert_eq!(config.volume, 100);
        assert_eq!(config.scale_filter, ScaleFilter::Lanczos);
        assert_eq!(config.output_size, Some((640, 360)));
        assert_eq!(config.render_mode, RenderMode::Native);
        assert_eq!(config.probe, ProbeLimits::default());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(PlayerConfig::from_json("{ volume: ").is_err());
    }
}
