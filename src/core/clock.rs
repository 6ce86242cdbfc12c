use std::sync::atomic::{AtomicU64, Ordering};

/// 媒体时钟（秒）- 音视频同步的主时钟
///
/// 以 f64 的位模式存放在 AtomicU64 中，读写都不加锁。
/// 正常播放时单调不减，但并不强制；重新开始播放前必须 `reset()`。
#[derive(Debug, Default)]
pub struct MediaClock {
    bits: AtomicU64,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// 当前时间（秒）
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    /// 在当前值基础上前进 `delta` 秒，返回新值
    ///
    /// 只有单个写线程（音频解码线程），所以不需要 CAS 循环。
    pub fn advance(&self, delta: f64) -> f64 {
        let next = self.get() + delta;
        self.set(next);
        next
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}
