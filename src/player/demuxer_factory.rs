use crate::core::{OpenError, ProbeLimits};
use crate::player::demuxer_source::MediaBackend;
use crate::player::media_source::MediaSource;
use crossbeam_channel::Sender;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// 媒体源打开结果
pub enum OpenOutcome {
    /// 打开成功
    Opened(MediaSource),
    /// 打开失败
    Failed { path: PathBuf, error: OpenError },
}

/// 媒体源工厂 - 负责在子线程中打开媒体源
///
/// 使用方法：
/// ```ignore
/// let (tx, rx) = crossbeam_channel::unbounded();
/// SourceFactory::open_async(backend, path, ProbeLimits::default(), tx);
///
/// // 在控制线程的定时器中接收结果
/// if let Ok(outcome) = rx.try_recv() {
///     match outcome {
///         OpenOutcome::Opened(source) => engine.attach_source(source)?,
///         OpenOutcome::Failed { error, .. } => error!("打开失败: {}", error),
///     }
/// }
/// ```
pub struct SourceFactory;

impl SourceFactory {
    /// 异步打开媒体源（在子线程中）
    ///
    /// 参数：
    /// - backend: 媒体后端
    /// - path: 文件路径
    /// - probe: 探测限制
    /// - result_tx: 结果发送通道
    pub fn open_async(
        backend: Arc<dyn MediaBackend>,
        path: PathBuf,
        probe: ProbeLimits,
        result_tx: Sender<OpenOutcome>,
    ) {
        thread::spawn(move || {
            info!("🔨 开始在子线程中打开媒体源: {}", path.display());

            let mut source = MediaSource::new(backend, probe);
            source.set_file_path(path.clone());

            let outcome = match source.open() {
                Ok(()) => OpenOutcome::Opened(source),
                Err(error) => OpenOutcome::Failed { path, error },
            };

            // 接收端已经放弃（例如又打开了别的文件）时结果直接丢弃
            if result_tx.send(outcome).is_err() {
                error!("❌ 发送打开结果失败，接收端已关闭");
            } else {
                info!("✅ 媒体源打开结果已发送");
            }
        });
    }
}
