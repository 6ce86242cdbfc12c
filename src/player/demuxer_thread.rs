use crate::core::StreamKind;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::engine::PipelineShared;
use log::{debug, error, info, warn};
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 包路由：只有已经启动解码线程的流才会入队
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketRoutes {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

impl PacketRoutes {
    pub fn route(&self, stream_index: usize) -> Option<StreamKind> {
        if self.video == Some(stream_index) {
            Some(StreamKind::Video)
        } else if self.audio == Some(stream_index) {
            Some(StreamKind::Audio)
        } else {
            None
        }
    }

    /// 停止向某一路送包（该路解码线程已经退出）
    pub fn disable(&mut self, kind: StreamKind) {
        match kind {
            StreamKind::Video => self.video = None,
            StreamKind::Audio => self.audio = None,
        }
    }
}

/// Demuxer 线程管理器
///
/// 线程持有解封装器直到退出，`join()` 时把它交还给调用方。
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<Box<dyn DemuxerSource>>>,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程
    pub fn start(
        mut demuxer: Box<dyn DemuxerSource>,
        routes: PacketRoutes,
        shared: Arc<PipelineShared>,
    ) -> Self {
        let thread_handle = thread::spawn(move || {
            Self::demux_loop(&mut *demuxer, routes, &shared);
            demuxer
        });

        Self {
            thread_handle: Some(thread_handle),
        }
    }

    /// Demuxer 循环（在独立线程中运行）
    ///
    /// - push 在队列满时阻塞，形成背压；整体中止时线程随即退出，单路队列被关闭时只停掉这一路
    /// - 每次读包前先经过暂停门
    /// - 读到末尾或读取出错时进入 EndOfStream
    /// - 无论以何种方式退出，都会通知两个队列“不会再有新包”
    fn demux_loop(demuxer: &mut dyn DemuxerSource, mut routes: PacketRoutes, shared: &PipelineShared) {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), demuxer.description());

        let mut video_packet_count: usize = 0;
        let mut audio_packet_count: usize = 0;
        let mut skipped_count: usize = 0;

        // 仅用于日志
        const LOG_FIRST_N: usize = 5;

        loop {
            // 暂停期间不读包，避免在暂停中读到末尾
            if !shared.gate.wait_if_paused(&shared.abort) {
                break;
            }
            match demuxer.read_packet() {
                Ok(Some(media_packet)) => {
                    shared.stats.packets_demuxed.fetch_add(1, Ordering::Relaxed);

                    let kind = routes.route(media_packet.stream_index);
                    let queue = match kind {
                        Some(StreamKind::Video) => {
                            video_packet_count += 1;
                            if video_packet_count <= LOG_FIRST_N || video_packet_count % 500 == 0 {
                                debug!("{} 📦 视频包 #{}", log_ctx(), video_packet_count);
                            }
                            &shared.video_queue
                        }
                        Some(StreamKind::Audio) => {
                            audio_packet_count += 1;
                            if audio_packet_count <= LOG_FIRST_N || audio_packet_count % 500 == 0 {
                                debug!("{} 🔊 音频包 #{}", log_ctx(), audio_packet_count);
                            }
                            &shared.audio_queue
                        }
                        None => {
                            // 没有解码线程的流（字幕 / 数据 / 初始化失败的流）
                            skipped_count += 1;
                            continue;
                        }
                    };

                    if !queue.push(&media_packet.packet) {
                        if shared.abort.load(Ordering::Acquire) {
                            debug!("{} 队列已中止，停止读取", log_ctx());
                            break;
                        }
                        // 只有这一路的解码线程异常退出，其余流继续
                        if let Some(kind) = kind {
                            warn!("{} ⚠️ {:?} 队列已关闭，之后的包将被丢弃", log_ctx(), kind);
                            routes.disable(kind);
                        }
                    }
                }
                Ok(None) => {
                    info!("{} 📄 Demuxer 到达文件末尾", log_ctx());
                    shared.mark_end_of_stream();
                    break;
                }
                Err(e) => {
                    error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                    shared.mark_end_of_stream();
                    break;
                }
            }
        }

        shared.video_queue.signal_end_of_stream();
        shared.audio_queue.signal_end_of_stream();

        info!(
            "{} 🛑 Demuxer 线程退出（视频 {} 个包，音频 {} 个包，丢弃 {} 个包）",
            log_ctx(),
            video_packet_count,
            audio_packet_count,
            skipped_count
        );
    }

    /// 等待线程结束并取回解封装器
    pub fn join(&mut self) -> Option<Box<dyn DemuxerSource>> {
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(demuxer) => Some(demuxer),
            Err(_) => {
                error!("{} ❌ Demuxer 线程 panic", log_ctx());
                None
            }
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            // 调用方负责先中止队列，否则这里会一直等待
            debug!("{} DemuxerThread 被 drop，等待线程退出", log_ctx());
            let _ = self.join();
        }
    }
}
