use crate::core::{
    pts_to_seconds, BufferStatus, MediaInfo, PlaybackState, PlaybackStats, PlayerConfig,
    PlayerError, ProbeLimits, Result, StreamKind,
};
use crate::player::demuxer_source::{AudioDecoder, MediaBackend, StreamDecoder, VideoDecoder};
use crate::player::demuxer_thread::{DemuxerThread, PacketRoutes};
use crate::player::frame_sink::{FrameSink, RenderTarget};
use crate::player::media_source::{MediaSource, SourceContexts};
use crate::player::packet_queue::{PacketQueue, DEFAULT_QUEUE_CAPACITY};
use crate::player::sync::{pace_video_frame, FrameDecision, PauseGate};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::frame;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 播放线程共享的状态
///
/// 状态只通过原子操作读写；线程退出引起的状态变化都用 CAS，避免覆盖控制端的决定。
pub struct PipelineShared {
    state: AtomicU8,
    pub(crate) abort: AtomicBool,
    pub(crate) gate: PauseGate,
    pub(crate) video_queue: PacketQueue<ffmpeg::Packet>,
    pub(crate) audio_queue: PacketQueue<ffmpeg::Packet>,
    active_decoders: AtomicUsize,
    /// 是否以音频时钟为主时钟（有音频解码线程时）
    audio_master: AtomicBool,
    pub(crate) stats: PlaybackStats,
}

impl PipelineShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            abort: AtomicBool::new(false),
            gate: PauseGate::new(),
            video_queue: PacketQueue::new(DEFAULT_QUEUE_CAPACITY),
            audio_queue: PacketQueue::new(DEFAULT_QUEUE_CAPACITY),
            active_decoders: AtomicUsize::new(0),
            audio_master: AtomicBool::new(false),
            stats: PlaybackStats::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 解封装结束：Loading / Playing / Paused → EndOfStream
    ///
    /// Demuxer 在暂停门上等待，正常情况下不会在暂停中读到末尾；
    /// 读取出错时仍可能从 Paused 进入，此时保留暂停标志。
    pub(crate) fn mark_end_of_stream(&self) {
        for from in [
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Loading,
        ] {
            if self.transition(from, PlaybackState::EndOfStream) {
                info!("{} 📄 {:?} -> EndOfStream", log_ctx(), from);
                // 解码线程都已提前退出时由这里收尾
                if self.active_decoders.load(Ordering::SeqCst) == 0
                    && self.transition(PlaybackState::EndOfStream, PlaybackState::Done)
                {
                    info!("{} ✅ 没有运行中的解码线程，播放完成", log_ctx());
                }
                return;
            }
        }
    }

    /// 最后一个退出的解码线程负责 EndOfStream → Done
    fn decoder_finished(&self) {
        if self.active_decoders.fetch_sub(1, Ordering::SeqCst) == 1
            && self.transition(PlaybackState::EndOfStream, PlaybackState::Done)
        {
            info!("{} ✅ 所有解码线程已结束，播放完成", log_ctx());
        }
    }

    /// 视频节奏控制用的主时钟；音频尚未输出时为 None
    fn master_clock(&self, sink: &FrameSink) -> Option<f64> {
        if !self.audio_master.load(Ordering::Acquire) {
            return None;
        }
        let clock = sink.audio_clock();
        (clock > 0.0).then_some(clock)
    }
}

/// 解码线程退出时递减计数
///
/// panic 退出时同时关闭这一路的队列，Demuxer 不会阻塞在它上面。
struct DecoderGuard<'a> {
    shared: &'a PipelineShared,
    queue: &'a PacketQueue<ffmpeg::Packet>,
}

impl Drop for DecoderGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("{} ❌ 解码线程 panic，关闭该路队列", log_ctx());
            self.queue.abort();
        }
        self.shared.decoder_finished();
    }
}

/// 取出解码器中所有可用的帧；返回 false 表示处理过程中被中止
fn drain_frames<F>(
    kind: StreamKind,
    decoder: &mut dyn StreamDecoder<F>,
    on_frame: &mut impl FnMut(F) -> bool,
) -> bool {
    loop {
        match decoder.receive_frame() {
            Ok(Some(decoded)) => {
                if !on_frame(decoded) {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!("{} ⚠️ {:?} 取帧失败: {}", log_ctx(), kind, e);
                return true;
            }
        }
    }
}

/// 通用解码循环：等待暂停门 → 取包 → 送包 → 取帧
///
/// 单个包解码失败只记录日志并跳过；正常结束时送入 EOF 取出解码器内部缓冲的帧。
fn decode_loop<F>(
    kind: StreamKind,
    decoder: &mut dyn StreamDecoder<F>,
    queue: &PacketQueue<ffmpeg::Packet>,
    shared: &PipelineShared,
    mut on_frame: impl FnMut(F) -> bool,
) {
    let _guard = DecoderGuard { shared, queue };
    info!("{} ▶️ {:?} 解码线程启动", log_ctx(), kind);

    let mut packet_count: usize = 0;
    let mut error_count: usize = 0;

    loop {
        if !shared.gate.wait_if_paused(&shared.abort) {
            break;
        }
        let Some(packet) = queue.pop() else {
            break;
        };
        packet_count += 1;

        if let Err(e) = decoder.send_packet(&packet) {
            error_count += 1;
            warn!("{} ⚠️ {:?} 解码失败，跳过该包: {}", log_ctx(), kind, e);
            continue;
        }
        if !drain_frames(kind, decoder, &mut on_frame) {
            break;
        }
    }

    if !shared.abort.load(Ordering::Acquire) {
        match decoder.send_eof() {
            Ok(()) => {
                drain_frames(kind, decoder, &mut on_frame);
            }
            Err(e) => debug!("{} {:?} 送入 EOF 失败: {}", log_ctx(), kind, e),
        }
    }

    info!(
        "{} 🛑 {:?} 解码线程退出（{} 个包，{} 个错误）",
        log_ctx(),
        kind,
        packet_count,
        error_count
    );
}

fn spawn_video_decoder(
    shared: &Arc<PipelineShared>,
    sink: &Arc<FrameSink>,
    mut decoder: Box<VideoDecoder>,
    time_base: ffmpeg::Rational,
) -> JoinHandle<Box<VideoDecoder>> {
    let shared = shared.clone();
    let sink = sink.clone();
    shared.active_decoders.fetch_add(1, Ordering::SeqCst);

    thread::spawn(move || {
        decode_loop(
            StreamKind::Video,
            &mut *decoder,
            &shared.video_queue,
            &shared,
            |video: frame::Video| {
                let pts = video
                    .pts()
                    .or_else(|| video.timestamp())
                    .map(|ts| pts_to_seconds(ts, time_base));

                let decision = match pts {
                    Some(seconds) => pace_video_frame(&shared.gate, &shared.abort, seconds, || {
                        shared.master_clock(&sink)
                    }),
                    None => FrameDecision::Deliver,
                };

                match decision {
                    FrameDecision::Abort => false,
                    FrameDecision::Drop => {
                        shared.stats.video_frames_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("{} ⏭ 丢弃落后的视频帧 pts={:?}", log_ctx(), pts);
                        true
                    }
                    FrameDecision::Deliver => {
                        match sink.process_video_frame(&video, pts) {
                            Ok(()) => {
                                shared.stats.video_frames_delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => warn!("{} ⚠️ 视频帧输出失败: {}", log_ctx(), e),
                        }
                        true
                    }
                }
            },
        );
        decoder
    })
}

fn spawn_audio_decoder(
    shared: &Arc<PipelineShared>,
    sink: &Arc<FrameSink>,
    mut decoder: Box<AudioDecoder>,
) -> JoinHandle<Box<AudioDecoder>> {
    let shared = shared.clone();
    let sink = sink.clone();
    shared.active_decoders.fetch_add(1, Ordering::SeqCst);

    thread::spawn(move || {
        decode_loop(
            StreamKind::Audio,
            &mut *decoder,
            &shared.audio_queue,
            &shared,
            |audio: frame::Audio| {
                if let Err(e) = sink.process_audio_frame(audio) {
                    warn!("{} ⚠️ 音频帧输出失败: {}", log_ctx(), e);
                }
                if shared.abort.load(Ordering::Acquire) {
                    return false;
                }
                shared.stats.audio_frames_played.fetch_add(1, Ordering::Relaxed);
                true
            },
        );
        decoder
    })
}

struct Workers {
    demuxer: DemuxerThread,
    video: Option<JoinHandle<Box<VideoDecoder>>>,
    audio: Option<JoinHandle<Box<AudioDecoder>>>,
}

/// 播放引擎 - 状态机 + 解封装 / 解码线程 + 音画同步
///
/// 所有公开方法都在控制线程上调用；工作线程只通过 `PipelineShared` 通信。
pub struct PlaybackEngine {
    shared: Arc<PipelineShared>,
    sink: Arc<FrameSink>,
    backend: Arc<dyn MediaBackend>,
    probe: ProbeLimits,
    source: Option<MediaSource>,
    workers: Option<Workers>,
}

impl PlaybackEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, sink: Arc<FrameSink>) -> Self {
        info!("{} 🎮 创建播放引擎", log_ctx());
        Self {
            shared: Arc::new(PipelineShared::new()),
            sink,
            backend,
            probe: ProbeLimits::default(),
            source: None,
            workers: None,
        }
    }

    /// 同步打开文件（会阻塞到探测结束）
    ///
    /// 先关闭当前媒体；打开失败时引擎处于未打开状态。
    pub fn open(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.close();
        let mut source = MediaSource::new(self.backend.clone(), self.probe);
        source.set_file_path(path);
        source.open()?;
        self.attach_source(source)
    }

    /// 使用已经打开的媒体源（通常在子线程中打开）
    pub fn attach_source(&mut self, source: MediaSource) -> Result<()> {
        if !source.is_open() {
            return Err(PlayerError::NotOpen);
        }
        self.stop();
        info!("{} 📎 附加媒体源: {:?}", log_ctx(), source.file_path());
        if let Some(mut previous) = self.source.replace(source) {
            previous.close();
        }
        Ok(())
    }

    /// 停止播放并释放媒体源
    pub fn close(&mut self) {
        self.stop();
        if let Some(mut source) = self.source.take() {
            source.close();
            info!("{} 媒体源已关闭", log_ctx());
        }
    }

    /// 播放
    ///
    /// - Stopped：从头开始
    /// - Paused：等同于 resume()
    /// - EndOfStream / Done：需要先 stop()
    pub fn play(&mut self) -> Result<()> {
        match self.status() {
            PlaybackState::Playing | PlaybackState::Loading => Ok(()),
            PlaybackState::Paused => {
                self.resume();
                Ok(())
            }
            state @ (PlaybackState::EndOfStream | PlaybackState::Done) => {
                Err(PlayerError::InvalidState(state))
            }
            PlaybackState::Stopped => self.start_playback(),
        }
    }

    fn start_playback(&mut self) -> Result<()> {
        let source = match self.source.as_mut() {
            Some(source) if source.is_open() => source,
            _ => return Err(PlayerError::NotOpen),
        };

        info!("{} 🎬 开始播放", log_ctx());
        self.shared.set_state(PlaybackState::Loading);

        if let Err(e) = source.rewind() {
            warn!("{} ⚠️ 回到开头失败: {}", log_ctx(), e);
        }
        self.shared.abort.store(false, Ordering::Release);
        self.shared.gate.release();
        for queue in [&self.shared.video_queue, &self.shared.audio_queue] {
            queue.flush();
            queue.restart();
        }
        self.shared.stats.reset();

        let selection = source.selection().clone();
        let mut contexts = source.take_contexts();
        let mut unused = SourceContexts::default();

        let video = match (contexts.video_decoder.take(), selection.video) {
            (Some(decoder), Some(params)) => {
                match self
                    .sink
                    .init_video(params.width, params.height, params.pixel_format)
                {
                    Ok(()) => Some((decoder, params)),
                    Err(e) => {
                        warn!("{} ⚠️ 视频输出初始化失败，跳过视频: {}", log_ctx(), e);
                        unused.video_decoder = Some(decoder);
                        None
                    }
                }
            }
            (decoder, _) => {
                unused.video_decoder = decoder;
                None
            }
        };

        let audio = match (contexts.audio_decoder.take(), selection.audio) {
            (Some(decoder), Some(params)) => match self.sink.init_audio(
                params.sample_rate,
                params.channel_layout,
                params.sample_format,
                params.time_base,
            ) {
                Ok(()) => Some((decoder, params)),
                Err(e) => {
                    warn!("{} ⚠️ 音频输出初始化失败，跳过音频: {}", log_ctx(), e);
                    unused.audio_decoder = Some(decoder);
                    None
                }
            },
            (decoder, _) => {
                unused.audio_decoder = decoder;
                None
            }
        };

        let demuxer = match contexts.demuxer.take() {
            Some(demuxer) if video.is_some() || audio.is_some() => demuxer,
            demuxer => {
                unused.demuxer = demuxer;
                if let Some((decoder, _)) = video {
                    unused.video_decoder = Some(decoder);
                }
                if let Some((decoder, _)) = audio {
                    unused.audio_decoder = Some(decoder);
                }
                source.restore_contexts(unused);
                self.sink.cleanup();
                self.shared.set_state(PlaybackState::Stopped);
                error!("{} ❌ 没有可用的音视频输出", log_ctx());
                return Err(PlayerError::SinkInitFailed("没有可用的音视频输出".to_string()));
            }
        };
        source.restore_contexts(unused);

        self.shared
            .audio_master
            .store(audio.is_some(), Ordering::Release);

        let routes = PacketRoutes {
            video: video.as_ref().map(|(_, params)| params.stream_index),
            audio: audio.as_ref().map(|(_, params)| params.stream_index),
        };

        let video_handle = video.map(|(decoder, params)| {
            spawn_video_decoder(&self.shared, &self.sink, decoder, params.time_base)
        });
        let audio_handle =
            audio.map(|(decoder, _)| spawn_audio_decoder(&self.shared, &self.sink, decoder));
        let demuxer_thread = DemuxerThread::start(demuxer, routes, self.shared.clone());

        self.workers = Some(Workers {
            demuxer: demuxer_thread,
            video: video_handle,
            audio: audio_handle,
        });

        if self
            .shared
            .transition(PlaybackState::Loading, PlaybackState::Playing)
        {
            info!("{} ▶️ 播放中 (视频: {}, 音频: {})", log_ctx(), routes.video.is_some(), routes.audio.is_some());
        } else {
            debug!("{} 启动期间已到达末尾: {:?}", log_ctx(), self.status());
        }
        Ok(())
    }

    /// 暂停（Stopped / Loading / Done 时无效果）
    pub fn pause(&mut self) {
        match self.status() {
            PlaybackState::Playing => {
                self.shared.gate.set_paused(true);
                if self
                    .shared
                    .transition(PlaybackState::Playing, PlaybackState::Paused)
                {
                    info!("{} ⏸ 暂停", log_ctx());
                }
            }
            PlaybackState::EndOfStream => {
                // 解码线程仍在排空队列，暂停它们
                self.shared.gate.set_paused(true);
                info!("{} ⏸ 暂停（已读到末尾）", log_ctx());
            }
            _ => {}
        }
    }

    /// 恢复（Stopped / Loading / Playing / Done 时无效果）
    pub fn resume(&mut self) {
        match self.status() {
            PlaybackState::Paused | PlaybackState::EndOfStream => {
                self.shared
                    .transition(PlaybackState::Paused, PlaybackState::Playing);
                self.shared.gate.set_paused(false);
                info!("{} ▶️ 恢复播放", log_ctx());
            }
            _ => {}
        }
    }

    /// 停止播放：中止 → 唤醒 → 中止队列 → 中止输出 → join → 清空 → 清理
    ///
    /// 可重复调用。
    pub fn stop(&mut self) {
        let Some(mut workers) = self.workers.take() else {
            self.shared.set_state(PlaybackState::Stopped);
            return;
        };

        info!("{} ⏹️  停止播放", log_ctx());
        self.shared.abort.store(true, Ordering::Release);
        self.shared.gate.release();
        self.shared.video_queue.abort();
        self.shared.audio_queue.abort();
        self.sink.request_abort();

        let mut contexts = SourceContexts {
            demuxer: workers.demuxer.join(),
            ..Default::default()
        };
        if let Some(handle) = workers.video.take() {
            match handle.join() {
                Ok(decoder) => contexts.video_decoder = Some(decoder),
                Err(_) => error!("{} ❌ 视频解码线程 panic", log_ctx()),
            }
        }
        if let Some(handle) = workers.audio.take() {
            match handle.join() {
                Ok(decoder) => contexts.audio_decoder = Some(decoder),
                Err(_) => error!("{} ❌ 音频解码线程 panic", log_ctx()),
            }
        }
        if let Some(source) = self.source.as_mut() {
            source.restore_contexts(contexts);
        }

        self.shared.video_queue.flush();
        self.shared.audio_queue.flush();
        self.sink.cleanup();
        self.shared.active_decoders.store(0, Ordering::Release);
        self.shared.set_state(PlaybackState::Stopped);

        info!("{} ✅ 停止播放完成，所有线程已清理", log_ctx());
    }

    pub fn status(&self) -> PlaybackState {
        self.shared.state()
    }

    /// 当前播放位置（秒）：有音频时取音频时钟，否则取最后送显的视频时间戳
    pub fn position(&self) -> f64 {
        if self.shared.audio_master.load(Ordering::Acquire) {
            self.sink.audio_clock()
        } else {
            self.sink.video_clock()
        }
    }

    pub fn is_open(&self) -> bool {
        self.source.as_ref().map(|s| s.is_open()).unwrap_or(false)
    }

    pub fn media_info(&self) -> MediaInfo {
        self.source
            .as_ref()
            .map(|s| s.media_info())
            .unwrap_or_default()
    }

    pub fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    pub fn frame_sink(&self) -> &Arc<FrameSink> {
        &self.sink
    }

    pub fn buffer_status(&self) -> BufferStatus {
        BufferStatus {
            video_packets: self.shared.video_queue.len(),
            audio_packets: self.shared.audio_queue.len(),
            stats: self.shared.stats.snapshot(),
        }
    }

    pub fn set_render_target(&self, target: Option<Arc<dyn RenderTarget>>) {
        self.sink.set_render_target(target);
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    /// 应用配置：队列容量和音量立即生效，视频输出配置下次播放生效
    pub fn apply_config(&mut self, config: &PlayerConfig) {
        self.shared
            .video_queue
            .set_capacity(config.video_queue_capacity);
        self.shared
            .audio_queue
            .set_capacity(config.audio_queue_capacity);
        self.sink.set_volume(config.effective_volume());
        self.sink
            .set_video_config(config.render_mode, config.scale_filter, config.output_size);
        self.probe = config.probe;
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
