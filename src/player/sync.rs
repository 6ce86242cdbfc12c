use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 视频超前超过该值时等待
pub const SYNC_AHEAD_THRESHOLD: f64 = 0.005;
/// 视频落后超过该值时丢帧
pub const SYNC_DROP_THRESHOLD: f64 = -0.050;
/// 单次等待上限
pub const MAX_SYNC_SLEEP: Duration = Duration::from_secs(5);

/// 暂停门 - 一个互斥量 + 一个条件变量，承载两个不同的等待条件：
/// - 暂停等待：`!paused || abort`
/// - 同步睡眠：`到期 || abort || paused`
///
/// 修改 paused 或 abort 之后都必须 notify，等待方才能及时醒来。
#[derive(Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    cond: Condvar,
}

/// 可中断睡眠的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Aborted,
    Paused,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    pub fn set_paused(&self, paused: bool) {
        let mut guard = self.paused.lock();
        *guard = paused;
        self.cond.notify_all();
    }

    /// 清除暂停并唤醒所有等待者（stop / abort 时使用）
    pub fn release(&self) {
        self.set_paused(false);
    }

    /// 暂停时阻塞；返回 false 表示已中止
    pub fn wait_if_paused(&self, abort: &AtomicBool) -> bool {
        let mut paused = self.paused.lock();
        while *paused && !abort.load(Ordering::Acquire) {
            self.cond.wait(&mut paused);
        }
        !abort.load(Ordering::Acquire)
    }

    /// 最多睡眠 `duration`，中止或暂停时提前返回
    pub fn sleep_for(&self, duration: Duration, abort: &AtomicBool) -> SleepOutcome {
        let deadline = Instant::now() + duration;
        let mut paused = self.paused.lock();
        loop {
            if abort.load(Ordering::Acquire) {
                return SleepOutcome::Aborted;
            }
            if *paused {
                return SleepOutcome::Paused;
            }
            if self.cond.wait_until(&mut paused, deadline).timed_out() {
                return if abort.load(Ordering::Acquire) {
                    SleepOutcome::Aborted
                } else {
                    SleepOutcome::Elapsed
                };
            }
        }
    }
}

/// 单帧同步决策
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    /// 立即显示
    Deliver,
    /// 视频超前，等待后显示
    Wait(Duration),
    /// 视频落后太多，丢弃
    Drop,
}

/// 以音频时钟为主时钟，决定视频帧的处理方式
pub fn sync_action(video_pts: f64, audio_clock: f64) -> SyncAction {
    let diff = video_pts - audio_clock;
    if diff > SYNC_AHEAD_THRESHOLD {
        let delay = Duration::from_secs_f64(diff).min(MAX_SYNC_SLEEP);
        SyncAction::Wait(delay)
    } else if diff < SYNC_DROP_THRESHOLD {
        SyncAction::Drop
    } else {
        SyncAction::Deliver
    }
}

/// 视频帧最终去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    Deliver,
    Drop,
    Abort,
}

/// 按主时钟对一帧视频做节奏控制
///
/// `master_clock` 返回 None 表示没有可用的主时钟（无音频或音频尚未开始），此时直接显示。
/// 等待过程中被暂停时，先阻塞在暂停门上，恢复后用新的时钟重新判断同一帧。
pub fn pace_video_frame<C>(
    gate: &PauseGate,
    abort: &AtomicBool,
    video_pts: f64,
    master_clock: C,
) -> FrameDecision
where
    C: Fn() -> Option<f64>,
{
    loop {
        if abort.load(Ordering::Acquire) {
            return FrameDecision::Abort;
        }
        let Some(clock) = master_clock() else {
            return FrameDecision::Deliver;
        };

        match sync_action(video_pts, clock) {
            SyncAction::Deliver => return FrameDecision::Deliver,
            SyncAction::Drop => return FrameDecision::Drop,
            SyncAction::Wait(delay) => match gate.sleep_for(delay, abort) {
                SleepOutcome::Elapsed => return FrameDecision::Deliver,
                SleepOutcome::Aborted => return FrameDecision::Abort,
                SleepOutcome::Paused => {
                    if !gate.wait_if_paused(abort) {
                        return FrameDecision::Abort;
                    }
                }
            },
        }
    }
}
