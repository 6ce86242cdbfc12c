use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// 默认容量（包数）
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    aborted: bool,
    end_of_stream: bool,
}

/// 线程安全的有界阻塞包队列
///
/// 解封装线程是唯一生产者，对应的解码线程是唯一消费者。
/// - `push` 存入的是克隆，调用方保留自己的包
/// - `abort()` 立即唤醒所有等待者，之后 push/pop 直接失败
/// - `signal_end_of_stream()` 与 abort 不同：已入队的包仍会交付，排空后 pop 才返回 None
pub struct PacketQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_full: Condvar,  // 生产者在队列满时等待
    not_empty: Condvar, // 消费者在队列空时等待
}

impl<T: Clone> PacketQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                aborted: false,
                end_of_stream: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// 入队（队列满时阻塞）
    ///
    /// 返回 false 表示队列已中止，包没有入队。
    pub fn push(&self, item: &T) -> bool {
        let mut inner = self.inner.lock();
        while !inner.aborted && inner.items.len() >= inner.capacity {
            self.not_full.wait(&mut inner);
        }
        if inner.aborted {
            return false;
        }

        inner.items.push_back(item.clone());
        self.not_empty.notify_one();
        true
    }

    /// 出队（队列空时阻塞）
    ///
    /// 返回 None：已中止，或已收到流结束信号且队列已排空。
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while !inner.aborted && !inner.end_of_stream && inner.items.is_empty() {
            self.not_empty.wait(&mut inner);
        }
        if inner.aborted {
            return None;
        }

        let item = inner.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// 丢弃所有缓冲的包（释放其内存）
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        self.not_full.notify_all();
    }

    /// 唤醒所有阻塞线程，让它们退出
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// 不会再有新包：消费者排空后退出
    pub fn signal_end_of_stream(&self) {
        let mut inner = self.inner.lock();
        inner.end_of_stream = true;
        self.not_empty.notify_all();
    }

    /// 清除中止 / 流结束标志，队列可用于下一次播放
    pub fn restart(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = false;
        inner.end_of_stream = false;
    }

    /// 修改最大容量，立即生效
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity.max(1);
        // 容量变大时唤醒被阻塞的生产者
        self.not_full.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }
}

impl<T: Clone> Default for PacketQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
