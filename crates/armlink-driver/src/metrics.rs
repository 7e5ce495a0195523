//! 链路指标
//!
//! 原子计数器，可以在任何线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路实时指标
///
/// # 使用示例
///
/// ```rust
/// use armlink_driver::LinkMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = LinkMetrics::new();
/// metrics.frames_sent.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.frames_sent, 1);
/// ```
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 写出的帧数（含重传和查询帧）
    pub frames_sent: AtomicU64,
    /// 读到的完整帧数（解码前）
    pub frames_received: AtomicU64,
    /// 成功确认的命令帧数
    pub commands_dispatched: AtomicU64,
    /// 成功完成的状态查询数
    pub state_reads: AtomicU64,
    /// 解码失败次数
    pub decode_errors: AtomicU64,
    /// 响应超时次数
    pub timeouts: AtomicU64,
    /// 重传次数
    pub retries: AtomicU64,
    /// 链路丢失次数（重试耗尽）
    pub link_lost: AtomicU64,
    /// 底层 I/O 故障次数
    pub transport_errors: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            commands_dispatched: self.commands_dispatched.load(Ordering::Relaxed),
            state_reads: self.state_reads.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            link_lost: self.link_lost.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
        self.commands_dispatched.store(0, Ordering::Relaxed);
        self.state_reads.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.link_lost.store(0, Ordering::Relaxed);
        self.transport_errors.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub commands_dispatched: u64,
    pub state_reads: u64,
    pub decode_errors: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub link_lost: u64,
    pub transport_errors: u64,
}

impl MetricsSnapshot {
    /// 失败交换占全部交换尝试的百分比
    pub fn failure_rate(&self) -> f64 {
        let failures = self.timeouts + self.decode_errors;
        let total = failures + self.commands_dispatched + self.state_reads;
        if total == 0 {
            return 0.0;
        }
        failures as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = LinkMetrics::new();
        LinkMetrics::incr(&metrics.frames_sent);
        LinkMetrics::incr(&metrics.frames_sent);
        LinkMetrics::incr(&metrics.timeouts);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_sent, 2);
        assert_eq!(snapshot.timeouts, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_failure_rate() {
        assert_eq!(MetricsSnapshot::default().failure_rate(), 0.0);

        let snapshot = MetricsSnapshot {
            commands_dispatched: 2,
            state_reads: 1,
            timeouts: 1,
            ..Default::default()
        };
        assert!((snapshot.failure_rate() - 25.0).abs() < f64::EPSILON);
    }
}
