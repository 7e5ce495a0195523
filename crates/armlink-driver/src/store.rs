//! 状态存储
//!
//! 持有 `current`（硬件确认的状态）与 `target`（操作员意图）两个快照。
//!
//! - `target` 只由操作员侧 API（`set_target`）写入
//! - `current` 只由同步引擎在成功解码响应后写入
//!
//! 读取使用 `ArcSwap`，无锁且不会读到半更新的状态。
//! 变化通知不会在写入时同步发出，而是由同步引擎每个 tick 调用一次
//! `publish_changes()` 统一发出，因此观察者回调永远不会在引擎的临界区内执行。

use arc_swap::ArcSwap;
use armlink_protocol::{Delta, FieldMask, RobotState, StatePatch};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// 目标状态以及操作员设置过的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetSnapshot {
    pub state: RobotState,
    /// 操作员显式设置过的字段；未设置的字段不参与下发
    pub touched: FieldMask,
}

#[derive(Default)]
struct Subscribers {
    current: Vec<Sender<RobotState>>,
    target: Vec<Sender<RobotState>>,
}

/// 状态存储
pub struct StateStore {
    current: ArcSwap<RobotState>,
    target: ArcSwap<TargetSnapshot>,
    current_dirty: AtomicBool,
    target_dirty: AtomicBool,
    subscribers: Mutex<Subscribers>,
    disposed: AtomicBool,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RobotState::default()),
            target: ArcSwap::from_pointee(TargetSnapshot::default()),
            current_dirty: AtomicBool::new(false),
            target_dirty: AtomicBool::new(false),
            subscribers: Mutex::new(Subscribers::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// 合并部分更新到 `target`，数值钳制到值域内
    ///
    /// 返回合并后的目标快照。
    pub fn set_target(&self, patch: &StatePatch) -> RobotState {
        let touched = FieldMask::from_patch(patch);
        let previous = self.target.rcu(|old| TargetSnapshot {
            state: patch.merge_into(old.state),
            touched: old.touched.union(touched),
        });
        let next = patch.merge_into(previous.state);
        if next != previous.state {
            self.target_dirty.store(true, Ordering::Release);
        }
        next
    }

    /// 硬件最后确认的状态
    pub fn current(&self) -> RobotState {
        **self.current.load()
    }

    /// 操作员的目标状态
    pub fn target(&self) -> RobotState {
        self.target.load().state
    }

    pub fn target_snapshot(&self) -> TargetSnapshot {
        **self.target.load()
    }

    /// 所有被操作员设置过的字段是否都已到达目标
    pub fn is_converged(&self) -> bool {
        let target = self.target_snapshot();
        Delta::between(&self.current(), &target.state)
            .restricted_to(target.touched)
            .is_empty()
    }

    /// 写入新的 `current`（仅同步引擎调用）
    pub(crate) fn commit_current(&self, state: RobotState) {
        let previous = self.current.swap(Arc::new(state));
        if *previous != state {
            self.current_dirty.store(true, Ordering::Release);
        }
    }

    /// 用硬件状态填充 `target` 中操作员尚未设置的字段
    ///
    /// 连接后首次读取硬件状态时调用，使 `target` 的默认值反映真实位置。
    pub(crate) fn adopt_untouched(&self, reported: &RobotState) {
        let previous = self.target.rcu(|old| TargetSnapshot {
            state: Self::fill_untouched(old, reported),
            touched: old.touched,
        });
        if Self::fill_untouched(&previous, reported) != previous.state {
            self.target_dirty.store(true, Ordering::Release);
        }
    }

    fn fill_untouched(target: &TargetSnapshot, reported: &RobotState) -> RobotState {
        let keep = Delta::between(reported, &target.state).restricted_to(target.touched);
        reported.apply(&keep)
    }

    /// 发出自上次调用以来的变化通知（每个快照最多一次）
    ///
    /// 已断开的订阅者会被移除。
    pub fn publish_changes(&self) {
        let current_changed = self.current_dirty.swap(false, Ordering::AcqRel);
        let target_changed = self.target_dirty.swap(false, Ordering::AcqRel);
        if !current_changed && !target_changed {
            return;
        }
        if self.is_disposed() {
            return;
        }

        let mut subscribers = self.subscribers.lock();
        if current_changed {
            let snapshot = self.current();
            subscribers.current.retain(|tx| tx.send(snapshot).is_ok());
        }
        if target_changed {
            let snapshot = self.target();
            subscribers.target.retain(|tx| tx.send(snapshot).is_ok());
        }
    }

    /// 订阅 `current` 的变化
    pub fn observe_current(&self) -> Receiver<RobotState> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if !self.is_disposed() {
            self.subscribers.lock().current.push(tx);
        }
        rx
    }

    /// 订阅 `target` 的变化
    pub fn observe_target(&self) -> Receiver<RobotState> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if !self.is_disposed() {
            self.subscribers.lock().target.push(tx);
        }
        rx
    }

    /// 结束存储生命周期：关闭所有订阅通道
    ///
    /// 之后的快照读取仍然有效，但不再发出任何通知。
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.current.clear();
        subscribers.target.clear();
        debug!("State store disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
