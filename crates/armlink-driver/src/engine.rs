//! 同步引擎
//!
//! 周期性地把 `target` 与 `current` 的差量下发到硬件，并用硬件报告刷新 `current`。
//!
//! # 状态机
//!
//! ```text
//! Idle ──(连接 Open)──→ Polling ──(发送命令帧)──→ AwaitingAck
//!   ↑                     ↑                          │
//!   │                     └──────(收到确认)───────────┘
//!   └──(disconnect)── 任意状态 ──(I/O 故障 / 重试耗尽)──→ Faulted
//! ```
//!
//! # 每个 tick
//!
//! 1. 连接刚建立（新会话）时，先读取一次硬件状态，作为 `current` 的基准
//! 2. 计算 `diff(target, current)`，只保留操作员设置过的字段
//! 3. 差量为空：发送状态查询帧，刷新数字输入等硬件字段
//! 4. 差量非空：编码为一条命令帧并发送（两次 tick 之间的多次修改自然合并为一条）
//! 5. 超时或解码失败：指数退避后重发同一帧；连续失败达到 `max_retries` 判定链路丢失
//!
//! 任意时刻最多只有一条命令在途。

use crate::backoff::Backoff;
use crate::config::LinkConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{DriverError, LinkFault};
use crate::metrics::LinkMetrics;
use crate::store::StateStore;
use armlink_protocol::{Delta, FrameCodec, RobotState};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 同步引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EngineState {
    /// 无连接
    #[default]
    Idle = 0,
    /// 连接正常，稳态轮询
    Polling = 1,
    /// 命令帧已发出，等待响应
    AwaitingAck = 2,
    /// 传输故障或链路丢失，等待显式重连
    Faulted = 3,
}

impl EngineState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Polling,
            2 => Self::AwaitingAck,
            3 => Self::Faulted,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 引擎状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicEngineState {
    inner: AtomicU8,
}

impl AtomicEngineState {
    pub fn new(state: EngineState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: EngineState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }
}

/// 在途命令
///
/// 重传时原样复用 `frame`，保证重发的字节与首次发送完全一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub frame: Bytes,
    /// 下发后硬件应处于的可下发字段
    pub commanded: RobotState,
    pub delta: Delta,
    /// 已发送次数
    pub attempts: u32,
}

/// 单次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 没有打开的连接
    Idle,
    /// 新会话的首次状态读取完成
    Synced,
    /// 无差量，完成一次状态查询
    Polled,
    /// 下发了一条命令并收到确认
    Dispatched { fields: usize },
    /// 编解码器拒绝编码目标（值域断言失败），本 tick 未发送任何帧
    EncodeRejected,
    /// 交换过程中连接被关闭，在途命令被丢弃
    Cancelled,
    /// 重试耗尽，连接已转入 Faulted
    LinkLost,
    /// 连接处于 Faulted
    Faulted,
}

/// 交换类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    Query,
    Command,
}

/// 同步引擎
///
/// 只有一个线程驱动 `tick()`；其他线程通过共享的 `StateStore`
/// 和 `ConnectionManager` 与它交互。
pub struct SyncEngine {
    store: Arc<StateStore>,
    conn: Arc<ConnectionManager>,
    codec: Arc<dyn FrameCodec>,
    metrics: Arc<LinkMetrics>,
    backoff: Backoff,
    command_timeout: Duration,
    max_retries: u32,
    wait_slice: Duration,
    state: Arc<AtomicEngineState>,
    shutdown: Arc<AtomicBool>,
    pending: Option<PendingCommand>,
    /// 已完成首次状态读取的连接会话（0 表示尚未同步）
    synced_session: Arc<AtomicU64>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<StateStore>,
        conn: Arc<ConnectionManager>,
        codec: Arc<dyn FrameCodec>,
        metrics: Arc<LinkMetrics>,
        config: &LinkConfig,
    ) -> Self {
        Self {
            store,
            conn,
            codec,
            metrics,
            backoff: Backoff::from_config(config),
            command_timeout: config.command_timeout(),
            max_retries: config.max_retries.max(1),
            wait_slice: config.read_slice().max(Duration::from_millis(1)),
            state: Arc::new(AtomicEngineState::new(EngineState::Idle)),
            shutdown: Arc::new(AtomicBool::new(false)),
            pending: None,
            synced_session: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 与外部共享停止标志（置位后退避等待立即返回）
    pub fn with_shutdown_flag(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// 可跨线程读取的状态句柄
    pub fn state_handle(&self) -> Arc<AtomicEngineState> {
        self.state.clone()
    }

    /// 已完成首次状态读取的连接会话编号
    pub fn synced_session_handle(&self) -> Arc<AtomicU64> {
        self.synced_session.clone()
    }

    /// 当前在途命令（仅在 tick 执行期间非空）
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// 执行一次同步，然后发出本 tick 积累的状态变化通知
    ///
    /// 新会话的第一个 tick 只读取硬件状态；此前设置的目标在下一个 tick 下发。
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.step();
        self.store.publish_changes();
        trace!("tick: {:?}", outcome);
        outcome
    }

    fn step(&mut self) -> TickOutcome {
        match self.conn.state() {
            ConnectionState::Open => {},
            ConnectionState::Faulted => {
                self.pending = None;
                self.state.set(EngineState::Faulted);
                return TickOutcome::Faulted;
            },
            _ => {
                self.pending = None;
                self.state.set(EngineState::Idle);
                return TickOutcome::Idle;
            },
        }

        if matches!(self.state(), EngineState::Idle | EngineState::Faulted) {
            self.state.set(EngineState::Polling);
        }

        let session = self.conn.session();
        if self.synced_session.load(Ordering::Acquire) != session {
            return self.sync_in(session);
        }

        let target = self.store.target_snapshot();
        let current = self.store.current();
        let delta = Delta::between(&current, &target.state).restricted_to(target.touched);

        if delta.is_empty() {
            self.poll(current)
        } else {
            self.dispatch(current, delta)
        }
    }

    /// 新会话：读取硬件状态作为基准（包括数字输出）
    fn sync_in(&mut self, session: u64) -> TickOutcome {
        debug!("Reading initial hardware state (session {})", session);
        let frame = self.codec.encode_state_request();
        match self.exchange(frame, Exchange::Query) {
            Ok(reported) => {
                LinkMetrics::incr(&self.metrics.state_reads);
                self.store.commit_current(reported);
                self.store.adopt_untouched(&reported);
                self.synced_session.store(session, Ordering::Release);
                info!("Synchronized with hardware: {:?}", reported.joints);
                TickOutcome::Synced
            },
            Err(e) => self.on_failure(e),
        }
    }

    /// 无差量：只刷新硬件报告的字段
    fn poll(&mut self, current: RobotState) -> TickOutcome {
        let frame = self.codec.encode_state_request();
        match self.exchange(frame, Exchange::Query) {
            Ok(reported) => {
                LinkMetrics::incr(&self.metrics.state_reads);
                let mut next = reported;
                // 数字输出以最后一次确认的命令为准
                next.digital_outputs = current.digital_outputs;
                self.store.commit_current(next);
                TickOutcome::Polled
            },
            Err(e) => self.on_failure(e),
        }
    }

    fn dispatch(&mut self, current: RobotState, delta: Delta) -> TickOutcome {
        let commanded = current.apply(&delta);
        let frame = match self.codec.encode_delta(&current, &delta) {
            Ok(frame) => frame,
            Err(e) => {
                // 连接保持 Open，下一个 tick 重新计算差量
                error!("Failed to encode command: {}", e);
                return TickOutcome::EncodeRejected;
            },
        };
        debug!(
            "Dispatching command ({} fields changed): joints={:?} speed={} outputs={:?}",
            delta.changed_fields(),
            commanded.joints,
            commanded.speed,
            commanded.digital_outputs
        );

        self.pending = Some(PendingCommand {
            frame: frame.clone(),
            commanded,
            delta,
            attempts: 0,
        });
        let result = self.exchange(frame, Exchange::Command);
        self.pending = None;

        match result {
            Ok(reported) => {
                LinkMetrics::incr(&self.metrics.commands_dispatched);
                let mut next = reported;
                next.digital_outputs = commanded.digital_outputs;
                self.store.commit_current(next);
                self.state.set(EngineState::Polling);
                TickOutcome::Dispatched {
                    fields: delta.changed_fields(),
                }
            },
            Err(e) => self.on_failure(e),
        }
    }

    /// 发送一帧并等待一帧有效响应，按退避策略重发同一帧
    fn exchange(&mut self, frame: Bytes, kind: Exchange) -> Result<RobotState, DriverError> {
        let mut failures = 0u32;
        loop {
            self.conn.send(&frame)?;
            if let Some(pending) = self.pending.as_mut() {
                pending.attempts += 1;
            }
            if kind == Exchange::Command {
                self.state.set(EngineState::AwaitingAck);
            }

            let result = self
                .conn
                .receive(self.command_timeout)
                .and_then(|response| self.codec.decode(&response).map_err(DriverError::from));

            let err = match result {
                Ok(reported) => {
                    self.state.set(EngineState::Polling);
                    return Ok(reported);
                },
                Err(e) if e.is_recoverable() => e,
                Err(e) => return Err(e),
            };

            match &err {
                DriverError::Timeout => LinkMetrics::incr(&self.metrics.timeouts),
                _ => LinkMetrics::incr(&self.metrics.decode_errors),
            }
            failures += 1;

            if failures >= self.max_retries {
                LinkMetrics::incr(&self.metrics.link_lost);
                error!("{:?} exchange failed {} times, link lost: {}", kind, failures, err);
                if self.conn.fault(LinkFault::LinkLost { attempts: failures }) {
                    return Err(DriverError::LinkLost { attempts: failures });
                }
                return Err(DriverError::NotConnected);
            }

            let delay = self.backoff.delay(failures);
            warn!(
                "{:?} exchange failed ({}), retrying in {:?} ({}/{})",
                kind, err, delay, failures, self.max_retries
            );
            LinkMetrics::incr(&self.metrics.retries);
            if !self.wait(delay) {
                return Err(DriverError::NotConnected);
            }
        }
    }

    /// 可中断的退避等待
    ///
    /// 连接离开 Open 或收到停止请求时返回 `false`。
    fn wait(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.shutdown.load(Ordering::Acquire) || !self.conn.state().is_open() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            spin_sleep::sleep(remaining.min(self.wait_slice));
        }
    }

    fn on_failure(&mut self, err: DriverError) -> TickOutcome {
        self.pending = None;
        match err {
            DriverError::LinkLost { .. } => {
                self.state.set(EngineState::Faulted);
                TickOutcome::LinkLost
            },
            DriverError::NotConnected => {
                info!("Connection closed during exchange, dropping in-flight frame");
                let next = if self.conn.state() == ConnectionState::Faulted {
                    EngineState::Faulted
                } else {
                    EngineState::Idle
                };
                self.state.set(next);
                TickOutcome::Cancelled
            },
            other => {
                error!("Exchange aborted: {}", other);
                self.state.set(EngineState::Faulted);
                TickOutcome::Faulted
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_protocol::{BinaryFrameCodec, DecodeError, Joint, ProtocolError, StatePatch};
    use armlink_serial::{SimConnector, SimulatedDevice};

    struct Rig {
        device: SimulatedDevice,
        store: Arc<StateStore>,
        conn: Arc<ConnectionManager>,
        engine: SyncEngine,
    }

    fn rig(device: SimulatedDevice) -> Rig {
        rig_with_codec(device, Arc::new(BinaryFrameCodec))
    }

    fn rig_with_codec(device: SimulatedDevice, codec: Arc<dyn FrameCodec>) -> Rig {
        let config = LinkConfig {
            command_timeout_ms: 20,
            backoff_base_ms: 1,
            backoff_cap_ms: 4,
            read_slice_ms: 2,
            ..LinkConfig::default()
        };
        let metrics = Arc::new(LinkMetrics::new());
        let conn = Arc::new(ConnectionManager::new(
            Arc::new(SimConnector::new(device.clone())),
            codec.clone(),
            metrics.clone(),
            config.read_slice(),
        ));
        let store = Arc::new(StateStore::new());
        let engine = SyncEngine::new(store.clone(), conn.clone(), codec, metrics, &config);
        Rig {
            device,
            store,
            conn,
            engine,
        }
    }

    #[test]
    fn test_engine_state_conversions() {
        for state in [
            EngineState::Idle,
            EngineState::Polling,
            EngineState::AwaitingAck,
            EngineState::Faulted,
        ] {
            assert_eq!(EngineState::from_u8(state.as_u8()), state);
        }
        assert_eq!(EngineState::from_u8(99), EngineState::Idle);
    }

    #[test]
    fn test_idle_without_connection() {
        let mut rig = rig(SimulatedDevice::new());
        assert_eq!(rig.engine.tick(), TickOutcome::Idle);
        assert_eq!(rig.engine.state(), EngineState::Idle);
        assert!(rig.device.written_frames().is_empty());
    }

    #[test]
    fn test_first_tick_syncs_then_polls() {
        let mut hw = RobotState::default();
        hw.joints = [90; 6];
        hw.digital_outputs = [true, false, false];
        let mut rig = rig(SimulatedDevice::with_state(hw));
        rig.conn.connect("COM-sim", 9600).unwrap();

        assert_eq!(rig.engine.tick(), TickOutcome::Synced);
        assert_eq!(rig.store.current(), hw);
        // 未设置的字段采用硬件值
        assert_eq!(rig.store.target().joints, [90; 6]);

        assert_eq!(rig.engine.tick(), TickOutcome::Polled);
        assert!(rig.device.command_frames().is_empty());
        assert_eq!(rig.engine.state(), EngineState::Polling);
    }

    #[test]
    fn test_target_set_before_first_tick_is_sent_on_second() {
        let mut rig = rig(SimulatedDevice::new());
        rig.conn.connect("COM-sim", 9600).unwrap();
        rig.store.set_target(&StatePatch::new().joint(Joint::J3, 30));

        assert_eq!(rig.engine.tick(), TickOutcome::Synced);
        assert!(rig.device.command_frames().is_empty());
        // 已设置的字段不会被硬件值覆盖
        assert_eq!(rig.store.target().joint(Joint::J3), 30);

        assert_eq!(rig.engine.tick(), TickOutcome::Dispatched { fields: 1 });
        assert_eq!(rig.device.state().joint(Joint::J3), 30);
    }

    /// 只接受 50% 以下速度的编解码器
    struct SlowOnlyCodec;

    impl FrameCodec for SlowOnlyCodec {
        fn encode_command(&self, commanded: &RobotState) -> Result<Bytes, ProtocolError> {
            if commanded.speed > 50 {
                return Err(ProtocolError::OutOfDomain {
                    field: "speed",
                    value: commanded.speed,
                    max: 50,
                });
            }
            BinaryFrameCodec.encode_command(commanded)
        }

        fn encode_state_request(&self) -> Bytes {
            BinaryFrameCodec.encode_state_request()
        }

        fn response_len(&self) -> usize {
            BinaryFrameCodec.response_len()
        }

        fn frame_start(&self, buf: &[u8]) -> Option<usize> {
            BinaryFrameCodec.frame_start(buf)
        }

        fn decode(&self, frame: &[u8]) -> Result<RobotState, DecodeError> {
            BinaryFrameCodec.decode(frame)
        }
    }

    #[test]
    fn test_encode_rejection_sends_nothing_and_keeps_link() {
        let mut rig = rig_with_codec(SimulatedDevice::new(), Arc::new(SlowOnlyCodec));
        rig.conn.connect("COM-sim", 9600).unwrap();
        assert_eq!(rig.engine.tick(), TickOutcome::Synced);

        rig.store.set_target(&StatePatch::new().speed(80));
        assert_eq!(rig.engine.tick(), TickOutcome::EncodeRejected);
        assert!(rig.device.command_frames().is_empty());
        assert_eq!(rig.conn.state(), ConnectionState::Open);
        assert!(rig.engine.pending().is_none());

        // 目标回到可编码范围后正常下发
        rig.store.set_target(&StatePatch::new().speed(40));
        assert_eq!(rig.engine.tick(), TickOutcome::Dispatched { fields: 1 });
    }

    #[test]
    fn test_untouched_fields_are_never_commanded() {
        let mut hw = RobotState::default();
        hw.joints = [90, 91, 92, 93, 94, 95];
        hw.speed = 40;
        let mut rig = rig(SimulatedDevice::with_state(hw));
        rig.conn.connect("COM-sim", 9600).unwrap();
        rig.engine.tick();

        rig.store.set_target(&StatePatch::new().joint(Joint::J4, 10));
        assert_eq!(rig.engine.tick(), TickOutcome::Dispatched { fields: 1 });

        let device_state = rig.device.state();
        assert_eq!(device_state.joints, [90, 91, 92, 10, 94, 95]);
        assert_eq!(device_state.speed, 40);
    }

    #[test]
    fn test_pending_cleared_after_tick() {
        let mut rig = rig(SimulatedDevice::new());
        rig.conn.connect("COM-sim", 9600).unwrap();
        rig.engine.tick();

        rig.store.set_target(&StatePatch::new().speed(30));
        rig.engine.tick();
        assert!(rig.engine.pending().is_none());
    }

    #[test]
    fn test_faulted_connection_reports_faulted() {
        let mut rig = rig(SimulatedDevice::new());
        rig.conn.connect("COM-sim", 9600).unwrap();
        rig.engine.tick();

        rig.device.fail_io(true);
        assert_eq!(rig.engine.tick(), TickOutcome::Faulted);
        assert_eq!(rig.engine.state(), EngineState::Faulted);
        assert_eq!(rig.conn.state(), ConnectionState::Faulted);

        assert_eq!(rig.engine.tick(), TickOutcome::Faulted);
    }

    #[test]
    fn test_reconnect_resyncs() {
        let mut rig = rig(SimulatedDevice::new());
        rig.conn.connect("COM-sim", 9600).unwrap();
        assert_eq!(rig.engine.tick(), TickOutcome::Synced);
        rig.conn.disconnect();
        assert_eq!(rig.engine.tick(), TickOutcome::Idle);

        rig.conn.connect("COM-sim", 9600).unwrap();
        assert_eq!(rig.engine.tick(), TickOutcome::Synced);
    }

    #[test]
    fn test_shutdown_interrupts_backoff() {
        let rig = rig(SimulatedDevice::new());
        let shutdown = Arc::new(AtomicBool::new(true));
        let engine = rig.engine.with_shutdown_flag(shutdown);
        rig.conn.connect("COM-sim", 9600).unwrap();
        assert!(!engine.wait(Duration::from_secs(5)));
    }
}
