//! RobotLink 对外 API
//!
//! 把状态存储、连接管理器和同步引擎线程组装成一个句柄，
//! 提供操作员侧的全部操作：连接、断开、设置目标、读取/订阅状态。

use crate::config::LinkConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::engine::{AtomicEngineState, EngineState, SyncEngine};
use crate::error::{DriverError, LinkFault};
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::store::StateStore;
use armlink_protocol::{RobotState, StatePatch};
use armlink_serial::PortEnumerator;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Drop 时等待同步线程退出的上限
const ENGINE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 等待收敛时重新检查连接状态的间隔
const CONVERGE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

const SYNC_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// 带超时的 thread join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 由看门狗线程执行阻塞的 join
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 发给同步线程的控制消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// 立即执行一次 tick（例如刚建立连接）
    Wake,
    Shutdown,
}

/// 同步线程主循环
fn sync_loop(
    mut engine: SyncEngine,
    control_rx: Receiver<Control>,
    is_running: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    info!("Sync thread started (poll interval {:?})", poll_interval);
    while is_running.load(Ordering::Acquire) {
        engine.tick();
        match control_rx.recv_timeout(poll_interval) {
            Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => {},
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Sync thread stopped");
}

/// 机械臂链路（对外 API）
///
/// 由 [`RobotLinkBuilder`](crate::RobotLinkBuilder) 创建。所有方法都接受 `&self`，
/// 可以在多个线程间共享（例如放进 `Arc`）。
///
/// `connect`/`set_target` 之后的实际下发由后台同步线程按轮询周期完成。
pub struct RobotLink {
    store: Arc<StateStore>,
    conn: Arc<ConnectionManager>,
    ports: Arc<dyn PortEnumerator>,
    metrics: Arc<LinkMetrics>,
    engine_state: Arc<AtomicEngineState>,
    synced_session: Arc<AtomicU64>,
    config: LinkConfig,
    is_running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    control_tx: Sender<Control>,
    engine_thread: Option<JoinHandle<()>>,
}

pub(crate) struct LinkParts {
    pub store: Arc<StateStore>,
    pub conn: Arc<ConnectionManager>,
    pub ports: Arc<dyn PortEnumerator>,
    pub metrics: Arc<LinkMetrics>,
    pub engine: SyncEngine,
    pub config: LinkConfig,
}

impl RobotLink {
    /// 启动同步线程
    pub(crate) fn spawn(parts: LinkParts) -> Result<Self, DriverError> {
        let LinkParts {
            store,
            conn,
            ports,
            metrics,
            engine,
            config,
        } = parts;

        let is_running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let engine = engine.with_shutdown_flag(shutdown.clone());
        let engine_state = engine.state_handle();
        let synced_session = engine.synced_session_handle();
        let (control_tx, control_rx) = crossbeam_channel::bounded(1);

        let poll_interval = config.poll_interval();
        let is_running_clone = is_running.clone();
        let engine_thread = std::thread::Builder::new()
            .name("armlink-sync".into())
            .spawn(move || sync_loop(engine, control_rx, is_running_clone, poll_interval))
            .map_err(DriverError::Spawn)?;

        Ok(Self {
            store,
            conn,
            ports,
            metrics,
            engine_state,
            synced_session,
            config,
            is_running,
            shutdown,
            control_tx,
            engine_thread: Some(engine_thread),
        })
    }

    fn wake(&self) {
        // 通道已满说明已有未处理的唤醒
        let _ = self.control_tx.try_send(Control::Wake);
    }

    /// 打开端口
    ///
    /// 成功后同步线程立即读取一次硬件状态。失败原因同时反映在连接状态流中。
    pub fn connect(&self, port_id: &str, baud_rate: u32) -> Result<(), DriverError> {
        self.conn.connect(port_id, baud_rate)?;
        self.wake();
        Ok(())
    }

    /// 关闭连接（任何时刻都可以调用，包括命令等待确认期间）
    ///
    /// 在途命令被丢弃且不会重试。
    pub fn disconnect(&self) {
        self.conn.disconnect();
        self.wake();
    }

    /// 合并部分更新到目标状态，返回钳制后的目标快照
    ///
    /// 下一次 tick 会把与 `current` 的差量合并为一条命令下发。
    pub fn set_target(&self, patch: &StatePatch) -> RobotState {
        self.store.set_target(patch)
    }

    pub fn current(&self) -> RobotState {
        self.store.current()
    }

    pub fn target(&self) -> RobotState {
        self.store.target()
    }

    /// 订阅 `current` 的变化（每个 tick 最多一次）
    pub fn observe_current(&self) -> Receiver<RobotState> {
        self.store.observe_current()
    }

    /// 订阅 `target` 的变化（每个 tick 最多一次）
    pub fn observe_target(&self) -> Receiver<RobotState> {
        self.store.observe_target()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    /// 订阅连接状态变化
    pub fn observe_status(&self) -> Receiver<ConnectionStatus> {
        self.conn.observe_status()
    }

    /// 列出可用端口（没有端口时返回空列表）
    pub fn list_ports(&self) -> Vec<String> {
        self.ports.list_ports()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine_state.get()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// 共享的状态存储
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// 阻塞直到同步线程完成本次连接的首次硬件状态读取
    ///
    /// 返回后 `current()` 反映硬件的真实状态。
    pub fn wait_until_synced(&self, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.conn.state() {
                ConnectionState::Open => {
                    if self.synced_session.load(Ordering::Acquire) == self.conn.session() {
                        return Ok(());
                    }
                },
                ConnectionState::Opening => {},
                ConnectionState::Faulted => return Err(self.fault_error()),
                ConnectionState::Closed | ConnectionState::Closing => {
                    return Err(DriverError::NotConnected);
                },
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DriverError::Timeout);
            }
            spin_sleep::sleep(remaining.min(SYNC_CHECK_INTERVAL));
        }
    }

    fn fault_error(&self) -> DriverError {
        match self.conn.status().last_error {
            Some(LinkFault::LinkLost { attempts }) => DriverError::LinkLost { attempts },
            Some(LinkFault::ConnectFailed(e)) => DriverError::Connect(e),
            _ => DriverError::NotConnected,
        }
    }

    /// 阻塞直到所有设置过的目标字段都已被硬件确认
    ///
    /// # 错误
    ///
    /// - `Timeout`: 超时仍未收敛
    /// - `NotConnected`: 等待期间连接被关闭
    /// - `LinkLost`: 等待期间重试耗尽
    pub fn wait_until_converged(&self, timeout: Duration) -> Result<(), DriverError> {
        let updates = self.store.observe_current();
        let deadline = Instant::now() + timeout;
        loop {
            if self.store.is_converged() {
                return Ok(());
            }
            match self.conn.state() {
                ConnectionState::Open => {},
                ConnectionState::Faulted => return Err(self.fault_error()),
                _ => return Err(DriverError::NotConnected),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DriverError::Timeout);
            }
            match updates.recv_timeout(remaining.min(CONVERGE_CHECK_INTERVAL)) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => return Err(DriverError::NotConnected),
            }
        }
    }

    /// 停止同步线程、关闭连接并释放状态存储
    pub fn dispose(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.engine_thread.take() else {
            return;
        };

        self.is_running.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        // 先断开连接，使等待中的 receive 在一个 read slice 内返回
        self.conn.disconnect();
        let _ = self.control_tx.try_send(Control::Shutdown);

        if let Err(_e) = handle.join_timeout(ENGINE_JOIN_TIMEOUT) {
            error!(
                "Sync thread panicked or failed to shut down within {:?}",
                ENGINE_JOIN_TIMEOUT
            );
        }
        self.store.dispose();
    }
}

impl Drop for RobotLink {
    fn drop(&mut self) {
        self.stop();
    }
}
