//! Connection Manager
//!
//! 独占 `Transport` 的生命周期，并串行化所有 `send`/`receive`：
//! 同一连接上任意时刻最多只有一个 I/O 操作在进行。
//!
//! # 状态机
//!
//! ```text
//! Closed → Opening → Open → Closing → Closed
//!            ↓        ↓
//!          Faulted ←──┘   （不可恢复的 I/O 错误 / 重试耗尽）
//! ```
//!
//! 从 `Faulted` 恢复需要显式调用 `connect()`。

use crate::error::{ConnectError, ConnectErrorKind, DriverError, LinkFault};
use crate::metrics::LinkMetrics;
use arc_swap::ArcSwap;
use armlink_protocol::FrameCodec;
use armlink_serial::{Connector, Transport, TransportError};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

/// 单次 read 调用的缓冲区大小
const READ_CHUNK: usize = 64;

/// 连接生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Closed = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
    Faulted = 4,
}

impl ConnectionState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Faulted,
            _ => Self::Closed,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// 连接状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicConnectionState {
    inner: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 比较并交换，成功返回 `Ok(())`，失败返回实际状态
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }
}

/// 对外广播的连接状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// 最近一次故障原因；成功连接后清空
    pub last_error: Option<LinkFault>,
    /// 当前（或最近一次）端口
    pub port_id: Option<String>,
}

struct IoSlot {
    transport: Option<Box<dyn Transport>>,
    rx_buf: Vec<u8>,
}

/// 连接管理器
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    codec: Arc<dyn FrameCodec>,
    state: AtomicConnectionState,
    /// 每次成功打开自增，同步引擎据此判断是否需要重新读取硬件状态
    session: AtomicU64,
    /// I/O 互斥：transport 与接收缓冲
    io: Mutex<IoSlot>,
    status: ArcSwap<ConnectionStatus>,
    subscribers: Mutex<Vec<Sender<ConnectionStatus>>>,
    metrics: Arc<LinkMetrics>,
    read_slice: Duration,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        codec: Arc<dyn FrameCodec>,
        metrics: Arc<LinkMetrics>,
        read_slice: Duration,
    ) -> Self {
        Self {
            connector,
            codec,
            state: AtomicConnectionState::new(ConnectionState::Closed),
            session: AtomicU64::new(0),
            io: Mutex::new(IoSlot {
                transport: None,
                rx_buf: Vec::with_capacity(READ_CHUNK),
            }),
            status: ArcSwap::from_pointee(ConnectionStatus::default()),
            subscribers: Mutex::new(Vec::new()),
            metrics,
            read_slice: read_slice.max(Duration::from_millis(1)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// 当前连接会话编号（从未连接时为 0）
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.load().as_ref().clone()
    }

    /// 订阅状态变化
    pub fn observe_status(&self) -> Receiver<ConnectionStatus> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, state: ConnectionState, last_error: Option<LinkFault>, port_id: Option<String>) {
        self.publish_with(state, |_| (last_error, port_id));
    }

    /// 更新状态并保留上一次的故障原因与端口
    fn publish_state(&self, state: ConnectionState) {
        self.publish_with(state, |previous| {
            (previous.last_error.clone(), previous.port_id.clone())
        });
    }

    /// 在订阅者锁内重新读取状态机，`state` 已被并发转换覆盖时放弃广播
    ///
    /// 每次转换之后都会跟随一次 publish，而 publish 之间互斥，
    /// 所以最后写入的 `status` 总是与 `state()` 一致。
    fn publish_with(
        &self,
        state: ConnectionState,
        fields: impl FnOnce(&ConnectionStatus) -> (Option<LinkFault>, Option<String>),
    ) {
        let mut subscribers = self.subscribers.lock();
        if self.state.get() != state {
            trace!("Dropping stale {:?} status, state is now {:?}", state, self.state.get());
            return;
        }

        let (last_error, port_id) = fields(&self.status.load());
        let status = ConnectionStatus {
            state,
            last_error,
            port_id,
        };
        self.status.store(Arc::new(status.clone()));
        subscribers.retain(|tx| tx.send(status.clone()).is_ok());
    }

    /// 打开连接
    ///
    /// 只允许从 `Closed` 或 `Faulted` 发起。失败时转入 `Faulted`，
    /// 同时返回并广播 `ConnectError`。
    pub fn connect(&self, port_id: &str, baud_rate: u32) -> Result<(), DriverError> {
        let claimed = self
            .state
            .transition(ConnectionState::Closed, ConnectionState::Opening)
            .or_else(|_| {
                self.state
                    .transition(ConnectionState::Faulted, ConnectionState::Opening)
            });
        match claimed {
            Ok(()) => {},
            Err(ConnectionState::Open) => return Err(DriverError::AlreadyConnected),
            Err(_) => return Err(DriverError::AlreadyConnecting),
        }

        self.publish(ConnectionState::Opening, None, Some(port_id.to_string()));
        info!("Opening {} @ {} baud", port_id, baud_rate);

        // 从 Faulted 重连时，先释放旧的 transport
        self.release_transport();

        match self.connector.open(port_id, baud_rate) {
            Ok(mut transport) => {
                let mut io = self.io.lock();
                if self
                    .state
                    .transition(ConnectionState::Opening, ConnectionState::Open)
                    .is_err()
                {
                    // 打开过程中被 disconnect() 取消
                    drop(io);
                    if let Err(e) = transport.close() {
                        warn!("Failed to close cancelled transport: {}", e);
                    }
                    info!("Connect to {} cancelled", port_id);
                    return Err(ConnectError::new(ConnectErrorKind::Cancelled, "disconnect requested").into());
                }
                io.transport = Some(transport);
                io.rx_buf.clear();
                self.session.fetch_add(1, Ordering::AcqRel);
                drop(io);

                self.publish(ConnectionState::Open, None, Some(port_id.to_string()));
                info!("Connected to {}", port_id);
                Ok(())
            },
            Err(e) => {
                let err = ConnectError::from(e);
                error!("Failed to open {}: {}", port_id, err);
                if self
                    .state
                    .transition(ConnectionState::Opening, ConnectionState::Faulted)
                    .is_ok()
                {
                    self.publish(
                        ConnectionState::Faulted,
                        Some(LinkFault::ConnectFailed(err.clone())),
                        Some(port_id.to_string()),
                    );
                }
                Err(err.into())
            },
        }
    }

    /// 关闭连接（任何状态下都可以安全调用，幂等）
    ///
    /// 等待正在进行的 I/O 最多一个 read slice，然后释放 transport。
    pub fn disconnect(&self) {
        loop {
            let from = self.state.get();
            match from {
                ConnectionState::Closed | ConnectionState::Closing => return,
                ConnectionState::Opening | ConnectionState::Open | ConnectionState::Faulted => {
                    if self.state.transition(from, ConnectionState::Closing).is_err() {
                        continue;
                    }
                },
            }

            self.publish_state(ConnectionState::Closing);
            self.release_transport();
            self.state.set(ConnectionState::Closed);
            self.publish_state(ConnectionState::Closed);
            info!("Disconnected");
            return;
        }
    }

    /// 取出并关闭 transport；无论 close 是否成功，句柄都会被释放
    fn release_transport(&self) {
        let mut io = self.io.lock();
        io.rx_buf.clear();
        if let Some(mut transport) = io.transport.take() {
            if let Err(e) = transport.close() {
                warn!("Error while closing {}: {}", transport.port_id(), e);
            }
        }
    }

    /// 将连接标记为故障（仅当当前为 Open 时生效）
    ///
    /// 返回是否发生了状态转换。
    pub fn fault(&self, fault: LinkFault) -> bool {
        if self
            .state
            .transition(ConnectionState::Open, ConnectionState::Faulted)
            .is_err()
        {
            return false;
        }
        error!("Connection faulted: {}", fault);
        self.publish_with(ConnectionState::Faulted, |previous| {
            (Some(fault), previous.port_id.clone())
        });
        true
    }

    fn fault_io(&self, err: &TransportError) {
        LinkMetrics::incr(&self.metrics.transport_errors);
        self.fault(LinkFault::Io {
            reason: err.to_string(),
        });
    }

    /// 发送一帧
    ///
    /// 发送前清空接收缓冲，避免上一次迟到的响应被误认为本次响应。
    pub fn send(&self, frame: &[u8]) -> Result<(), DriverError> {
        if !self.state().is_open() {
            return Err(DriverError::NotConnected);
        }
        let mut io = self.io.lock();
        if !self.state().is_open() {
            return Err(DriverError::NotConnected);
        }
        let IoSlot { transport, rx_buf } = &mut *io;
        let transport = transport.as_mut().ok_or(DriverError::NotConnected)?;

        rx_buf.clear();
        let result = transport
            .clear_input()
            .and_then(|_| transport.write_all(frame));
        match result {
            Ok(()) => {
                LinkMetrics::incr(&self.metrics.frames_sent);
                trace!("TX {:02X?}", frame);
                Ok(())
            },
            Err(e) => {
                self.fault_io(&e);
                Err(DriverError::Transport(e))
            },
        }
    }

    /// 接收一帧完整的响应，最多等待 `timeout`
    ///
    /// 以 read slice 为粒度等待，每个 slice 之间释放 I/O 锁并检查连接状态，
    /// 因此 `disconnect()` 可以在一个 slice 内打断等待。
    pub fn receive(&self, timeout: Duration) -> Result<Bytes, DriverError> {
        let deadline = Instant::now() + timeout;
        let frame_len = self.codec.response_len();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if !self.state().is_open() {
                return Err(DriverError::NotConnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DriverError::Timeout);
            }
            let slice = remaining.min(self.read_slice);

            let mut io = self.io.lock();
            if !self.state().is_open() {
                return Err(DriverError::NotConnected);
            }
            let IoSlot { transport, rx_buf } = &mut *io;
            let transport = transport.as_mut().ok_or(DriverError::NotConnected)?;

            match transport.read(&mut chunk, slice) {
                Ok(n) => {
                    rx_buf.extend_from_slice(&chunk[..n]);
                    // 帧重同步：丢弃帧起点之前的字节
                    match self.codec.frame_start(rx_buf) {
                        Some(0) => {},
                        Some(start) => {
                            trace!("Discarding {} bytes before frame start", start);
                            rx_buf.drain(..start);
                        },
                        None => rx_buf.clear(),
                    }
                    if rx_buf.len() >= frame_len {
                        let frame = Bytes::copy_from_slice(&rx_buf[..frame_len]);
                        rx_buf.drain(..frame_len);
                        LinkMetrics::incr(&self.metrics.frames_received);
                        trace!("RX {:02X?}", frame.as_ref());
                        return Ok(frame);
                    }
                },
                Err(TransportError::Timeout) => {},
                Err(e) => {
                    self.fault_io(&e);
                    return Err(DriverError::Transport(e));
                },
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.release_transport();
    }
}
