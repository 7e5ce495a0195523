//! 模拟控制板
//!
//! 进程内实现默认 15 字节帧协议的舵机控制板，用于测试和无硬件调试：
//! - 收到命令帧：立即把关节/速度/数字输出设为命令值，回一帧状态报告
//! - 收到状态查询帧：回一帧状态报告
//! - 无法识别的帧：不回应（上层表现为超时）
//!
//! 支持脚本化故障注入：丢弃响应、损坏响应、注入噪声字节、I/O 失败、拒绝打开。

use crate::{
    Connector, PortEnumerator, Transport, TransportDeviceError, TransportDeviceErrorKind,
    TransportError,
};
use armlink_protocol::binary::{FRAME_END, STATE_REQUEST_FRAME};
use armlink_protocol::{BinaryFrameCodec, DIGITAL_INPUT_COUNT, FrameCodec, RobotState};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Default)]
struct SimInner {
    state: RobotState,
    outbox: VecDeque<u8>,
    written: Vec<Bytes>,
    drop_responses: u32,
    corrupt_responses: u32,
    pending_noise: Vec<u8>,
    fail_io: bool,
    refuse_open: Option<TransportDeviceErrorKind>,
    open: bool,
    last_baud_rate: Option<u32>,
    open_count: u32,
}

/// 模拟控制板（可克隆句柄，共享同一设备）
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    inner: Arc<(Mutex<SimInner>, Condvar)>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定初始状态创建
    pub fn with_state(state: RobotState) -> Self {
        let device = Self::new();
        device.inner.0.lock().state = state;
        device
    }

    /// 设备内部状态
    pub fn state(&self) -> RobotState {
        self.inner.0.lock().state
    }

    /// 设置数字输入（模拟外部信号）
    pub fn set_inputs(&self, inputs: [bool; DIGITAL_INPUT_COUNT]) {
        self.inner.0.lock().state.digital_inputs = inputs;
    }

    /// 丢弃接下来 `n` 个响应（上层表现为超时）
    pub fn drop_next_responses(&self, n: u32) {
        self.inner.0.lock().drop_responses = n;
    }

    /// 损坏接下来 `n` 个响应（帧尾被改写）
    pub fn corrupt_next_responses(&self, n: u32) {
        self.inner.0.lock().corrupt_responses = n;
    }

    /// 在下一个响应之前注入噪声字节
    pub fn inject_noise(&self, noise: &[u8]) {
        self.inner.0.lock().pending_noise.extend_from_slice(noise);
    }

    /// 让后续所有读写返回 I/O 错误
    pub fn fail_io(&self, fail: bool) {
        let (lock, cvar) = &*self.inner;
        lock.lock().fail_io = fail;
        cvar.notify_all();
    }

    /// 让后续打开请求失败
    pub fn refuse_open(&self, kind: Option<TransportDeviceErrorKind>) {
        self.inner.0.lock().refuse_open = kind;
    }

    /// 设备是否被打开
    pub fn is_open(&self) -> bool {
        self.inner.0.lock().open
    }

    /// 最近一次打开使用的波特率
    pub fn last_baud_rate(&self) -> Option<u32> {
        self.inner.0.lock().last_baud_rate
    }

    /// 成功打开次数
    pub fn open_count(&self) -> u32 {
        self.inner.0.lock().open_count
    }

    /// 收到的所有帧（含查询帧）
    pub fn written_frames(&self) -> Vec<Bytes> {
        self.inner.0.lock().written.clone()
    }

    /// 收到的命令帧（不含查询帧）
    pub fn command_frames(&self) -> Vec<Bytes> {
        self.inner
            .0
            .lock()
            .written
            .iter()
            .filter(|f| f.as_ref() != STATE_REQUEST_FRAME)
            .cloned()
            .collect()
    }

    /// 清空写入记录
    pub fn clear_written(&self) {
        self.inner.0.lock().written.clear();
    }

    fn open_transport(&self, port_id: &str, baud_rate: u32) -> Result<SimTransport, TransportError> {
        let mut inner = self.inner.0.lock();
        if let Some(kind) = inner.refuse_open {
            return Err(TransportDeviceError::new(kind, format!("{port_id}: open refused")).into());
        }
        if inner.open {
            return Err(TransportDeviceError::new(
                TransportDeviceErrorKind::Busy,
                format!("{port_id}: already open"),
            )
            .into());
        }
        inner.open = true;
        inner.outbox.clear();
        inner.last_baud_rate = Some(baud_rate);
        inner.open_count += 1;
        Ok(SimTransport {
            port_id: port_id.to_string(),
            device: self.clone(),
            closed: false,
        })
    }

    /// 处理一帧写入，必要时生成响应
    fn handle_frame(inner: &mut SimInner, frame: &[u8]) {
        let codec = BinaryFrameCodec;
        inner.written.push(Bytes::copy_from_slice(frame));

        if frame != STATE_REQUEST_FRAME {
            match codec.decode(frame) {
                Ok(commanded) => {
                    inner.state.joints = commanded.joints;
                    inner.state.speed = commanded.speed;
                    inner.state.digital_outputs = commanded.digital_outputs;
                },
                Err(e) => {
                    trace!("sim: ignoring unrecognised frame: {}", e);
                    return;
                },
            }
        }

        if inner.drop_responses > 0 {
            inner.drop_responses -= 1;
            trace!("sim: dropping response");
            return;
        }

        let mut report = match codec.encode_array(&inner.state) {
            Ok(report) => report,
            Err(_) => return,
        };
        if inner.corrupt_responses > 0 {
            inner.corrupt_responses -= 1;
            let last = report.len() - 1;
            report[last] = FRAME_END ^ 0xFF;
            trace!("sim: corrupting response");
        }

        let noise = std::mem::take(&mut inner.pending_noise);
        inner.outbox.extend(noise);
        inner.outbox.extend(report);
    }
}

/// 模拟控制板上的传输句柄
#[derive(Debug)]
pub struct SimTransport {
    port_id: String,
    device: SimulatedDevice,
    closed: bool,
}

impl SimTransport {
    fn io_error() -> TransportError {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "simulated I/O failure",
        ))
    }
}

impl Transport for SimTransport {
    fn port_id(&self) -> &str {
        &self.port_id
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let (lock, cvar) = &*self.device.inner;
        let mut inner = lock.lock();
        if inner.fail_io {
            return Err(Self::io_error());
        }
        SimulatedDevice::handle_frame(&mut inner, data);
        cvar.notify_all();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.device.inner;
        let mut inner = lock.lock();
        loop {
            if inner.fail_io {
                return Err(Self::io_error());
            }
            if !inner.outbox.is_empty() {
                let n = buf.len().min(inner.outbox.len());
                for (slot, byte) in buf.iter_mut().zip(inner.outbox.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if cvar.wait_until(&mut inner, deadline).timed_out() {
                return Err(TransportError::Timeout);
            }
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.device.inner.0.lock().outbox.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            let (lock, cvar) = &*self.device.inner;
            let mut inner = lock.lock();
            inner.open = false;
            inner.outbox.clear();
            cvar.notify_all();
        }
        Ok(())
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// 模拟控制板的打开器
///
/// 未指定端口名时，任何端口都会打开同一个模拟设备。
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    device: SimulatedDevice,
    port_id: Option<String>,
}

impl SimConnector {
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            device,
            port_id: None,
        }
    }

    /// 只接受指定端口名
    pub fn with_port(mut self, port_id: impl Into<String>) -> Self {
        self.port_id = Some(port_id.into());
        self
    }

    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }
}

impl Connector for SimConnector {
    fn open(&self, port_id: &str, baud_rate: u32) -> Result<Box<dyn Transport>, TransportError> {
        if let Some(expected) = &self.port_id {
            if expected != port_id {
                return Err(TransportDeviceError::new(
                    TransportDeviceErrorKind::NotFound,
                    format!("no such port: {port_id}"),
                )
                .into());
            }
        }
        Ok(Box::new(self.device.open_transport(port_id, baud_rate)?))
    }
}

/// 固定端口列表
#[derive(Debug, Clone, Default)]
pub struct SimPorts {
    ports: Vec<String>,
}

impl SimPorts {
    pub fn new(ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ports: ports.into_iter().map(Into::into).collect(),
        }
    }
}

impl PortEnumerator for SimPorts {
    fn list_ports(&self) -> Vec<String> {
        self.ports.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_protocol::binary::STATE_FRAME_LEN;

    fn read_frame(transport: &mut dyn Transport) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 32];
        while out.len() < STATE_FRAME_LEN {
            let n = transport
                .read(&mut buf, Duration::from_millis(100))
                .expect("read failed");
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_query_returns_state_report() {
        let mut initial = RobotState::default();
        initial.joints = [90; 6];
        initial.digital_inputs = [true, false, true];
        let device = SimulatedDevice::with_state(initial);
        let mut transport = SimConnector::new(device.clone()).open("COM-sim", 9600).unwrap();

        transport.write_all(&STATE_REQUEST_FRAME).unwrap();
        let frame = read_frame(transport.as_mut());
        assert_eq!(BinaryFrameCodec.decode(&frame).unwrap(), initial);
        assert_eq!(device.last_baud_rate(), Some(9600));
    }

    #[test]
    fn test_command_moves_device_but_not_inputs() {
        let device = SimulatedDevice::new();
        device.set_inputs([true, true, false]);
        let mut transport = SimConnector::new(device.clone()).open("COM-sim", 9600).unwrap();

        let mut commanded = RobotState::default();
        commanded.joints[0] = 45;
        commanded.digital_outputs[1] = true;
        commanded.digital_inputs = [false; 3];
        let frame = BinaryFrameCodec.encode_command(&commanded).unwrap();
        transport.write_all(&frame).unwrap();

        let report = BinaryFrameCodec.decode(&read_frame(transport.as_mut())).unwrap();
        assert_eq!(report.joints[0], 45);
        assert!(report.digital_outputs[1]);
        assert_eq!(report.digital_inputs, [true, true, false]);
        assert_eq!(device.command_frames().len(), 1);
    }

    #[test]
    fn test_dropped_response_times_out() {
        let device = SimulatedDevice::new();
        device.drop_next_responses(1);
        let mut transport = SimConnector::new(device).open("COM-sim", 9600).unwrap();

        transport.write_all(&STATE_REQUEST_FRAME).unwrap();
        let mut buf = [0u8; 16];
        let result = transport.read(&mut buf, Duration::from_millis(20));
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[test]
    fn test_corrupted_response_fails_decode() {
        let device = SimulatedDevice::new();
        device.corrupt_next_responses(1);
        let mut transport = SimConnector::new(device).open("COM-sim", 9600).unwrap();

        transport.write_all(&STATE_REQUEST_FRAME).unwrap();
        let frame = read_frame(transport.as_mut());
        assert!(BinaryFrameCodec.decode(&frame).is_err());
    }

    #[test]
    fn test_open_twice_is_busy_and_close_releases() {
        let connector = SimConnector::new(SimulatedDevice::new());
        let mut first = connector.open("COM-sim", 9600).unwrap();

        match connector.open("COM-sim", 9600) {
            Err(TransportError::Device(e)) => assert_eq!(e.kind, TransportDeviceErrorKind::Busy),
            _ => panic!("Expected Busy"),
        }

        first.close().unwrap();
        assert!(!connector.device().is_open());
        assert!(connector.open("COM-sim", 9600).is_ok());
    }

    #[test]
    fn test_port_filter_and_refuse_open() {
        let device = SimulatedDevice::new();
        let connector = SimConnector::new(device.clone()).with_port("COM-sim");
        assert!(connector.open("COM1", 9600).is_err());

        device.refuse_open(Some(TransportDeviceErrorKind::AccessDenied));
        match connector.open("COM-sim", 9600) {
            Err(TransportError::Device(e)) => {
                assert_eq!(e.kind, TransportDeviceErrorKind::AccessDenied)
            },
            _ => panic!("Expected AccessDenied"),
        }
    }

    #[test]
    fn test_fail_io() {
        let device = SimulatedDevice::new();
        let mut transport = SimConnector::new(device.clone()).open("COM-sim", 9600).unwrap();
        device.fail_io(true);
        assert!(matches!(
            transport.write_all(&STATE_REQUEST_FRAME),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_sim_ports() {
        let ports = SimPorts::new(["COM-sim", "COM2"]);
        assert_eq!(ports.list_ports(), vec!["COM-sim", "COM2"]);
        assert!(SimPorts::default().list_ports().is_empty());
    }
}
