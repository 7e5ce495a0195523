//! 原生串口后端
//!
//! 基于 `serialport` crate，8N1、无流控。

use crate::{
    Connector, PortEnumerator, Transport, TransportDeviceError, TransportDeviceErrorKind,
    TransportError,
};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 打开端口时的初始读写超时
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// 将 `serialport::Error` 映射为结构化设备错误
fn map_serial_error(err: serialport::Error) -> TransportError {
    let kind = match err.kind() {
        serialport::ErrorKind::NoDevice => TransportDeviceErrorKind::NotFound,
        serialport::ErrorKind::InvalidInput => TransportDeviceErrorKind::UnsupportedConfig,
        serialport::ErrorKind::Io(ErrorKind::NotFound) => TransportDeviceErrorKind::NotFound,
        serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
            TransportDeviceErrorKind::AccessDenied
        },
        serialport::ErrorKind::Io(ErrorKind::ResourceBusy) => TransportDeviceErrorKind::Busy,
        serialport::ErrorKind::Io(_) => TransportDeviceErrorKind::Backend,
        serialport::ErrorKind::Unknown => TransportDeviceErrorKind::Unknown,
    };
    TransportError::Device(TransportDeviceError::new(kind, err.description))
}

/// 真实串口传输
pub struct SerialTransport {
    port_id: String,
    port: Box<dyn SerialPort>,
    read_timeout: Duration,
    closed: bool,
}

impl SerialTransport {
    /// 打开串口
    pub fn open(port_id: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_id, baud_rate)
            .timeout(OPEN_TIMEOUT)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()
            .map_err(map_serial_error)?;

        info!("Serial port opened: {} @ {} baud", port_id, baud_rate);
        Ok(Self {
            port_id: port_id.to_string(),
            port,
            read_timeout: OPEN_TIMEOUT,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Transport for SerialTransport {
    fn port_id(&self) -> &str {
        &self.port_id
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.ensure_open()?;
        if timeout != self.read_timeout {
            self.port.set_timeout(timeout).map_err(map_serial_error)?;
            self.read_timeout = timeout;
        }
        match self.port.read(buf) {
            Ok(0) => Err(TransportError::Timeout),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Err(TransportError::Timeout)
            },
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.port.clear(ClearBuffer::Input).map_err(map_serial_error)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            // 端口句柄在 Drop 时释放，这里只标记并清空缓冲
            if let Err(e) = self.port.clear(ClearBuffer::All) {
                debug!("Ignoring buffer clear failure on close: {}", e);
            }
            self.closed = true;
            info!("Serial port closed: {}", self.port_id);
        }
        Ok(())
    }
}

/// 原生串口打开器
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, port_id: &str, baud_rate: u32) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(port_id, baud_rate)?))
    }
}

/// 系统串口枚举
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list_ports(&self) -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                warn!("Serial port enumeration failed: {}", e);
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_serial_error_kinds() {
        let cases = [
            (
                serialport::ErrorKind::NoDevice,
                TransportDeviceErrorKind::NotFound,
            ),
            (
                serialport::ErrorKind::InvalidInput,
                TransportDeviceErrorKind::UnsupportedConfig,
            ),
            (
                serialport::ErrorKind::Io(ErrorKind::PermissionDenied),
                TransportDeviceErrorKind::AccessDenied,
            ),
            (
                serialport::ErrorKind::Io(ErrorKind::ResourceBusy),
                TransportDeviceErrorKind::Busy,
            ),
            (
                serialport::ErrorKind::Unknown,
                TransportDeviceErrorKind::Unknown,
            ),
        ];

        for (input, expected) in cases {
            match map_serial_error(serialport::Error::new(input, "test")) {
                TransportError::Device(e) => {
                    assert_eq!(e.kind, expected);
                    assert_eq!(e.message, "test");
                },
                other => panic!("Expected Device variant, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialConnector.open("/dev/armlink-does-not-exist", 9600);
        assert!(matches!(result, Err(TransportError::Device(_))));
    }

    #[test]
    fn test_system_ports_never_panics() {
        let _ = SystemPorts.list_ports();
    }
}
