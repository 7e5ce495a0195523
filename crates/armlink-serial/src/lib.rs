//! # Armlink Serial Layer
//!
//! 字节流传输抽象层：打开、读、写、关闭，支持配置波特率。
//!
//! - `Transport`: 一个已打开的字节流（由 Connection Manager 独占）
//! - `Connector`: 按 `(port_id, baud_rate)` 打开 `Transport`
//! - `PortEnumerator`: 端口枚举（外部协作者）
//!
//! 后端：
//! - `native`（默认 feature）：基于 `serialport` 的真实串口
//! - `sim`：进程内模拟控制板，用于测试和无硬件调试

use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "native")]
pub use native::{SerialConnector, SerialTransport, SystemPorts};

pub mod sim;

pub use sim::{SimConnector, SimPorts, SimulatedDevice};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// 是否为读超时（非故障）
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportDeviceError {
    fn from(message: &str) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

/// 已打开的字节流
pub trait Transport: Send {
    /// 端口标识
    fn port_id(&self) -> &str;

    /// 写入全部字节
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// 读取可用字节，最多等待 `timeout`
    ///
    /// 没有任何字节到达时返回 `TransportError::Timeout`。
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// 丢弃接收缓冲区中尚未读取的字节
    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// 关闭传输（幂等）
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// 传输打开器
pub trait Connector: Send + Sync {
    fn open(&self, port_id: &str, baud_rate: u32) -> Result<Box<dyn Transport>, TransportError>;
}

/// 端口枚举
///
/// 没有端口时返回空列表，而不是错误。
pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "Read timeout");
        assert_eq!(TransportError::Closed.to_string(), "Transport closed");

        let err: TransportError =
            TransportDeviceError::new(TransportDeviceErrorKind::Busy, "COM3 in use").into();
        assert_eq!(err.to_string(), "Device Error: Busy: COM3 in use");
    }

    #[test]
    fn test_is_timeout() {
        assert!(TransportError::Timeout.is_timeout());
        assert!(!TransportError::Closed.is_timeout());
    }

    #[test]
    fn test_device_error_from_str() {
        let err: TransportDeviceError = "boom".into();
        assert_eq!(err.kind, TransportDeviceErrorKind::Unknown);
        assert_eq!(err.message, "boom");
    }
}
