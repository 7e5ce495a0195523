//! 驱动层错误类型定义

use crate::config::ConfigError;
use armlink_protocol::{DecodeError, ProtocolError};
use armlink_serial::{TransportDeviceErrorKind, TransportError};
use thiserror::Error;

/// 连接失败原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// 端口不存在或不可用
    Unavailable,
    /// 无权限
    PermissionDenied,
    /// 端口被占用
    Busy,
    /// 波特率等参数不被支持
    InvalidConfig,
    /// 打开过程中被 `disconnect()` 取消
    Cancelled,
    /// 其他 I/O 失败
    Io,
}

/// 连接错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {reason}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub reason: String,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::Device(device) => match device.kind {
                TransportDeviceErrorKind::NotFound => ConnectErrorKind::Unavailable,
                TransportDeviceErrorKind::AccessDenied => ConnectErrorKind::PermissionDenied,
                TransportDeviceErrorKind::Busy => ConnectErrorKind::Busy,
                TransportDeviceErrorKind::UnsupportedConfig => ConnectErrorKind::InvalidConfig,
                TransportDeviceErrorKind::Backend | TransportDeviceErrorKind::Unknown => {
                    ConnectErrorKind::Unavailable
                },
            },
            TransportError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                ConnectErrorKind::PermissionDenied
            },
            TransportError::Io(_) | TransportError::Timeout | TransportError::Closed => {
                ConnectErrorKind::Io
            },
        };
        ConnectError::new(kind, err.to_string())
    }
}

/// 连接状态流中携带的故障原因
///
/// 与 `DriverError` 不同，它可以克隆并随状态广播给所有观察者。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkFault {
    #[error("Connect failed: {0}")]
    ConnectFailed(ConnectError),

    #[error("I/O failure: {reason}")]
    Io { reason: String },

    #[error("Link lost after {attempts} failed attempts")]
    LinkLost { attempts: u32 },
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 打开端口失败
    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// 已有一个连接请求正在进行
    #[error("Connect already in progress")]
    AlreadyConnecting,

    /// 连接已打开
    #[error("Already connected")]
    AlreadyConnected,

    /// 连接不处于 Open 状态
    #[error("Not connected")]
    NotConnected,

    /// 在单次命令超时预算内没有收到响应
    #[error("Response timeout")]
    Timeout,

    /// 响应帧损坏
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// 编码失败（值域断言）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 底层 I/O 故障（连接已转入 Faulted）
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// 重试耗尽
    #[error("Link lost after {attempts} failed attempts")]
    LinkLost { attempts: u32 },

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 同步线程启动失败
    #[error("Failed to spawn sync thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// 没有可用的 Connector（未启用 native feature 且未显式提供）
    #[error("No connector configured")]
    NoConnector,
}

impl DriverError {
    /// 是否可以通过重试同一帧恢复（超时或解码失败）
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DriverError::Timeout | DriverError::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_serial::TransportDeviceError;

    #[test]
    fn test_driver_error_display() {
        assert_eq!(DriverError::NotConnected.to_string(), "Not connected");
        assert_eq!(DriverError::Timeout.to_string(), "Response timeout");
        assert_eq!(
            DriverError::LinkLost { attempts: 3 }.to_string(),
            "Link lost after 3 failed attempts"
        );

        let err = DriverError::Connect(ConnectError::new(ConnectErrorKind::Busy, "COM3"));
        assert_eq!(err.to_string(), "Connect failed: Busy: COM3");
    }

    #[test]
    fn test_connect_error_from_transport_error() {
        let cases = [
            (TransportDeviceErrorKind::NotFound, ConnectErrorKind::Unavailable),
            (
                TransportDeviceErrorKind::AccessDenied,
                ConnectErrorKind::PermissionDenied,
            ),
            (TransportDeviceErrorKind::Busy, ConnectErrorKind::Busy),
            (
                TransportDeviceErrorKind::UnsupportedConfig,
                ConnectErrorKind::InvalidConfig,
            ),
        ];
        for (device_kind, expected) in cases {
            let err: ConnectError =
                TransportError::Device(TransportDeviceError::new(device_kind, "x")).into();
            assert_eq!(err.kind, expected);
        }

        let err: ConnectError = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .into();
        assert_eq!(err.kind, ConnectErrorKind::PermissionDenied);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(DriverError::Timeout.is_recoverable());
        assert!(DriverError::Decode(DecodeError::BadHeader { found: 0 }).is_recoverable());
        assert!(!DriverError::NotConnected.is_recoverable());
        assert!(!DriverError::LinkLost { attempts: 3 }.is_recoverable());
    }
}
