//! # Armlink Protocol
//!
//! 6 轴舵机机械臂的状态模型与串口帧编解码（无硬件依赖）
//!
//! ## 模块
//!
//! - `state`: `RobotState`、部分更新 `StatePatch`、差量 `Delta` 与值域钳制
//! - `codec`: `FrameCodec` trait（可插拔的硬件帧格式）
//! - `binary`: 默认的 15 字节二进制帧格式
//!
//! ## 在架构中的位置
//!
//! ```text
//! Driver Layer (armlink-driver)
//!     ↓ diff(target, current) → encode_delta()
//! Protocol Layer (此 crate)
//!     ↓ Bytes
//! Serial Layer (armlink-serial)
//!     ↓ Transport
//! Hardware
//! ```
//!
//! 编码是纯函数：相同输入总是得到相同字节，因此重传是幂等的。
//! 解码对任意输入都是全函数：截断、损坏或越界的帧返回 `DecodeError`，绝不 panic。

pub mod binary;
pub mod codec;
pub mod state;

pub use binary::BinaryFrameCodec;
pub use codec::FrameCodec;
pub use state::*;

use thiserror::Error;

/// 解码错误
///
/// 每个变体都意味着整帧被丢弃，不会有任何字段被部分应用。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Oversized frame: expected {expected} bytes, got {actual}")]
    Oversized { expected: usize, actual: usize },

    #[error("Bad start marker: 0x{found:02X}")]
    BadHeader { found: u8 },

    #[error("Bad end marker: 0x{found:02X}")]
    BadTrailer { found: u8 },

    #[error("Field {field} out of range: {value} (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u8,
        max: u8,
    },

    #[error("Field {field} is not a boolean: 0x{value:02X}")]
    InvalidBool { field: &'static str, value: u8 },
}

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 编码前的值域断言失败
    ///
    /// 编解码器不做静默钳制：越界值说明上游（State Store）漏掉了钳制。
    #[error("Value for field {field} outside domain: {value} (max {max})")]
    OutOfDomain {
        field: &'static str,
        value: u8,
        max: u8,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}
