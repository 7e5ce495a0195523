//! 帧编解码接口
//!
//! 具体字节布局是硬件相关的契约，通过 `FrameCodec` 插拔。
//! 驱动层只依赖此 trait，不关心帧内布局。

use crate::{Delta, DecodeError, ProtocolError, RobotState};
use bytes::Bytes;

/// 帧编解码器
///
/// # 约定
///
/// - **确定性**：相同输入必须得到相同字节（重传幂等）
/// - **全函数解码**：任意字节序列都返回 `Ok` 或 `DecodeError`，不得 panic
/// - **只断言值域**：编码前越界返回 `ProtocolError::OutOfDomain`，不做静默钳制
pub trait FrameCodec: Send + Sync {
    /// 编码一条命令帧（完整的下发状态）
    fn encode_command(&self, commanded: &RobotState) -> Result<Bytes, ProtocolError>;

    /// 编码轻量级的状态查询帧
    fn encode_state_request(&self) -> Bytes;

    /// 硬件响应（状态报告）帧长度
    fn response_len(&self) -> usize;

    /// 在接收缓冲区中查找可能的帧起点
    ///
    /// 返回 `None` 表示缓冲区内没有帧起点，可以整体丢弃。
    /// 默认实现认为缓冲区总是从帧起点开始。
    fn frame_start(&self, buf: &[u8]) -> Option<usize> {
        if buf.is_empty() { None } else { Some(0) }
    }

    /// 解码一帧状态报告
    fn decode(&self, frame: &[u8]) -> Result<RobotState, DecodeError>;

    /// 将差量应用到 `current` 后编码
    ///
    /// 固定布局的帧总是携带全部字段，未变化字段取自 `current`。
    fn encode_delta(&self, current: &RobotState, delta: &Delta) -> Result<Bytes, ProtocolError> {
        self.encode_command(&current.apply(delta))
    }
}
