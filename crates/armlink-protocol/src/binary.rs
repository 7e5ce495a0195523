//! 默认二进制帧格式
//!
//! 与舵机控制板固件约定的 15 字节定长帧：
//!
//! ```text
//! byte:  0     1..=6    7..=9     10..=12    13     14
//!        0xFD  J1..J6   DI1..DI3  DO1..DO3   speed  0xFE
//! ```
//!
//! 命令帧与状态报告共用同一布局；状态查询帧固定为 `[0xFD, 0x00, 0xFE]`。
//! 有效载荷中的字节都不超过 180，因此 0xFD/0xFE 不会出现在载荷内，
//! 可以直接用帧头做重同步。

use crate::codec::FrameCodec;
use crate::state::{INPUT_FIELDS, JOINT_FIELDS, OUTPUT_FIELDS, SPEED_FIELD};
use crate::{
    DIGITAL_INPUT_COUNT, DIGITAL_OUTPUT_COUNT, DecodeError, JOINT_COUNT, JOINT_MAX_DEG,
    ProtocolError, RobotState, SPEED_MAX,
};
use bytes::Bytes;

/// 帧头
pub const FRAME_START: u8 = 0xFD;
/// 帧尾
pub const FRAME_END: u8 = 0xFE;
/// 状态帧长度
pub const STATE_FRAME_LEN: usize = 15;
/// 状态查询帧
pub const STATE_REQUEST_FRAME: [u8; 3] = [FRAME_START, 0x00, FRAME_END];

const JOINTS_OFFSET: usize = 1;
const INPUTS_OFFSET: usize = JOINTS_OFFSET + JOINT_COUNT;
const OUTPUTS_OFFSET: usize = INPUTS_OFFSET + DIGITAL_INPUT_COUNT;
const SPEED_OFFSET: usize = OUTPUTS_OFFSET + DIGITAL_OUTPUT_COUNT;
const END_OFFSET: usize = SPEED_OFFSET + 1;

/// 默认 15 字节二进制编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryFrameCodec;

impl BinaryFrameCodec {
    pub fn new() -> Self {
        Self
    }

    /// 编码为定长数组（不分配）
    pub fn encode_array(&self, state: &RobotState) -> Result<[u8; STATE_FRAME_LEN], ProtocolError> {
        state.validate()?;

        let mut data = [0u8; STATE_FRAME_LEN];
        data[0] = FRAME_START;
        data[JOINTS_OFFSET..INPUTS_OFFSET].copy_from_slice(&state.joints);
        for (i, &on) in state.digital_inputs.iter().enumerate() {
            data[INPUTS_OFFSET + i] = u8::from(on);
        }
        for (i, &on) in state.digital_outputs.iter().enumerate() {
            data[OUTPUTS_OFFSET + i] = u8::from(on);
        }
        data[SPEED_OFFSET] = state.speed;
        data[END_OFFSET] = FRAME_END;
        Ok(data)
    }
}

fn decode_bool(field: &'static str, value: u8) -> Result<bool, DecodeError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::InvalidBool { field, value }),
    }
}

impl FrameCodec for BinaryFrameCodec {
    fn encode_command(&self, commanded: &RobotState) -> Result<Bytes, ProtocolError> {
        let data = self.encode_array(commanded)?;
        Ok(Bytes::copy_from_slice(&data))
    }

    fn encode_state_request(&self) -> Bytes {
        Bytes::from_static(&STATE_REQUEST_FRAME)
    }

    fn response_len(&self) -> usize {
        STATE_FRAME_LEN
    }

    fn frame_start(&self, buf: &[u8]) -> Option<usize> {
        buf.iter().position(|&b| b == FRAME_START)
    }

    fn decode(&self, frame: &[u8]) -> Result<RobotState, DecodeError> {
        if frame.len() < STATE_FRAME_LEN {
            return Err(DecodeError::Truncated {
                expected: STATE_FRAME_LEN,
                actual: frame.len(),
            });
        }
        if frame.len() > STATE_FRAME_LEN {
            return Err(DecodeError::Oversized {
                expected: STATE_FRAME_LEN,
                actual: frame.len(),
            });
        }
        if frame[0] != FRAME_START {
            return Err(DecodeError::BadHeader { found: frame[0] });
        }
        if frame[END_OFFSET] != FRAME_END {
            return Err(DecodeError::BadTrailer {
                found: frame[END_OFFSET],
            });
        }

        // 先在局部变量中完成全部校验，最后一次性构造，避免部分应用
        let mut joints = [0u8; JOINT_COUNT];
        for (i, slot) in joints.iter_mut().enumerate() {
            let value = frame[JOINTS_OFFSET + i];
            if value > JOINT_MAX_DEG {
                return Err(DecodeError::OutOfRange {
                    field: JOINT_FIELDS[i],
                    value,
                    max: JOINT_MAX_DEG,
                });
            }
            *slot = value;
        }

        let mut digital_inputs = [false; DIGITAL_INPUT_COUNT];
        for (i, slot) in digital_inputs.iter_mut().enumerate() {
            *slot = decode_bool(INPUT_FIELDS[i], frame[INPUTS_OFFSET + i])?;
        }

        let mut digital_outputs = [false; DIGITAL_OUTPUT_COUNT];
        for (i, slot) in digital_outputs.iter_mut().enumerate() {
            *slot = decode_bool(OUTPUT_FIELDS[i], frame[OUTPUTS_OFFSET + i])?;
        }

        let speed = frame[SPEED_OFFSET];
        if speed > SPEED_MAX {
            return Err(DecodeError::OutOfRange {
                field: SPEED_FIELD,
                value: speed,
                max: SPEED_MAX,
            });
        }

        Ok(RobotState {
            joints,
            speed,
            digital_outputs,
            digital_inputs,
        })
    }
}
