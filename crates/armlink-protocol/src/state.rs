//! 机械臂状态模型
//!
//! `RobotState` 是固定形状的记录：6 个关节角（整数度，[0, 180]）、
//! 1 个速度值（整数百分比，[0, 100]）、3 个数字输出、3 个数字输入。
//!
//! 数字输入只能来自解码后的硬件状态帧，因此 `StatePatch` 和 `Delta`
//! 都不包含数字输入字段。

use crate::ProtocolError;

/// 关节数量
pub const JOINT_COUNT: usize = 6;
/// 数字输出数量
pub const DIGITAL_OUTPUT_COUNT: usize = 3;
/// 数字输入数量
pub const DIGITAL_INPUT_COUNT: usize = 3;

/// 关节角下限（度）
pub const JOINT_MIN_DEG: u8 = 0;
/// 关节角上限（度）
pub const JOINT_MAX_DEG: u8 = 180;
/// 速度下限（%）
pub const SPEED_MIN: u8 = 0;
/// 速度上限（%）
pub const SPEED_MAX: u8 = 100;

pub(crate) const JOINT_FIELDS: [&str; JOINT_COUNT] = [
    "joint_1", "joint_2", "joint_3", "joint_4", "joint_5", "joint_6",
];
pub(crate) const OUTPUT_FIELDS: [&str; DIGITAL_OUTPUT_COUNT] =
    ["digital_output_1", "digital_output_2", "digital_output_3"];
pub(crate) const INPUT_FIELDS: [&str; DIGITAL_INPUT_COUNT] =
    ["digital_input_1", "digital_input_2", "digital_input_3"];
pub(crate) const SPEED_FIELD: &str = "speed";

/// 关节编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Joint {
    J1 = 0,
    J2 = 1,
    J3 = 2,
    J4 = 3,
    J5 = 4,
    J6 = 5,
}

impl Joint {
    /// 全部关节（按帧内顺序）
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::J1,
        Joint::J2,
        Joint::J3,
        Joint::J4,
        Joint::J5,
        Joint::J6,
    ];

    /// 数组下标（0-based）
    pub fn index(self) -> usize {
        self as usize
    }

    /// 从 1-based 编号构造（`1..=6`）
    pub fn from_number(number: usize) -> Option<Self> {
        number.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    /// 字段名（`joint_1` .. `joint_6`）
    pub fn field_name(self) -> &'static str {
        JOINT_FIELDS[self.index()]
    }
}

/// 数字输出编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DigitalOutput {
    Do1 = 0,
    Do2 = 1,
    Do3 = 2,
}

impl DigitalOutput {
    pub const ALL: [DigitalOutput; DIGITAL_OUTPUT_COUNT] =
        [DigitalOutput::Do1, DigitalOutput::Do2, DigitalOutput::Do3];

    pub fn index(self) -> usize {
        self as usize
    }

    /// 从 1-based 编号构造（`1..=3`）
    pub fn from_number(number: usize) -> Option<Self> {
        number.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn field_name(self) -> &'static str {
        OUTPUT_FIELDS[self.index()]
    }
}

/// 将任意整数钳制到关节角值域
pub fn clamp_joint(degrees: i32) -> u8 {
    degrees.clamp(JOINT_MIN_DEG as i32, JOINT_MAX_DEG as i32) as u8
}

/// 将任意整数钳制到速度值域
pub fn clamp_speed(percent: i32) -> u8 {
    percent.clamp(SPEED_MIN as i32, SPEED_MAX as i32) as u8
}

/// 机械臂状态快照
///
/// 同一类型同时用于 `current`（硬件最后确认的状态）和 `target`（操作员意图）。
/// 两者之间的差异是正常现象，不是错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotState {
    /// 关节角（度）[J1, J2, J3, J4, J5, J6]
    pub joints: [u8; JOINT_COUNT],
    /// 速度（%）
    pub speed: u8,
    /// 数字输出 [DO1, DO2, DO3]（可读写）
    pub digital_outputs: [bool; DIGITAL_OUTPUT_COUNT],
    /// 数字输入 [DI1, DI2, DI3]（只读，来自硬件）
    pub digital_inputs: [bool; DIGITAL_INPUT_COUNT],
}

impl RobotState {
    /// 读取单个关节角
    pub fn joint(&self, joint: Joint) -> u8 {
        self.joints[joint.index()]
    }

    /// 读取单个数字输出
    pub fn output(&self, output: DigitalOutput) -> bool {
        self.digital_outputs[output.index()]
    }

    /// 检查所有数值字段是否在值域内
    ///
    /// 返回第一个越界字段。
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for joint in Joint::ALL {
            let value = self.joint(joint);
            if value > JOINT_MAX_DEG {
                return Err(ProtocolError::OutOfDomain {
                    field: joint.field_name(),
                    value,
                    max: JOINT_MAX_DEG,
                });
            }
        }
        if self.speed > SPEED_MAX {
            return Err(ProtocolError::OutOfDomain {
                field: SPEED_FIELD,
                value: self.speed,
                max: SPEED_MAX,
            });
        }
        Ok(())
    }

    /// 返回值域钳制后的副本
    pub fn clamped(mut self) -> Self {
        for value in &mut self.joints {
            *value = (*value).min(JOINT_MAX_DEG);
        }
        self.speed = self.speed.min(SPEED_MAX);
        self
    }

    /// 在本状态上应用差量
    ///
    /// 数字输入原样保留。
    pub fn apply(&self, delta: &Delta) -> RobotState {
        let mut next = *self;
        for (slot, change) in next.joints.iter_mut().zip(delta.joints) {
            if let Some(value) = change {
                *slot = value;
            }
        }
        if let Some(speed) = delta.speed {
            next.speed = speed;
        }
        for (slot, change) in next.digital_outputs.iter_mut().zip(delta.digital_outputs) {
            if let Some(value) = change {
                *slot = value;
            }
        }
        next
    }

    /// 可下发字段（关节、速度、数字输出）是否与 `other` 一致
    pub fn commandable_eq(&self, other: &RobotState) -> bool {
        self.joints == other.joints
            && self.speed == other.speed
            && self.digital_outputs == other.digital_outputs
    }
}

/// 部分状态更新（操作员侧）
///
/// 数值使用 `i32`，以便表达越界输入（如 -5、200），
/// 在合并进 `target` 时统一钳制。
///
/// # 示例
///
/// ```
/// use armlink_protocol::{DigitalOutput, Joint, RobotState, StatePatch};
///
/// let patch = StatePatch::new()
///     .joint(Joint::J1, 200)
///     .speed(-3)
///     .output(DigitalOutput::Do2, true);
///
/// let next = patch.merge_into(RobotState::default());
/// assert_eq!(next.joint(Joint::J1), 180);
/// assert_eq!(next.speed, 0);
/// assert!(next.output(DigitalOutput::Do2));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatePatch {
    pub joints: [Option<i32>; JOINT_COUNT],
    pub speed: Option<i32>,
    pub digital_outputs: [Option<bool>; DIGITAL_OUTPUT_COUNT],
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn joint(mut self, joint: Joint, degrees: i32) -> Self {
        self.joints[joint.index()] = Some(degrees);
        self
    }

    pub fn joints(mut self, degrees: [i32; JOINT_COUNT]) -> Self {
        self.joints = degrees.map(Some);
        self
    }

    pub fn speed(mut self, percent: i32) -> Self {
        self.speed = Some(percent);
        self
    }

    pub fn output(mut self, output: DigitalOutput, on: bool) -> Self {
        self.digital_outputs[output.index()] = Some(on);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.joints.iter().all(Option::is_none)
            && self.speed.is_none()
            && self.digital_outputs.iter().all(Option::is_none)
    }

    /// 将 `later` 叠加到本补丁之上（后者优先）
    pub fn then(mut self, later: &StatePatch) -> Self {
        for (slot, value) in self.joints.iter_mut().zip(later.joints) {
            if value.is_some() {
                *slot = value;
            }
        }
        if later.speed.is_some() {
            self.speed = later.speed;
        }
        for (slot, value) in self.digital_outputs.iter_mut().zip(later.digital_outputs) {
            if value.is_some() {
                *slot = value;
            }
        }
        self
    }

    /// 合并进 `base`，所有数值钳制到值域内
    pub fn merge_into(&self, base: RobotState) -> RobotState {
        let mut next = base.clamped();
        for (slot, value) in next.joints.iter_mut().zip(self.joints) {
            if let Some(degrees) = value {
                *slot = clamp_joint(degrees);
            }
        }
        if let Some(percent) = self.speed {
            next.speed = clamp_speed(percent);
        }
        for (slot, value) in next.digital_outputs.iter_mut().zip(self.digital_outputs) {
            if let Some(on) = value {
                *slot = on;
            }
        }
        next
    }
}

/// 可下发字段的位掩码
///
/// Bit 0-5 对应 J1-J6，Bit 6 对应速度，Bit 7-9 对应 DO1-DO3。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldMask(u16);

impl FieldMask {
    const SPEED_BIT: u16 = 1 << JOINT_COUNT;
    const OUTPUT_SHIFT: usize = JOINT_COUNT + 1;

    /// 空掩码
    pub const NONE: FieldMask = FieldMask(0);
    /// 全部可下发字段
    pub const ALL: FieldMask = FieldMask((1 << (JOINT_COUNT + 1 + DIGITAL_OUTPUT_COUNT)) - 1);

    /// 补丁中出现的字段
    pub fn from_patch(patch: &StatePatch) -> Self {
        let mut bits = 0u16;
        for (i, value) in patch.joints.iter().enumerate() {
            if value.is_some() {
                bits |= 1 << i;
            }
        }
        if patch.speed.is_some() {
            bits |= Self::SPEED_BIT;
        }
        for (i, value) in patch.digital_outputs.iter().enumerate() {
            if value.is_some() {
                bits |= 1 << (Self::OUTPUT_SHIFT + i);
            }
        }
        FieldMask(bits)
    }

    pub fn union(self, other: FieldMask) -> Self {
        FieldMask(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn has_joint(self, joint: Joint) -> bool {
        self.0 & (1 << joint.index()) != 0
    }

    pub fn has_speed(self) -> bool {
        self.0 & Self::SPEED_BIT != 0
    }

    pub fn has_output(self, output: DigitalOutput) -> bool {
        self.0 & (1 << (Self::OUTPUT_SHIFT + output.index())) != 0
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

/// `target` 与 `current` 之间的逐字段差量
///
/// 只包含可下发字段；`None` 表示该字段已一致。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delta {
    pub joints: [Option<u8>; JOINT_COUNT],
    pub speed: Option<u8>,
    pub digital_outputs: [Option<bool>; DIGITAL_OUTPUT_COUNT],
}

impl Delta {
    /// 计算从 `current` 到 `target` 需要改变的字段
    pub fn between(current: &RobotState, target: &RobotState) -> Self {
        let mut delta = Delta::default();
        for joint in Joint::ALL {
            let i = joint.index();
            if current.joints[i] != target.joints[i] {
                delta.joints[i] = Some(target.joints[i]);
            }
        }
        if current.speed != target.speed {
            delta.speed = Some(target.speed);
        }
        for output in DigitalOutput::ALL {
            let i = output.index();
            if current.digital_outputs[i] != target.digital_outputs[i] {
                delta.digital_outputs[i] = Some(target.digital_outputs[i]);
            }
        }
        delta
    }

    /// 只保留 `mask` 中的字段
    pub fn restricted_to(mut self, mask: FieldMask) -> Self {
        for joint in Joint::ALL {
            if !mask.has_joint(joint) {
                self.joints[joint.index()] = None;
            }
        }
        if !mask.has_speed() {
            self.speed = None;
        }
        for output in DigitalOutput::ALL {
            if !mask.has_output(output) {
                self.digital_outputs[output.index()] = None;
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields() == 0
    }

    /// 是否有数字输出变化待下发
    pub fn has_output_change(&self) -> bool {
        self.digital_outputs.iter().any(Option::is_some)
    }

    /// 变化字段数量
    pub fn changed_fields(&self) -> usize {
        self.joints.iter().filter(|v| v.is_some()).count()
            + usize::from(self.speed.is_some())
            + self.digital_outputs.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_joint_boundaries() {
        assert_eq!(clamp_joint(-5), 0);
        assert_eq!(clamp_joint(200), 180);
        assert_eq!(clamp_joint(90), 90);
        assert_eq!(clamp_joint(i32::MIN), 0);
        assert_eq!(clamp_joint(i32::MAX), 180);
    }

    #[test]
    fn test_clamp_speed_boundaries() {
        assert_eq!(clamp_speed(-1), 0);
        assert_eq!(clamp_speed(101), 100);
        assert_eq!(clamp_speed(55), 55);
    }

    #[test]
    fn test_joint_from_number() {
        assert_eq!(Joint::from_number(1), Some(Joint::J1));
        assert_eq!(Joint::from_number(6), Some(Joint::J6));
        assert_eq!(Joint::from_number(0), None);
        assert_eq!(Joint::from_number(7), None);
        assert_eq!(Joint::J4.field_name(), "joint_4");
    }

    #[test]
    fn test_validate_rejects_out_of_domain() {
        let mut state = RobotState::default();
        state.joints[2] = 181;
        assert_eq!(
            state.validate(),
            Err(ProtocolError::OutOfDomain {
                field: "joint_3",
                value: 181,
                max: 180
            })
        );

        let mut state = RobotState::default();
        state.speed = 250;
        assert!(matches!(
            state.validate(),
            Err(ProtocolError::OutOfDomain { field: "speed", .. })
        ));
    }

    #[test]
    fn test_patch_merge_clamps_and_keeps_inputs() {
        let base = RobotState {
            joints: [10, 20, 30, 40, 50, 60],
            speed: 50,
            digital_outputs: [false, true, false],
            digital_inputs: [true, false, true],
        };
        let patch = StatePatch::new()
            .joint(Joint::J1, -5)
            .joint(Joint::J6, 200)
            .speed(150)
            .output(DigitalOutput::Do1, true);

        let next = patch.merge_into(base);
        assert_eq!(next.joints, [0, 20, 30, 40, 50, 180]);
        assert_eq!(next.speed, 100);
        assert_eq!(next.digital_outputs, [true, true, false]);
        assert_eq!(next.digital_inputs, base.digital_inputs);
    }

    #[test]
    fn test_patch_then_later_wins() {
        let first = StatePatch::new().joint(Joint::J1, 10).speed(20);
        let second = StatePatch::new().joint(Joint::J1, 30);
        let merged = first.then(&second);
        assert_eq!(merged.joints[0], Some(30));
        assert_eq!(merged.speed, Some(20));
        assert!(!merged.is_empty());
        assert!(StatePatch::new().is_empty());
    }

    #[test]
    fn test_delta_between_and_apply() {
        let current = RobotState {
            joints: [90; JOINT_COUNT],
            speed: 50,
            ..Default::default()
        };
        let mut target = current;
        target.joints[0] = 45;
        target.digital_outputs[2] = true;
        target.digital_inputs[0] = true; // 输入不参与 diff

        let delta = Delta::between(&current, &target);
        assert_eq!(delta.changed_fields(), 2);
        assert_eq!(delta.joints[0], Some(45));
        assert!(delta.has_output_change());

        let commanded = current.apply(&delta);
        assert_eq!(commanded.joints[0], 45);
        assert_eq!(commanded.joints[1..], [90; 5]);
        assert!(commanded.digital_outputs[2]);
        assert_eq!(commanded.digital_inputs, current.digital_inputs);
        assert!(commanded.commandable_eq(&target));
    }

    #[test]
    fn test_field_mask_from_patch() {
        let patch = StatePatch::new()
            .joint(Joint::J2, 10)
            .output(DigitalOutput::Do3, true);
        let mask = FieldMask::from_patch(&patch);
        assert!(mask.has_joint(Joint::J2));
        assert!(!mask.has_joint(Joint::J1));
        assert!(!mask.has_speed());
        assert!(mask.has_output(DigitalOutput::Do3));
        assert!(FieldMask::from_patch(&StatePatch::new()).is_empty());
        assert_eq!(FieldMask::ALL.bits(), 0x3FF);

        let speed = FieldMask::from_patch(&StatePatch::new().speed(10));
        assert!(mask.union(speed).has_speed());
    }

    #[test]
    fn test_delta_restricted_to_mask() {
        let current = RobotState::default();
        let target = RobotState {
            joints: [10; JOINT_COUNT],
            speed: 20,
            digital_outputs: [true; DIGITAL_OUTPUT_COUNT],
            ..Default::default()
        };
        let mask = FieldMask::from_patch(&StatePatch::new().joint(Joint::J1, 10));

        let delta = Delta::between(&current, &target).restricted_to(mask);
        assert_eq!(delta.changed_fields(), 1);
        assert_eq!(delta.joints[0], Some(10));

        let full = Delta::between(&current, &target).restricted_to(FieldMask::ALL);
        assert_eq!(full.changed_fields(), 10);
    }

    #[test]
    fn test_delta_empty_when_only_inputs_differ() {
        let current = RobotState::default();
        let mut target = current;
        target.digital_inputs = [true; DIGITAL_INPUT_COUNT];
        assert!(Delta::between(&current, &target).is_empty());
    }
}
