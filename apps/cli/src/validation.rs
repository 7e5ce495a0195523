//! 输入解析与验证
//!
//! 把命令行参数转换为 `StatePatch`。越界的数值不会报错（驱动层会钳制），
//! 但会打印警告，提醒操作员实际下发的值。

use anyhow::{Context, Result};
use armlink_protocol::{
    DIGITAL_OUTPUT_COUNT, DigitalOutput, JOINT_COUNT, JOINT_MAX_DEG, JOINT_MIN_DEG, Joint,
    SPEED_MAX, SPEED_MIN, StatePatch, clamp_joint, clamp_speed,
};
use tracing::warn;

/// 解析逗号分隔的关节角（度），依次对应 J1..Jn
///
/// 空位表示不修改该关节，例如 `45,,90` 只修改 J1 和 J3。
pub fn parse_joints(input: &str) -> Result<[Option<i32>; JOINT_COUNT]> {
    let parts: Vec<&str> = input.split(',').map(str::trim).collect();
    if parts.len() > JOINT_COUNT {
        anyhow::bail!("最多支持 {} 个关节，得到 {} 个", JOINT_COUNT, parts.len());
    }

    let mut joints = [None; JOINT_COUNT];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        let degrees: i32 = part
            .parse()
            .with_context(|| format!("关节 J{} 的角度无效: {:?}", i + 1, part))?;
        joints[i] = Some(degrees);
    }

    if joints.iter().all(Option::is_none) {
        anyhow::bail!("关节角不能为空");
    }
    Ok(joints)
}

/// 解析数字输出设置，格式 `<n>=<on|off|1|0|true|false>`，n 从 1 开始
pub fn parse_output(input: &str) -> Result<(DigitalOutput, bool)> {
    let (index, value) = input
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("数字输出格式应为 N=on|off，得到 {:?}", input))?;

    let number: usize = index
        .trim()
        .parse()
        .with_context(|| format!("数字输出编号无效: {:?}", index))?;
    let output = DigitalOutput::from_number(number).ok_or_else(|| {
        anyhow::anyhow!("数字输出编号应在 1..={} 之间", DIGITAL_OUTPUT_COUNT)
    })?;

    let on = match value.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => true,
        "off" | "0" | "false" => false,
        other => anyhow::bail!("数字输出 DO{} 的值无效: {:?}", number, other),
    };
    Ok((output, on))
}

/// 组装部分更新，对将被钳制的值发出警告
pub fn build_patch(
    joints: Option<&str>,
    speed: Option<i32>,
    outputs: &[String],
) -> Result<StatePatch> {
    let mut patch = StatePatch::new();

    if let Some(joints) = joints {
        for (joint, value) in Joint::ALL.into_iter().zip(parse_joints(joints)?) {
            if let Some(degrees) = value {
                let clamped = clamp_joint(degrees);
                if i32::from(clamped) != degrees {
                    warn!(
                        "{} = {} 超出 [{}, {}]，将被钳制为 {}",
                        joint.field_name(),
                        degrees,
                        JOINT_MIN_DEG,
                        JOINT_MAX_DEG,
                        clamped
                    );
                }
                patch = patch.joint(joint, degrees);
            }
        }
    }

    if let Some(percent) = speed {
        let clamped = clamp_speed(percent);
        if i32::from(clamped) != percent {
            warn!(
                "speed = {} 超出 [{}, {}]，将被钳制为 {}",
                percent, SPEED_MIN, SPEED_MAX, clamped
            );
        }
        patch = patch.speed(percent);
    }

    for output in outputs {
        let (output, on) = parse_output(output)?;
        patch = patch.output(output, on);
    }

    if patch.is_empty() {
        anyhow::bail!("没有指定任何目标，请使用 --joints、--speed 或 --output");
    }
    Ok(patch)
}
