//! 设置目标命令
//!
//! 合并目标 -> 等待硬件确认 -> 输出确认后的状态

use crate::session::{LinkArgs, Session};
use crate::validation::build_patch;
use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use tracing::info;

/// 设置目标参数
#[derive(Args, Debug, Clone)]
pub struct SetCommand {
    /// 关节角（度），逗号分隔，依次对应 J1..J6；空位表示不修改
    /// 例如：45,90,,120
    #[arg(short, long, allow_hyphen_values = true)]
    pub joints: Option<String>,

    /// 速度（%）
    #[arg(short, long, allow_negative_numbers = true)]
    pub speed: Option<i32>,

    /// 数字输出，格式 N=on|off，可重复
    #[arg(short, long = "output")]
    pub outputs: Vec<String>,

    /// 等待硬件确认的超时（毫秒）
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// 只设置目标，不等待确认
    #[arg(long)]
    pub no_wait: bool,
}

impl SetCommand {
    pub fn execute(&self, args: &LinkArgs) -> Result<()> {
        let patch = build_patch(self.joints.as_deref(), self.speed, &self.outputs)?;

        let session = Session::open(args)?;
        let target = session.link.set_target(&patch);
        info!("Target: joints={:?} speed={}", target.joints, target.speed);

        if self.no_wait {
            return Ok(());
        }

        session
            .link
            .wait_until_converged(Duration::from_millis(self.timeout_ms))
            .with_context(|| format!("{} 上的目标未在 {}ms 内到达", session.port, self.timeout_ms))?;

        let current = session.link.current();
        println!(
            "{}",
            serde_json::to_string_pretty(&current).context("序列化状态失败")?
        );
        Ok(())
    }
}
