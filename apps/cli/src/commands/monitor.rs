//! 监控命令
//!
//! 按轮询周期输出 `current` 快照（JSON Lines），直到 Ctrl-C、链路故障或达到次数上限。
//! `--changes-only` 时只在 `current` 变化时输出。

use crate::session::{LinkArgs, Session};
use anyhow::{Context, Result};
use armlink_driver::ConnectionState;
use clap::Args;
use crossbeam_channel::select;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 检查 Ctrl-C 的间隔
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// 监控参数
#[derive(Args, Debug, Clone)]
pub struct MonitorCommand {
    /// 输出指定数量的状态后退出（默认一直运行）
    #[arg(short, long)]
    pub count: Option<usize>,

    /// 轮询周期（毫秒，覆盖配置文件），同时也是输出周期
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// 只在状态变化时输出
    #[arg(long)]
    pub changes_only: bool,
}

impl MonitorCommand {
    pub fn execute(&self, args: &LinkArgs) -> Result<()> {
        let session = Session::open_with(args, |config| {
            if let Some(interval) = self.interval_ms {
                config.poll_interval_ms = interval;
            }
        })?;
        let link = &session.link;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        ctrlc::set_handler(move || running_clone.store(false, Ordering::SeqCst))
            .context("设置 Ctrl-C 处理器失败")?;

        let updates = link.observe_current();
        let statuses = link.observe_status();
        let ticker = crossbeam_channel::tick(link.config().poll_interval());

        // 首次同步的结果
        println!("{}", serde_json::to_string(&link.current())?);
        let mut printed = 1usize;

        while running.load(Ordering::SeqCst) && self.count.is_none_or(|limit| printed < limit) {
            select! {
                recv(ticker) -> _ => {
                    if !self.changes_only {
                        println!("{}", serde_json::to_string(&link.current())?);
                        printed += 1;
                    }
                },
                recv(updates) -> msg => match msg {
                    Ok(state) => {
                        if self.changes_only {
                            println!("{}", serde_json::to_string(&state)?);
                            printed += 1;
                        }
                    },
                    Err(_) => break,
                },
                recv(statuses) -> msg => match msg {
                    Ok(status) if status.state == ConnectionState::Faulted => {
                        let reason = status
                            .last_error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        anyhow::bail!("链路故障: {}", reason);
                    },
                    Ok(_) => {},
                    Err(_) => break,
                },
                default(STOP_CHECK_INTERVAL) => {},
            }
        }

        let metrics = link.metrics();
        eprintln!(
            "frames sent={} received={} retries={} timeouts={} decode_errors={} failure_rate={:.1}%",
            metrics.frames_sent,
            metrics.frames_received,
            metrics.retries,
            metrics.timeouts,
            metrics.decode_errors,
            metrics.failure_rate()
        );
        Ok(())
    }
}
