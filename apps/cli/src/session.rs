//! 一次性会话：加载配置 -> 构建链路 -> 连接 -> 等待首次同步
//!
//! 每个需要硬件的子命令都通过 `Session::open` 获得一个已同步的 `RobotLink`，
//! 会话结束时（drop）自动断开并停止同步线程。

use anyhow::{Context, Result};
use armlink_driver::{LinkConfig, RobotLink, RobotLinkBuilder, SIM_PORT};
use armlink_protocol::RobotState;
use armlink_serial::SimulatedDevice;
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// 配置文件名
const CONFIG_FILE: &str = "config.toml";

/// 首次同步至少等待的时间
const MIN_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// 连接参数（所有子命令共享）
#[derive(Args, Debug, Clone, Default)]
pub struct LinkArgs {
    /// 配置文件路径（默认 <config_dir>/armlink/config.toml，不存在时使用内置默认值）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 串口名称（如 /dev/ttyUSB0、COM3），默认使用第一个可用端口
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// 波特率（覆盖配置文件中的 default_baud_rate）
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// 使用进程内模拟控制板，不访问硬件
    #[arg(long, global = true)]
    pub simulate: bool,
}

/// 默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("armlink").join(CONFIG_FILE))
}

/// 按优先级加载配置：`--config` > 默认路径 > 内置默认值
pub fn load_config(explicit: Option<&Path>) -> Result<LinkConfig> {
    if let Some(path) = explicit {
        return LinkConfig::load(path)
            .with_context(|| format!("加载配置文件 {} 失败", path.display()));
    }
    match default_config_path() {
        Some(path) if path.exists() => LinkConfig::load(&path)
            .with_context(|| format!("加载配置文件 {} 失败", path.display())),
        _ => Ok(LinkConfig::default()),
    }
}

/// 模拟控制板的初始姿态（各关节居中）
fn simulated_home() -> RobotState {
    RobotState {
        joints: [90; 6],
        speed: 50,
        ..RobotState::default()
    }
}

/// 构建链路（不连接）
pub fn build_link(args: &LinkArgs) -> Result<RobotLink> {
    build_link_with(args, |_| {})
}

/// 构建链路，允许命令行参数覆盖部分配置
pub fn build_link_with(args: &LinkArgs, overrides: impl FnOnce(&mut LinkConfig)) -> Result<RobotLink> {
    let mut config = load_config(args.config.as_deref())?;
    overrides(&mut config);
    let mut builder = RobotLinkBuilder::new().config(config);
    if args.simulate {
        builder = builder.simulated(SimulatedDevice::with_state(simulated_home()));
    }
    builder.build().context("初始化链路失败")
}

/// 已连接且完成首次同步的会话
pub struct Session {
    pub link: RobotLink,
    pub port: String,
}

impl Session {
    pub fn open(args: &LinkArgs) -> Result<Self> {
        Self::open_with(args, |_| {})
    }

    pub fn open_with(args: &LinkArgs, overrides: impl FnOnce(&mut LinkConfig)) -> Result<Self> {
        let link = build_link_with(args, overrides)?;

        let port = match (&args.port, args.simulate) {
            (Some(port), _) => port.clone(),
            (None, true) => SIM_PORT.to_string(),
            (None, false) => link
                .list_ports()
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("没有找到可用串口，请使用 --port 指定"))?,
        };
        let baud = args.baud.unwrap_or(link.config().default_baud_rate);

        link.connect(&port, baud)
            .with_context(|| format!("连接 {} @ {} 失败", port, baud))?;
        info!("Connected to {} @ {} baud", port, baud);

        let config = link.config();
        let sync_timeout = (config.command_timeout() + Duration::from_millis(config.backoff_cap_ms))
            * config.max_retries
            + MIN_SYNC_TIMEOUT;
        link.wait_until_synced(sync_timeout)
            .with_context(|| format!("读取 {} 上的硬件状态失败", port))?;

        Ok(Self { link, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_explicit_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 42").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.poll_interval_ms, 42);
    }

    #[test]
    fn test_load_missing_explicit_config_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/armlink.toml"))).is_err());
    }

    #[test]
    fn test_simulated_session_syncs() {
        let args = LinkArgs {
            config: None,
            port: None,
            baud: None,
            simulate: true,
        };
        let session = Session::open(&args).unwrap();
        assert_eq!(session.port, SIM_PORT);
        assert_eq!(session.link.current().joints, [90; 6]);
    }
}
