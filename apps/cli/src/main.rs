//! # Armlink CLI
//!
//! 串口 6 轴舵机机械臂的命令行工具。
//!
//! 每条命令都是一次性的：连接 -> 读取硬件状态 -> 执行 -> 断开。
//!
//! ```bash
//! # 列出串口
//! armlink-cli ports
//!
//! # 读取当前状态
//! armlink-cli status --port /dev/ttyUSB0
//!
//! # 移动 J1 到 45°，打开 DO2，等待确认
//! armlink-cli set --port COM3 --baud 9600 --joints 45 --output 2=on
//!
//! # 无硬件调试
//! armlink-cli monitor --simulate --count 5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod session;
mod validation;

use commands::{ConfigCommand, MonitorCommand, SetCommand};
use session::LinkArgs;

/// Armlink CLI - 机械臂串口命令行工具
#[derive(Parser, Debug)]
#[command(name = "armlink-cli")]
#[command(about = "Command-line interface for serial 6-axis robot arms", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出可用串口
    Ports,

    /// 读取一次硬件状态（JSON）
    Status,

    /// 设置目标并等待硬件确认
    Set {
        #[command(flatten)]
        args: SetCommand,
    },

    /// 按轮询周期持续输出状态
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    // 初始化日志（输出到 stderr，stdout 只输出结果）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("armlink_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Ports => commands::ports::execute(&cli.link),
        Commands::Status => commands::status::execute(&cli.link),
        Commands::Set { args } => args.execute(&cli.link),
        Commands::Monitor { args } => args.execute(&cli.link),
        Commands::Config(cmd) => cmd.execute(cli.link.config.as_deref()),
    }
}
