//! 配置管理命令
//!
//! 链路配置保存在 `<config_dir>/armlink/config.toml`，也可以用 `--config` 指定。

use crate::session::{default_config_path, load_config};
use anyhow::{Context, Result};
use armlink_driver::LinkConfig;
use clap::Subcommand;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置命令
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// 输出内置默认配置（TOML）
    Default,

    /// 输出实际生效的配置
    Show,

    /// 输出默认配置文件路径
    Path,

    /// 写入默认配置文件
    Init {
        /// 目标路径（默认为默认配置文件路径）
        #[arg(long)]
        path: Option<PathBuf>,

        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },

    /// 检查配置文件是否有效
    Check,
}

impl ConfigCommand {
    pub fn execute(&self, explicit: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Default => {
                print!("{}", LinkConfig::default().to_toml_string()?);
                Ok(())
            },

            ConfigCommand::Show => {
                let config = load_config(explicit)?;
                print!("{}", config.to_toml_string()?);
                Ok(())
            },

            ConfigCommand::Path => {
                let path = default_config_path()
                    .ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
                println!("{}", path.display());
                Ok(())
            },

            ConfigCommand::Init { path, force } => {
                let path = match path.clone().or_else(|| explicit.map(Path::to_path_buf)) {
                    Some(path) => path,
                    None => default_config_path()
                        .ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?,
                };
                Self::init(&path, *force)
            },

            ConfigCommand::Check => {
                let config = load_config(explicit)?;
                config.validate().context("配置无效")?;
                println!("配置有效");
                Ok(())
            },
        }
    }

    fn init(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            anyhow::bail!("{} 已存在，使用 --force 覆盖", path.display());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("创建目录 {} 失败", dir.display()))?;
        }

        let content = format!(
            "# armlink link configuration\n\n{}",
            LinkConfig::default().to_toml_string()?
        );
        fs::write(path, content).with_context(|| format!("写入 {} 失败", path.display()))?;
        println!("已写入 {}", path.display());
        Ok(())
    }
}
