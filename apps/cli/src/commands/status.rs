//! 状态查询命令
//!
//! 连接、读取一次硬件状态，以 JSON 输出。

use crate::session::{LinkArgs, Session};
use anyhow::{Context, Result};

pub fn execute(args: &LinkArgs) -> Result<()> {
    let session = Session::open(args)?;
    let current = session.link.current();
    let json = serde_json::to_string_pretty(&current).context("序列化状态失败")?;
    println!("{}", json);
    Ok(())
}
