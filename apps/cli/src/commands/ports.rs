//! 端口列表命令

use crate::session::{LinkArgs, build_link};
use anyhow::Result;

pub fn execute(args: &LinkArgs) -> Result<()> {
    let link = build_link(args)?;
    let ports = link.list_ports();
    if ports.is_empty() {
        println!("(没有可用串口)");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}
