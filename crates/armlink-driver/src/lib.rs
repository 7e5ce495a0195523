//! # Armlink Driver
//!
//! 串口舵机机械臂的连接管理与状态同步：
//! - 连接生命周期（`ConnectionManager`，串行化所有收发）
//! - 目标/当前状态存储（`StateStore`，ArcSwap 无锁读取）
//! - 同步引擎（`SyncEngine`，差量合并下发、超时重试、链路丢失判定）
//! - 对外句柄（`RobotLink`，后台同步线程）
//!
//! ## 使用示例
//!
//! ```no_run
//! use armlink_driver::RobotLinkBuilder;
//! use armlink_protocol::{Joint, StatePatch};
//! use std::time::Duration;
//!
//! let link = RobotLinkBuilder::new().build()?;
//! link.connect("/dev/ttyUSB0", 9600)?;
//!
//! link.set_target(&StatePatch::new().joint(Joint::J1, 45).speed(50));
//! link.wait_until_converged(Duration::from_secs(5))?;
//! println!("J1 = {}", link.current().joint(Joint::J1));
//! # Ok::<(), armlink_driver::DriverError>(())
//! ```

mod backoff;
mod builder;
pub mod config;
pub mod connection;
pub mod engine;
mod error;
mod link;
pub mod metrics;
pub mod store;

pub use backoff::Backoff;
pub use builder::{RobotLinkBuilder, SIM_PORT};
pub use config::{ConfigError, LinkConfig};
pub use connection::{AtomicConnectionState, ConnectionManager, ConnectionState, ConnectionStatus};
pub use engine::{AtomicEngineState, EngineState, PendingCommand, SyncEngine, TickOutcome};
pub use error::{ConnectError, ConnectErrorKind, DriverError, LinkFault};
pub use link::RobotLink;
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use store::{StateStore, TargetSnapshot};
