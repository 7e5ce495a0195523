//! Builder 模式实现
//!
//! 提供链式构造 `RobotLink` 实例的便捷方式。

use crate::config::LinkConfig;
use crate::connection::ConnectionManager;
use crate::engine::SyncEngine;
use crate::error::DriverError;
use crate::link::{LinkParts, RobotLink};
use crate::metrics::LinkMetrics;
use crate::store::StateStore;
use armlink_protocol::{BinaryFrameCodec, FrameCodec};
#[cfg(feature = "native")]
use armlink_serial::{SerialConnector, SystemPorts};
use armlink_serial::{Connector, PortEnumerator, SimConnector, SimPorts, SimulatedDevice};
use std::sync::Arc;

/// 模拟模式下对外报告的端口名
pub const SIM_PORT: &str = "COM-sim";

/// RobotLink Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use armlink_driver::{LinkConfig, RobotLinkBuilder};
///
/// // 使用默认配置和系统串口
/// let link = RobotLinkBuilder::new().build().unwrap();
///
/// // 自定义轮询周期
/// let config = LinkConfig {
///     poll_interval_ms: 200,
///     ..LinkConfig::default()
/// };
/// let link = RobotLinkBuilder::new().config(config).build().unwrap();
/// link.connect("/dev/ttyUSB0", 9600).unwrap();
/// ```
pub struct RobotLinkBuilder {
    config: LinkConfig,
    codec: Option<Arc<dyn FrameCodec>>,
    connector: Option<Arc<dyn Connector>>,
    ports: Option<Arc<dyn PortEnumerator>>,
    store: Option<Arc<StateStore>>,
}

impl RobotLinkBuilder {
    pub fn new() -> Self {
        Self {
            config: LinkConfig::default(),
            codec: None,
            connector: None,
            ports: None,
            store: None,
        }
    }

    /// 设置链路配置（可选，默认 `LinkConfig::default()`）
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换帧编解码器（可选，默认 15 字节二进制帧）
    pub fn codec(mut self, codec: impl FrameCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// 替换端口打开器（可选，默认系统串口）
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// 替换端口枚举（可选，默认系统串口列表）
    pub fn port_enumerator(mut self, ports: impl PortEnumerator + 'static) -> Self {
        self.ports = Some(Arc::new(ports));
        self
    }

    /// 注入外部创建的状态存储
    pub fn store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 连接到进程内模拟控制板，端口列表只包含 [`SIM_PORT`]
    pub fn simulated(self, device: SimulatedDevice) -> Self {
        self.connector(SimConnector::new(device))
            .port_enumerator(SimPorts::new([SIM_PORT]))
    }

    /// 构建 `RobotLink` 并启动同步线程
    ///
    /// # 错误
    ///
    /// - `Config`: 配置校验失败
    /// - `NoConnector`: 未启用 `native` feature 且没有提供 connector
    /// - `Spawn`: 同步线程启动失败
    pub fn build(self) -> Result<RobotLink, DriverError> {
        self.config.validate()?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => Self::default_connector()?,
        };
        let ports = self.ports.unwrap_or_else(Self::default_ports);
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(BinaryFrameCodec) as Arc<dyn FrameCodec>);
        let store = self.store.unwrap_or_else(|| Arc::new(StateStore::new()));
        let metrics = Arc::new(LinkMetrics::new());

        let conn = Arc::new(ConnectionManager::new(
            connector,
            codec.clone(),
            metrics.clone(),
            self.config.read_slice(),
        ));
        let engine = SyncEngine::new(
            store.clone(),
            conn.clone(),
            codec,
            metrics.clone(),
            &self.config,
        );

        RobotLink::spawn(LinkParts {
            store,
            conn,
            ports,
            metrics,
            engine,
            config: self.config,
        })
    }

    #[cfg(feature = "native")]
    fn default_connector() -> Result<Arc<dyn Connector>, DriverError> {
        Ok(Arc::new(SerialConnector))
    }

    #[cfg(not(feature = "native"))]
    fn default_connector() -> Result<Arc<dyn Connector>, DriverError> {
        Err(DriverError::NoConnector)
    }

    #[cfg(feature = "native")]
    fn default_ports() -> Arc<dyn PortEnumerator> {
        Arc::new(SystemPorts)
    }

    #[cfg(not(feature = "native"))]
    fn default_ports() -> Arc<dyn PortEnumerator> {
        Arc::new(SimPorts::default())
    }
}

impl Default for RobotLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = LinkConfig {
            max_retries: 0,
            ..LinkConfig::default()
        };
        let result = RobotLinkBuilder::new()
            .config(config)
            .simulated(SimulatedDevice::new())
            .build();
        assert!(matches!(
            result,
            Err(DriverError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_simulated_lists_sim_port() {
        let link = RobotLinkBuilder::new()
            .simulated(SimulatedDevice::new())
            .build()
            .unwrap();
        assert_eq!(link.list_ports(), vec![SIM_PORT.to_string()]);
    }
}
