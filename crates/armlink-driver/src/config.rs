//! 链路配置
//!
//! `LinkConfig` 是纯数据（POD），可以从 TOML 文件加载。
//! 所有字段都有默认值，配置文件中缺省的字段取默认值。
//!
//! ```toml
//! poll_interval_ms = 1000
//! command_timeout_ms = 500
//! max_retries = 3
//! backoff_base_ms = 100
//! backoff_factor = 2
//! backoff_cap_ms = 1000
//! read_slice_ms = 20
//! default_baud_rate = 9600
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 同步链路配置
///
/// # Example
///
/// ```
/// use armlink_driver::LinkConfig;
///
/// // 使用默认配置（1000ms 轮询，500ms 命令超时，最多 3 次尝试）
/// let config = LinkConfig::default();
///
/// // 自定义配置
/// let config = LinkConfig {
///     poll_interval_ms: 200,
///     command_timeout_ms: 100,
///     ..LinkConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// 轮询周期（毫秒）
    pub poll_interval_ms: u64,
    /// 单条命令的响应超时（毫秒）
    pub command_timeout_ms: u64,
    /// 同一帧连续失败多少次后判定链路丢失
    pub max_retries: u32,
    /// 退避基数（毫秒）
    pub backoff_base_ms: u64,
    /// 退避倍率
    pub backoff_factor: u32,
    /// 退避上限（毫秒）
    pub backoff_cap_ms: u64,
    /// 等待响应时检查取消的粒度（毫秒）
    pub read_slice_ms: u64,
    /// CLI 未指定时使用的波特率
    pub default_baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            command_timeout_ms: 500,
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_factor: 2,
            backoff_cap_ms: 1000,
            read_slice_ms: 20,
            default_baud_rate: 9600,
        }
    }
}

impl LinkConfig {
    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }

        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms", "must be greater than 0");
        }
        if self.command_timeout_ms == 0 {
            return invalid("command_timeout_ms", "must be greater than 0");
        }
        if self.max_retries == 0 {
            return invalid("max_retries", "must be at least 1");
        }
        if self.backoff_factor == 0 {
            return invalid("backoff_factor", "must be at least 1");
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return invalid("backoff_cap_ms", "must not be below backoff_base_ms");
        }
        if self.read_slice_ms == 0 {
            return invalid("read_slice_ms", "must be greater than 0");
        }
        if self.default_baud_rate == 0 {
            return invalid("default_baud_rate", "must be greater than 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn read_slice(&self) -> Duration {
        Duration::from_millis(self.read_slice_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = LinkConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.command_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_ms, 100);
        assert_eq!(config.backoff_factor, 2);
        assert_eq!(config.backoff_cap_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = LinkConfig::from_toml_str("poll_interval_ms = 250\nmax_retries = 5\n").unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.command_timeout_ms, 500);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = LinkConfig {
            poll_interval_ms: 50,
            ..LinkConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(LinkConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = LinkConfig::from_toml_str("poll_interval = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors() {
        let config = LinkConfig {
            max_retries: 0,
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "max_retries",
                ..
            })
        ));

        let config = LinkConfig {
            backoff_cap_ms: 50,
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "backoff_cap_ms",
                ..
            })
        ));

        let err = LinkConfig::from_toml_str("poll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "command_timeout_ms = 120").unwrap();

        let config = LinkConfig::load(file.path()).unwrap();
        assert_eq!(config.command_timeout_ms, 120);

        let err = LinkConfig::load("/nonexistent/armlink.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
