/// 客户端配置
///
/// 支持 TOML 配置文件与命令行参数两种来源，命令行优先。
/// 所有时间类参数以秒为单位
use crate::cli::Cli;
use crate::error::{Result, TunnelError};
use crate::protocol::MAX_URI_LEN;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// 客户端密钥，空串表示不认证
    pub client_key: String,

    /// 中继服务器地址
    pub server_addr: String,

    /// 中继服务器端口
    pub server_port: u16,

    /// 数据通道池容量
    pub pool_size: usize,

    /// 空闲数据通道的心跳周期（秒）
    pub heartbeat_interval: u64,

    /// 拨号超时（秒），对中继和真实服务都生效
    pub connect_timeout: u64,

    /// 控制通道断开后的重连延迟（秒）
    pub reconnect_delay: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_key: String::new(),
            server_addr: "127.0.0.1".to_string(),
            server_port: 4900,
            pool_size: 100,
            heartbeat_interval: 30,
            connect_timeout: 5,
            reconnect_delay: 3,
        }
    }
}

impl ClientConfig {
    /// 从 TOML 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::config_error(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| TunnelError::config_error(format!("invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 由命令行参数构建最终配置：先取配置文件（如给出），
    /// 再用显式传入的命令行参数覆盖
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(key) = &cli.key {
            config.client_key = key.clone();
        }
        if let Some(server) = &cli.server {
            config.server_addr = server.clone();
        }
        if let Some(port) = cli.port {
            config.server_port = port;
        }
        if let Some(pool_size) = cli.pool_size {
            config.pool_size = pool_size;
        }

        config.validate()?;
        Ok(config)
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.server_addr.is_empty() {
            return Err(TunnelError::config_error("server_addr must not be empty"));
        }
        if self.server_port == 0 {
            return Err(TunnelError::config_error("server_port must not be 0"));
        }
        if self.pool_size == 0 {
            return Err(TunnelError::config_error("pool_size must be at least 1"));
        }
        if self.heartbeat_interval == 0 {
            return Err(TunnelError::config_error(
                "heartbeat_interval must be at least 1 second",
            ));
        }
        // 密钥要装进帧的 uri 字段，受单字节长度限制
        if self.client_key.len() > MAX_URI_LEN {
            return Err(TunnelError::config_error(format!(
                "client_key too long: {} bytes (max {})",
                self.client_key.len(),
                MAX_URI_LEN
            )));
        }
        Ok(())
    }

    /// 中继服务器的完整地址
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.server_addr, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1");
        assert_eq!(config.server_port, 4900);
        assert_eq!(config.pool_size, 100);
        assert_eq!(config.relay_addr(), "127.0.0.1:4900");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            client_key = "mykey"
            server_addr = "relay.example.com"
            server_port = 4901
            pool_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.client_key, "mykey");
        assert_eq!(config.server_addr, "relay.example.com");
        assert_eq!(config.server_port, 4901);
        assert_eq!(config.pool_size, 10);
        // 未给出的字段保持缺省值
        assert_eq!(config.heartbeat_interval, 30);
        assert_eq!(config.reconnect_delay, 3);
    }

    #[test]
    fn test_reject_unknown_fields() {
        let parsed = toml::from_str::<ClientConfig>("no_such_field = 1");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig {
            server_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.server_port = 4900;
        config.pool_size = 0;
        assert!(config.validate().is_err());

        config.pool_size = 1;
        config.client_key = "k".repeat(256);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["lan-tunnel", "-k", "cli-key", "-p", "5000"]);
        let config = ClientConfig::from_cli(&cli).unwrap();
        assert_eq!(config.client_key, "cli-key");
        assert_eq!(config.server_port, 5000);
        // 未覆盖的字段回落到缺省值
        assert_eq!(config.server_addr, "127.0.0.1");
    }
}
