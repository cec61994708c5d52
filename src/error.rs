/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，替代泛型的 anyhow::Error，
/// 让调用者可以针对连接失败、协议错误等情况做精确处理
use std::io;
use thiserror::Error;

/// LAN Tunnel 的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 连接建立超时
    #[error("Timed out connecting to {addr} after {duration:?}")]
    ConnectTimeout {
        addr: String,
        duration: std::time::Duration,
    },

    /// 协议错误（非法帧）
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// URI 超过单字节长度字段的上限
    #[error("Frame uri too long: {len} bytes (max 255)")]
    UriTooLong { len: usize },

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建协议错误
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 检查是否为协议错误
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::ProtocolError(_))
    }
}
