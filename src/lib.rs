/// LAN Tunnel 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod cli;
pub mod client;
pub mod config;
pub mod connection_pool;
pub mod error;
pub mod handler;
pub mod protocol;

// 重新导出常用类型
pub use config::ClientConfig;
pub use connection_pool::{ChannelPool, PoolConfig};
pub use error::{Result, TunnelError};
pub use handler::{ConnHandler, Inbound, MessageStrategy, MAX_READ_BUFFER};
pub use protocol::{Frame, FrameType};
