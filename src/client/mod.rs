/// 客户端引导
///
/// 外层重连循环：拨号中继控制通道并运行其读循环直到出错，
/// 失败后按固定延迟重试。每次重连都从干净状态开始，
/// 共享的只有数据通道连接池
pub mod control;
pub mod data_channel;
pub mod local_service;

use crate::config::ClientConfig;
use crate::connection_pool::{ChannelPool, PoolConfig};
use crate::error::Result;
use crate::handler::ConnHandler;
use control::ControlStrategy;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 运行客户端（带自动重连），正常情况下不会返回
pub async fn run_client(config: ClientConfig) -> Result<()> {
    let relay_addr = config.relay_addr();
    let connect_timeout = Duration::from_secs(config.connect_timeout);
    let reconnect_delay = Duration::from_secs(config.reconnect_delay);

    let pool = ChannelPool::new(
        &relay_addr,
        PoolConfig {
            capacity: config.pool_size,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval),
            connect_timeout,
        },
    );

    loop {
        match TcpStream::connect(&relay_addr).await {
            Ok(stream) => {
                info!("Connected to relay {}", relay_addr);
                let (handler, reader) = ConnHandler::new(stream);
                let strategy = Arc::new(ControlStrategy::new(
                    config.client_key.clone(),
                    Arc::clone(&pool),
                    connect_timeout,
                ));
                // 控制通道读循环，阻塞到连接出错或被对端关闭
                handler.listen(reader, strategy).await;
                warn!(
                    "Control channel lost, reconnecting in {}s",
                    reconnect_delay.as_secs()
                );
            }
            Err(e) => {
                error!("Failed to connect to relay {}: {}", relay_addr, e);
            }
        }
        sleep(reconnect_delay).await;
    }
}
